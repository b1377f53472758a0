//! Bounded fan-out of probes over the tokio runtime.
use std::sync::Arc;

use futures::{future, stream, StreamExt};
use log::{debug, warn};
use tokio::{sync::mpsc, task::JoinError};
use tokio_util::sync::CancellationToken;

use super::{probe::Prober, ProbeResult, WorkItem};
use crate::error::ProbeError;

/// Probes in flight when the caller does not say otherwise.
pub const DEFAULT_MAX_CONCURRENCY: usize = 100;

/// Collaborator callback deciding which results are worth streaming out.
pub type Interest = Arc<dyn Fn(&ProbeResult) -> bool + Send + Sync>;

struct ResultStream {
    tx: mpsc::UnboundedSender<ProbeResult>,
    interest: Interest,
}

/// Runs a batch of [`WorkItem`]s through a shared [`Prober`], never more
/// than `max_concurrency` at a time.
pub struct Dispatcher {
    prober: Arc<Prober>,
    max_concurrency: usize,
    cancel: CancellationToken,
    stream: Option<ResultStream>,
}

impl Dispatcher {
    /// A `max_concurrency` of zero is treated as one.
    pub fn new(prober: Prober, max_concurrency: usize) -> Self {
        Self {
            prober: Arc::new(prober),
            max_concurrency: max_concurrency.max(1),
            cancel: CancellationToken::new(),
            stream: None,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Every result for which `interest` holds is also sent to `tx` as soon
    /// as it completes. A dropped receiver is ignored.
    pub fn with_stream(mut self, tx: mpsc::UnboundedSender<ProbeResult>, interest: Interest) -> Self {
        self.stream = Some(ResultStream { tx, interest });
        self
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Probes every item and returns exactly one result per item, in input
    /// order.
    ///
    /// Once the cancellation token fires no further items are dispatched,
    /// probes still in flight are abandoned, and every item without an
    /// outcome is reported as [`ProbeError::Cancelled`].
    pub async fn run_all(&self, items: &[WorkItem]) -> Vec<ProbeResult> {
        let mut slots: Vec<Option<ProbeResult>> = vec![None; items.len()];

        let mut finished = stream::iter(items.iter().copied().enumerate())
            .take_while(|_| future::ready(!self.cancel.is_cancelled()))
            .map(|(index, item)| {
                let prober = Arc::clone(&self.prober);
                let cancel = self.cancel.clone();
                let handle = tokio::spawn(async move {
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => ProbeResult::cancelled(item),
                        result = prober.probe(item) => result,
                    }
                });
                async move { (index, joined(item, handle.await)) }
            })
            .buffer_unordered(self.max_concurrency);

        while let Some((index, result)) = finished.next().await {
            if let Some(stream) = &self.stream {
                if (stream.interest)(&result) && stream.tx.send(result.clone()).is_err() {
                    debug!("Result receiver dropped, {} not streamed", result.item().socket_addr());
                }
            }
            slots[index] = Some(result);
        }

        slots
            .into_iter()
            .zip(items)
            .map(|(slot, &item)| slot.unwrap_or_else(|| ProbeResult::cancelled(item)))
            .collect()
    }
}

/// A probe task that panicked or was aborted only fails its own item.
fn joined(item: WorkItem, outcome: Result<ProbeResult, JoinError>) -> ProbeResult {
    outcome.unwrap_or_else(|e| {
        warn!("Probe task for {} failed: {e}", item.socket_addr());
        ProbeResult::failed(item, ProbeError::Panicked(e.to_string()))
    })
}

#[cfg(test)]
mod tests {
    use super::{joined, Dispatcher, Interest};
    use crate::error::ProbeError;
    use crate::scanner::{probe::Prober, work_items, ProbeResult, ProbeStatus, WorkItem};
    use std::{net::IpAddr, sync::Arc, time::Duration};
    use tokio::{net::TcpListener, sync::mpsc, time::Instant};
    use tokio_util::sync::CancellationToken;

    fn prober() -> Prober {
        Prober::new(Duration::from_millis(300), Duration::from_millis(100)).with_banner_grab(false)
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    /// Two listeners kept alive by the caller and a mix of closed ports.
    async fn fixture() -> (Vec<TcpListener>, Vec<WorkItem>) {
        let localhost: IpAddr = "127.0.0.1".parse().unwrap();
        let mut listeners = Vec::new();
        let mut ports = Vec::new();
        for _ in 0..2 {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            ports.push(listener.local_addr().unwrap().port());
            listeners.push(listener);
            ports.push(closed_port().await);
        }
        (listeners, work_items(&[localhost], &ports))
    }

    #[tokio::test]
    async fn results_follow_input_order() {
        let (_listeners, items) = fixture().await;
        let dispatcher = Dispatcher::new(prober(), 3);

        let results = dispatcher.run_all(&items).await;

        assert_eq!(results.len(), items.len());
        for (result, item) in results.iter().zip(&items) {
            assert_eq!(result.item(), *item);
        }
        let statuses = results.iter().map(|r| r.status).collect::<Vec<_>>();
        assert_eq!(
            statuses,
            [
                ProbeStatus::Open,
                ProbeStatus::Closed,
                ProbeStatus::Open,
                ProbeStatus::Closed
            ]
        );
    }

    #[tokio::test]
    async fn repeated_runs_agree() {
        let (_listeners, items) = fixture().await;
        let dispatcher = Dispatcher::new(prober(), 2);

        let first = dispatcher.run_all(&items).await;
        let second = dispatcher.run_all(&items).await;

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn zero_concurrency_still_makes_progress() {
        let (_listeners, items) = fixture().await;
        let dispatcher = Dispatcher::new(prober(), 0);

        assert_eq!(dispatcher.max_concurrency(), 1);
        assert_eq!(dispatcher.run_all(&items).await.len(), items.len());
    }

    #[tokio::test]
    async fn empty_batch_is_empty() {
        assert!(Dispatcher::new(prober(), 4).run_all(&[]).await.is_empty());
    }

    #[tokio::test]
    async fn cancelled_token_dispatches_nothing() {
        let (_listeners, items) = fixture().await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let dispatcher = Dispatcher::new(prober(), 2).with_cancellation(cancel);

        let results = dispatcher.run_all(&items).await;

        assert_eq!(results.len(), items.len());
        for (result, item) in results.iter().zip(&items) {
            assert_eq!(result.item(), *item);
            assert_eq!(result.status, ProbeStatus::Error);
            assert_eq!(result.error, Some(ProbeError::Cancelled));
        }
    }

    #[tokio::test]
    async fn cancellation_mid_batch_returns_promptly() {
        let target: IpAddr = "203.0.113.1".parse().unwrap();
        let items = work_items(&[target], &(1..=50).collect::<Vec<_>>());
        let cancel = CancellationToken::new();
        let dispatcher = Dispatcher::new(
            Prober::new(Duration::from_secs(10), Duration::from_secs(1)),
            5,
        )
        .with_cancellation(cancel.clone());

        let started = Instant::now();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });
        let results = dispatcher.run_all(&items).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(results.len(), items.len());
        assert!(results.iter().all(|r| r.status != ProbeStatus::Open));
    }

    #[tokio::test]
    async fn panicked_task_fails_only_its_item() {
        let item = WorkItem::new("127.0.0.1".parse().unwrap(), 80);
        let outcome = tokio::spawn(async { None::<ProbeResult>.expect("boom") }).await;

        let result = joined(item, outcome);

        assert_eq!(result.item(), item);
        assert_eq!(result.status, ProbeStatus::Error);
        assert!(matches!(result.error, Some(ProbeError::Panicked(ref m)) if m.contains("panicked")));
    }

    #[tokio::test]
    async fn stream_only_receives_interesting_results() {
        let (_listeners, items) = fixture().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let interest: Interest = Arc::new(|r: &ProbeResult| r.is_open());
        let dispatcher = Dispatcher::new(prober(), 4).with_stream(tx, interest);

        let results = dispatcher.run_all(&items).await;
        drop(dispatcher);

        let mut streamed = Vec::new();
        while let Some(result) = rx.recv().await {
            streamed.push(result.port);
        }
        streamed.sort_unstable();
        let mut expected = results
            .iter()
            .filter(|r| r.is_open())
            .map(|r| r.port)
            .collect::<Vec<_>>();
        expected.sort_unstable();
        assert_eq!(streamed, expected);
        assert_eq!(streamed.len(), 2);
    }

    #[tokio::test]
    async fn dropped_receiver_does_not_fail_the_batch() {
        let (_listeners, items) = fixture().await;
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let dispatcher = Dispatcher::new(prober(), 4).with_stream(tx, Arc::new(|_: &ProbeResult| true));

        assert_eq!(dispatcher.run_all(&items).await.len(), items.len());
    }
}
