//! Discovery by TCP connect, for when the link layer is out of reach.
use std::{collections::HashSet, io, net::IpAddr, time::Duration};

use async_trait::async_trait;
use log::debug;
use tokio::time;
use tokio_util::sync::CancellationToken;

use super::{Discover, Discovered};
use crate::address::AddressRange;
use crate::error::ScanError;
use crate::scanner::{work_items, Dispatcher, ProbeResult, Prober, DEFAULT_MAX_CONCURRENCY};

/// Ports likely to answer on an ordinary host.
pub const PING_PORTS: [u16; 6] = [22, 80, 443, 445, 3389, 8080];

/// Connects to a few common ports on every address. A host is alive if any
/// port accepts or actively refuses the connection.
#[derive(Debug, Clone)]
pub struct TcpPingDiscovery {
    connect_timeout: Duration,
    max_concurrency: usize,
    ports: Vec<u16>,
    cancel: CancellationToken,
}

impl TcpPingDiscovery {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            ports: PING_PORTS.to_vec(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_ports(mut self, ports: Vec<u16>) -> Self {
        self.ports = ports;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

fn answered(result: &ProbeResult) -> bool {
    result.is_open()
        || result
            .error
            .as_ref()
            .and_then(|e| e.kind())
            .is_some_and(|kind| kind == io::ErrorKind::ConnectionRefused)
}

#[async_trait]
impl Discover for TcpPingDiscovery {
    async fn discover(
        &self,
        range: &AddressRange,
        window: Duration,
    ) -> Result<Vec<Discovered>, ScanError> {
        let ips = range.iter().collect::<Vec<_>>();
        let items = work_items(&ips, &self.ports);

        let expired = self.cancel.child_token();
        let prober = Prober::new(self.connect_timeout.min(window), Duration::ZERO)
            .with_banner_grab(false);
        let dispatcher =
            Dispatcher::new(prober, self.max_concurrency).with_cancellation(expired.clone());

        let run = dispatcher.run_all(&items);
        tokio::pin!(run);
        let results = tokio::select! {
            results = &mut run => results,
            () = time::sleep(window) => {
                debug!("TCP ping window elapsed on {range}");
                expired.cancel();
                run.await
            }
        };

        let alive = results
            .iter()
            .filter(|r| answered(r))
            .map(|r| r.address)
            .collect::<HashSet<_>>();

        Ok(ips
            .into_iter()
            .filter(|ip| alive.contains(ip))
            .map(|ip| Discovered::new(ip, None))
            .collect())
    }

    fn name(&self) -> &'static str {
        "tcp"
    }
}
