//! A single timeout-bounded connection attempt against one port.
use std::{
    io,
    net::{IpAddr, SocketAddr},
    num::NonZero,
    time::Duration,
};

use log::debug;
use serde_derive::Serialize;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time,
};

use super::{ProbeResult, ProbeStatus, WorkItem};
use crate::error::ProbeError;

/// Banner recorded for open ports that stayed silent.
pub const NO_BANNER: &str = "No Banner";

const MAX_BANNER_BYTES: usize = 1024;

/// Coarse service family guessed from the first bytes a service sent back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceHint {
    Tls,
    DnsOverHttps,
    OpenVpn,
    Ssh,
    Http,
}

impl ServiceHint {
    /// Heuristics over raw bytes, nothing is decrypted or fully parsed.
    pub fn classify(raw: &[u8]) -> Option<Self> {
        if raw.starts_with(&[0x16, 0x03]) {
            return Some(Self::Tls);
        }
        if contains(raw, b"application/dns-message") {
            return Some(Self::DnsOverHttps);
        }
        if raw.starts_with(&[0x00, 0x0e, 0x3c, 0x4a]) {
            return Some(Self::OpenVpn);
        }
        if contains(&raw[..raw.len().min(50)], b"SSH") {
            return Some(Self::Ssh);
        }
        if raw.starts_with(b"HTTP/") {
            return Some(Self::Http);
        }
        None
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

/// Connect failures that mean "nothing usable is listening" rather than a
/// local fault. Refusals and timeouts are not told apart.
fn is_closed(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::TimedOut
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::HostUnreachable
            | io::ErrorKind::NetworkUnreachable
    )
}

/// Connects to one socket under a deadline and optionally reads a banner.
#[derive(Debug, Clone)]
pub struct Prober {
    connect_timeout: Duration,
    read_timeout: Duration,
    grab_banner: bool,
    tries: NonZero<u8>,
}

impl Prober {
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            read_timeout,
            grab_banner: true,
            tries: NonZero::<u8>::MIN,
        }
    }

    pub fn with_banner_grab(mut self, grab_banner: bool) -> Self {
        self.grab_banner = grab_banner;
        self
    }

    /// A port that ends up `Closed` is re-probed as a fresh attempt up to
    /// `tries` times in total. Zero is corrected to one.
    pub fn with_tries(mut self, tries: u8) -> Self {
        self.tries = NonZero::new(tries).unwrap_or(NonZero::<u8>::MIN);
        self
    }

    /// Probes `item`, never failing: every outcome is a [`ProbeResult`].
    pub async fn probe(&self, item: WorkItem) -> ProbeResult {
        let mut result = self.probe_once(item).await;
        for nr_try in 2..=self.tries.get() {
            if result.status != ProbeStatus::Closed {
                break;
            }
            debug!("Retrying {} (try {nr_try})", item.socket_addr());
            result = self.probe_once(item).await;
        }
        result
    }

    async fn probe_once(&self, item: WorkItem) -> ProbeResult {
        let socket = item.socket_addr();
        let stream = match self.connect(socket).await {
            Ok(stream) => stream,
            Err(e) => {
                let status = if is_closed(e.kind()) {
                    ProbeStatus::Closed
                } else {
                    debug!("Connect to {socket} failed: {e}");
                    ProbeStatus::Error
                };
                return ProbeResult {
                    error: Some(ProbeError::from(e)),
                    ..ProbeResult::new(item, status)
                };
            }
        };

        debug!("Connection was successful {socket}");
        let (banner, hint) = if self.grab_banner {
            let (banner, hint) = self.grab(stream, socket).await;
            (Some(banner), hint)
        } else {
            shutdown(stream, socket).await;
            (None, None)
        };

        ProbeResult {
            banner,
            hint,
            ..ProbeResult::new(item, ProbeStatus::Open)
        }
    }

    /// Performs the connection to the socket with timeout
    async fn connect(&self, socket: SocketAddr) -> io::Result<TcpStream> {
        time::timeout(self.connect_timeout, TcpStream::connect(socket)).await?
    }

    /// Sends the fixed HEAD request and reads whatever comes back first.
    /// Write and read share the read deadline.
    async fn grab(&self, mut stream: TcpStream, socket: SocketAddr) -> (String, Option<ServiceHint>) {
        let payload = format!("HEAD / HTTP/1.1\r\nHost: {}\r\n\r\n", socket.ip());
        let mut buf = [0u8; MAX_BANNER_BYTES];

        let read = time::timeout(self.read_timeout, async {
            stream.write_all(payload.as_bytes()).await?;
            stream.read(&mut buf).await
        })
        .await;

        shutdown(stream, socket).await;

        match read {
            Ok(Ok(n)) if n > 0 => {
                let raw = &buf[..n];
                (decode_banner(raw), ServiceHint::classify(raw))
            }
            Ok(Ok(_)) => (NO_BANNER.to_owned(), None),
            Ok(Err(e)) => {
                debug!("Banner read from {socket} failed: {e}");
                (NO_BANNER.to_owned(), None)
            }
            Err(_) => (NO_BANNER.to_owned(), None),
        }
    }
}

/// Keeps the valid UTF-8 of `raw`, skipping invalid sequences, and trims it.
fn decode_banner(raw: &[u8]) -> String {
    let text = raw.utf8_chunks().map(|chunk| chunk.valid()).collect::<String>();
    match text.trim() {
        "" => NO_BANNER.to_owned(),
        trimmed => trimmed.to_owned(),
    }
}

async fn shutdown(mut stream: TcpStream, socket: SocketAddr) {
    if let Err(e) = stream.shutdown().await {
        debug!("Shutdown stream error {socket}: {e}");
    }
}

/// One-shot probe with banner grabbing.
///
/// ```rust,no_run
/// # use std::time::Duration;
/// # use netsweep::scanner::{probe, ProbeStatus};
/// # async fn run() {
/// let result = probe(
///     "127.0.0.1".parse().unwrap(),
///     22,
///     Duration::from_millis(500),
///     Duration::from_secs(1),
/// )
/// .await;
/// if result.status == ProbeStatus::Open {
///     println!("{}", result.banner.unwrap_or_default());
/// }
/// # }
/// ```
pub async fn probe(
    address: IpAddr,
    port: u16,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> ProbeResult {
    Prober::new(connect_timeout, read_timeout)
        .probe(WorkItem::new(address, port))
        .await
}

#[cfg(test)]
mod tests {
    use super::{decode_banner, is_closed, Prober, ServiceHint, NO_BANNER};
    use crate::scanner::{ProbeStatus, WorkItem};
    use std::{io, net::IpAddr, time::Duration};
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    fn localhost() -> IpAddr {
        "127.0.0.1".parse().unwrap()
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    /// Accepts one connection, sends `banner` and drains until the peer hangs up.
    async fn serve_banner(banner: &'static [u8]) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            conn.write_all(banner).await.unwrap();
            let mut sink = [0u8; 256];
            while conn.read(&mut sink).await.is_ok_and(|n| n > 0) {}
        });
        port
    }

    #[test]
    fn refusal_and_timeout_are_both_closed() {
        assert!(is_closed(io::ErrorKind::ConnectionRefused));
        assert!(is_closed(io::ErrorKind::TimedOut));
        assert!(!is_closed(io::ErrorKind::PermissionDenied));
        assert!(!is_closed(io::ErrorKind::AddrNotAvailable));
    }

    #[test]
    fn banner_decoding_skips_only_invalid_bytes() {
        assert_eq!(decode_banner(b"  SSH-2.0\xff\xfe-test \r\n"), "SSH-2.0-test");
        assert_eq!(decode_banner("caf\u{FFFD}!".as_bytes()), "caf\u{FFFD}!");
        assert_eq!(decode_banner(b"\xc3\x28ok"), "(ok");
        assert_eq!(decode_banner(b"\xff\r\n"), NO_BANNER);
    }

    #[test]
    fn classify_known_prefixes() {
        assert_eq!(
            ServiceHint::classify(b"\x16\x03\x01\x02\x00"),
            Some(ServiceHint::Tls)
        );
        assert_eq!(ServiceHint::classify(b"\x15\x01\x00\x01\x00"), None);
        assert_eq!(
            ServiceHint::classify(b"SSH-2.0-OpenSSH_9.6\r\n"),
            Some(ServiceHint::Ssh)
        );
        assert_eq!(
            ServiceHint::classify(b"HTTP/1.1 200 OK\r\nContent-Type: application/dns-message\r\n"),
            Some(ServiceHint::DnsOverHttps)
        );
        assert_eq!(
            ServiceHint::classify(b"HTTP/1.1 404 Not Found\r\n"),
            Some(ServiceHint::Http)
        );
        assert_eq!(
            ServiceHint::classify(b"\x00\x0e\x3c\x4a\x11"),
            Some(ServiceHint::OpenVpn)
        );
        assert_eq!(ServiceHint::classify(b""), None);
    }

    #[tokio::test]
    async fn closed_port_reports_closed() {
        let port = closed_port().await;
        let prober = Prober::new(Duration::from_millis(200), Duration::from_millis(200));

        let result = prober.probe(WorkItem::new(localhost(), port)).await;

        assert_eq!(result.status, ProbeStatus::Closed);
        assert_eq!(result.banner, None);
        assert_eq!(
            result.error.and_then(|e| e.kind()),
            Some(io::ErrorKind::ConnectionRefused)
        );
    }

    #[tokio::test]
    async fn open_port_without_grab_has_no_banner() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let prober = Prober::new(Duration::from_millis(500), Duration::from_millis(200))
            .with_banner_grab(false);

        let result = prober.probe(WorkItem::new(localhost(), port)).await;

        assert_eq!(result.status, ProbeStatus::Open);
        assert_eq!(result.banner, None);
        assert_eq!(result.error, None);
    }

    #[tokio::test]
    async fn banner_is_trimmed_and_classified() {
        let port = serve_banner(b"SSH-2.0-OpenSSH_9.6\r\n").await;
        let prober = Prober::new(Duration::from_millis(500), Duration::from_millis(500));

        let result = prober.probe(WorkItem::new(localhost(), port)).await;

        assert_eq!(result.status, ProbeStatus::Open);
        assert_eq!(result.banner.as_deref(), Some("SSH-2.0-OpenSSH_9.6"));
        assert_eq!(result.hint, Some(ServiceHint::Ssh));
    }

    #[tokio::test]
    async fn whitespace_banner_falls_back_to_sentinel() {
        let port = serve_banner(b" \r\n").await;
        let prober = Prober::new(Duration::from_millis(500), Duration::from_millis(500));

        let result = prober.probe(WorkItem::new(localhost(), port)).await;

        assert_eq!(result.status, ProbeStatus::Open);
        assert_eq!(result.banner.as_deref(), Some(NO_BANNER));
    }

    #[tokio::test]
    async fn zero_tries_is_corrected_to_one() {
        let port = closed_port().await;
        let prober =
            Prober::new(Duration::from_millis(200), Duration::from_millis(200)).with_tries(0);

        let result = prober.probe(WorkItem::new(localhost(), port)).await;

        assert_eq!(result.status, ProbeStatus::Closed);
    }
}
