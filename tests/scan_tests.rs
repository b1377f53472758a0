use std::{net::IpAddr, sync::Arc, time::Duration};

use netsweep::address::AddressRange;
use netsweep::error::ScanError;
use netsweep::input::{PortRange, ScanOrder};
use netsweep::port_strategy::PortStrategy;
use netsweep::scanner::{
    probe, work_items, Dispatcher, ProbeStatus, Prober, Scanner, NO_BANNER,
};
use netsweep::sweep::{ArpDiscovery, AutoDiscovery, HostSweeper, TcpPingDiscovery};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
    time::Instant,
};

fn localhost() -> IpAddr {
    "127.0.0.1".parse().unwrap()
}

/// Answers every connection with `banner`, then waits for the client to hang up.
async fn serve_banner(banner: &'static [u8]) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut conn, _)) = listener.accept().await {
            tokio::spawn(async move {
                conn.write_all(banner).await.unwrap();
                let mut sink = [0u8; 256];
                while conn.read(&mut sink).await.is_ok_and(|n| n > 0) {}
            });
        }
    });
    port
}

fn scanner(ports: Vec<u16>) -> Scanner {
    let connect = Duration::from_millis(500);
    let prober = Prober::new(connect, Duration::from_millis(500));
    let discovery = AutoDiscovery::new(ArpDiscovery::new(), TcpPingDiscovery::new(connect));
    Scanner::new(
        HostSweeper::new(Arc::new(discovery), Duration::from_millis(500)),
        Dispatcher::new(prober, 100),
        &PortStrategy::Manual(ports),
        &[],
    )
}

#[tokio::test]
async fn malformed_range_is_rejected() {
    let err = scanner(vec![80])
        .scan("999.999.999.999")
        .await
        .unwrap_err();

    assert!(matches!(err, ScanError::InvalidRange(_)));
    assert_eq!(err.to_string(), "Invalid IP address format: 999.999.999.999");
}

#[tokio::test]
async fn ipv6_subnet_is_too_large_to_sweep() {
    let err = scanner(vec![80]).scan("2001:db8::/64").await.unwrap_err();

    assert!(matches!(err, ScanError::RangeTooLarge { .. }));
}

#[tokio::test]
async fn single_host_reports_http_banner() {
    let port = serve_banner(b"HTTP/1.1 200 OK").await;

    let report = scanner(vec![port]).scan("127.0.0.1").await.unwrap();

    assert_eq!(report.hosts.len(), 1);
    let host = &report.hosts[0];
    assert_eq!(host.device.address, localhost());
    assert_eq!(host.open_ports.len(), 1);
    assert_eq!(host.open_ports[0].status, ProbeStatus::Open);
    assert_eq!(host.open_ports[0].banner.as_deref(), Some("HTTP/1.1 200 OK"));
    assert_eq!(
        report.render(),
        format!("IP: 127.0.0.1, Port: {port}, Status: open, Banner: HTTP/1.1 200 OK")
    );
}

#[tokio::test]
async fn silent_listener_gets_no_banner() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let read_timeout = Duration::from_millis(300);

    let started = Instant::now();
    let result = probe(localhost(), port, Duration::from_millis(500), read_timeout).await;

    assert_eq!(result.status, ProbeStatus::Open);
    assert_eq!(result.banner.as_deref(), Some(NO_BANNER));
    assert!(started.elapsed() >= read_timeout);
    drop(listener);
}

#[tokio::test]
async fn nothing_listening_is_closed_within_timeout() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let connect_timeout = Duration::from_millis(500);

    let started = Instant::now();
    let result = probe(localhost(), port, connect_timeout, Duration::from_millis(500)).await;

    assert_eq!(result.status, ProbeStatus::Closed);
    assert!(started.elapsed() < connect_timeout + Duration::from_millis(250));
}

#[tokio::test]
async fn unresponsive_range_yields_empty_report() {
    let range: AddressRange = "203.0.113.0/30".parse().unwrap();
    let window = Duration::from_millis(300);
    let sweeper = HostSweeper::new(
        Arc::new(TcpPingDiscovery::new(Duration::from_millis(500))),
        window,
    );
    let strategy = PortStrategy::pick(Some(PortRange::new(1, 1024).unwrap()), None, ScanOrder::Serial);
    let scanner = Scanner::new(
        sweeper,
        Dispatcher::new(Prober::new(Duration::from_millis(500), Duration::from_millis(500)), 100),
        &strategy,
        &[],
    );

    let started = Instant::now();
    let report = scanner.run(&range).await.unwrap();

    assert!(report.is_empty());
    assert_eq!(report.render(), "");
    assert!(started.elapsed() < window + Duration::from_secs(2));
}

#[tokio::test]
async fn unreachable_host_has_no_open_ports() {
    let target: IpAddr = "203.0.113.1".parse().unwrap();
    let items = work_items(&[target], &(65530..=65535).collect::<Vec<_>>());
    let dispatcher = Dispatcher::new(
        Prober::new(Duration::from_millis(500), Duration::from_millis(500)),
        100,
    );

    let started = Instant::now();
    let results = dispatcher.run_all(&items).await;

    assert_eq!(results.len(), 6);
    assert!(results.iter().all(|r| r.status != ProbeStatus::Open));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn repeated_scans_agree_on_status() {
    let open = serve_banner(b"SSH-2.0-test\r\n").await;
    let closed = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let scanner = scanner(vec![closed, open]);

    let first = scanner.scan("127.0.0.1").await.unwrap();
    let second = scanner.scan("127.0.0.1").await.unwrap();

    assert_eq!(first.hosts[0].ports(), [open]);
    assert_eq!(first.hosts[0].ports(), second.hosts[0].ports());
}
