//! Core functionality for actual scanning behaviour.
use crate::address::AddressRange;
use crate::error::{ProbeError, ScanError};
use crate::port_strategy::PortStrategy;
use crate::report::ScanReport;
use crate::sweep::HostSweeper;
use log::{debug, warn};

use itertools::iproduct;
use serde_derive::Serialize;
use std::{
    fmt,
    net::{IpAddr, SocketAddr},
};

pub mod dispatch;
pub mod probe;

pub use dispatch::{Dispatcher, Interest, DEFAULT_MAX_CONCURRENCY};
pub use probe::{probe, Prober, ServiceHint, NO_BANNER};

/// One address and one port to probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkItem {
    pub address: IpAddr,
    pub port: u16,
}

impl WorkItem {
    pub fn new(address: IpAddr, port: u16) -> Self {
        Self { address, port }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

/// Outcome of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Open,
    Closed,
    Error,
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Error => "error",
        })
    }
}

/// What came back from probing one [`WorkItem`].
///
/// `banner` is only set for open ports when banner grabbing is enabled.
/// `error` carries the cause of a `Closed` or `Error` status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub address: IpAddr,
    pub port: u16,
    pub status: ProbeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<ServiceHint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ProbeError>,
}

impl ProbeResult {
    pub fn new(item: WorkItem, status: ProbeStatus) -> Self {
        Self {
            address: item.address,
            port: item.port,
            status,
            banner: None,
            hint: None,
            error: None,
        }
    }

    pub fn failed(item: WorkItem, error: ProbeError) -> Self {
        Self {
            error: Some(error),
            ..Self::new(item, ProbeStatus::Error)
        }
    }

    pub fn cancelled(item: WorkItem) -> Self {
        Self::failed(item, ProbeError::Cancelled)
    }

    pub fn is_open(&self) -> bool {
        self.status == ProbeStatus::Open
    }

    pub fn item(&self) -> WorkItem {
        WorkItem::new(self.address, self.port)
    }
}

/// Expands addresses and ports into work items, port by port.
///
/// Every address is hit once for a port before moving to the next port.
///
/// ```rust
/// # use std::net::IpAddr;
/// # use netsweep::scanner::{work_items, WorkItem};
/// let ips = ["10.0.0.1".parse::<IpAddr>().unwrap(), "10.0.0.2".parse().unwrap()];
/// let items = work_items(&ips, &[22, 80]);
/// assert_eq!(items[1], WorkItem::new(ips[1], 22));
/// assert_eq!(items.len(), 4);
/// ```
pub fn work_items(ips: &[IpAddr], ports: &[u16]) -> Vec<WorkItem> {
    iproduct!(ports.iter(), ips.iter())
        .map(|(&port, &ip)| WorkItem::new(ip, port))
        .collect()
}

/// Sweeps a range, probes every live host on the configured ports and
/// aggregates the results.
pub struct Scanner {
    sweeper: HostSweeper,
    dispatcher: Dispatcher,
    ports: Vec<u16>,
}

impl Scanner {
    /// `exclude_ports` is filtered out of whatever the strategy yields.
    pub fn new(
        sweeper: HostSweeper,
        dispatcher: Dispatcher,
        port_strategy: &PortStrategy,
        exclude_ports: &[u16],
    ) -> Self {
        Self {
            sweeper,
            dispatcher,
            ports: port_strategy.ordered(exclude_ports),
        }
    }

    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    /// Parses `target` and scans it. A malformed target fails before any
    /// socket is opened.
    pub async fn scan(&self, target: &str) -> Result<ScanReport, ScanError> {
        let range = target.parse::<AddressRange>()?;
        self.run(&range).await
    }

    pub async fn run(&self, range: &AddressRange) -> Result<ScanReport, ScanError> {
        let devices = self.sweeper.sweep(range).await?;
        let ips = devices.iter().map(|d| d.address).collect::<Vec<_>>();
        let items = work_items(&ips, &self.ports);

        debug!(
            "Start scanning sockets. \nMax concurrency {}\nNumber of ip-s {}\nNumber of ports {}\nTargets all together {} ",
            self.dispatcher.max_concurrency(),
            ips.len(),
            self.ports.len(),
            items.len()
        );

        let results = self.dispatcher.run_all(&items).await;
        debug!(
            "Open sockets found: {:?}",
            results
                .iter()
                .filter(|r| r.is_open())
                .map(|r| r.item().socket_addr())
                .collect::<Vec<_>>()
        );

        Ok(ScanReport::aggregate(devices, &results))
    }

    /// Runs every range in turn and merges their reports. A range that fails
    /// is skipped, its error returned next to the report of the others.
    pub async fn run_ranges(&self, ranges: &[AddressRange]) -> (ScanReport, Vec<ScanError>) {
        let mut report = ScanReport::default();
        let mut errors = Vec::new();

        for range in ranges {
            match self.run(range).await {
                Ok(found) => report.merge(found),
                Err(e) => {
                    warn!("Skipping {range}: {e}");
                    errors.push(e);
                }
            }
        }
        (report, errors)
    }
}
