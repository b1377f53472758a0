//! Host discovery: find which addresses of a range are alive.
use std::{collections::HashMap, fmt, net::IpAddr, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::{stream, StreamExt};
use log::{debug, info, warn};
use serde_derive::Serialize;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::address::{AddressRange, HostnameResolver};
use crate::error::ScanError;

pub mod arp;
pub mod tcp;

pub use arp::ArpDiscovery;
pub use tcp::{TcpPingDiscovery, PING_PORTS};

/// Slack granted to a discovery primitive on top of its window.
const WINDOW_GRACE: Duration = Duration::from_millis(500);
/// Budget for all reverse lookups of one sweep together.
const RESOLVE_BUDGET: Duration = Duration::from_secs(2);
const RESOLVE_CONCURRENCY: usize = 16;

/// A raw discovery response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovered {
    pub address: IpAddr,
    pub hardware_id: Option<String>,
}

impl Discovered {
    pub fn new(address: IpAddr, hardware_id: Option<String>) -> Self {
        Self {
            address,
            hardware_id,
        }
    }
}

/// A live host as reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    pub address: IpAddr,
    pub hardware_id: Option<String>,
    pub hostname: Option<String>,
}

impl From<Discovered> for Device {
    fn from(found: Discovered) -> Self {
        Self {
            address: found.address,
            hardware_id: found.hardware_id,
            hostname: None,
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IP: {}, MAC: {}, Hostname: {}",
            self.address,
            self.hardware_id.as_deref().unwrap_or("N/A"),
            self.hostname.as_deref().unwrap_or("N/A")
        )
    }
}

/// A way of asking a range who is alive.
///
/// Implementations stop collecting once `window` has elapsed. Finding
/// nobody is an empty list, not an error.
#[async_trait]
pub trait Discover: Send + Sync {
    async fn discover(
        &self,
        range: &AddressRange,
        window: Duration,
    ) -> Result<Vec<Discovered>, ScanError>;

    fn name(&self) -> &'static str;
}

/// Every address of the range is assumed to be alive.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticDiscovery;

#[async_trait]
impl Discover for StaticDiscovery {
    async fn discover(
        &self,
        range: &AddressRange,
        _window: Duration,
    ) -> Result<Vec<Discovered>, ScanError> {
        Ok(range.iter().map(|ip| Discovered::new(ip, None)).collect())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

/// Picks a primitive per range: a single address is taken as is, IPv4
/// ranges are swept with ARP, and anything ARP cannot serve falls back to a
/// TCP ping.
pub struct AutoDiscovery {
    arp: ArpDiscovery,
    tcp: TcpPingDiscovery,
}

impl AutoDiscovery {
    pub fn new(arp: ArpDiscovery, tcp: TcpPingDiscovery) -> Self {
        Self { arp, tcp }
    }
}

#[async_trait]
impl Discover for AutoDiscovery {
    async fn discover(
        &self,
        range: &AddressRange,
        window: Duration,
    ) -> Result<Vec<Discovered>, ScanError> {
        if range.is_single() {
            return StaticDiscovery.discover(range, window).await;
        }
        if !range.is_ipv4() {
            return self.tcp.discover(range, window).await;
        }
        match self.arp.discover(range, window).await {
            Ok(found) => Ok(found),
            Err(e) => {
                warn!("{e}, falling back to TCP ping");
                self.tcp.discover(range, window).await
            }
        }
    }

    fn name(&self) -> &'static str {
        "auto"
    }
}

/// Runs discovery over a range and turns the responses into [`Device`]s.
pub struct HostSweeper {
    discovery: Arc<dyn Discover>,
    window: Duration,
    resolver: Option<Arc<dyn HostnameResolver>>,
    cancel: CancellationToken,
}

impl HostSweeper {
    pub fn new(discovery: Arc<dyn Discover>, window: Duration) -> Self {
        Self {
            discovery,
            window,
            resolver: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn HostnameResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Devices of `range` in first-response order, one per address.
    ///
    /// Returns within the discovery window plus a fixed grace and lookup
    /// budget, however many devices answer.
    pub async fn sweep(&self, range: &AddressRange) -> Result<Vec<Device>, ScanError> {
        info!(
            "Scanning network range: {range} ({} discovery, {:?} window)",
            self.discovery.name(),
            self.window
        );

        let found = tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                debug!("Sweep of {range} cancelled");
                Vec::new()
            }
            found = time::timeout(self.window + WINDOW_GRACE, self.discovery.discover(range, self.window)) => {
                if let Ok(found) = found {
                    found?
                } else {
                    warn!("{} discovery overran its window on {range}", self.discovery.name());
                    Vec::new()
                }
            }
        };

        let devices = dedup(range, found);
        info!(
            "Found devices: {:?}",
            devices.iter().map(|d| d.address).collect::<Vec<_>>()
        );
        Ok(self.resolve_hostnames(devices).await)
    }

    /// Fills in hostnames until every lookup is done or the budget runs out.
    /// Lookups still pending at that point leave `hostname` unset.
    async fn resolve_hostnames(&self, mut devices: Vec<Device>) -> Vec<Device> {
        let Some(resolver) = &self.resolver else {
            return devices;
        };

        let addresses = devices.iter().map(|d| d.address).collect::<Vec<_>>();
        let mut lookups = stream::iter(addresses.into_iter().enumerate())
            .map(|(index, address)| async move { (index, resolver.resolve(address).await) })
            .buffer_unordered(RESOLVE_CONCURRENCY);
        let budget = time::sleep(RESOLVE_BUDGET);
        tokio::pin!(budget);

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                () = &mut budget => {
                    debug!("Reverse lookups ran out of time, remaining hostnames left empty");
                    break;
                }
                next = lookups.next() => match next {
                    Some((index, hostname)) => devices[index].hostname = hostname,
                    None => break,
                },
            }
        }
        devices
    }
}

/// Keeps the first response per address, in order, dropping anything outside
/// `range`. A later response that carries a hardware id overrides an earlier
/// one.
fn dedup(range: &AddressRange, found: Vec<Discovered>) -> Vec<Device> {
    let mut seen: HashMap<IpAddr, usize> = HashMap::new();
    let mut devices: Vec<Device> = Vec::new();

    for response in found {
        if !range.contains(response.address) {
            debug!("Ignoring response from {} outside {range}", response.address);
            continue;
        }
        match seen.get(&response.address) {
            Some(&index) => {
                if response.hardware_id.is_some() {
                    devices[index].hardware_id = response.hardware_id;
                }
            }
            None => {
                seen.insert(response.address, devices.len());
                devices.push(Device::from(response));
            }
        }
    }
    devices
}
