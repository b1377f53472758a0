//! Merges discovered devices and probe results into a per-host report.
use std::{collections::HashMap, net::IpAddr};

use itertools::Itertools;
use serde_derive::Serialize;

use crate::scanner::ProbeResult;
use crate::sweep::Device;

/// One live host and the open ports found on it, lowest port first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostReport {
    #[serde(flatten)]
    pub device: Device,
    pub open_ports: Vec<ProbeResult>,
}

impl HostReport {
    pub fn ports(&self) -> Vec<u16> {
        self.open_ports.iter().map(|r| r.port).collect()
    }
}

/// Hosts in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub hosts: Vec<HostReport>,
}

impl ScanReport {
    /// Attaches every `Open` result to the device with the same address.
    /// Devices with nothing open are kept with an empty list, results for
    /// unknown addresses are dropped.
    pub fn aggregate(devices: Vec<Device>, results: &[ProbeResult]) -> Self {
        let mut open: HashMap<IpAddr, Vec<ProbeResult>> = results
            .iter()
            .filter(|r| r.is_open())
            .cloned()
            .into_group_map_by(|r| r.address);

        let hosts = devices
            .into_iter()
            .map(|device| {
                let mut open_ports = open.remove(&device.address).unwrap_or_default();
                open_ports.sort_by_key(|r| r.port);
                HostReport { device, open_ports }
            })
            .collect();

        Self { hosts }
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Folds `other` in. A host seen in both keeps its first position and
    /// gains the other's ports.
    pub fn merge(&mut self, other: Self) {
        for host in other.hosts {
            match self
                .hosts
                .iter_mut()
                .find(|h| h.device.address == host.device.address)
            {
                Some(existing) => {
                    existing.open_ports.extend(host.open_ports);
                    existing.open_ports.sort_by_key(|r| r.port);
                    existing.open_ports.dedup_by_key(|r| r.port);
                    if existing.device.hostname.is_none() {
                        existing.device.hostname = host.device.hostname;
                    }
                    if existing.device.hardware_id.is_none() {
                        existing.device.hardware_id = host.device.hardware_id;
                    }
                }
                None => self.hosts.push(host),
            }
        }
    }

    /// Hosts the predicate cares about.
    pub fn interesting<'a, F>(&'a self, predicate: F) -> impl Iterator<Item = &'a HostReport> + 'a
    where
        F: Fn(&HostReport) -> bool + 'a,
    {
        self.hosts.iter().filter(move |host| predicate(host))
    }

    /// Every open port of the report, one line each.
    pub fn render(&self) -> String {
        format_scan_results(self.hosts.iter().flat_map(|h| h.open_ports.iter()))
    }

    /// `address -> [port,port]`, one host per line, hosts without open ports
    /// left out.
    pub fn greppable(&self) -> String {
        self.hosts
            .iter()
            .filter(|h| !h.open_ports.is_empty())
            .map(|h| format!("{} -> [{}]", h.device.address, h.ports().iter().join(",")))
            .join("\n")
    }
}

/// `IP: <address>, Port: <port>, Status: <status>, Banner: <banner>` per
/// result, newline separated. No results render as the empty string.
///
/// ```rust
/// # use netsweep::report::format_scan_results;
/// # use netsweep::scanner::ProbeResult;
/// assert_eq!(format_scan_results(&Vec::<ProbeResult>::new()), "");
/// ```
pub fn format_scan_results<'a, I>(results: I) -> String
where
    I: IntoIterator<Item = &'a ProbeResult>,
{
    results
        .into_iter()
        .map(|r| {
            format!(
                "IP: {}, Port: {}, Status: {}, Banner: {}",
                r.address,
                r.port,
                r.status,
                r.banner.as_deref().unwrap_or_default()
            )
        })
        .join("\n")
}
