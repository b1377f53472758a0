//! ARP sweep of an IPv4 segment over a raw datalink channel.
//!
//! Opening the channel needs raw socket privileges (root or `CAP_NET_RAW`).
use std::{
    io,
    net::{IpAddr, Ipv4Addr},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use log::debug;
use pnet::datalink::{self, Channel, MacAddr, NetworkInterface};
use pnet::ipnetwork::IpNetwork;
use pnet::packet::arp::{ArpHardwareTypes, ArpOperations, ArpPacket, MutableArpPacket};
use pnet::packet::ethernet::{EtherTypes, EthernetPacket, MutableEthernetPacket};
use pnet::packet::Packet;

use super::{Discover, Discovered};
use crate::address::AddressRange;
use crate::error::ScanError;

const ETH_HDR_LEN: usize = 14;
const ARP_LEN: usize = 28;
/// Shortest legal Ethernet frame without the FCS, requests are padded to it.
const MIN_ETH_FRAME_NO_FCS: usize = 60;
/// How long one blocking read waits before the deadline is rechecked.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Broadcasts one ARP request per address of the range and collects the
/// replies that arrive within the window.
#[derive(Debug, Clone, Default)]
pub struct ArpDiscovery {
    interface: Option<String>,
}

impl ArpDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sweep through the named interface instead of the one whose network
    /// contains the range.
    pub fn with_interface(mut self, interface: Option<String>) -> Self {
        self.interface = interface;
        self
    }
}

#[async_trait]
impl Discover for ArpDiscovery {
    async fn discover(
        &self,
        range: &AddressRange,
        window: Duration,
    ) -> Result<Vec<Discovered>, ScanError> {
        let targets = range
            .iter()
            .filter_map(|ip| match ip {
                IpAddr::V4(v4) => Some(v4),
                IpAddr::V6(_) => None,
            })
            .collect::<Vec<_>>();
        let Some(&first) = targets.first() else {
            return Err(ScanError::Discovery(format!(
                "ARP needs an IPv4 range, got {range}"
            )));
        };

        let (intf, source) =
            select_interface(datalink::interfaces(), self.interface.as_deref(), first)
                .ok_or_else(|| {
                    ScanError::Discovery(format!("no usable interface for {range}"))
                })?;
        debug!("ARP sweep of {range} on {} from {}", intf.name, source.1);

        tokio::task::spawn_blocking(move || broadcast_and_collect(&intf, source, &targets, window))
            .await
            .map_err(|e| ScanError::Discovery(e.to_string()))?
    }

    fn name(&self) -> &'static str {
        "arp"
    }
}

/// Finds the interface to sweep from and the MAC and address it speaks with.
///
/// A named interface must exist and carry an IPv4 address. Otherwise the
/// first non-loopback interface whose network contains `target` wins.
fn select_interface(
    interfaces: Vec<NetworkInterface>,
    name: Option<&str>,
    target: Ipv4Addr,
) -> Option<(NetworkInterface, (MacAddr, Ipv4Addr))> {
    interfaces.into_iter().find_map(|intf| {
        let mac = intf.mac?;
        let source = intf.ips.iter().find_map(|net| match (net, name) {
            (IpNetwork::V4(v4), Some(_)) => Some(v4.ip()),
            (IpNetwork::V4(v4), None) if v4.contains(target) => Some(v4.ip()),
            _ => None,
        })?;
        let wanted = match name {
            Some(name) => intf.name == name,
            None => !intf.is_loopback(),
        };
        wanted.then(|| (intf, (mac, source)))
    })
}

/// Builds a broadcast "who has `target`" frame.
fn build_request(src_mac: MacAddr, src_addr: Ipv4Addr, target: Ipv4Addr) -> Result<Vec<u8>, ScanError> {
    let truncated = || ScanError::Discovery("ARP frame buffer too small".to_owned());
    let mut buffer = vec![0u8; MIN_ETH_FRAME_NO_FCS];

    let mut ethernet = MutableEthernetPacket::new(&mut buffer).ok_or_else(truncated)?;
    ethernet.set_destination(MacAddr::broadcast());
    ethernet.set_source(src_mac);
    ethernet.set_ethertype(EtherTypes::Arp);

    let mut arp = MutableArpPacket::new(&mut buffer[ETH_HDR_LEN..ETH_HDR_LEN + ARP_LEN])
        .ok_or_else(truncated)?;
    arp.set_hardware_type(ArpHardwareTypes::Ethernet);
    arp.set_protocol_type(EtherTypes::Ipv4);
    arp.set_hw_addr_len(6);
    arp.set_proto_addr_len(4);
    arp.set_operation(ArpOperations::Request);
    arp.set_sender_hw_addr(src_mac);
    arp.set_target_hw_addr(MacAddr::zero());
    arp.set_sender_proto_addr(src_addr);
    arp.set_target_proto_addr(target);

    Ok(buffer)
}

/// The sender of an ARP reply, anything else is `None`.
fn parse_reply(frame: &[u8]) -> Option<Discovered> {
    let ethernet = EthernetPacket::new(frame)?;
    if ethernet.get_ethertype() != EtherTypes::Arp {
        return None;
    }
    let arp = ArpPacket::new(ethernet.payload())?;
    (arp.get_operation() == ArpOperations::Reply).then(|| {
        Discovered::new(
            IpAddr::V4(arp.get_sender_proto_addr()),
            Some(arp.get_sender_hw_addr().to_string()),
        )
    })
}

fn broadcast_and_collect(
    intf: &NetworkInterface,
    (src_mac, src_addr): (MacAddr, Ipv4Addr),
    targets: &[Ipv4Addr],
    window: Duration,
) -> Result<Vec<Discovered>, ScanError> {
    let config = datalink::Config {
        read_timeout: Some(POLL_INTERVAL),
        ..Default::default()
    };
    let (mut tx, mut rx) = match datalink::channel(intf, config) {
        Ok(Channel::Ethernet(tx, rx)) => (tx, rx),
        Ok(_) => {
            return Err(ScanError::Discovery(format!(
                "non-ethernet channel for {}",
                intf.name
            )))
        }
        Err(e) => {
            return Err(ScanError::Discovery(format!(
                "cannot open datalink channel on {}: {e}",
                intf.name
            )))
        }
    };

    let deadline = Instant::now() + window;
    for &target in targets {
        if Instant::now() >= deadline {
            break;
        }
        let frame = build_request(src_mac, src_addr, target)?;
        if let Some(Err(e)) = tx.send_to(&frame, None) {
            debug!("ARP request to {target} failed: {e}");
        }
    }

    let mut found = Vec::new();
    while Instant::now() < deadline {
        match rx.next() {
            Ok(frame) => found.extend(parse_reply(frame)),
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {}
            Err(e) => debug!("ARP receive on {} failed: {e}", intf.name),
        }
    }
    Ok(found)
}
