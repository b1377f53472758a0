//! Provides functions to parse address ranges and resolve hostnames.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

use async_trait::async_trait;
use cidr_utils::cidr::IpCidr;
use hickory_resolver::{
    config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts},
    TokioAsyncResolver,
};
use log::debug;
use tokio::{fs, io};

use crate::error::ScanError;

/// Largest number of addresses a range may hold, a /16 for IPv4.
pub const MAX_RANGE_SIZE: u128 = 1 << 16;

/// A validated network range: a CIDR block or a single address.
///
/// Host bits in a CIDR are tolerated and masked away, so
/// `192.168.1.1/24` is the same range as `192.168.1.0/24`.
///
/// ```rust
/// # use netsweep::address::AddressRange;
/// let range: AddressRange = "192.168.0.0/30".parse().unwrap();
/// assert_eq!(range.iter().count(), 4);
///
/// assert!("999.999.999.999".parse::<AddressRange>().is_err());
/// assert!("2001:db8::/64".parse::<AddressRange>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRange {
    cidr: IpCidr,
}

impl AddressRange {
    /// Iterates every address of the range, network and broadcast included.
    pub fn iter(&self) -> impl Iterator<Item = IpAddr> + '_ {
        self.cidr.iter().map(|inet| inet.address())
    }

    /// True when the range holds exactly one address.
    pub fn is_single(&self) -> bool {
        let full = if self.cidr.is_ipv4() { 32 } else { 128 };
        self.cidr.network_length() == full
    }

    pub fn is_ipv4(&self) -> bool {
        self.cidr.is_ipv4()
    }

    /// Number of addresses in the range, `None` when it overflows `u128`.
    pub fn size(&self) -> Option<u128> {
        let bits = if self.cidr.is_ipv4() { 32 } else { 128 };
        1u128.checked_shl(bits - u32::from(self.cidr.network_length()))
    }

    pub fn contains(&self, addr: IpAddr) -> bool {
        self.cidr.contains(&addr)
    }
}

impl FromStr for AddressRange {
    type Err = ScanError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        let invalid = || ScanError::InvalidRange(input.to_owned());

        let range = match IpCidr::from_str(input) {
            Ok(cidr) => Self { cidr },
            Err(_) => Self {
                cidr: parse_loose(input).ok_or_else(invalid)?,
            },
        };

        match range.size() {
            Some(size) if size <= MAX_RANGE_SIZE => Ok(range),
            _ => Err(ScanError::RangeTooLarge {
                range: range.to_string(),
                max: MAX_RANGE_SIZE,
            }),
        }
    }
}

/// Retries a CIDR that strict parsing rejected with its host bits masked off.
fn parse_loose(input: &str) -> Option<IpCidr> {
    let (addr, prefix) = match input.split_once('/') {
        Some(parts) => parts,
        None => match IpAddr::from_str(input).ok()? {
            IpAddr::V4(_) => (input, "32"),
            IpAddr::V6(_) => (input, "128"),
        },
    };
    let addr = IpAddr::from_str(addr).ok()?;
    let prefix = prefix.parse::<u8>().ok()?;
    let network = network_address(addr, prefix)?;

    IpCidr::from_str(&format!("{network}/{prefix}")).ok()
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cidr)
    }
}

fn network_address(addr: IpAddr, prefix: u8) -> Option<IpAddr> {
    match addr {
        IpAddr::V4(v4) if prefix <= 32 => {
            let mask = u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0);
            Some(IpAddr::V4(Ipv4Addr::from(u32::from(v4) & mask)))
        }
        IpAddr::V6(v6) if prefix <= 128 => {
            let mask = u128::MAX.checked_shl(128 - u32::from(prefix)).unwrap_or(0);
            Some(IpAddr::V6(Ipv6Addr::from(u128::from(v6) & mask)))
        }
        _ => None,
    }
}

/// Best-effort reverse lookup of an address.
///
/// Implementations must swallow their own failures and answer `None`.
#[async_trait]
pub trait HostnameResolver: Send + Sync {
    async fn resolve(&self, address: IpAddr) -> Option<String>;
}

/// Reverse DNS through a hickory resolver.
pub struct DnsResolver {
    inner: TokioAsyncResolver,
}

impl DnsResolver {
    /// Builds the resolver, see [`get_resolver`] for the lookup order.
    pub async fn new(resolver: Option<&str>) -> Self {
        Self {
            inner: get_resolver(resolver).await,
        }
    }
}

#[async_trait]
impl HostnameResolver for DnsResolver {
    async fn resolve(&self, address: IpAddr) -> Option<String> {
        match self.inner.reverse_lookup(address).await {
            Ok(lookup) => lookup
                .iter()
                .next()
                .map(|name| name.to_string().trim_end_matches('.').to_owned())
                .filter(|name| !name.is_empty()),
            Err(e) => {
                debug!("Reverse lookup for {address} failed: {e}");
                None
            }
        }
    }
}

/// Derive a DNS resolver.
///
/// 1. if the `resolver` parameter has been set:
///     1. assume the parameter is a path and attempt to read IPs.
///     2. parse the input as a comma-separated list of IPs.
/// 2. if `resolver` is not set:
///    1. attempt to derive a resolver from the system config. (e.g.
///       `/etc/resolv.conf` on *nix).
///    2. finally, build a CloudFlare-based resolver.
pub async fn get_resolver(resolver: Option<&str>) -> TokioAsyncResolver {
    match resolver {
        Some(r) => {
            let mut config = ResolverConfig::new();
            let resolver_ips = match read_resolver_from_file(r).await {
                Ok(ips) => ips,
                Err(_) => parse_resolver_list(r),
            };
            for ip in resolver_ips {
                config.add_name_server(NameServerConfig::new(
                    SocketAddr::new(ip, 53),
                    Protocol::Udp,
                ));
            }
            TokioAsyncResolver::tokio(config, ResolverOpts::default())
        }
        None => TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|_| {
            TokioAsyncResolver::tokio(ResolverConfig::cloudflare_tls(), ResolverOpts::default())
        }),
    }
}

fn parse_resolver_list(list: &str) -> Vec<IpAddr> {
    list.split(',')
        .filter_map(|r| IpAddr::from_str(r.trim()).ok())
        .collect()
}

/// Parses an input file of resolver IPs, one per line.
async fn read_resolver_from_file(path: &str) -> io::Result<Vec<IpAddr>> {
    let ips = fs::read_to_string(path)
        .await?
        .lines()
        .filter_map(|line| IpAddr::from_str(line.trim()).ok())
        .collect();

    Ok(ips)
}
