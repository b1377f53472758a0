//! Provides a means to read, parse and hold configuration options for scans.
use clap::{Parser, ValueEnum};
use serde_derive::Deserialize;
use std::fs;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ScanError;

const LOWEST_PORT_NUMBER: u16 = 1;
const TOP_PORT_NUMBER: u16 = 65535;

/// Ports scanned when neither `--ports` nor `--common` is given.
pub const DEFAULT_PORT_RANGE: PortRange = PortRange {
    start: 1,
    end: 1024,
};

/// Well known service ports used by `--common`.
pub const COMMON_PORTS: [u16; 26] = [
    21, 22, 23, 25, 53, 80, 110, 135, 139, 143, 161, 162, 389, 443, 445, 636, 993, 995, 1723,
    3306, 3389, 5900, 8000, 8080, 8443, 9100,
];

/// Represents the range of ports to be scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    start: u16,
    end: u16,
}

impl PortRange {
    /// Builds a range, rejecting anything outside `1 <= start <= end <= 65535`.
    pub fn new(start: u16, end: u16) -> Result<Self, ScanError> {
        if start < LOWEST_PORT_NUMBER || start > end {
            return Err(ScanError::InvalidPortRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn iter(&self) -> RangeInclusive<u16> {
        self.start..=self.end
    }
}

/// Fails on the first port outside `1..=65535`.
fn validate_ports(ports: Option<&[u16]>) -> Result<(), ScanError> {
    match ports.into_iter().flatten().find(|&&port| port < LOWEST_PORT_NUMBER) {
        Some(&port) => Err(ScanError::InvalidPortRange {
            start: port,
            end: port,
        }),
        None => Ok(()),
    }
}

/// Represents the strategy in which the port scanning will run.
///   - Serial will run from start to end, for example 1 to 1_000.
///   - Random will randomize the order in which ports will be scanned.
#[derive(Deserialize, Debug, ValueEnum, Clone, Copy, PartialEq, Eq)]
pub enum ScanOrder {
    Serial,
    Random,
}

/// How live hosts are found before their ports are probed.
///   - auto uses ARP for multi-address ranges, falling back to a TCP ping
///     when the link layer is not usable, and skips discovery for a single address.
///   - arp broadcasts ARP requests on the local segment.
///   - tcp connects to a handful of common ports on every address.
///   - none assumes every address in the range is alive.
#[derive(Deserialize, Debug, ValueEnum, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMethod {
    Auto,
    Arp,
    Tcp,
    #[value(name = "none")]
    #[serde(rename = "none")]
    Skip,
}

pub type Ports = Vec<u16>;

#[cfg(not(tarpaulin_include))]
pub fn parse_ports_and_ranges(input: &str) -> Result<Ports, String> {
    let mut ports = Vec::new();

    for part in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if part.contains('-') {
            let range = parse_port_range(part)?;
            ports.extend(range.iter());
        } else {
            ports.push(parse_single_port(part)?);
        }
    }

    if ports.is_empty() {
        return Err(String::from("No valid ports or ranges provided"));
    }

    ports.sort_unstable();
    ports.dedup();

    Ok(ports)
}

fn parse_port_range(range_str: &str) -> Result<PortRange, String> {
    let invalid_format =
        || format!("Invalid range format '{range_str}'. Expected 'start-end'. Example: 1-1000.");
    let (start, end) = range_str.split_once('-').ok_or_else(invalid_format)?;
    if end.contains('-') {
        return Err(invalid_format());
    }

    let start: u16 = start
        .parse()
        .map_err(|_| format!("Invalid start port '{start}' in range '{range_str}'"))?;
    let end: u16 = end
        .parse()
        .map_err(|_| format!("Invalid end port '{end}' in range '{range_str}'"))?;

    if start > end {
        return Err(format!(
            "Start port {start} is greater than end port {end} in range '{range_str}'",
        ));
    }

    PortRange::new(start, end).map_err(|_| {
        format!(
            "Ports in range '{range_str}' must be between {LOWEST_PORT_NUMBER} and {TOP_PORT_NUMBER}",
        )
    })
}

fn parse_single_port(port_str: &str) -> Result<u16, String> {
    let port: u16 = port_str
        .parse()
        .map_err(|_| format!("Invalid port number '{port_str}'"))?;

    if port < LOWEST_PORT_NUMBER {
        return Err(format!(
            "Port {port} must be between {LOWEST_PORT_NUMBER} and {TOP_PORT_NUMBER}",
        ));
    }

    Ok(port)
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "netsweep",
    version = env!("CARGO_PKG_VERSION"),
    max_term_width = 120,
    help_template = "{bin} {version}\n{about}\n\nUSAGE:\n    {usage}\n\nOPTIONS:\n{options}",
)]
#[allow(clippy::struct_excessive_bools)]
/// Finds live hosts on the local segment and probes them for open TCP services.
/// Only scan networks you are allowed to scan.
pub struct Opts {
    /// A comma-delimited list of CIDRs or IPs to be swept.
    #[arg(short, long, value_delimiter = ',')]
    pub addresses: Vec<String>,

    /// A list of ports and/or port ranges to be probed. Examples: 80,443,8080 or 1-1000 or 1-1000,8080
    #[arg(short, long, alias = "range", value_parser = parse_ports_and_ranges, conflicts_with = "common")]
    pub ports: Option<Ports>,

    /// Probe a short list of well known service ports.
    #[arg(long)]
    pub common: bool,

    /// Whether to ignore the configuration file or not.
    #[arg(short, long)]
    pub no_config: bool,

    /// Custom path to config file
    #[arg(short, long, value_parser)]
    pub config_path: Option<PathBuf>,

    /// Greppable mode. Only output the hosts and their open ports.
    #[arg(short, long)]
    pub greppable: bool,

    /// Accessible mode. Turns off features which negatively affect screen readers.
    #[arg(long)]
    pub accessible: bool,

    /// Print the report as JSON.
    #[arg(long, conflicts_with = "greppable")]
    pub json: bool,

    /// A comma-delimited list or file of DNS resolvers used for reverse lookups.
    #[arg(long)]
    pub resolver: Option<String>,

    /// Skip reverse DNS lookups of discovered hosts.
    #[arg(long)]
    pub no_resolve: bool,

    /// The maximum number of probes in flight at once. Depends on the open
    /// file limit of your OS.
    #[arg(short, long, default_value = "100")]
    pub batch_size: usize,

    /// The timeout in milliseconds before a connection attempt is assumed closed.
    #[arg(short, long, default_value = "500")]
    pub timeout: u32,

    /// The timeout in milliseconds to wait for a service banner.
    #[arg(long, default_value = "1000")]
    pub read_timeout: u32,

    /// Do not send the banner probe, only check whether ports are open.
    #[arg(long)]
    pub no_grab: bool,

    /// The number of connection attempts before a port is assumed to be closed.
    /// If set to 0, it is corrected to 1.
    #[arg(long, default_value = "1")]
    pub tries: u8,

    /// How long in milliseconds host discovery collects responses.
    #[arg(short, long, default_value = "3000")]
    pub window: u32,

    /// Host discovery method.
    #[arg(long, value_enum, ignore_case = true, default_value = "auto")]
    pub discovery: DiscoveryMethod,

    /// Network interface used for ARP discovery. Picked from the range when omitted.
    #[arg(short, long)]
    pub interface: Option<String>,

    /// Abort the whole scan after this many milliseconds.
    #[arg(long)]
    pub deadline: Option<u64>,

    /// Automatically ups the ULIMIT with the value you provided.
    #[arg(short, long)]
    pub ulimit: Option<u64>,

    /// The order of scanning to be performed. The "serial" option will
    /// scan ports in ascending order while the "random" option will scan
    /// ports randomly.
    #[arg(long, value_enum, ignore_case = true, default_value = "serial")]
    pub scan_order: ScanOrder,

    /// A list of comma separated ports to be excluded from scanning. Example: 80,443,8080.
    #[arg(short, long, value_delimiter = ',', value_parser = parse_single_port)]
    pub exclude_ports: Option<Vec<u16>>,
}

#[cfg(not(tarpaulin_include))]
impl Opts {
    pub fn read() -> Self {
        let mut opts = Self::parse();

        if opts.common {
            opts.ports = Some(COMMON_PORTS.to_vec());
        }

        opts
    }

    /// Reads the command line arguments into an Opts struct and merge
    /// values found within the user configuration file.
    pub fn merge(&mut self, config: &Config) {
        if !self.no_config {
            self.merge_required(config);
            self.merge_optional(config);
        }
    }

    fn merge_required(&mut self, config: &Config) {
        macro_rules! merge_required {
            ($($field: ident),+) => {
                $(
                    if let Some(e) = &config.$field {
                        self.$field = e.clone();
                    }
                )+
            }
        }

        merge_required!(
            addresses, greppable, accessible, batch_size, timeout, read_timeout, tries, window,
            scan_order, discovery, no_grab, no_resolve
        );
    }

    fn merge_optional(&mut self, config: &Config) {
        macro_rules! merge_optional {
            ($($field: ident),+) => {
                $(
                    if config.$field.is_some() {
                        self.$field = config.$field.clone();
                    }
                )+
            }
        }

        // Ports given on the command line win over the config file
        if self.ports.is_none() {
            self.ports = config.ports.clone();
        }

        merge_optional!(resolver, interface, ulimit, deadline, exclude_ports);
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.timeout))
    }

    pub fn banner_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.read_timeout))
    }

    pub fn discovery_window(&self) -> Duration {
        Duration::from_millis(u64::from(self.window))
    }
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            addresses: vec![],
            ports: None,
            common: false,
            no_config: true,
            config_path: None,
            greppable: true,
            accessible: false,
            json: false,
            resolver: None,
            no_resolve: false,
            batch_size: 0,
            timeout: 0,
            read_timeout: 0,
            no_grab: false,
            tries: 0,
            window: 0,
            discovery: DiscoveryMethod::Auto,
            interface: None,
            deadline: None,
            ulimit: None,
            scan_order: ScanOrder::Serial,
            exclude_ports: None,
        }
    }
}

/// Struct used to deserialize the options specified within our config file.
/// These will be further merged with our command line arguments in order to
/// generate the final Opts struct.
#[cfg(not(tarpaulin_include))]
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    addresses: Option<Vec<String>>,
    ports: Option<Vec<u16>>,
    greppable: Option<bool>,
    accessible: Option<bool>,
    batch_size: Option<usize>,
    timeout: Option<u32>,
    read_timeout: Option<u32>,
    tries: Option<u8>,
    window: Option<u32>,
    scan_order: Option<ScanOrder>,
    discovery: Option<DiscoveryMethod>,
    no_grab: Option<bool>,
    no_resolve: Option<bool>,
    resolver: Option<String>,
    interface: Option<String>,
    ulimit: Option<u64>,
    deadline: Option<u64>,
    exclude_ports: Option<Vec<u16>>,
}

#[cfg(not(tarpaulin_include))]
impl Config {
    /// Reads the configuration file with TOML format and parses it into a
    /// Config struct. A missing file yields an empty config.
    ///
    /// # Format
    ///
    /// addresses = ["192.168.1.0/24"]
    /// ports = [22, 80, 443]
    /// batch_size = 100
    /// discovery = "tcp"
    /// scan_order = "Serial"
    ///
    pub fn read(custom_config_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let Some(config_path) = custom_config_path.or_else(default_config_path) else {
            return Ok(Self::default());
        };
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)?;
        Self::parse(&content)
    }

    /// Parses TOML content, rejecting out-of-range `ports` and `exclude_ports`.
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        validate_ports(config.ports.as_deref())?;
        validate_ports(config.exclude_ports.as_deref())?;
        Ok(config)
    }
}

/// Constructs default path to config toml
pub fn default_config_path() -> Option<PathBuf> {
    let mut config_path = dirs::home_dir()?;
    config_path.push(".netsweep.toml");
    Some(config_path)
}
