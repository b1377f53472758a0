use netsweep::address::{AddressRange, DnsResolver};
use netsweep::input::{Config, DiscoveryMethod, Opts};
use netsweep::port_strategy::PortStrategy;
use netsweep::report::{format_scan_results, ScanReport};
use netsweep::scanner::{Dispatcher, ProbeResult, Prober, Scanner};
use netsweep::sweep::{
    ArpDiscovery, AutoDiscovery, Discover, HostSweeper, StaticDiscovery, TcpPingDiscovery,
};
use netsweep::{detail, opening, output, warning};

use anyhow::bail;
use colored::Colorize;
use itertools::Itertools;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

extern crate colored;
extern crate env_logger;
#[macro_use]
extern crate log;

#[cfg(unix)]
const DEFAULT_FILE_DESCRIPTORS_LIMIT: u64 = 8000;
// Descriptors kept free for stdio, the resolver and the datalink channel.
#[cfg(unix)]
const RESERVED_FILE_DESCRIPTORS: u64 = 64;

#[cfg(not(tarpaulin_include))]
#[tokio::main]
/// Sweeps the given ranges, probes every live host and prints a report.
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut opts: Opts = Opts::read();
    let config = Config::read(opts.config_path.clone())?;
    opts.merge(&config);

    debug!("Main() `opts` arguments are {opts:?}");

    if opts.addresses.is_empty() {
        bail!("No addresses to scan. Pass a CIDR or IP with -a, e.g. -a 192.168.1.0/24");
    }

    // Every range is validated before anything touches the network.
    let ranges = opts
        .addresses
        .iter()
        .map(|address| address.parse::<AddressRange>())
        .collect::<Result<Vec<_>, _>>()?;

    if !opts.greppable && !opts.accessible && !opts.json {
        opening!();
    }
    let quiet = opts.greppable || opts.json;

    #[cfg(unix)]
    let concurrency = infer_concurrency(&opts, adjust_ulimit_size(&opts));

    #[cfg(not(unix))]
    let concurrency = opts.batch_size;

    let cancel = CancellationToken::new();
    watch_interrupt(cancel.clone(), quiet, opts.accessible);
    if let Some(deadline) = opts.deadline {
        watch_deadline(cancel.clone(), Duration::from_millis(deadline));
    }

    let prober = Prober::new(opts.connect_timeout(), opts.banner_timeout())
        .with_banner_grab(!opts.no_grab)
        .with_tries(opts.tries);

    let (tx, rx) = mpsc::unbounded_channel();
    let dispatcher = Dispatcher::new(prober, concurrency)
        .with_cancellation(cancel.clone())
        .with_stream(tx, Arc::new(ProbeResult::is_open));
    let printer = tokio::spawn(print_open_sockets(rx, quiet, opts.accessible));

    let mut sweeper = HostSweeper::new(discovery(&opts, concurrency, &cancel), opts.discovery_window())
        .with_cancellation(cancel.clone());
    if !opts.no_resolve {
        sweeper = sweeper.with_resolver(Arc::new(DnsResolver::new(opts.resolver.as_deref()).await));
    }

    let port_strategy = PortStrategy::pick(None, opts.ports.clone(), opts.scan_order);
    let exclude_ports = opts.exclude_ports.clone().unwrap_or_default();
    let scanner = Scanner::new(sweeper, dispatcher, &port_strategy, &exclude_ports);

    detail!(
        format!("Sweeping {} for live hosts", ranges.iter().join(", ")),
        quiet,
        opts.accessible
    );
    let (report, errors) = scanner.run_ranges(&ranges).await;

    drop(scanner);
    if let Err(e) = printer.await {
        debug!("Result printer stopped: {e}");
    }

    if errors.len() == ranges.len() {
        if let Some(e) = errors.first() {
            bail!("{e}");
        }
    }
    for e in &errors {
        warning!(format!("{e}, range skipped"), quiet, opts.accessible);
    }

    if cancel.is_cancelled() {
        warning!(
            "Scan was cut short, the report below is partial.",
            quiet,
            opts.accessible
        );
    }

    print_report(&report, &opts)?;
    Ok(())
}

fn discovery(opts: &Opts, concurrency: usize, cancel: &CancellationToken) -> Arc<dyn Discover> {
    let tcp = || {
        TcpPingDiscovery::new(opts.connect_timeout())
            .with_max_concurrency(concurrency)
            .with_cancellation(cancel.clone())
    };
    let arp = || ArpDiscovery::new().with_interface(opts.interface.clone());

    match opts.discovery {
        DiscoveryMethod::Auto => Arc::new(AutoDiscovery::new(arp(), tcp())),
        DiscoveryMethod::Arp => Arc::new(arp()),
        DiscoveryMethod::Tcp => Arc::new(tcp()),
        DiscoveryMethod::Skip => Arc::new(StaticDiscovery),
    }
}

#[cfg(not(tarpaulin_include))]
fn watch_interrupt(cancel: CancellationToken, quiet: bool, accessible: bool) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warning!("Interrupted, wrapping up.", quiet, accessible);
            cancel.cancel();
        }
    });
}

fn watch_deadline(cancel: CancellationToken, deadline: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(deadline).await;
        debug!("Scan deadline of {deadline:?} reached");
        cancel.cancel();
    });
}

/// Prints every open socket as soon as it is found.
async fn print_open_sockets(
    mut rx: mpsc::UnboundedReceiver<ProbeResult>,
    quiet: bool,
    accessible: bool,
) {
    while let Some(result) = rx.recv().await {
        if quiet {
            continue;
        }
        let socket = result.item().socket_addr();
        if accessible {
            println!("Open {socket}");
        } else {
            println!("Open {}", socket.to_string().purple());
        }
    }
}

#[cfg(not(tarpaulin_include))]
fn print_report(report: &ScanReport, opts: &Opts) -> anyhow::Result<()> {
    if opts.json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    if opts.greppable {
        let lines = report.greppable();
        if !lines.is_empty() {
            println!("{lines}");
        }
        return Ok(());
    }

    if report.is_empty() {
        warning!("No live hosts found.", false, opts.accessible);
        return Ok(());
    }

    for host in &report.hosts {
        output!(
            format!("Found device - {}", host.device),
            false,
            opts.accessible
        );
        if host.open_ports.is_empty() {
            println!("\tNo open ports found on {}.", host.device.address);
            continue;
        }
        println!(
            "\tOpen ports on {}: {}",
            host.device.address,
            host.ports().iter().join(", ")
        );
        for line in format_scan_results(&host.open_ports).lines() {
            println!("\t{line}");
        }
        for (port, hint) in host.open_ports.iter().filter_map(|r| Some((r.port, r.hint?))) {
            println!("\t{}:{port} looks like {hint:?}", host.device.address);
        }
    }
    Ok(())
}

#[cfg(unix)]
fn adjust_ulimit_size(opts: &Opts) -> u64 {
    use rlimit::Resource;

    if let Some(limit) = opts.ulimit {
        if Resource::NOFILE.set(limit, limit).is_ok() {
            detail!(
                format!("Automatically increasing ulimit value to {limit}."),
                opts.greppable,
                opts.accessible
            );
        } else {
            warning!(
                "ERROR. Failed to set ulimit value.",
                opts.greppable,
                opts.accessible
            );
        }
    }

    match Resource::NOFILE.get() {
        Ok((soft, _)) => soft,
        Err(e) => {
            debug!("Could not read the file descriptor limit: {e}");
            DEFAULT_FILE_DESCRIPTORS_LIMIT
        }
    }
}

/// Keeps the number of concurrent probes below the file descriptor limit.
#[cfg(unix)]
fn infer_concurrency(opts: &Opts, ulimit: u64) -> usize {
    let requested = u64::try_from(opts.batch_size).unwrap_or(u64::MAX);
    let available = ulimit.saturating_sub(RESERVED_FILE_DESCRIPTORS);

    if requested <= available {
        return opts.batch_size;
    }

    warning!(
        format!("File limit {ulimit} is lower than the requested concurrency {requested}. Consider upping with --ulimit."),
        opts.greppable,
        opts.accessible
    );
    let lowered = if available == 0 { ulimit / 2 } else { available };
    usize::try_from(lowered.max(1)).unwrap_or(1)
}
