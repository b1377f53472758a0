//! This crate exposes the internal functionality of the `netsweep` local
//! network scanner.
//!
//! netsweep finds the live hosts of a network segment and probes them for
//! open TCP services, grabbing a short banner from whatever answers.
//!
//! ## Key Features
//!
//! - **Host discovery**: ARP sweep of the local segment, TCP ping fallback
//! - **Bounded concurrency**: a fixed number of probes in flight, results in input order
//! - **Banner grabbing**: with a coarse service hint (TLS, SSH, HTTP, ...)
//! - **Cancellation**: Ctrl-C or a deadline stops a scan and still yields a report
//! - **IPv6 support**: ranges are swept by TCP ping
//!
//! ## Architecture Overview
//!
//! The core scanning behaviour is managed by
//! [`Scanner`](crate::scanner::Scanner), which is built from a
//! [`HostSweeper`](crate::sweep::HostSweeper), a
//! [`Dispatcher`](crate::scanner::Dispatcher) and a
//! [`PortStrategy`](crate::port_strategy::PortStrategy). A scan goes:
//!
//! 1. **Input Processing**: the target is parsed into an [`AddressRange`](crate::address::AddressRange)
//! 2. **Host Sweep**: a [`Discover`](crate::sweep::Discover) primitive lists live hosts
//! 3. **Port Expansion**: every live host is paired with every port
//! 4. **Dispatch**: probes run concurrently under connect and read timeouts
//! 5. **Aggregation**: open ports are grouped into a [`ScanReport`](crate::report::ScanReport)
//!
//! ## Basic Usage Example
//!
//! ```rust,no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use netsweep::input::{PortRange, ScanOrder};
//! use netsweep::port_strategy::PortStrategy;
//! use netsweep::scanner::{Dispatcher, Prober, Scanner};
//! use netsweep::sweep::{HostSweeper, TcpPingDiscovery};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let prober = Prober::new(Duration::from_millis(500), Duration::from_secs(1));
//!     let sweeper = HostSweeper::new(
//!         Arc::new(TcpPingDiscovery::new(Duration::from_millis(500))),
//!         Duration::from_secs(3),
//!     );
//!     let strategy = PortStrategy::pick(
//!         Some(PortRange::new(1, 1_024)?),
//!         None,
//!         ScanOrder::Serial,
//!     );
//!
//!     let scanner = Scanner::new(sweeper, Dispatcher::new(prober, 100), &strategy, &[]);
//!     let report = scanner.scan("192.168.1.0/24").await?;
//!
//!     println!("{}", report.render());
//!     Ok(())
//! }
//! ```
//!
//! ## Streaming Results
//!
//! Collaborators that want results as they happen register an
//! [`Interest`](crate::scanner::Interest) predicate and a channel:
//!
//! ```rust,no_run
//! # use std::{sync::Arc, time::Duration};
//! # use netsweep::scanner::{work_items, Dispatcher, ProbeResult, Prober};
//! # async fn run() {
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//! let dispatcher = Dispatcher::new(Prober::new(Duration::from_millis(300), Duration::from_secs(1)), 50)
//!     .with_stream(tx, Arc::new(|r: &ProbeResult| r.is_open()));
//!
//! let items = work_items(&["10.0.0.1".parse::<std::net::IpAddr>().unwrap()], &[22, 80, 443]);
//! tokio::spawn(async move {
//!     while let Some(result) = rx.recv().await {
//!         println!("{}:{} is open", result.address, result.port);
//!     }
//! });
//! let _all = dispatcher.run_all(&items).await;
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Only setup problems are errors ([`ScanError`](crate::error::ScanError)):
//! a malformed range, an invalid port range, or a discovery channel that
//! cannot be opened. Everything that goes wrong on the wire is recorded on
//! the individual [`ProbeResult`](crate::scanner::ProbeResult).
#![allow(clippy::needless_doctest_main)]

pub mod tui;

pub mod input;

pub mod scanner;

pub mod port_strategy;

pub mod address;

pub mod error;

pub mod report;

pub mod sweep;
