//! Provides a means to hold configuration options specifically for port scanning.
use crate::input::{PortRange, ScanOrder, DEFAULT_PORT_RANGE};
use either::Either;
use rand::seq::SliceRandom;

/// Represents options of port scanning.
#[derive(Debug)]
pub enum PortStrategy {
    Manual(Vec<u16>),
    Serial(PortRange),
    Random(PortRange),
}

impl PortStrategy {
    /// Explicit ports take precedence over a range; with neither the
    /// default range `1-1024` is used.
    pub fn pick(range: Option<PortRange>, ports: Option<Vec<u16>>, order: ScanOrder) -> Self {
        match (ports, order) {
            (None, ScanOrder::Serial) => Self::Serial(range.unwrap_or(DEFAULT_PORT_RANGE)),
            (None, ScanOrder::Random) => Self::Random(range.unwrap_or(DEFAULT_PORT_RANGE)),
            (Some(ports), ScanOrder::Serial) => Self::Manual(ports),
            (Some(mut ports), ScanOrder::Random) => {
                ports.shuffle(&mut rand::rng());
                Self::Manual(ports)
            }
        }
    }

    /// Ports in the order they should be dispatched, with `exclude` removed.
    pub fn ordered(&self, exclude: &[u16]) -> Vec<u16> {
        self.ordered_iter()
            .filter(|port| !exclude.contains(port))
            .collect()
    }

    pub fn ordered_iter(&self) -> impl Iterator<Item = u16> + '_ {
        match self {
            Self::Manual(ports) => Either::Left(ports.iter().copied()),
            Self::Serial(range) => Either::Right(Either::Left(range.iter())),
            Self::Random(range) => {
                let mut ports = range.iter().collect::<Vec<_>>();
                ports.shuffle(&mut rand::rng());
                Either::Right(Either::Right(ports.into_iter()))
            }
        }
    }
}
