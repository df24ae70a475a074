use std::fmt;

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::meter::{Link, MeterHandle, MeterRole, ReadError};

/// Which supply the house is currently running on. Decides which meters are polled and how fields are named.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerSource {
    Utility,
    Generator,
}

impl PowerSource {
    /// Meters read each cycle in this mode, in field order.
    pub fn meters(self) -> &'static [MeterRole] {
        match self {
            PowerSource::Utility => &[MeterRole::MainA, MeterRole::MainB],
            PowerSource::Generator => &[MeterRole::Generator],
        }
    }
}

impl fmt::Display for PowerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerSource::Utility => f.write_str("utility"),
            PowerSource::Generator => f.write_str("generator"),
        }
    }
}

/// Generator line current above which the generator counts as running: 0.3 A. Anything at or below is leakage.
pub fn generator_threshold() -> Decimal {
    Decimal::new(3, 1)
}

/// Utility unless the generator meter answered with more than [`generator_threshold`]. A silent generator meter
/// means utility power.
pub fn classify(generator_current: &Result<Decimal, ReadError>) -> PowerSource {
    match generator_current {
        Ok(amps) if *amps > generator_threshold() => PowerSource::Generator,
        _ => PowerSource::Utility,
    }
}

/// Single read of the generator meter's current.
pub async fn detect<L: Link>(generator: &mut MeterHandle<L>) -> PowerSource {
    let current = generator.current().await;
    match &current {
        Ok(amps) => debug!(%amps, "generator current"),
        Err(error) => debug!(%error, "generator meter silent"),
    }
    let source = classify(&current);
    info!(%source, "detected power source");
    source
}

/// Later re-check of a running system. Uses the full retry budget, and a generator meter that stays silent keeps
/// `current` rather than flipping the field set on one bad read.
pub async fn redetect<L: Link>(generator: &mut MeterHandle<L>, current: PowerSource) -> PowerSource {
    match generator.current_with_retry().await {
        Ok(amps) => {
            debug!(%amps, "generator current");
            classify(&Ok(amps))
        }
        Err(error) => {
            warn!(%error, source = %current, "generator meter silent, keeping power source");
            current
        }
    }
}
