//! One-shot dump of everything a single meter exposes, for commissioning and wiring checks.

use std::fmt;

use tracing::debug;

use crate::meter::{register, Link, Measurement, ReadError, ReadRequest};
use crate::Error;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Report {
    pub port: String,
    pub address: u8,
    pub measurement: Measurement,
    /// Watts.
    pub alarm_threshold: u16,
    /// Holding register 2, the address the meter has stored for itself.
    pub stored_address: u16,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.measurement;
        writeln!(f, "meter at slave address {} on {}", self.address, self.port)?;
        writeln!(f, "  voltage          {} V", m.voltage)?;
        writeln!(f, "  current          {} A", m.current)?;
        writeln!(f, "  power            {} W", m.power)?;
        writeln!(f, "  energy           {} Wh", m.energy)?;
        if let Some(frequency) = m.frequency {
            writeln!(f, "  frequency        {frequency} Hz")?;
        }
        if let Some(power_factor) = m.power_factor {
            writeln!(f, "  power factor     {power_factor}")?;
        }
        match m.alarm {
            Some(true) => writeln!(f, "  alarm            raised")?,
            _ => writeln!(f, "  alarm            clear")?,
        }
        writeln!(f, "  alarm threshold  {} W", self.alarm_threshold)?;
        write!(f, "  stored address   {}", self.stored_address)
    }
}

async fn read<L: Link>(link: &mut L, port: &str, address: u8, request: ReadRequest) -> Result<Vec<u16>, ReadError> {
    let words = link
        .read(port, address, request)
        .await
        .map_err(|source| ReadError::Communication {
            port: port.to_owned(),
            source,
        })?;
    if words.len() != usize::from(request.count) {
        return Err(ReadError::Malformed {
            expected: request.count,
            actual: words.len(),
        });
    }
    debug!(?request, ?words, "read");
    Ok(words)
}

/// All ten input registers, then the alarm threshold and slave address holding registers. Single attempt each.
pub async fn probe<L: Link>(link: &mut L, port: &str, address: u8) -> crate::Result<Report> {
    if !(1..=247).contains(&address) {
        return Err(Error::InvalidSlaveAddress(address));
    }

    let input = read(link, port, address, ReadRequest::ALL).await?;
    let threshold = read(link, port, address, ReadRequest::ALARM_THRESHOLD).await?;
    let stored = read(link, port, address, ReadRequest::SLAVE_ADDRESS).await?;

    Ok(Report {
        port: port.to_owned(),
        address,
        measurement: register::decode(&input),
        alarm_threshold: threshold[0],
        stored_address: stored[0],
    })
}
