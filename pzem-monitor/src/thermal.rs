use std::io;
use std::path::PathBuf;

use rust_decimal::Decimal;

pub trait Thermometer: Send + Sync {
    fn celsius(&self) -> io::Result<Decimal>;
}

/// The SoC temperature as exposed by the Linux thermal subsystem, in millidegrees Celsius.
pub struct CpuThermometer {
    path: PathBuf,
}

impl CpuThermometer {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

impl Thermometer for CpuThermometer {
    fn celsius(&self) -> io::Result<Decimal> {
        let raw = std::fs::read_to_string(&self.path)?;
        let millidegrees: i64 = raw
            .trim()
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(Decimal::new(millidegrees, 3))
    }
}

/// Rounded to a tenth of a degree.
pub fn reading(thermometer: &dyn Thermometer) -> io::Result<Decimal> {
    Ok(thermometer.celsius()?.round_dp(1))
}
