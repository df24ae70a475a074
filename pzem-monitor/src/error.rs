use thiserror::Error;

use crate::meter::MeterRole;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    JSONError(#[from] serde_json::Error),

    #[error(transparent)]
    InfluxError(#[from] influx_write::Error),

    #[error(transparent)]
    ReadError(#[from] crate::meter::ReadError),

    #[error("cannot communicate with {role} meter, slave address {address}, on any of {ports:?}")]
    MeterNotFound {
        role: MeterRole,
        address: u8,
        ports: Vec<String>,
    },

    #[error("slave address {0} is outside 1..=247")]
    InvalidSlaveAddress(u8),

    #[error("{0}")]
    Other(std::borrow::Cow<'static, str>),
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Self::Other(s.into())
    }
}
impl From<&'static str> for Error {
    fn from(s: &'static str) -> Self {
        Self::Other(s.into())
    }
}
