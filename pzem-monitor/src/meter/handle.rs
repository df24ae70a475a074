use std::io;

use rust_decimal::Decimal;
use thiserror::Error;
use tracing::debug;

use super::link::{Link, ReadRequest};
use super::register::{self, Measurement, RegisterBlock};
use super::MeterIdentity;

/// Reads per poll before a meter is given up on for that cycle. Attempts follow each other immediately.
pub const MAX_ATTEMPTS: u32 = 3;

#[derive(Error, Debug)]
pub enum ReadError {
    #[error("no port assigned")]
    Unbound,

    /// Timeout, bad frame, CRC mismatch or a port that will not open.
    #[error("communication on {port} failed: {source}")]
    Communication {
        port: String,
        #[source]
        source: io::Error,
    },

    #[error("asked for {expected} registers, got {actual}")]
    Malformed { expected: u16, actual: usize },
}

/// A meter that could not be read this cycle. Callers skip it rather than fail.
#[derive(Error, Debug)]
#[error("{meter} unavailable after {attempts} attempt(s): {last}")]
pub struct Unavailable {
    pub meter: MeterIdentity,
    pub attempts: u32,
    #[source]
    pub last: ReadError,
}

/// One physical meter: a fixed slave address reached through a port that is only known after resolution.
pub struct MeterHandle<L> {
    identity: MeterIdentity,
    port: Option<String>,
    link: L,
}

impl<L: Link> MeterHandle<L> {
    pub fn new(identity: MeterIdentity, link: L) -> Self {
        Self {
            identity,
            port: None,
            link,
        }
    }

    pub fn identity(&self) -> MeterIdentity {
        self.identity
    }

    pub fn port(&self) -> Option<&str> {
        self.port.as_deref()
    }

    pub fn bind<P: Into<String>>(&mut self, port: P) {
        self.port = Some(port.into());
    }

    pub fn unbind(&mut self) {
        self.port = None;
    }

    /// A single attempt.
    pub async fn read_once(&mut self, request: ReadRequest) -> Result<RegisterBlock, ReadError> {
        let port = self.port.as_deref().ok_or(ReadError::Unbound)?;
        let words = self
            .link
            .read(port, self.identity.address(), request)
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
        Ok(RegisterBlock::new(words))
    }

    /// Up to [`MAX_ATTEMPTS`] attempts, no delay between them.
    pub async fn read(&mut self, request: ReadRequest) -> Result<RegisterBlock, Unavailable> {
        let mut attempt = 1;
        loop {
            match self.read_once(request).await {
                Ok(block) => return Ok(block),
                Err(error) if attempt < MAX_ATTEMPTS && !matches!(error, ReadError::Unbound) => {
                    debug!(meter = %self.identity, attempt, %error, "read failed, retrying");
                    attempt += 1;
                }
                Err(last) => {
                    return Err(Unavailable {
                        meter: self.identity,
                        attempts: attempt,
                        last,
                    })
                }
            }
        }
    }

    /// Reads and decodes registers 0 through 8.
    pub async fn measure(&mut self) -> Result<Measurement, Unavailable> {
        let block = self.read(ReadRequest::MEASUREMENTS).await?;
        Ok(register::decode(block.words()))
    }

    /// Present current, single attempt.
    pub async fn current(&mut self) -> Result<Decimal, ReadError> {
        let block = self.read_once(ReadRequest::CURRENT).await?;
        Ok(register::decode_current(block.words()))
    }

    /// Present current, up to [`MAX_ATTEMPTS`] attempts.
    pub async fn current_with_retry(&mut self) -> Result<Decimal, Unavailable> {
        let block = self.read(ReadRequest::CURRENT).await?;
        Ok(register::decode_current(block.words()))
    }
}
