mod shutdown;
pub use shutdown::Shutdown;

pub mod config;
pub mod meter;
pub mod poller;
pub mod probe;
pub mod publish;
pub mod resolver;
pub mod source;
pub mod thermal;

mod error;
pub use error::Error;

#[cfg(test)]
pub(crate) mod testing;

pub type Result<T> = std::result::Result<T, Error>;
