use std::fmt;

pub mod handle;
pub mod link;
pub mod register;

pub use handle::{MeterHandle, ReadError, Unavailable};
pub use link::{FunctionCode, Link, ReadRequest, RtuLink};
pub use register::{Measurement, RegisterBlock};

/// Which supply line a meter is clamped onto.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MeterRole {
    MainA,
    MainB,
    Generator,
}

impl MeterRole {
    /// Prefix of every field this meter contributes to a batch. Existing dashboards depend on these.
    pub fn field_prefix(self) -> &'static str {
        match self {
            MeterRole::MainA => "MAIN-A",
            MeterRole::MainB => "MAIN-B",
            MeterRole::Generator => "GEN",
        }
    }
}

impl fmt::Display for MeterRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field_prefix())
    }
}

/// A meter's fixed identity on the bus. The port it is reached through is not part of it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MeterIdentity {
    address: u8,
    role: MeterRole,
}

impl MeterIdentity {
    pub fn new(role: MeterRole, address: u8) -> crate::Result<Self> {
        if !(1..=247).contains(&address) {
            return Err(crate::Error::InvalidSlaveAddress(address));
        }
        Ok(Self { address, role })
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn role(&self) -> MeterRole {
        self.role
    }
}

impl fmt::Display for MeterIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (slave address {})", self.role, self.address)
    }
}

/// The three meters of a split-phase house with a backup generator.
pub struct Meters<L> {
    pub main_a: MeterHandle<L>,
    pub main_b: MeterHandle<L>,
    pub generator: MeterHandle<L>,
}

impl<L: Link> Meters<L> {
    /// Resolution order: main phase A, main phase B, then the generator.
    pub fn in_order(&mut self) -> [&mut MeterHandle<L>; 3] {
        [&mut self.main_a, &mut self.main_b, &mut self.generator]
    }
}

#[cfg(test)]
use pretty_assertions::assert_eq;

#[test]
fn rejects_out_of_range_slave_address() {
    assert!(matches!(
        MeterIdentity::new(MeterRole::MainA, 0),
        Err(crate::Error::InvalidSlaveAddress(0))
    ));
    assert!(matches!(
        MeterIdentity::new(MeterRole::MainA, 248),
        Err(crate::Error::InvalidSlaveAddress(248))
    ));
    assert!(MeterIdentity::new(MeterRole::MainA, 247).is_ok());
}

#[test]
fn displays_role_and_address() {
    let identity = MeterIdentity::new(MeterRole::Generator, 6).unwrap();
    assert_eq!(identity.to_string(), "GEN (slave address 6)");
}
