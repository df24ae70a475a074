//! PZEM-016 input registers, read with function code 4.
//!
//! | Offset | Quantity                 | Resolution |
//! |--------|--------------------------|------------|
//! | 0      | voltage                  | 0.1 V      |
//! | 1, 2   | current, low/high word   | 0.001 A    |
//! | 3, 4   | power, low/high word     | 0.1 W      |
//! | 5, 6   | energy, low/high word    | 1 Wh       |
//! | 7      | frequency                | 0.1 Hz     |
//! | 8      | power factor             | 0.01       |
//! | 9      | alarm, `0xFFFF` = raised | -          |

use rust_decimal::Decimal;

/// Registers 0 through 6: voltage, current, power and energy.
pub const BASIC_REGISTERS: u16 = 7;

/// Registers 0 through 8: everything but the alarm flag.
pub const MEASUREMENT_REGISTERS: u16 = 9;

/// Registers 0 through 9.
pub const ALL_REGISTERS: u16 = 10;

/// Words returned by a single read, indexed from the read's start register.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegisterBlock(Vec<u16>);

impl RegisterBlock {
    pub fn new(words: Vec<u16>) -> Self {
        Self(words)
    }

    pub fn words(&self) -> &[u16] {
        &self.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Measurement {
    /// Volts, one decimal.
    pub voltage: Decimal,
    /// Amps, three decimals.
    pub current: Decimal,
    /// Watts, one decimal.
    pub power: Decimal,
    /// Watt-hours accumulated since the meter was last reset.
    pub energy: u32,
    /// Hertz, one decimal. Only known when register 7 was part of the read.
    pub frequency: Option<Decimal>,
    /// Two decimals. Only known when register 8 was part of the read.
    pub power_factor: Option<Decimal>,
    /// Only known when register 9 was part of the read.
    pub alarm: Option<bool>,
}

/// Reassembles a 32-bit quantity that the meter splits low word first.
pub fn combine(low: u16, high: u16) -> u32 {
    u32::from(low) + (u32::from(high) << 16)
}

fn scaled(raw: u32, decimals: u32) -> Decimal {
    Decimal::new(raw.into(), decimals)
}

/// Decodes a block read from register 0. Quantities past the end of `words` are `None`.
///
/// # Panics
///
/// If `words` holds fewer than [`BASIC_REGISTERS`] registers. Reads are length-checked before they get here.
pub fn decode(words: &[u16]) -> Measurement {
    assert!(
        words.len() >= BASIC_REGISTERS as usize,
        "decoding needs {BASIC_REGISTERS} registers, got {}",
        words.len()
    );

    Measurement {
        voltage: scaled(words[0].into(), 1),
        current: scaled(combine(words[1], words[2]), 3),
        power: scaled(combine(words[3], words[4]), 1),
        energy: combine(words[5], words[6]),
        frequency: words.get(7).map(|&raw| scaled(raw.into(), 1)),
        power_factor: words.get(8).map(|&raw| scaled(raw.into(), 2)),
        alarm: words.get(9).map(|&flag| flag != 0),
    }
}

/// Decodes the two-register current read that starts at register 1.
pub fn decode_current(words: &[u16]) -> Decimal {
    scaled(combine(words[0], words[1]), 3)
}
