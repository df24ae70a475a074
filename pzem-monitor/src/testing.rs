//! In-memory stand-ins for the serial bus, the CPU thermometer and the telemetry store.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::meter::{FunctionCode, Link, ReadRequest};
use crate::publish::{Batch, Publisher};
use crate::thermal::Thermometer;

/// 120.0 V, 0.500 A, 1500.0 W, 1000 Wh, 60.0 Hz, PF 0.85, no alarm.
pub(crate) const SAMPLE: [u16; 10] = [1200, 500, 0, 15000, 0, 1000, 0, 600, 85, 0];

pub(crate) enum Reply {
    Words(Vec<u16>),
    Timeout,
}

#[derive(Default)]
struct Device {
    input: Vec<u16>,
    holding: Vec<u16>,
}

#[derive(Default)]
struct State {
    devices: HashMap<(String, u8), Device>,
    scripts: HashMap<(String, u8), VecDeque<Reply>>,
    calls: Vec<(String, u8, ReadRequest)>,
}

/// Meters reachable at `(port, slave)`. Scripted replies are served first, then the attached register map. Anything
/// else times out.
#[derive(Clone, Default)]
pub(crate) struct FakeBus(Arc<Mutex<State>>);

impl FakeBus {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn attach(&self, port: &str, slave: u8, input: &[u16]) {
        let mut state = self.0.lock().unwrap();
        state.devices.insert(
            (port.to_owned(), slave),
            Device {
                input: input.to_vec(),
                holding: vec![0, 23000, u16::from(slave)],
            },
        );
    }

    pub(crate) fn script<I: IntoIterator<Item = Reply>>(&self, port: &str, slave: u8, replies: I) {
        let mut state = self.0.lock().unwrap();
        state
            .scripts
            .entry((port.to_owned(), slave))
            .or_default()
            .extend(replies);
    }

    pub(crate) fn calls(&self) -> Vec<(String, u8, ReadRequest)> {
        self.0.lock().unwrap().calls.clone()
    }

    pub(crate) fn ports_probed(&self) -> Vec<String> {
        self.calls().into_iter().map(|(port, _, _)| port).collect()
    }

    pub(crate) fn link(&self) -> FakeLink {
        FakeLink(self.clone())
    }
}

pub(crate) struct FakeLink(FakeBus);

#[async_trait]
impl Link for FakeLink {
    async fn read(&mut self, port: &str, slave: u8, request: ReadRequest) -> io::Result<Vec<u16>> {
        let mut state = (self.0).0.lock().unwrap();
        let key = (port.to_owned(), slave);
        state.calls.push((port.to_owned(), slave, request));

        if let Some(reply) = state.scripts.get_mut(&key).and_then(VecDeque::pop_front) {
            return match reply {
                Reply::Words(words) => Ok(words),
                Reply::Timeout => Err(io::ErrorKind::TimedOut.into()),
            };
        }

        let device = state
            .devices
            .get(&key)
            .ok_or_else(|| io::Error::from(io::ErrorKind::TimedOut))?;
        let registers = match request.function {
            FunctionCode::ReadInputRegisters => &device.input,
            FunctionCode::ReadHoldingRegisters => &device.holding,
        };
        let start = usize::from(request.start);
        let end = start + usize::from(request.count);
        registers
            .get(start..end)
            .map(<[u16]>::to_vec)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "illegal data address"))
    }
}

pub(crate) struct FixedThermometer(pub(crate) Option<Decimal>);

impl Thermometer for FixedThermometer {
    fn celsius(&self) -> io::Result<Decimal> {
        self.0.ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }
}

/// Keeps every published batch.
#[derive(Clone, Default)]
pub(crate) struct RecordingPublisher(Arc<Mutex<Vec<Batch>>>);

impl RecordingPublisher {
    pub(crate) fn batches(&self) -> Vec<Batch> {
        self.0.lock().unwrap().clone()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, batch: &Batch) {
        self.0.lock().unwrap().push(batch.clone());
    }
}
