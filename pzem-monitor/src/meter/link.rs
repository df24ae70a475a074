use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio_modbus::client::{rtu, Context};
use tokio_modbus::prelude::{Reader, Slave, SlaveContext};
use tracing::debug;

use super::register::{ALL_REGISTERS, MEASUREMENT_REGISTERS};
use crate::config::SerialSettings;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FunctionCode {
    ReadHoldingRegisters = 3,
    ReadInputRegisters = 4,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadRequest {
    pub function: FunctionCode,
    pub start: u16,
    pub count: u16,
}

impl ReadRequest {
    /// Present current only. Cheap and always valid, so it doubles as a presence probe.
    pub const CURRENT: ReadRequest = ReadRequest::input(1, 2);

    /// Voltage through power factor.
    pub const MEASUREMENTS: ReadRequest = ReadRequest::input(0, MEASUREMENT_REGISTERS);

    /// Voltage through the alarm flag.
    pub const ALL: ReadRequest = ReadRequest::input(0, ALL_REGISTERS);

    /// Power alarm threshold in watts.
    pub const ALARM_THRESHOLD: ReadRequest = ReadRequest::holding(1, 1);

    /// The meter's own idea of its slave address.
    pub const SLAVE_ADDRESS: ReadRequest = ReadRequest::holding(2, 1);

    pub const fn input(start: u16, count: u16) -> Self {
        Self {
            function: FunctionCode::ReadInputRegisters,
            start,
            count,
        }
    }

    pub const fn holding(start: u16, count: u16) -> Self {
        Self {
            function: FunctionCode::ReadHoldingRegisters,
            start,
            count,
        }
    }
}

/// "Read `count` registers from `start` with function `function`", performed against whatever device answers to
/// `slave` on `port`. Framing, CRC and timeouts are the implementation's business; every failure is an `io::Error`.
#[async_trait]
pub trait Link: Send {
    async fn read(&mut self, port: &str, slave: u8, request: ReadRequest) -> io::Result<Vec<u16>>;
}

type Slot = Arc<tokio::sync::Mutex<Option<Session>>>;

/// Modbus RTU over local serial ports.
///
/// Clones share one session per port path, so meters daisy-chained on the same adapter take turns on it while reads
/// on different ports proceed independently. A session is dropped after any failure, so the next read starts from a
/// freshly opened port with no stale bytes in the buffer.
#[derive(Clone)]
pub struct RtuLink {
    settings: Arc<SerialSettings>,
    sessions: Arc<Mutex<HashMap<String, Slot>>>,
}

struct Session {
    slave: u8,
    context: Context,
}

impl RtuLink {
    pub fn new(settings: SerialSettings) -> Self {
        Self {
            settings: Arc::new(settings),
            sessions: Default::default(),
        }
    }

    fn slot(&self, port: &str) -> Slot {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions.entry(port.to_owned()).or_default().clone()
    }

    async fn open(settings: &SerialSettings, port: &str, slave: u8) -> io::Result<Session> {
        debug!(port, baud_rate = settings.baud_rate, "opening serial port");
        let builder = tokio_serial::new(port, settings.baud_rate)
            .data_bits(settings.data_bits)
            .flow_control(settings.flow_control)
            .parity(settings.parity)
            .stop_bits(settings.stop_bits);
        let stream = tokio_serial::SerialStream::open(&builder)?;
        let context = rtu::connect_slave(stream, Slave(slave)).await?;
        Ok(Session { slave, context })
    }
}

#[async_trait]
impl Link for RtuLink {
    async fn read(&mut self, port: &str, slave: u8, request: ReadRequest) -> io::Result<Vec<u16>> {
        let timeout = self.settings.timeout;
        let slot = self.slot(port);
        let mut guard = slot.lock().await;

        let session = match guard.take() {
            Some(session) => session,
            None => Self::open(&self.settings, port, slave).await?,
        };
        let session = guard.insert(session);
        if session.slave != slave {
            session.context.set_slave(Slave(slave));
            session.slave = slave;
        }

        let call = async {
            match request.function {
                FunctionCode::ReadHoldingRegisters => {
                    session
                        .context
                        .read_holding_registers(request.start, request.count)
                        .await
                }
                FunctionCode::ReadInputRegisters => {
                    session
                        .context
                        .read_input_registers(request.start, request.count)
                        .await
                }
            }
        };

        let result = match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("slave {slave} did not answer within {timeout:?}"),
            )),
        };

        if result.is_err() {
            *guard = None;
        }
        result
    }
}

#[test]
fn clones_share_a_session_per_port() {
    let a = RtuLink::new(SerialSettings::default());
    let b = a.clone();

    assert!(Arc::ptr_eq(&a.slot("/dev/ttyUSB0"), &b.slot("/dev/ttyUSB0")));
    assert!(!Arc::ptr_eq(&a.slot("/dev/ttyUSB0"), &b.slot("/dev/ttyUSB1")));
    assert!(!Arc::ptr_eq(
        &a.slot("/dev/ttyUSB0"),
        &RtuLink::new(SerialSettings::default()).slot("/dev/ttyUSB0")
    ));
}
