use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{debug, error};

use crate::config::InfluxSettings;
use crate::meter::{Measurement, MeterRole};

pub const CPU_TEMPERATURE_FIELD: &str = "T_cpu";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub value: Decimal,
}

/// Named values from one poll cycle, in the order they were read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Batch {
    measurement: String,
    fields: Vec<Field>,
}

impl Batch {
    pub fn new<M: Into<String>>(measurement: M) -> Self {
        Self {
            measurement: measurement.into(),
            fields: Vec::new(),
        }
    }

    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn push<N: Into<String>>(&mut self, name: N, value: Decimal) {
        self.fields.push(Field {
            name: name.into(),
            value,
        });
    }

    /// Adds the dashboard fields for one meter: `<prefix>_VOLT`, `_AMPS`, `_WATT`, `_WHRS` and, when the read covered
    /// register 8, `_PZPF`.
    pub fn push_measurement(&mut self, role: MeterRole, m: &Measurement) {
        let prefix = role.field_prefix();
        self.push(format!("{prefix}_VOLT"), m.voltage);
        self.push(format!("{prefix}_AMPS"), m.current);
        self.push(format!("{prefix}_WATT"), m.power);
        self.push(format!("{prefix}_WHRS"), Decimal::from(m.energy));
        if let Some(power_factor) = m.power_factor {
            self.push(format!("{prefix}_PZPF"), power_factor);
        }
    }

    /// Line protocol body: `<measurement> <field>=<value>` per field, newline separated.
    pub fn encode(&self) -> String {
        influx_write::encode(
            &self.measurement,
            self.fields.iter().map(|f| (f.name.as_str(), f.value)),
        )
    }
}

/// Delivers a batch somewhere. Failures are the publisher's to log; they never reach the polling loop.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, batch: &Batch);
}

pub struct InfluxPublisher {
    client: influx_write::Client,
}

impl InfluxPublisher {
    pub fn new(settings: &InfluxSettings) -> crate::Result<Self> {
        let client =
            influx_write::Client::with_timeout(&settings.url, &settings.database, settings.timeout)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Publisher for InfluxPublisher {
    async fn publish(&self, batch: &Batch) {
        let fields = batch.fields().len();
        match self.client.write(batch.encode()).await {
            Ok(()) => debug!(fields, "published batch"),
            Err(error) => error!(%error, url = %self.client.write_url(), fields, "dropping batch, write failed"),
        }
    }
}
