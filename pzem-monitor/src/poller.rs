use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::meter::{Link, Measurement, MeterRole, Meters, Unavailable};
use crate::publish::{Batch, Publisher, CPU_TEMPERATURE_FIELD};
use crate::source::{self, PowerSource};
use crate::thermal::{self, Thermometer};
use crate::Shutdown;

#[derive(Clone, Debug)]
pub struct PollSettings {
    pub measurement: String,
    pub interval: Duration,
    pub redetect_interval: Option<Duration>,
}

impl From<&Config> for PollSettings {
    fn from(config: &Config) -> Self {
        Self {
            measurement: config.influx.measurement.clone(),
            interval: config.interval,
            redetect_interval: config.redetect_interval,
        }
    }
}

/// Reads the meters that matter for the current power source, publishes what it got, sleeps, repeats.
///
/// Cycles never overlap: the sleep starts only after the publish has returned.
pub struct Poller<L, P> {
    meters: Meters<L>,
    source: PowerSource,
    publisher: P,
    thermometer: Box<dyn Thermometer>,
    settings: PollSettings,
    next_detect: Option<Instant>,
}

impl<L: Link, P: Publisher> Poller<L, P> {
    pub fn new(
        meters: Meters<L>,
        source: PowerSource,
        publisher: P,
        thermometer: Box<dyn Thermometer>,
        settings: PollSettings,
    ) -> Self {
        let next_detect = settings.redetect_interval.map(|every| Instant::now() + every);
        Self {
            meters,
            source,
            publisher,
            thermometer,
            settings,
            next_detect,
        }
    }

    pub fn source(&self) -> PowerSource {
        self.source
    }

    pub async fn run(mut self, mut shutdown: Shutdown) {
        info!(source = %self.source, interval = ?self.settings.interval, "polling meters");

        while !shutdown.is_shutdown() {
            self.redetect_if_due().await;
            self.cycle().await;

            tokio::select! {
                _ = tokio::time::sleep(self.settings.interval) => {}
                _ = shutdown.recv() => info!("stopping"),
            }
        }
    }

    /// One read-and-publish pass. Returns whether anything was published.
    pub async fn cycle(&mut self) -> bool {
        match self.poll().await {
            Some(batch) => {
                self.publisher.publish(&batch).await;
                true
            }
            None => false,
        }
    }

    /// Reads every meter of the current source. Meters that stay silent are left out; `None` if all of them were.
    pub async fn poll(&mut self) -> Option<Batch> {
        let mut batch = Batch::new(self.settings.measurement.as_str());

        match self.source {
            PowerSource::Generator => {
                let generator = self.meters.generator.measure().await;
                add(&mut batch, MeterRole::Generator, generator);
            }
            PowerSource::Utility => {
                // Independent devices; meters sharing a port are serialized by the link
                let Meters { main_a, main_b, .. } = &mut self.meters;
                let (a, b) = tokio::join!(main_a.measure(), main_b.measure());
                add(&mut batch, MeterRole::MainA, a);
                add(&mut batch, MeterRole::MainB, b);
            }
        }

        if batch.is_empty() {
            warn!(source = %self.source, "no meter answered, nothing to publish");
            return None;
        }

        match thermal::reading(self.thermometer.as_ref()) {
            Ok(celsius) => batch.push(CPU_TEMPERATURE_FIELD, celsius),
            Err(error) => warn!(%error, "CPU temperature unavailable"),
        }

        Some(batch)
    }

    /// Re-reads the generator current when the re-detection interval has elapsed. Never runs mid-cycle.
    pub async fn redetect_if_due(&mut self) {
        let (Some(due), Some(every)) = (self.next_detect, self.settings.redetect_interval) else {
            return;
        };
        if Instant::now() < due {
            return;
        }
        self.next_detect = Some(Instant::now() + every);

        let source = source::redetect(&mut self.meters.generator, self.source).await;
        if source != self.source {
            info!(from = %self.source, to = %source, meters = ?source.meters(), "power source changed");
            self.source = source;
        }
    }
}

fn add(batch: &mut Batch, role: MeterRole, reading: Result<Measurement, Unavailable>) {
    match reading {
        Ok(m) => {
            debug!(meter = %role, voltage = %m.voltage, current = %m.current, power = %m.power, "read meter");
            batch.push_measurement(role, &m);
        }
        Err(error) => warn!(%error, "skipping meter this cycle"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meter::{MeterHandle, MeterIdentity};
    use crate::testing::{FakeBus, FakeLink, FixedThermometer, RecordingPublisher, Reply, SAMPLE};
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;

    fn meters(bus: &FakeBus) -> Meters<FakeLink> {
        let meter = |role, address, port: &str| {
            let mut handle = MeterHandle::new(MeterIdentity::new(role, address).unwrap(), bus.link());
            handle.bind(port);
            handle
        };
        Meters {
            main_a: meter(MeterRole::MainA, 4, "/dev/ttyUSB0"),
            main_b: meter(MeterRole::MainB, 5, "/dev/ttyUSB1"),
            generator: meter(MeterRole::Generator, 6, "/dev/ttyUSB2"),
        }
    }

    fn settings() -> PollSettings {
        PollSettings::from(&Config::default())
    }

    fn poller(
        bus: &FakeBus,
        source: PowerSource,
        settings: PollSettings,
    ) -> (Poller<FakeLink, RecordingPublisher>, RecordingPublisher) {
        let publisher = RecordingPublisher::default();
        let poller = Poller::new(
            meters(bus),
            source,
            publisher.clone(),
            Box::new(FixedThermometer(Some(Decimal::new(483, 1)))),
            settings,
        );
        (poller, publisher)
    }

    #[tokio::test]
    async fn generator_batch_has_exactly_six_fields() {
        let bus = FakeBus::new();
        bus.attach("/dev/ttyUSB0", 4, &SAMPLE);
        bus.attach("/dev/ttyUSB1", 5, &SAMPLE);
        bus.attach("/dev/ttyUSB2", 6, &SAMPLE);
        let (mut poller, publisher) = poller(&bus, PowerSource::Generator, settings());

        assert!(poller.cycle().await);

        let batches = publisher.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].measurement(), "ALL_SENSORS");
        assert_eq!(
            batches[0].field_names(),
            ["GEN_VOLT", "GEN_AMPS", "GEN_WATT", "GEN_WHRS", "GEN_PZPF", "T_cpu"]
        );
        // Only the generator is read in generator mode
        assert!(bus.calls().iter().all(|(_, slave, _)| *slave == 6));
    }

    #[tokio::test]
    async fn utility_batch_covers_both_phases() {
        let bus = FakeBus::new();
        bus.attach("/dev/ttyUSB0", 4, &SAMPLE);
        bus.attach("/dev/ttyUSB1", 5, &SAMPLE);
        let (mut poller, _) = poller(&bus, PowerSource::Utility, settings());

        let batch = poller.poll().await.unwrap();

        assert_eq!(
            batch.field_names(),
            [
                "MAIN-A_VOLT",
                "MAIN-A_AMPS",
                "MAIN-A_WATT",
                "MAIN-A_WHRS",
                "MAIN-A_PZPF",
                "MAIN-B_VOLT",
                "MAIN-B_AMPS",
                "MAIN-B_WATT",
                "MAIN-B_WHRS",
                "MAIN-B_PZPF",
                "T_cpu",
            ]
        );
    }

    #[tokio::test]
    async fn silent_phase_is_left_out() {
        let bus = FakeBus::new();
        bus.attach("/dev/ttyUSB1", 5, &SAMPLE);
        let (mut poller, publisher) = poller(&bus, PowerSource::Utility, settings());

        assert!(poller.cycle().await);

        let batch = &publisher.batches()[0];
        assert_eq!(
            batch.field_names(),
            ["MAIN-B_VOLT", "MAIN-B_AMPS", "MAIN-B_WATT", "MAIN-B_WHRS", "MAIN-B_PZPF", "T_cpu"]
        );
        assert_eq!(
            batch.encode(),
            [
                "ALL_SENSORS MAIN-B_VOLT=120.0",
                "ALL_SENSORS MAIN-B_AMPS=0.500",
                "ALL_SENSORS MAIN-B_WATT=1500.0",
                "ALL_SENSORS MAIN-B_WHRS=1000",
                "ALL_SENSORS MAIN-B_PZPF=0.85",
                "ALL_SENSORS T_cpu=48.3",
            ]
            .join("\n")
        );
        // Main A got its three attempts
        assert_eq!(bus.calls().iter().filter(|(_, slave, _)| *slave == 4).count(), 3);
    }

    #[tokio::test]
    async fn nothing_published_when_every_meter_is_silent() {
        let bus = FakeBus::new();
        let (mut poller, publisher) = poller(&bus, PowerSource::Utility, settings());

        assert!(!poller.cycle().await);
        assert!(publisher.batches().is_empty());
    }

    #[tokio::test]
    async fn missing_cpu_temperature_does_not_block_batch() {
        let bus = FakeBus::new();
        bus.attach("/dev/ttyUSB2", 6, &SAMPLE);
        let publisher = RecordingPublisher::default();
        let mut poller = Poller::new(
            meters(&bus),
            PowerSource::Generator,
            publisher.clone(),
            Box::new(FixedThermometer(None)),
            settings(),
        );

        assert!(poller.cycle().await);
        assert_eq!(publisher.batches()[0].fields().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn switches_to_generator_when_redetection_is_due() {
        let bus = FakeBus::new();
        bus.attach("/dev/ttyUSB0", 4, &SAMPLE);
        bus.attach("/dev/ttyUSB1", 5, &SAMPLE);
        let mut running = SAMPLE;
        running[1] = 2_500;
        bus.attach("/dev/ttyUSB2", 6, &running);
        let settings = PollSettings {
            redetect_interval: Some(Duration::from_secs(60)),
            ..settings()
        };
        let (mut poller, _) = poller(&bus, PowerSource::Utility, settings);

        poller.redetect_if_due().await;
        assert_eq!(poller.source(), PowerSource::Utility);
        assert!(bus.calls().is_empty());

        tokio::time::advance(Duration::from_secs(60)).await;
        poller.redetect_if_due().await;

        assert_eq!(poller.source(), PowerSource::Generator);
        assert_eq!(poller.poll().await.unwrap().field_names()[0], "GEN_VOLT");
    }

    #[tokio::test(start_paused = true)]
    async fn one_generator_timeout_does_not_switch_modes() {
        let bus = FakeBus::new();
        let mut running = SAMPLE;
        running[1] = 2_500;
        bus.attach("/dev/ttyUSB2", 6, &running);
        bus.script("/dev/ttyUSB2", 6, [Reply::Timeout]);
        let settings = PollSettings {
            redetect_interval: Some(Duration::from_secs(60)),
            ..settings()
        };
        let (mut poller, _) = poller(&bus, PowerSource::Generator, settings);

        tokio::time::advance(Duration::from_secs(60)).await;
        poller.redetect_if_due().await;

        assert_eq!(poller.source(), PowerSource::Generator);
        assert_eq!(bus.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn never_redetects_by_default() {
        let bus = FakeBus::new();
        bus.attach("/dev/ttyUSB2", 6, &SAMPLE);
        let (mut poller, _) = poller(&bus, PowerSource::Utility, settings());

        tokio::time::advance(Duration::from_secs(3600)).await;
        poller.redetect_if_due().await;

        assert_eq!(poller.source(), PowerSource::Utility);
        assert!(bus.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn runs_on_a_fixed_cadence_until_shutdown() {
        let bus = FakeBus::new();
        bus.attach("/dev/ttyUSB2", 6, &SAMPLE);
        let (poller, publisher) = poller(&bus, PowerSource::Generator, settings());
        let (tx, rx) = tokio::sync::broadcast::channel(1);

        let task = tokio::spawn(poller.run(Shutdown::from(rx)));
        // Cycles start at 0s, 5s and 10s
        tokio::time::sleep(Duration::from_secs(12)).await;
        tx.send(()).unwrap();
        task.await.unwrap();

        assert_eq!(publisher.batches().len(), 3);
    }
}
