use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use pzem_monitor::config::Config;
use pzem_monitor::meter::{MeterHandle, MeterIdentity, Meters, RtuLink};
use pzem_monitor::poller::{PollSettings, Poller};
use pzem_monitor::publish::InfluxPublisher;
use pzem_monitor::thermal::CpuThermometer;
use pzem_monitor::{probe, resolver, source, Result, Shutdown};
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Parser, Debug)]
#[clap(
    name = "pzem-monitor",
    version,
    about = "Polls PZEM-016 energy meters and writes their readings to InfluxDB"
)]
struct Cli {
    /// JSON configuration file. Built-in defaults are used when omitted.
    #[clap(long, env = "PZEM_CONFIG", value_hint = clap::ValueHint::FilePath)]
    config: Option<PathBuf>,

    #[clap(long, env = "INFLUX_URL", value_hint = clap::ValueHint::Url)]
    influx_url: Option<Url>,

    #[clap(long, env = "INFLUX_DB")]
    database: Option<String>,

    /// Candidate serial port, may be repeated. Replaces the configured list.
    #[clap(long = "port", value_name = "TTY")]
    ports: Vec<String>,

    /// Re-check the power source this often, e.g. "1m"
    #[clap(long, value_parser = humantime_serde::re::humantime::parse_duration)]
    redetect_interval: Option<Duration>,

    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Find the meters and poll them until interrupted (default)
    Run,

    /// Read and print every register of one meter
    Probe {
        #[clap(long, value_name = "TTY")]
        port: String,

        #[clap(long, default_value_t = 1)]
        address: u8,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();

    if let Err(err) = dispatch(cli).await {
        error!(%err, "exiting");
        eprintln!("{err}");
        std::process::exit(1);
    }
}

async fn dispatch(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(url) = cli.influx_url {
        config.influx.url = url;
    }
    if let Some(database) = cli.database {
        config.influx.database = database;
    }
    if !cli.ports.is_empty() {
        config.ports = cli.ports;
    }
    if cli.redetect_interval.is_some() {
        config.redetect_interval = cli.redetect_interval;
    }
    config.validate()?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => monitor(config).await,
        Command::Probe { port, address } => {
            let mut link = RtuLink::new(config.serial.clone());
            let report = probe::probe(&mut link, &port, address).await?;
            println!("{report}");
            Ok(())
        }
    }
}

async fn monitor(config: Config) -> Result<()> {
    tokio::time::sleep(config.startup_delay).await;

    let [main_a, main_b, generator] = config.meters.identities()?;
    let link = RtuLink::new(config.serial.clone());
    let handle = |identity: MeterIdentity| MeterHandle::new(identity, link.clone());
    let mut meters = Meters {
        main_a: handle(main_a),
        main_b: handle(main_b),
        generator: handle(generator),
    };

    resolver::resolve_all(&mut meters, &config.ports).await?;
    let source = source::detect(&mut meters.generator).await;

    let publisher = InfluxPublisher::new(&config.influx)?;
    let thermometer = Box::new(CpuThermometer::new(config.thermal_zone.clone()));
    let poller = Poller::new(meters, source, publisher, thermometer, PollSettings::from(&config));

    let (notify, rx) = broadcast::channel(1);
    let ctrl_c = notify.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupted");
                let _ = ctrl_c.send(());
            }
            Err(error) => error!(%error, "cannot listen for Ctrl-C"),
        }
    });

    poller.run(Shutdown::from(rx)).await;
    drop(notify);
    Ok(())
}
