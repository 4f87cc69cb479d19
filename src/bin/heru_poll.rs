//! Heru Poll
//!
//! Polls a Heru unit and prints a short decoded snapshot for every cycle.
//!
//! Usage: heru-poll <host:port> [--rtu] [--variant gen3|iqc] [--interval MS]
//!        heru-poll --config poller.json
//! Example: heru-poll 192.168.1.50:4001 --rtu --variant iqc

use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use heru_modbus::codec::{scaled_tenth, signed_from_unsigned16};
use heru_modbus::config::{DEFAULT_POLL_INTERVAL_MS, DEFAULT_UNIT_ID};
use heru_modbus::{
    Block, Capabilities, ConnectParams, DeviceProfile, ModbusTcpClient, PollResult, PollerConfig,
    PollingClient, RegisterMap, Variant,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Poll a Heru ventilation unit over Modbus
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Unit address as host:port
    #[clap(required_unless_present = "config")]
    address: Option<String>,

    /// Use RTU framing over the raw socket instead of Modbus TCP
    #[clap(long)]
    rtu: bool,

    /// Equipment variant
    #[clap(long, default_value = "gen3")]
    variant: Variant,

    /// Poll interval in milliseconds
    #[clap(long, default_value_t = DEFAULT_POLL_INTERVAL_MS)]
    interval: u32,

    /// Modbus unit id
    #[clap(long, default_value_t = DEFAULT_UNIT_ID)]
    unit: u8,

    /// Load the poller configuration from a JSON file instead
    #[clap(long, conflicts_with = "address")]
    config: Option<PathBuf>,

    /// Log every frame as hex
    #[clap(long)]
    packet_log: bool,
}

/// Fields printed for each cycle
#[derive(Debug)]
struct Snapshot {
    unit_on: Option<bool>,
    temperatures: Vec<(&'static str, i32)>,
    readings: Vec<(&'static str, i32)>,
    alarms: Vec<String>,
}

struct HeruProfile {
    map: RegisterMap,
    capabilities: Capabilities,
}

impl HeruProfile {
    fn new(map: RegisterMap, variant: Variant) -> Self {
        Self {
            map,
            capabilities: Capabilities::for_variant(variant),
        }
    }
}

impl DeviceProfile for HeruProfile {
    type Event = Snapshot;

    fn register_map(&self) -> &RegisterMap {
        &self.map
    }

    fn decode(&self, result: &PollResult) -> Snapshot {
        let mut temperatures = Vec::new();
        let mut readings = Vec::new();
        for field in self.capabilities.input_register_fields() {
            let Some(raw) = result.input_register(&self.map, field) else {
                continue;
            };
            if field.ends_with("_TEMPERATURE") {
                temperatures.push((field, scaled_tenth(raw)));
            } else {
                readings.push((field, signed_from_unsigned16(raw)));
            }
        }

        let alarms = self
            .map
            .names(Block::DiscreteInputs)
            .filter(|(name, _)| name.ends_with("_ALARM"))
            .filter(|(name, _)| result.discrete_input(&self.map, name) == Some(true))
            .map(|(name, _)| name.to_string())
            .collect();

        Snapshot {
            unit_on: result.coil(&self.map, "UNIT_ON"),
            temperatures,
            readings,
            alarms,
        }
    }
}

fn print_snapshot(snapshot: Snapshot) {
    let power = match snapshot.unit_on {
        Some(true) => "on",
        Some(false) => "off",
        None => "?",
    };
    let temperatures = snapshot
        .temperatures
        .iter()
        .map(|(name, value)| format!("{}={}°C", name.to_lowercase(), value))
        .collect::<Vec<_>>()
        .join(" ");
    let readings = snapshot
        .readings
        .iter()
        .map(|(name, value)| format!("{}={}", name.to_lowercase(), value))
        .collect::<Vec<_>>()
        .join(" ");
    println!("unit {} | {} | {}", power, temperatures, readings);
    if !snapshot.alarms.is_empty() {
        println!("  alarms: {}", snapshot.alarms.join(", "));
    }
}

fn build_config(args: &Args) -> Result<(PollerConfig, Variant), Box<dyn Error>> {
    if let Some(path) = &args.config {
        let json = std::fs::read_to_string(path)?;
        let config = PollerConfig::from_json(&json)?;
        let variant = if config.register_map == RegisterMap::iqc() {
            Variant::Iqc
        } else {
            Variant::Gen3
        };
        return Ok((config, variant));
    }

    let address = args
        .address
        .as_deref()
        .ok_or("an address or --config is required")?;
    let connect = ConnectParams::parse(address)?.with_tcp(!args.rtu);
    let config = PollerConfig::new(RegisterMap::for_variant(args.variant), connect)
        .with_poll_interval_ms(args.interval)
        .with_unit_id(args.unit);
    config.validate()?;
    Ok((config, args.variant))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let (config, variant) = build_config(&args)?;
    info!("{}", heru_modbus::info());
    info!(
        "Polling {} ({}, {}ms)",
        config.connect.address(),
        variant,
        config.poll_interval_ms
    );

    let mut bus = ModbusTcpClient::new(config.request_timeout());
    bus.set_packet_logging(args.packet_log);

    let profile = HeruProfile::new(config.register_map.clone(), variant);
    let client = PollingClient::with_profile(profile, config, bus, print_snapshot)?;
    client.on_available(|| println!("available"));
    client.on_unavailable(|reason| println!("unavailable: {}", reason));

    tokio::signal::ctrl_c().await?;
    client.destroy().await;

    let stats = client.stats();
    info!(
        "Stopped after {} ticks: {} reads ok, {} failed, {} writes, {} reconnects",
        stats.total_ticks,
        stats.successful_reads,
        stats.failed_reads,
        stats.writes_issued,
        stats.reconnects
    );
    Ok(())
}
