//! # Poller Configuration
//!
//! Connection parameters and polling settings, with builder-style setters
//! and serde support so a configuration can be loaded from JSON.
//!
//! ```rust
//! use heru_modbus::{ConnectParams, PollerConfig, RegisterMap};
//!
//! let config = PollerConfig::new(RegisterMap::iqc(), ConnectParams::new("192.168.1.50", 4001))
//!     .with_poll_interval_ms(5000);
//! assert!(config.validate().is_ok());
//! assert_eq!(config.read_timeout_ms(), 2500);
//! ```

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::constants::{MAX_READ_COILS, MAX_READ_REGISTERS};
use crate::error::{ModbusError, ModbusResult};
use crate::register_map::{Block, RegisterMap, Variant};

/// Default poll period in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u32 = 2000;

/// Consecutive failed health checks tolerated before a reconnect.
pub const DEFAULT_RECONNECT_THRESHOLD: u32 = 5;

/// Default Modbus unit id.
pub const DEFAULT_UNIT_ID: u8 = 1;

/// Default per-request I/O timeout in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5000;

/// Modbus TCP default port.
pub const DEFAULT_PORT: u16 = 502;

/// Where and how to reach the unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectParams {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// `true` for Modbus TCP, `false` for RTU framing over a raw socket
    #[serde(default)]
    pub use_tcp: bool,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl ConnectParams {
    /// RTU-over-TCP parameters for `host:port`
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            use_tcp: false,
        }
    }

    /// Select Modbus TCP (`true`) or RTU-over-TCP (`false`)
    pub fn with_tcp(mut self, use_tcp: bool) -> Self {
        self.use_tcp = use_tcp;
        self
    }

    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Parse `host:port`; the port defaults to 502
    pub fn parse(address: &str) -> ModbusResult<Self> {
        match address.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|e| {
                    ModbusError::configuration(format!("Invalid port in '{}': {}", address, e))
                })?;
                Ok(Self::new(host, port))
            }
            None => Ok(Self::new(address, DEFAULT_PORT)),
        }
    }

    pub fn validate(&self) -> ModbusResult<()> {
        if self.host.trim().is_empty() {
            return Err(ModbusError::configuration("Host must not be empty"));
        }
        if self.port == 0 {
            return Err(ModbusError::configuration("Port must not be 0"));
        }
        Ok(())
    }
}

/// Register map given either as a variant name or as a full map
#[derive(Deserialize)]
#[serde(untagged)]
enum RegisterMapSource {
    Variant(Variant),
    Map(RegisterMap),
}

fn deserialize_register_map<'de, D>(deserializer: D) -> Result<RegisterMap, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match RegisterMapSource::deserialize(deserializer)? {
        RegisterMapSource::Variant(variant) => RegisterMap::for_variant(variant),
        RegisterMapSource::Map(map) => map,
    })
}

/// Polling client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Ranges read every cycle
    #[serde(default = "RegisterMap::gen3", deserialize_with = "deserialize_register_map")]
    pub register_map: RegisterMap,
    /// Tick period
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u32,
    pub connect: ConnectParams,
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,
    /// Failed health checks tolerated before reconnecting
    #[serde(default = "default_reconnect_threshold")]
    pub reconnect_threshold: u32,
    /// Per-request I/O timeout used by the TCP transport
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_poll_interval_ms() -> u32 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_unit_id() -> u8 {
    DEFAULT_UNIT_ID
}

fn default_reconnect_threshold() -> u32 {
    DEFAULT_RECONNECT_THRESHOLD
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

impl PollerConfig {
    /// Configuration with default interval, unit id and thresholds
    pub fn new(register_map: RegisterMap, connect: ConnectParams) -> Self {
        Self {
            register_map,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            connect,
            unit_id: DEFAULT_UNIT_ID,
            reconnect_threshold: DEFAULT_RECONNECT_THRESHOLD,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }

    /// Load from a JSON document
    pub fn from_json(json: &str) -> ModbusResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ModbusError::configuration(format!("Invalid poller config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_poll_interval_ms(mut self, interval_ms: u32) -> Self {
        self.poll_interval_ms = interval_ms;
        self
    }

    pub fn with_unit_id(mut self, unit_id: u8) -> Self {
        self.unit_id = unit_id;
        self
    }

    pub fn with_reconnect_threshold(mut self, threshold: u32) -> Self {
        self.reconnect_threshold = threshold;
        self
    }

    pub fn with_request_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.request_timeout_ms = timeout_ms;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms as u64)
    }

    /// Deadline for one read-all operation: half the poll interval
    pub fn read_timeout_ms(&self) -> u64 {
        self.poll_interval_ms as u64 / 2
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> ModbusResult<()> {
        self.connect.validate()?;
        if self.poll_interval_ms == 0 {
            return Err(ModbusError::configuration("Poll interval must be positive"));
        }
        if self.unit_id == 0 || self.unit_id > 247 {
            return Err(ModbusError::configuration(format!(
                "Unit ID {} outside 1-247",
                self.unit_id
            )));
        }
        if self.request_timeout_ms == 0 {
            return Err(ModbusError::configuration("Request timeout must be positive"));
        }
        for block in Block::ALL {
            let range = self.register_map.range(block);
            let max = if block.is_bit_block() {
                MAX_READ_COILS
            } else {
                MAX_READ_REGISTERS
            };
            if range.count as usize > max {
                return Err(ModbusError::configuration(format!(
                    "{} count {} exceeds {} per read",
                    block, range.count, max
                )));
            }
            if range.end() > 0x1_0000 {
                return Err(ModbusError::configuration(format!(
                    "{} range {}+{} exceeds 65535",
                    block, range.start, range.count
                )));
            }
        }
        Ok(())
    }
}
