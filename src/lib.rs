//! # Heru Modbus - Polling Client for Heru Ventilation Units
//!
//! Keeps a Modbus session to a Heru air handling unit, reads its four
//! register blocks on a fixed period, and serializes consumer writes ahead
//! of the next read. Raw blocks are handed to the consumer untouched; the
//! register map and value codec help interpret them.
//!
//! ## Features
//!
//! - **Two framings**: Modbus TCP, or RTU frames over a raw socket for
//!   serial-to-Ethernet gateways
//! - **Self-healing loop**: failed health checks trigger a bounded reconnect,
//!   no error ever stops polling
//! - **Write queue**: writes go out in enqueue order and the next read is
//!   skipped so a half-applied state is never observed
//! - **Variant maps**: Gen3 remote and IQC touch ranges with named addresses
//!
//! ## Bus Traffic per Tick
//!
//! | Code | Block | When |
//! |------|-------|------|
//! | 0x01 | coils | every read cycle |
//! | 0x02 | discrete inputs | every read cycle |
//! | 0x04 | input registers | every read cycle |
//! | 0x03 | holding registers | every read cycle |
//! | 0x0F | coils | flush of queued coil writes |
//! | 0x10 | holding registers | flush of queued register writes |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use heru_modbus::codec::scaled_tenth;
//! use heru_modbus::{ConnectParams, PollerConfig, PollingClient, RegisterMap};
//!
//! #[tokio::main]
//! async fn main() -> heru_modbus::ModbusResult<()> {
//!     let map = RegisterMap::gen3();
//!     let config = PollerConfig::new(map.clone(), ConnectParams::new("192.168.1.50", 4001));
//!     let client = PollingClient::over_tcp(config)?;
//!
//!     client.on_result(move |result| {
//!         if let Some(raw) = result.input_register(&map, "OUTDOOR_TEMPERATURE") {
//!             println!("Outdoor: {}°C", scaled_tenth(raw));
//!         }
//!     });
//!
//!     tokio::signal::ctrl_c().await.ok();
//!     client.destroy().await;
//!     Ok(())
//! }
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Core error types and result handling
pub mod error;

/// Modbus protocol constants and limits
pub mod constants;

/// Stack-allocated PDU encoding and response decoding
pub mod pdu;

/// Modbus protocol definitions and message handling
pub mod protocol;

/// Socket transport with TCP and RTU framing
pub mod transport;

/// Modbus client implementations
pub mod client;

// ============================================================================
// Heru device modules
// ============================================================================

/// Per-variant read ranges and named addresses
pub mod register_map;

/// Sign recovery, decimal scaling and weekday masks
pub mod codec;

/// Pending write queue
pub mod queue;

/// Connection and polling configuration
pub mod config;

/// Periodic read/write cycle and consumer notifications
pub mod poller;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Async runtime (users can use heru_modbus::tokio) ===
pub use tokio;

// === Core client API ===
pub use client::{GenericModbusClient, ModbusClient, ModbusTcpClient};

// === Error handling ===
pub use error::{ModbusError, ModbusResult, PollError};

// === Wire types ===
pub use protocol::{ModbusFunction, ModbusRequest, ModbusResponse, UnitId};

// === Polling ===
pub use config::{ConnectParams, PollerConfig};
pub use poller::{ConnectionState, DeviceProfile, PollResult, PollStats, PollingClient};
pub use queue::WriteQueue;
pub use register_map::{Block, Capabilities, RegisterMap, RegisterRange, Variant};

// === Codec ===
pub use codec::WeekdayMask;

// === Transport ===
pub use transport::{Framing, ModbusTransport, TcpTransport, TransportStats};

// === Per-request limits ===
pub use constants::{
    MAX_PDU_SIZE, MAX_READ_COILS, MAX_READ_REGISTERS, MAX_WRITE_COILS, MAX_WRITE_REGISTERS,
};

// === PDU ===
pub use pdu::ModbusPdu;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name and version banner
pub fn info() -> String {
    format!("Heru Modbus v{} - polling client for Heru ventilation units", VERSION)
}
