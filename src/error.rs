//! # Error Handling
//!
//! Two layers of errors are used in this crate:
//!
//! - [`ModbusError`] covers a single bus operation: socket I/O, framing,
//!   timeouts and exception responses returned by the unit.
//! - [`PollError`] covers one poll cycle and is what a consumer sees through
//!   the `on_unavailable` observer. Its `Display` text is the reason string.
//!
//! ## Error Categories
//!
//! ### Transport Errors
//! - **I/O Errors**: socket failures
//! - **Connection Errors**: connect refused, socket dropped, not connected
//! - **Timeout Errors**: per-request I/O timeouts with operation context
//!
//! ### Protocol Errors
//! - **Frame / CRC Errors**: malformed MBAP or RTU frames
//! - **Exception Responses**: standard Modbus exception codes from the unit
//!
//! ### Poll Errors
//! - **Connect**: the session could not be established
//! - **Read**: one of the four block reads failed
//! - **ReadTimeout**: the read-all deadline (half the poll interval) elapsed
//! - **Write**: a queued write failed; logged and dropped
//!
//! ```rust
//! use heru_modbus::ModbusError;
//!
//! let err = ModbusError::timeout("read response header", 5000);
//! assert!(err.is_transport_error());
//!
//! let err = ModbusError::exception(0x03, 0x02);
//! assert!(err.is_protocol_error());
//! ```

use thiserror::Error;

use crate::register_map::Block;

/// Result type alias for bus operations
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Errors raised by a single Modbus request/response exchange.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModbusError {
    /// Socket level I/O failure
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Connection establishment or maintenance failure
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// The bus has no open session
    #[error("Not connected")]
    NotConnected,

    /// Operation exceeded its timeout
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    /// General protocol violation
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Unsupported or unexpected function code
    #[error("Invalid function code: 0x{code:02X}")]
    InvalidFunction { code: u8 },

    /// Request data rejected before it reached the wire
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// RTU checksum mismatch
    #[error("CRC validation failed: expected={expected:04X}, actual={actual:04X}")]
    CrcMismatch { expected: u16, actual: u16 },

    /// Exception response returned by the unit
    #[error("Modbus exception: function={function:02X}, code={code:02X} ({message})")]
    Exception {
        function: u8,
        code: u8,
        message: String,
    },

    /// Malformed frame
    #[error("Frame error: {message}")]
    Frame { message: String },

    /// Invalid client or poller configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl ModbusError {
    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Create a new connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a new protocol error
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create an invalid function error
    pub fn invalid_function(code: u8) -> Self {
        Self::InvalidFunction { code }
    }

    /// Create an invalid data error
    pub fn invalid_data<S: Into<String>>(message: S) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    /// Create a CRC mismatch error
    pub fn crc_mismatch(expected: u16, actual: u16) -> Self {
        Self::CrcMismatch { expected, actual }
    }

    /// Create a Modbus exception error.
    ///
    /// Standard exception codes are mapped to their names.
    pub fn exception(function: u8, code: u8) -> Self {
        let message = match code {
            0x01 => "Illegal Function",
            0x02 => "Illegal Data Address",
            0x03 => "Illegal Data Value",
            0x04 => "Slave Device Failure",
            0x05 => "Acknowledge",
            0x06 => "Slave Device Busy",
            0x08 => "Memory Parity Error",
            0x0A => "Gateway Path Unavailable",
            0x0B => "Gateway Target Device Failed to Respond",
            _ => "Unknown Exception",
        }
        .to_string();

        Self::Exception {
            function,
            code,
            message,
        }
    }

    /// Create a frame error
    pub fn frame<S: Into<String>>(message: S) -> Self {
        Self::Frame {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Check if the error is a network/transport issue.
    ///
    /// Transport errors leave the session unusable; the transport drops its
    /// socket when it returns one.
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::Connection { .. } | Self::NotConnected | Self::Timeout { .. }
        )
    }

    /// Check if the error is a protocol issue
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::Protocol { .. }
                | Self::InvalidFunction { .. }
                | Self::Exception { .. }
                | Self::Frame { .. }
                | Self::CrcMismatch { .. }
        )
    }
}

impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for ModbusError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::timeout("Operation timeout", 0)
    }
}

/// Errors reported for one poll cycle.
///
/// A read cycle that fails is reported through `on_unavailable` with this
/// error's display text. Write failures are only logged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PollError {
    /// The session could not be established
    #[error("Unable to connect to {host}:{port}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: ModbusError,
    },

    /// One of the block reads failed
    #[error("Connected to {host}:{port}, but got error: \"{source}\"")]
    Read {
        host: String,
        port: u16,
        #[source]
        source: ModbusError,
    },

    /// The whole read-all operation exceeded its deadline
    #[error("Connected to {host}:{port}, but got error: \"Modbus timeout after {timeout_ms}ms\"")]
    ReadTimeout {
        host: String,
        port: u16,
        timeout_ms: u64,
    },

    /// A queued write failed
    #[error("Failed to write {block} starting at {address}: {source}")]
    Write {
        block: Block,
        address: u16,
        #[source]
        source: ModbusError,
    },
}

impl PollError {
    /// True for the half-interval deadline case
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ReadTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let err = ModbusError::timeout("read_registers", 5000);
        assert!(err.is_transport_error());
        assert!(!err.is_protocol_error());

        let err = ModbusError::exception(0x03, 0x02);
        assert!(err.is_protocol_error());
        assert!(!err.is_transport_error());

        assert!(ModbusError::NotConnected.is_transport_error());
    }

    #[test]
    fn test_error_display() {
        let err = ModbusError::crc_mismatch(0x1234, 0x5678);
        let msg = format!("{}", err);
        assert!(msg.contains("CRC validation failed"));
        assert!(msg.contains("1234"));
        assert!(msg.contains("5678"));

        let err = ModbusError::exception(0x04, 0x02);
        assert!(err.to_string().contains("Illegal Data Address"));
    }

    #[test]
    fn test_poll_error_reason_text() {
        let err = PollError::Connect {
            host: "192.168.1.50".to_string(),
            port: 502,
            source: ModbusError::connection("refused"),
        };
        assert_eq!(err.to_string(), "Unable to connect to 192.168.1.50:502");

        let err = PollError::Read {
            host: "10.0.0.2".to_string(),
            port: 4001,
            source: ModbusError::NotConnected,
        };
        assert_eq!(
            err.to_string(),
            "Connected to 10.0.0.2:4001, but got error: \"Not connected\""
        );

        let err = PollError::ReadTimeout {
            host: "10.0.0.2".to_string(),
            port: 4001,
            timeout_ms: 1000,
        };
        assert!(err.is_timeout());
        assert!(err.to_string().contains("Modbus timeout after 1000ms"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let err: ModbusError = io.into();
        assert!(matches!(err, ModbusError::Io { .. }));
        assert!(err.to_string().contains("reset by peer"));
    }
}
