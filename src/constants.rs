//! Modbus protocol constants
//!
//! Frame sizes and per-request quantity limits from the Modbus application
//! protocol, plus the framing constants used by the two wire formats this
//! crate speaks (MBAP over TCP, RTU over a raw TCP socket).

// ============================================================================
// Frame Size Constants
// ============================================================================

/// MBAP header length without the unit id.
/// Transaction ID(2) + Protocol ID(2) + Length(2)
pub const MBAP_HEADER_LEN: usize = 6;

/// Maximum PDU size (RS485 ADU 256 - address 1 - CRC 2)
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum MBAP length field value (unit id + PDU)
pub const MAX_MBAP_LENGTH: usize = 1 + MAX_PDU_SIZE;

/// RTU CRC trailer length
pub const RTU_CRC_LEN: usize = 2;

/// Maximum RTU frame (address + PDU + CRC)
pub const MAX_RTU_FRAME_SIZE: usize = 1 + MAX_PDU_SIZE + RTU_CRC_LEN;

/// High bit set on the function code of an exception response
pub const EXCEPTION_FLAG: u8 = 0x80;

// ============================================================================
// Quantity Limits
// ============================================================================

/// Maximum registers for FC03/FC04: (253 - 2) / 2
pub const MAX_READ_REGISTERS: usize = 125;

/// Maximum registers for FC16: (253 - 6) / 2
pub const MAX_WRITE_REGISTERS: usize = 123;

/// Maximum bits for FC01/FC02
pub const MAX_READ_COILS: usize = 2000;

/// Maximum coils for FC15 (0x7B0)
pub const MAX_WRITE_COILS: usize = 1968;
