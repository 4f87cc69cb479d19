//! Modbus protocol definitions
//!
//! Function codes and the transport-neutral request/response structures that
//! travel between [`crate::client`] and [`crate::transport`].

use std::fmt;

use crate::constants::{MAX_READ_COILS, MAX_READ_REGISTERS, MAX_WRITE_COILS, MAX_WRITE_REGISTERS};
use crate::error::{ModbusError, ModbusResult};

/// Modbus unit identifier (1-247)
pub type UnitId = u8;

/// Function codes used by the poll/write cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ModbusFunction {
    /// Read Coils (0x01)
    ReadCoils = 0x01,
    /// Read Discrete Inputs (0x02)
    ReadDiscreteInputs = 0x02,
    /// Read Holding Registers (0x03)
    ReadHoldingRegisters = 0x03,
    /// Read Input Registers (0x04)
    ReadInputRegisters = 0x04,
    /// Write Multiple Coils (0x0F)
    WriteMultipleCoils = 0x0F,
    /// Write Multiple Registers (0x10)
    WriteMultipleRegisters = 0x10,
}

impl ModbusFunction {
    /// Convert from u8 to ModbusFunction
    pub fn from_u8(value: u8) -> ModbusResult<Self> {
        match value {
            0x01 => Ok(Self::ReadCoils),
            0x02 => Ok(Self::ReadDiscreteInputs),
            0x03 => Ok(Self::ReadHoldingRegisters),
            0x04 => Ok(Self::ReadInputRegisters),
            0x0F => Ok(Self::WriteMultipleCoils),
            0x10 => Ok(Self::WriteMultipleRegisters),
            _ => Err(ModbusError::invalid_function(value)),
        }
    }

    /// Convert to u8
    #[inline]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Check if this is a read function
    pub fn is_read_function(self) -> bool {
        matches!(
            self,
            Self::ReadCoils
                | Self::ReadDiscreteInputs
                | Self::ReadHoldingRegisters
                | Self::ReadInputRegisters
        )
    }

    /// Check if this function addresses single bits rather than registers
    pub fn is_bit_function(self) -> bool {
        matches!(
            self,
            Self::ReadCoils | Self::ReadDiscreteInputs | Self::WriteMultipleCoils
        )
    }

    /// Largest quantity a single request may carry
    pub fn max_quantity(self) -> usize {
        match self {
            Self::ReadCoils | Self::ReadDiscreteInputs => MAX_READ_COILS,
            Self::ReadHoldingRegisters | Self::ReadInputRegisters => MAX_READ_REGISTERS,
            Self::WriteMultipleCoils => MAX_WRITE_COILS,
            Self::WriteMultipleRegisters => MAX_WRITE_REGISTERS,
        }
    }
}

impl fmt::Display for ModbusFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ReadCoils => "Read Coils",
            Self::ReadDiscreteInputs => "Read Discrete Inputs",
            Self::ReadHoldingRegisters => "Read Holding Registers",
            Self::ReadInputRegisters => "Read Input Registers",
            Self::WriteMultipleCoils => "Write Multiple Coils",
            Self::WriteMultipleRegisters => "Write Multiple Registers",
        };
        write!(f, "{} (0x{:02X})", name, *self as u8)
    }
}

/// Modbus request
///
/// For write functions `data` holds the packed payload without the byte
/// count; the PDU encoder adds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModbusRequest {
    pub unit_id: UnitId,
    pub function: ModbusFunction,
    pub address: u16,
    pub quantity: u16,
    pub data: Vec<u8>,
}

fn write_quantity(function: ModbusFunction, len: usize) -> ModbusResult<u16> {
    u16::try_from(len).map_err(|_| {
        ModbusError::invalid_data(format!("Too many values for {}: {}", function, len))
    })
}

impl ModbusRequest {
    /// Create a read request for FC01-04
    pub fn new_read(unit_id: UnitId, function: ModbusFunction, address: u16, quantity: u16) -> Self {
        Self {
            unit_id,
            function,
            address,
            quantity,
            data: Vec::new(),
        }
    }

    /// Create a FC0F request from coil states
    pub fn write_coils(unit_id: UnitId, address: u16, values: &[bool]) -> ModbusResult<Self> {
        let function = ModbusFunction::WriteMultipleCoils;
        Ok(Self {
            unit_id,
            function,
            address,
            quantity: write_quantity(function, values.len())?,
            data: pack_bits(values),
        })
    }

    /// Create a FC10 request from register values
    pub fn write_registers(unit_id: UnitId, address: u16, values: &[u16]) -> ModbusResult<Self> {
        let function = ModbusFunction::WriteMultipleRegisters;
        let quantity = write_quantity(function, values.len())?;
        let mut data = Vec::with_capacity(values.len() * 2);
        for &value in values {
            data.extend_from_slice(&value.to_be_bytes());
        }
        Ok(Self {
            unit_id,
            function,
            address,
            quantity,
            data,
        })
    }

    /// Validate unit id, quantity and address span
    pub fn validate(&self) -> ModbusResult<()> {
        if self.unit_id == 0 || self.unit_id > 247 {
            return Err(ModbusError::invalid_data(format!(
                "Invalid unit ID: {}",
                self.unit_id
            )));
        }

        let max = self.function.max_quantity();
        if self.quantity == 0 || self.quantity as usize > max {
            return Err(ModbusError::invalid_data(format!(
                "Invalid quantity {} for {} (1-{})",
                self.quantity, self.function, max
            )));
        }

        if self.address as u32 + self.quantity as u32 > 0x1_0000 {
            return Err(ModbusError::invalid_data(format!(
                "Address range {}+{} exceeds 65535",
                self.address, self.quantity
            )));
        }

        Ok(())
    }
}

/// Successful Modbus response
///
/// Exception responses never become a `ModbusResponse`; the transport turns
/// them into [`ModbusError::Exception`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModbusResponse {
    pub unit_id: UnitId,
    pub function: ModbusFunction,
    /// PDU bytes after the function code
    pub data: Vec<u8>,
}

impl ModbusResponse {
    /// Create a successful response
    pub fn new(unit_id: UnitId, function: ModbusFunction, data: Vec<u8>) -> Self {
        Self {
            unit_id,
            function,
            data,
        }
    }

    /// Split `[byte_count, payload...]` and check the count
    fn payload(&self) -> ModbusResult<&[u8]> {
        let (&byte_count, rest) = self
            .data
            .split_first()
            .ok_or_else(|| ModbusError::frame("Empty response data"))?;
        let byte_count = byte_count as usize;
        if rest.len() < byte_count {
            return Err(ModbusError::frame(format!(
                "Incomplete response data: byte count {} but {} bytes present",
                byte_count,
                rest.len()
            )));
        }
        Ok(&rest[..byte_count])
    }

    /// Parse FC03/FC04 data as exactly `quantity` registers
    pub fn parse_registers(&self, quantity: u16) -> ModbusResult<Vec<u16>> {
        let payload = self.payload()?;
        if payload.len() != quantity as usize * 2 {
            return Err(ModbusError::frame(format!(
                "Expected {} registers, got {} bytes",
                quantity,
                payload.len()
            )));
        }
        Ok(payload
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect())
    }

    /// Parse FC01/FC02 data as exactly `quantity` bits (LSB first per byte)
    pub fn parse_bits(&self, quantity: u16) -> ModbusResult<Vec<bool>> {
        let payload = self.payload()?;
        let quantity = quantity as usize;
        if payload.len() != quantity.div_ceil(8) {
            return Err(ModbusError::frame(format!(
                "Expected {} bits, got {} bytes",
                quantity,
                payload.len()
            )));
        }
        Ok((0..quantity)
            .map(|i| payload[i / 8] & (1 << (i % 8)) != 0)
            .collect())
    }

    /// Check that a FC0F/FC10 echo matches the request
    pub fn check_write_echo(&self, request: &ModbusRequest) -> ModbusResult<()> {
        if self.data.len() < 4 {
            return Err(ModbusError::frame("Write response too short"));
        }
        let address = u16::from_be_bytes([self.data[0], self.data[1]]);
        let quantity = u16::from_be_bytes([self.data[2], self.data[3]]);
        if address != request.address || quantity != request.quantity {
            return Err(ModbusError::protocol(format!(
                "Write echo mismatch: sent {}+{}, device answered {}+{}",
                request.address, request.quantity, address, quantity
            )));
        }
        Ok(())
    }
}

/// Pack coil states into bytes, LSB first within each byte
pub fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; bits.len().div_ceil(8)];
    for (i, &bit) in bits.iter().enumerate() {
        if bit {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}
