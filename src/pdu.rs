//! Modbus PDU encoding and decoding
//!
//! The PDU (function code + data) is identical for both wire formats, so the
//! transport only wraps it: MBAP header for TCP, address + CRC for RTU.
//! A fixed-size stack array avoids a heap allocation per request.

use tracing::debug;

use crate::constants::{EXCEPTION_FLAG, MAX_PDU_SIZE};
use crate::error::{ModbusError, ModbusResult};
use crate::protocol::{ModbusFunction, ModbusRequest, ModbusResponse, UnitId};

/// PDU with stack-allocated fixed array
#[derive(Debug, Clone)]
pub struct ModbusPdu {
    data: [u8; MAX_PDU_SIZE],
    len: usize,
}

impl ModbusPdu {
    /// Create an empty PDU
    #[inline]
    pub fn new() -> Self {
        Self {
            data: [0; MAX_PDU_SIZE],
            len: 0,
        }
    }

    /// Push a single byte
    #[inline]
    pub fn push(&mut self, byte: u8) -> ModbusResult<()> {
        if self.len >= MAX_PDU_SIZE {
            return Err(ModbusError::protocol("PDU buffer full"));
        }
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    /// Push u16 in big-endian
    #[inline]
    pub fn push_u16(&mut self, value: u16) -> ModbusResult<()> {
        let [hi, lo] = value.to_be_bytes();
        self.push(hi)?;
        self.push(lo)
    }

    /// Extend with a byte slice
    #[inline]
    pub fn extend(&mut self, data: &[u8]) -> ModbusResult<()> {
        if self.len + data.len() > MAX_PDU_SIZE {
            return Err(ModbusError::protocol(format!(
                "PDU would exceed max size: {} + {} > {}",
                self.len,
                data.len(),
                MAX_PDU_SIZE
            )));
        }
        self.data[self.len..self.len + data.len()].copy_from_slice(data);
        self.len += data.len();
        Ok(())
    }

    /// Get immutable data slice
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Encode a request into its PDU.
    ///
    /// Reads carry address + quantity. Multi-writes carry address + quantity
    /// + byte count + payload.
    pub fn encode_request(request: &ModbusRequest) -> ModbusResult<Self> {
        request.validate()?;

        let mut pdu = Self::new();
        pdu.push(request.function.to_u8())?;
        pdu.push_u16(request.address)?;
        pdu.push_u16(request.quantity)?;

        match request.function {
            ModbusFunction::ReadCoils
            | ModbusFunction::ReadDiscreteInputs
            | ModbusFunction::ReadHoldingRegisters
            | ModbusFunction::ReadInputRegisters => {}
            ModbusFunction::WriteMultipleCoils | ModbusFunction::WriteMultipleRegisters => {
                let expected = if request.function.is_bit_function() {
                    (request.quantity as usize).div_ceil(8)
                } else {
                    request.quantity as usize * 2
                };
                if request.data.len() != expected {
                    return Err(ModbusError::invalid_data(format!(
                        "{} payload is {} bytes, expected {}",
                        request.function,
                        request.data.len(),
                        expected
                    )));
                }
                pdu.push(expected as u8)?;
                pdu.extend(&request.data)?;
            }
        }

        debug!(
            "PDU built: FC={:02X} ({}), total_len={}",
            request.function.to_u8(),
            request.function,
            pdu.len()
        );
        Ok(pdu)
    }
}

impl Default for ModbusPdu {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode a response PDU received from `unit_id`.
///
/// Exception responses are returned as [`ModbusError::Exception`].
pub fn decode_response(unit_id: UnitId, pdu: &[u8]) -> ModbusResult<ModbusResponse> {
    let (&function_code, rest) = pdu
        .split_first()
        .ok_or_else(|| ModbusError::frame("Empty PDU"))?;

    if function_code & EXCEPTION_FLAG != 0 {
        let code = rest
            .first()
            .copied()
            .ok_or_else(|| ModbusError::frame("Exception response without code"))?;
        debug!(
            "PDU parsed: FC={:02X} exception_code={:02X}",
            function_code, code
        );
        return Err(ModbusError::exception(function_code & !EXCEPTION_FLAG, code));
    }

    let function = ModbusFunction::from_u8(function_code)?;
    debug!("PDU parsed: FC={:02X} ({}), data_len={}", function_code, function, rest.len());
    Ok(ModbusResponse::new(unit_id, function, rest.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pdu_basic_operations() {
        let mut pdu = ModbusPdu::new();
        assert!(pdu.is_empty());

        pdu.push(0x03).unwrap();
        pdu.push_u16(0x0100).unwrap();
        pdu.push_u16(0x000A).unwrap();

        assert_eq!(pdu.len(), 5);
        assert_eq!(pdu.as_slice(), &[0x03, 0x01, 0x00, 0x00, 0x0A]);
    }

    #[test]
    fn test_encode_read_request() {
        let req = ModbusRequest::new_read(1, ModbusFunction::ReadDiscreteInputs, 9, 25);
        let pdu = ModbusPdu::encode_request(&req).unwrap();
        assert_eq!(pdu.as_slice(), &[0x02, 0x00, 0x09, 0x00, 0x19]);
    }

    #[test]
    fn test_encode_write_coils() {
        let req = ModbusRequest::write_coils(1, 2, &[true, false, true]).unwrap();
        let pdu = ModbusPdu::encode_request(&req).unwrap();
        assert_eq!(pdu.as_slice(), &[0x0F, 0x00, 0x02, 0x00, 0x03, 0x01, 0x05]);
    }

    #[test]
    fn test_encode_write_registers() {
        let req = ModbusRequest::write_registers(1, 0x0001, &[0x000A, 0x0102]).unwrap();
        let pdu = ModbusPdu::encode_request(&req).unwrap();
        assert_eq!(
            pdu.as_slice(),
            &[0x10, 0x00, 0x01, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x01, 0x02]
        );
    }

    #[test]
    fn test_encode_rejects_mismatched_payload() {
        let mut req = ModbusRequest::write_registers(1, 0, &[1, 2]).unwrap();
        req.data.pop();
        assert!(ModbusPdu::encode_request(&req).is_err());
    }

    #[test]
    fn test_decode_exception() {
        let err = decode_response(1, &[0x83, 0x02]).unwrap_err();
        assert_eq!(err, ModbusError::exception(0x03, 0x02));
    }

    #[test]
    fn test_decode_success() {
        let response = decode_response(1, &[0x04, 0x02, 0x00, 0xCD]).unwrap();
        assert_eq!(response.function, ModbusFunction::ReadInputRegisters);
        assert_eq!(response.data, vec![0x02, 0x00, 0xCD]);
    }
}
