#![no_main]

use arbitrary::Arbitrary;
use heru_modbus::pdu::decode_response;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    unit_id: u8,
    quantity: u16,
    pdu: Vec<u8>,
}

// A decoded response parsed with any requested quantity either yields
// exactly that many values or an error.
fuzz_target!(|input: Input| {
    let Ok(response) = decode_response(input.unit_id, &input.pdu) else {
        return;
    };
    if let Ok(words) = response.parse_registers(input.quantity) {
        assert_eq!(words.len(), input.quantity as usize);
    }
    if let Ok(bits) = response.parse_bits(input.quantity) {
        assert_eq!(bits.len(), input.quantity as usize);
    }
});
