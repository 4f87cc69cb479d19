#![no_main]

use heru_modbus::pdu::decode_response;
use heru_modbus::transport::{split_mbap_frame, split_rtu_frame};
use libfuzzer_sys::fuzz_target;

// Arbitrary bytes from the socket must never panic the frame splitters or
// the PDU decoder.
fuzz_target!(|data: &[u8]| {
    if let Ok((unit_id, pdu)) = split_rtu_frame(data) {
        let _ = decode_response(unit_id, pdu);
    }

    let tid = data
        .get(..2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .unwrap_or(0);
    if let Ok((unit_id, pdu)) = split_mbap_frame(data, tid) {
        let _ = decode_response(unit_id, pdu);
    }
});
