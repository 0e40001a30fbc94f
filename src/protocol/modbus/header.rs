use anyhow::{ensure, Result};

/// Transaction id, protocol id and length; the unit id is counted in the length.
pub const MBAP_HEADER_LEN: usize = 6;

/// Unit id plus the largest PDU a Modbus/TCP frame may carry.
const MAX_MBAP_LENGTH: usize = 254;

/// Total frame length, header included, announced by an MBAP header.
pub fn parse_mbap_header(buf: &[u8; MBAP_HEADER_LEN]) -> Result<usize> {
    let protocol = u16::from_be_bytes([buf[2], buf[3]]);
    ensure!(protocol == 0, "Unexpected MBAP protocol id 0x{protocol:04X}");

    let length = u16::from_be_bytes([buf[4], buf[5]]) as usize;
    ensure!(
        (2..=MAX_MBAP_LENGTH).contains(&length),
        "Invalid MBAP length field: {length}"
    );

    Ok(MBAP_HEADER_LEN + length)
}

pub fn transaction_id(frame: &[u8]) -> Option<u16> {
    frame.get(..2).map(|id| u16::from_be_bytes([id[0], id[1]]))
}
