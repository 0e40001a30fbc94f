use anyhow::Result;

use rmodbus::client::ModbusRequest;

use super::{decode_words, request_for_unit};

/// Generate a Modbus/TCP request to read input registers (function 0x04)
pub fn generate_pull_get_inputs_request(
    transaction_id: u16,
    unit_id: u8,
    start_address: u16,
    count: u16,
) -> Result<(ModbusRequest, Vec<u8>)> {
    let mut request = request_for_unit(transaction_id, unit_id);
    let mut raw = Vec::with_capacity(12);
    request.generate_get_inputs(start_address, count, &mut raw)?;
    Ok((request, raw))
}

pub fn parse_pull_get_inputs(
    request: &mut ModbusRequest,
    response: &[u8],
    count: u16,
) -> Result<Vec<u16>> {
    request.parse_ok(response)?;

    let values = decode_words(response, count)?;
    log::debug!("Received input registers: {values:?}");

    Ok(values)
}
