use anyhow::Result;

use rmodbus::client::ModbusRequest;

use super::{decode_bits, request_for_unit};

/// Generate a Modbus/TCP request to read coils (function 0x01)
pub fn generate_pull_get_coils_request(
    transaction_id: u16,
    unit_id: u8,
    start_address: u16,
    count: u16,
) -> Result<(ModbusRequest, Vec<u8>)> {
    let mut request = request_for_unit(transaction_id, unit_id);
    let mut raw = Vec::with_capacity(12);
    request.generate_get_coils(start_address, count, &mut raw)?;
    Ok((request, raw))
}

pub fn parse_pull_get_coils(
    request: &mut ModbusRequest,
    response: &[u8],
    count: u16,
) -> Result<Vec<bool>> {
    request.parse_ok(response)?;

    let values = decode_bits(response, count)?;
    log::debug!("Received coils: {values:?}");

    Ok(values)
}
