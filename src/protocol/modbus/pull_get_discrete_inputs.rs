use anyhow::Result;

use rmodbus::client::ModbusRequest;

use super::{decode_bits, request_for_unit};

/// Generate a Modbus/TCP request to read discrete inputs (function 0x02)
pub fn generate_pull_get_discrete_inputs_request(
    transaction_id: u16,
    unit_id: u8,
    start_address: u16,
    count: u16,
) -> Result<(ModbusRequest, Vec<u8>)> {
    let mut request = request_for_unit(transaction_id, unit_id);
    let mut raw = Vec::with_capacity(12);
    request.generate_get_discretes(start_address, count, &mut raw)?;
    Ok((request, raw))
}

/// Parse a Modbus response for discrete inputs (function 0x02) into a vector of bools.
pub fn parse_pull_get_discrete_inputs(
    request: &mut ModbusRequest,
    response: &[u8],
    count: u16,
) -> Result<Vec<bool>> {
    request.parse_ok(response)?;

    let values = decode_bits(response, count)?;
    log::debug!("Received discrete inputs: {values:?}");

    Ok(values)
}
