mod frame;
mod header;
mod pull_get_coils;
mod pull_get_discrete_inputs;
mod pull_get_holdings;
mod pull_get_inputs;

use anyhow::{ensure, Result};

use rmodbus::{client::ModbusRequest, ModbusProto};

pub use frame::MbapReader;
pub use header::{parse_mbap_header, transaction_id, MBAP_HEADER_LEN};
pub use pull_get_coils::{generate_pull_get_coils_request, parse_pull_get_coils};
pub use pull_get_discrete_inputs::{
    generate_pull_get_discrete_inputs_request, parse_pull_get_discrete_inputs,
};
pub use pull_get_holdings::{generate_pull_get_holdings_request, parse_pull_get_holdings};
pub use pull_get_inputs::{generate_pull_get_inputs_request, parse_pull_get_inputs};

/// MBAP header, unit id, function code and byte count precede the data.
const READ_DATA_OFFSET: usize = MBAP_HEADER_LEN + 3;

fn request_for_unit(transaction_id: u16, unit_id: u8) -> ModbusRequest {
    let mut request = ModbusRequest::new(unit_id, ModbusProto::TcpUdp);
    request.tr_id = transaction_id;
    request
}

fn read_data(response: &[u8]) -> Result<&[u8]> {
    ensure!(
        response.len() >= READ_DATA_OFFSET,
        "Read response too short: {} bytes",
        response.len()
    );
    let byte_count = response[READ_DATA_OFFSET - 1] as usize;
    let data = &response[READ_DATA_OFFSET..];
    ensure!(
        data.len() == byte_count,
        "Byte count {byte_count} does not match {} data bytes",
        data.len()
    );
    Ok(data)
}

fn decode_bits(response: &[u8], count: u16) -> Result<Vec<bool>> {
    // Modbus pack: first bit corresponds to LSB (bit0) of first data byte.
    let mut values = read_data(response)?
        .iter()
        .flat_map(|byte| (0..8).map(move |i| (byte & (1 << i)) != 0))
        .collect::<Vec<bool>>();
    if values.len() > count as usize {
        values.truncate(count as usize);
    }
    ensure!(
        values.len() == count as usize,
        "Invalid number of bits in response"
    );
    Ok(values)
}

fn decode_words(response: &[u8], count: u16) -> Result<Vec<u16>> {
    let data = read_data(response)?;
    ensure!(
        data.len() == count as usize * 2,
        "Expected {count} registers, got {} bytes",
        data.len()
    );
    Ok(data
        .chunks_exact(2)
        .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(request: &[u8], pdu: &[u8]) -> Vec<u8> {
        let length = (pdu.len() + 1) as u16;
        let mut frame = vec![request[0], request[1], 0, 0];
        frame.extend_from_slice(&length.to_be_bytes());
        frame.push(request[6]);
        frame.extend_from_slice(pdu);
        frame
    }

    #[test]
    fn test_holdings_request_layout() -> Result<()> {
        let (_, raw) = generate_pull_get_holdings_request(0x1234, 16, 100, 2)?;
        assert_eq!(raw, vec![0x12, 0x34, 0, 0, 0, 6, 16, 0x03, 0, 100, 0, 2]);
        Ok(())
    }

    #[test]
    fn test_parse_holdings_reply() -> Result<()> {
        let (mut request, raw) = generate_pull_get_holdings_request(7, 16, 0, 2)?;
        let response = reply(&raw, &[0x03, 4, 0x01, 0x02, 0x00, 0x2A]);
        let values = parse_pull_get_holdings(&mut request, &response, 2)?;
        assert_eq!(values, vec![0x0102, 42]);
        Ok(())
    }

    #[test]
    fn test_parse_inputs_reply() -> Result<()> {
        let (mut request, raw) = generate_pull_get_inputs_request(8, 3, 30, 1)?;
        assert_eq!(raw[7], 0x04);
        let response = reply(&raw, &[0x04, 2, 0xFF, 0xFE]);
        assert_eq!(parse_pull_get_inputs(&mut request, &response, 1)?, vec![0xFFFE]);
        Ok(())
    }

    #[test]
    fn test_parse_coils_reply_lsb_first() -> Result<()> {
        let (mut request, raw) = generate_pull_get_coils_request(9, 1, 0, 3)?;
        let response = reply(&raw, &[0x01, 1, 0b0000_0101]);
        let values = parse_pull_get_coils(&mut request, &response, 3)?;
        assert_eq!(values, vec![true, false, true]);
        Ok(())
    }

    #[test]
    fn test_parse_discrete_inputs_reply() -> Result<()> {
        let (mut request, raw) = generate_pull_get_discrete_inputs_request(10, 2, 10, 1)?;
        assert_eq!(raw[7], 0x02);
        let response = reply(&raw, &[0x02, 1, 0b0000_0000]);
        assert_eq!(
            parse_pull_get_discrete_inputs(&mut request, &response, 1)?,
            vec![false]
        );
        Ok(())
    }

    #[test]
    fn test_exception_reply_is_rmodbus_error() -> Result<()> {
        let (mut request, raw) = generate_pull_get_holdings_request(11, 16, 1000, 1)?;
        let response = reply(&raw, &[0x83, 0x02]);
        let err = parse_pull_get_holdings(&mut request, &response, 1).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<rmodbus::ErrorKind>(),
            Some(rmodbus::ErrorKind::IllegalDataAddress)
        ));
        Ok(())
    }

    #[test]
    fn test_short_payload_is_rejected() -> Result<()> {
        let (mut request, raw) = generate_pull_get_holdings_request(12, 16, 0, 2)?;
        let response = reply(&raw, &[0x03, 2, 0x00, 0x01]);
        assert!(parse_pull_get_holdings(&mut request, &response, 2).is_err());
        Ok(())
    }

    #[test]
    fn test_mbap_header_length() -> Result<()> {
        assert_eq!(parse_mbap_header(&[0, 1, 0, 0, 0, 5])?, 11);
        assert!(parse_mbap_header(&[0, 1, 0, 7, 0, 5]).is_err());
        assert!(parse_mbap_header(&[0, 1, 0, 0, 0, 0]).is_err());
        assert_eq!(transaction_id(&[0xAB, 0xCD, 0]), Some(0xABCD));
        Ok(())
    }

    const FRAME: [u8; 11] = [0, 1, 0, 0, 0, 5, 16, 0x03, 2, 0, 42];

    #[test]
    fn test_read_frame_across_chunks() -> Result<()> {
        let mut stream = tokio_test::io::Builder::new()
            .read(&FRAME[..4])
            .read(&FRAME[4..])
            .build();
        let mut reader = MbapReader::new();
        let read = tokio_test::block_on(reader.read_frame(&mut stream))?;
        assert_eq!(read, FRAME.to_vec());
        assert_eq!(reader.pending(), 0);
        Ok(())
    }

    #[test]
    fn test_back_to_back_frames_in_one_chunk() -> Result<()> {
        let mut second = FRAME;
        second[1] = 2;
        let mut stream = tokio_test::io::Builder::new()
            .read(&[FRAME.as_slice(), second.as_slice()].concat())
            .build();
        let mut reader = MbapReader::new();

        let first = tokio_test::block_on(reader.read_frame(&mut stream))?;
        assert_eq!(transaction_id(&first), Some(1));
        assert_eq!(reader.pending(), FRAME.len());

        let next = tokio_test::block_on(reader.read_frame(&mut stream))?;
        assert_eq!(transaction_id(&next), Some(2));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_read_resumes_mid_frame() -> Result<()> {
        let mut stream = tokio_test::io::Builder::new()
            .read(&FRAME[..4])
            .wait(std::time::Duration::from_secs(1))
            .read(&FRAME[4..])
            .build();
        let mut reader = MbapReader::new();

        let cut = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            reader.read_frame(&mut stream),
        )
        .await;
        assert!(cut.is_err());
        assert_eq!(reader.pending(), 4);

        let read = reader.read_frame(&mut stream).await?;
        assert_eq!(read, FRAME.to_vec());
        Ok(())
    }

    #[test]
    fn test_bad_header_drops_buffer() {
        let mut stream = tokio_test::io::Builder::new()
            .read(&[0, 1, 0, 7, 0, 5, 16, 0x03, 2, 0, 42])
            .build();
        let mut reader = MbapReader::new();
        assert!(tokio_test::block_on(reader.read_frame(&mut stream)).is_err());
        assert_eq!(reader.pending(), 0);
    }

    #[test]
    fn test_eof_mid_frame_is_io() {
        let mut stream = tokio_test::io::Builder::new().read(&FRAME[..8]).build();
        let mut reader = MbapReader::new();
        let err = tokio_test::block_on(reader.read_frame(&mut stream)).unwrap_err();
        assert!(err.downcast_ref::<std::io::Error>().is_some());
    }
}
