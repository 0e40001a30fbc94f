use anyhow::{Context, Result};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::{parse_mbap_header, MBAP_HEADER_LEN};

/// Buffered reader for Modbus/TCP frames (MBAP header included).
///
/// Bytes of a partly received frame stay buffered when [`read_frame`] is
/// cancelled, so the next call picks the frame up where the last one stopped
/// instead of parsing its tail as a new header.
///
/// [`read_frame`]: MbapReader::read_frame
#[derive(Debug, Default)]
pub struct MbapReader {
    buffer: Vec<u8>,
}

impl MbapReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes received but not yet handed out as a frame.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Split one complete frame off the front of the buffer.
    ///
    /// An invalid header leaves nothing to align on, so the buffer is
    /// dropped along with it.
    pub fn take_frame(&mut self) -> Result<Option<Vec<u8>>> {
        if self.buffer.len() < MBAP_HEADER_LEN {
            return Ok(None);
        }

        let mut header = [0u8; MBAP_HEADER_LEN];
        header.copy_from_slice(&self.buffer[..MBAP_HEADER_LEN]);
        let len = match parse_mbap_header(&header) {
            Ok(len) => len,
            Err(err) => {
                log::debug!("Dropping {} buffered bytes after a bad header", self.buffer.len());
                self.buffer.clear();
                return Err(err);
            }
        };
        if self.buffer.len() < len {
            return Ok(None);
        }

        let rest = self.buffer.split_off(len);
        let frame = std::mem::replace(&mut self.buffer, rest);

        log::debug!(
            "Received Modbus frame: {}",
            frame
                .iter()
                .map(|b| format!("{:02x}", b))
                .collect::<Vec<_>>()
                .join(" ")
        );

        Ok(Some(frame))
    }

    /// Read until one complete frame is available. Cancel safe.
    pub async fn read_frame<R>(&mut self, reader: &mut R) -> Result<Vec<u8>>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            if let Some(frame) = self.take_frame()? {
                return Ok(frame);
            }

            let read = reader
                .read_buf(&mut self.buffer)
                .await
                .context("Failed to read MBAP frame")?;
            if read == 0 {
                return Err(anyhow::Error::new(io::Error::from(io::ErrorKind::UnexpectedEof))
                    .context("Connection closed in the middle of an MBAP frame"));
            }
        }
    }
}
