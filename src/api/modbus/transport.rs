//! Modbus/TCP transport for the scanner.
//!
//! The probe engine only ever sees [`ModbusTransport::read`] with a canonical
//! [`DeviceAddress`]; how that address ends up in the MBAP unit identifier,
//! how frames are built and how stale replies are skipped all stays here.

use async_trait::async_trait;
use std::{fmt, time::Duration};
use tokio::{
    io::AsyncWriteExt,
    net::TcpStream,
    time::{timeout, Instant},
};

use super::{
    traits::{Connector, ModbusTransport},
    types::{DeviceAddress, FunctionCode, Payload},
};
use crate::protocol::modbus::{
    generate_pull_get_coils_request, generate_pull_get_discrete_inputs_request,
    generate_pull_get_holdings_request, generate_pull_get_inputs_request, parse_pull_get_coils,
    parse_pull_get_discrete_inputs, parse_pull_get_holdings, parse_pull_get_inputs,
    transaction_id, MbapReader,
};

/// Every way a single read (or a connect) can fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The gateway could not be reached.
    Connect(String),
    /// No complete reply arrived within the configured timeout.
    Timeout,
    /// Socket level failure (reset, EOF, ...).
    Io(String),
    /// A reply arrived but could not be decoded.
    MalformedFrame(String),
    /// The device (or the gateway on its behalf) answered with an exception.
    Exception { code: u8 },
    /// A well-formed reply without any data.
    EmptyPayload,
    /// The connection was already released.
    Closed,
}

impl TransportError {
    /// True for protocol-level "no such function/register" style replies.
    pub fn is_exception(&self) -> bool {
        matches!(self, TransportError::Exception { .. })
    }

    fn from_anyhow(err: anyhow::Error) -> Self {
        if let Some(kind) = err.downcast_ref::<rmodbus::ErrorKind>() {
            return match exception_code(kind) {
                Some(code) => TransportError::Exception { code },
                None => TransportError::MalformedFrame(format!("{err:#}")),
            };
        }
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            return TransportError::Io(io.to_string());
        }
        TransportError::MalformedFrame(format!("{err:#}"))
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Connect(reason) => write!(f, "connect failed: {reason}"),
            TransportError::Timeout => write!(f, "timed out"),
            TransportError::Io(reason) => write!(f, "i/o error: {reason}"),
            TransportError::MalformedFrame(reason) => write!(f, "malformed reply: {reason}"),
            TransportError::Exception { code } => write!(
                f,
                "exception 0x{code:02X} ({})",
                exception_name(*code)
            ),
            TransportError::EmptyPayload => write!(f, "reply carried no data"),
            TransportError::Closed => write!(f, "connection closed"),
        }
    }
}

impl std::error::Error for TransportError {}

fn exception_code(kind: &rmodbus::ErrorKind) -> Option<u8> {
    use rmodbus::ErrorKind;

    match kind {
        ErrorKind::IllegalFunction => Some(0x01),
        ErrorKind::IllegalDataAddress => Some(0x02),
        ErrorKind::IllegalDataValue => Some(0x03),
        ErrorKind::SlaveDeviceFailure => Some(0x04),
        ErrorKind::Acknowledge => Some(0x05),
        ErrorKind::SlaveDeviceBusy => Some(0x06),
        ErrorKind::NegativeAcknowledge => Some(0x07),
        ErrorKind::MemoryParityError => Some(0x08),
        ErrorKind::GatewayPathUnavailable => Some(0x0A),
        ErrorKind::GatewayTargetFailed => Some(0x0B),
        _ => None,
    }
}

pub fn exception_name(code: u8) -> &'static str {
    match code {
        0x01 => "illegal function",
        0x02 => "illegal data address",
        0x03 => "illegal data value",
        0x04 => "slave device failure",
        0x05 => "acknowledge",
        0x06 => "slave device busy",
        0x07 => "negative acknowledge",
        0x08 => "memory parity error",
        0x0A => "gateway path unavailable",
        0x0B => "gateway target device failed to respond",
        _ => "unknown exception",
    }
}

/// Opens Modbus/TCP connections to one gateway.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    host: String,
    port: u16,
    timeout: Duration,
}

impl TcpConnector {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Transport = TcpTransport;

    async fn connect(&self) -> Result<TcpTransport, TransportError> {
        let stream = timeout(
            self.timeout,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        .map_err(|_| TransportError::Timeout)?
        .map_err(|err| TransportError::Connect(err.to_string()))?;

        if let Err(err) = stream.set_nodelay(true) {
            log::debug!("Failed to set TCP_NODELAY on {}: {err}", self.endpoint());
        }

        log::info!("Connected to gateway {}", self.endpoint());
        Ok(TcpTransport::new(stream, self.timeout))
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// One open Modbus/TCP connection.
pub struct TcpTransport {
    stream: Option<TcpStream>,
    frames: MbapReader,
    timeout: Duration,
    next_transaction: u16,
}

impl TcpTransport {
    pub fn new(stream: TcpStream, timeout: Duration) -> Self {
        Self {
            stream: Some(stream),
            frames: MbapReader::new(),
            timeout,
            next_transaction: 1,
        }
    }

    fn next_transaction_id(&mut self) -> u16 {
        let id = self.next_transaction;
        self.next_transaction = self.next_transaction.wrapping_add(1).max(1);
        id
    }
}

/// Send one request and wait for the reply carrying the same transaction id.
///
/// Replies to earlier requests that timed out may still be in flight; they are
/// read and dropped. Partial frames survive in `frames` when the deadline
/// cancels this future.
async fn exchange(
    stream: &mut TcpStream,
    frames: &mut MbapReader,
    raw: &[u8],
    tr_id: u16,
) -> Result<Vec<u8>, TransportError> {
    stream
        .write_all(raw)
        .await
        .map_err(|err| TransportError::Io(err.to_string()))?;

    loop {
        let frame = match frames.read_frame(stream).await {
            Ok(frame) => frame,
            Err(err) => {
                let err = TransportError::from_anyhow(err);
                if matches!(err, TransportError::MalformedFrame(_)) {
                    discard_readable(stream);
                }
                return Err(err);
            }
        };
        match transaction_id(&frame) {
            Some(id) if id == tr_id => return Ok(frame),
            other => {
                log::debug!("Discarding stale reply (transaction {other:?}, expected {tr_id})");
            }
        }
    }
}

/// Drop whatever the socket already holds after a garbled header.
fn discard_readable(stream: &TcpStream) {
    let mut scratch = [0u8; 256];
    let mut dropped = 0;
    loop {
        match stream.try_read(&mut scratch) {
            Ok(0) | Err(_) => break,
            Ok(read) => dropped += read,
        }
    }
    if dropped > 0 {
        log::debug!("Discarded {dropped} unreadable bytes from the gateway");
    }
}

#[async_trait]
impl ModbusTransport for TcpTransport {
    async fn read(
        &mut self,
        function: FunctionCode,
        device: DeviceAddress,
        start: u16,
        count: u16,
    ) -> Result<Payload, TransportError> {
        let tr_id = self.next_transaction_id();
        let unit_id = device.get();
        let (mut request, raw) = match function {
            FunctionCode::ReadCoils => generate_pull_get_coils_request(tr_id, unit_id, start, count),
            FunctionCode::ReadDiscreteInputs => {
                generate_pull_get_discrete_inputs_request(tr_id, unit_id, start, count)
            }
            FunctionCode::ReadHoldingRegisters => {
                generate_pull_get_holdings_request(tr_id, unit_id, start, count)
            }
            FunctionCode::ReadInputRegisters => {
                generate_pull_get_inputs_request(tr_id, unit_id, start, count)
            }
        }
        .map_err(TransportError::from_anyhow)?;

        let deadline = Instant::now() + self.timeout;
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;

        let outcome =
            tokio::time::timeout_at(deadline, exchange(stream, &mut self.frames, &raw, tr_id))
                .await;
        let frame = match outcome {
            Ok(result) => result?,
            Err(_) => {
                log::debug!(
                    "No reply from unit {unit_id} in time ({} bytes of a frame buffered)",
                    self.frames.pending()
                );
                return Err(TransportError::Timeout);
            }
        };

        let payload = match function {
            FunctionCode::ReadCoils => {
                parse_pull_get_coils(&mut request, &frame, count).map(Payload::Bits)
            }
            FunctionCode::ReadDiscreteInputs => {
                parse_pull_get_discrete_inputs(&mut request, &frame, count).map(Payload::Bits)
            }
            FunctionCode::ReadHoldingRegisters => {
                parse_pull_get_holdings(&mut request, &frame, count).map(Payload::Words)
            }
            FunctionCode::ReadInputRegisters => {
                parse_pull_get_inputs(&mut request, &frame, count).map(Payload::Words)
            }
        }
        .map_err(TransportError::from_anyhow)?;

        if payload.is_empty() {
            return Err(TransportError::EmptyPayload);
        }
        Ok(payload)
    }

    async fn close(&mut self) {
        self.frames = MbapReader::new();
        if let Some(mut stream) = self.stream.take() {
            if let Err(err) = stream.shutdown().await {
                log::debug!("Error while shutting down gateway connection: {err}");
            }
        }
    }
}
