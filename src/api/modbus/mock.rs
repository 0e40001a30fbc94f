//! Deterministic in-memory transport and connector for unit tests.

use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex,
    },
};

use super::{
    traits::{Connector, ModbusTransport},
    transport::TransportError,
    types::{DeviceAddress, FunctionCode, Payload},
};

type ProbeTarget = (u8, FunctionCode, u16);

/// Answers from a fixed table; anything not in the table times out.
#[derive(Clone, Default)]
pub(crate) struct StubTransport {
    table: HashMap<ProbeTarget, Result<Payload, TransportError>>,
    reads: Arc<Mutex<Vec<ProbeTarget>>>,
    closes: Arc<AtomicU32>,
    closed: bool,
}

impl StubTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(mut self, unit: u8, function: FunctionCode, start: u16, payload: Payload) -> Self {
        self.table.insert((unit, function, start), Ok(payload));
        self
    }

    pub fn with_error(
        mut self,
        unit: u8,
        function: FunctionCode,
        start: u16,
        error: TransportError,
    ) -> Self {
        self.table.insert((unit, function, start), Err(error));
        self
    }

    /// A device on `unit` answering holding register 0 with its own address.
    pub fn with_device(self, unit: u8) -> Self {
        self.with_reply(
            unit,
            FunctionCode::ReadHoldingRegisters,
            0,
            Payload::Words(vec![u16::from(unit)]),
        )
    }

    pub fn reads(&self) -> Vec<ProbeTarget> {
        self.reads.lock().unwrap().clone()
    }

    pub fn read_units(&self) -> Vec<u8> {
        let mut units = self
            .reads()
            .into_iter()
            .map(|(unit, _, _)| unit)
            .collect::<Vec<_>>();
        units.dedup();
        units
    }

    pub fn close_count(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModbusTransport for StubTransport {
    async fn read(
        &mut self,
        function: FunctionCode,
        device: DeviceAddress,
        start: u16,
        _count: u16,
    ) -> Result<Payload, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let target = (device.get(), function, start);
        self.reads.lock().unwrap().push(target);
        self.table
            .get(&target)
            .cloned()
            .unwrap_or(Err(TransportError::Timeout))
    }

    async fn close(&mut self) {
        self.closed = true;
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Fails the first `failures` connects, then hands out clones of `transport`
/// (clones share the read log and the close counter).
pub(crate) struct StubConnector {
    pub transport: StubTransport,
    failures: u32,
    attempts: AtomicU32,
}

impl StubConnector {
    pub fn new(transport: StubTransport) -> Self {
        Self {
            transport,
            failures: 0,
            attempts: AtomicU32::new(0),
        }
    }

    pub fn failing(mut self, failures: u32) -> Self {
        self.failures = failures;
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for StubConnector {
    type Transport = StubTransport;

    async fn connect(&self) -> Result<StubTransport, TransportError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures {
            return Err(TransportError::Connect("connection refused".to_string()));
        }
        Ok(self.transport.clone())
    }

    fn endpoint(&self) -> String {
        "stub:502".to_string()
    }
}
