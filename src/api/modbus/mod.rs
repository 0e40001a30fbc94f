pub mod probe;
pub mod scan;
pub mod traits;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod mock;

use std::time::Duration;

pub use probe::{probe_device, run_probe};
pub use scan::{
    ordered_addresses, stop_channel, ConnectionState, ScanEnd, ScanError, ScanProgress,
    ScanSession, ScanSummary, Scanner, StopHandle, StopSignal,
};
pub use traits::{Connector, LoggingHandler, ModbusTransport, NoOpHandler, ScanObserver};
pub use transport::{exception_name, TcpConnector, TcpTransport, TransportError};
pub use types::{
    default_priority_addresses, default_probe_matrix, function_name, DeviceAddress, DeviceReport,
    FunctionCode, Payload, ProbeKey, ProbeResult, ProbeSpec, Sample,
};

/// Everything the orchestrator needs besides the connector.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub start_address: DeviceAddress,
    pub end_address: DeviceAddress,
    pub priority_addresses: Vec<DeviceAddress>,
    /// Probe matrix, shared read-only by every device probe.
    pub probes: Vec<ProbeSpec>,
    pub connect_attempts: u32,
    pub connect_retry_delay: Duration,
    /// Pause after each address's probe batch, protects the serial bus.
    pub pacing_delay: Duration,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            start_address: DeviceAddress::FIRST,
            end_address: DeviceAddress::LAST,
            priority_addresses: default_priority_addresses(),
            probes: default_probe_matrix(),
            connect_attempts: 3,
            connect_retry_delay: Duration::from_secs(2),
            pacing_delay: Duration::from_millis(200),
        }
    }
}

impl ScanOptions {
    pub fn with_range(mut self, start: DeviceAddress, end: DeviceAddress) -> Self {
        self.start_address = start;
        self.end_address = end;
        self
    }

    pub fn with_priority_addresses(mut self, priority: Vec<DeviceAddress>) -> Self {
        self.priority_addresses = priority;
        self
    }

    pub fn with_probes(mut self, probes: Vec<ProbeSpec>) -> Self {
        self.probes = probes;
        self
    }

    pub fn with_connect_attempts(mut self, attempts: u32) -> Self {
        self.connect_attempts = attempts;
        self
    }

    pub fn with_connect_retry_delay(mut self, delay: Duration) -> Self {
        self.connect_retry_delay = delay;
        self
    }

    pub fn with_pacing_delay(mut self, delay: Duration) -> Self {
        self.pacing_delay = delay;
        self
    }
}
