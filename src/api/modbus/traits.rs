/// Core scanner traits - abstract interfaces without a concrete transport
///
/// The probe engine and the orchestrator only talk to these traits, so the
/// Modbus/TCP adapter can be swapped for a stub in tests.
use anyhow::Result;
use async_trait::async_trait;

use super::{
    scan::ScanProgress,
    transport::TransportError,
    types::{DeviceAddress, DeviceReport, FunctionCode, Payload},
};

/// A connection that can carry read requests to devices behind the gateway.
///
/// Implementations must never panic or leak protocol-library errors: every
/// failure is reported as a [`TransportError`], and each call is bounded by the
/// transport's own timeout.
#[async_trait]
pub trait ModbusTransport: Send {
    async fn read(
        &mut self,
        function: FunctionCode,
        device: DeviceAddress,
        start: u16,
        count: u16,
    ) -> Result<Payload, TransportError>;

    /// Release the connection. Reads after this fail with [`TransportError::Closed`].
    async fn close(&mut self);
}

/// Factory for [`ModbusTransport`] connections, used for the retrying connect.
#[async_trait]
pub trait Connector: Send + Sync {
    type Transport: ModbusTransport;

    async fn connect(&self) -> Result<Self::Transport, TransportError>;

    /// Printable description of where this connector points to.
    fn endpoint(&self) -> String;
}

/// Trait for following a scan while it runs
///
/// Hooks returning `Result` may stop the scan: an error there aborts the
/// address loop (the connection is still released).
pub trait ScanObserver: Send + Sync {
    fn on_connect_failed(
        &self,
        _attempt: u32,
        _max_attempts: u32,
        _error: &TransportError,
        _will_retry: bool,
    ) {
    }

    fn on_connected(&self, _endpoint: &str) {}

    fn on_scan_start(&self, _total: usize) {}

    /// Called right before an address is probed.
    fn on_progress(&self, _progress: &ScanProgress) -> Result<()> {
        Ok(())
    }

    fn on_device_found(&self, report: &DeviceReport) -> Result<()>;

    fn on_connection_closed(&self) {}
}

/// No-op observer that ignores everything (useful for testing)
pub struct NoOpHandler;

impl ScanObserver for NoOpHandler {
    fn on_device_found(&self, _report: &DeviceReport) -> Result<()> {
        Ok(())
    }
}

/// Logging observer that reports through the `log` facade only
pub struct LoggingHandler;

impl ScanObserver for LoggingHandler {
    fn on_connect_failed(
        &self,
        attempt: u32,
        max_attempts: u32,
        error: &TransportError,
        will_retry: bool,
    ) {
        log::warn!(
            "Connect attempt {attempt}/{max_attempts} failed: {error}{}",
            if will_retry { ", retrying" } else { "" }
        );
    }

    fn on_connected(&self, endpoint: &str) {
        log::info!("Connected to {endpoint}");
    }

    fn on_scan_start(&self, total: usize) {
        log::info!("Scanning {total} addresses");
    }

    fn on_progress(&self, progress: &ScanProgress) -> Result<()> {
        log::debug!(
            "Checking address {} ({}/{}, {:.1}%)",
            progress.address,
            progress.index,
            progress.total,
            progress.percent()
        );
        Ok(())
    }

    fn on_device_found(&self, report: &DeviceReport) -> Result<()> {
        log::info!(
            "Device found: address={}, functions={:?}, samples={}",
            report.address,
            report
                .supported_functions
                .iter()
                .map(|function| function.name())
                .collect::<Vec<_>>(),
            report.samples.len()
        );
        Ok(())
    }

    fn on_connection_closed(&self) {
        log::info!("Connection closed");
    }
}
