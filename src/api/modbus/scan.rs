/// Scan orchestrator - connection retry, address ordering and the scan loop
///
/// The orchestrator owns the single gateway connection for the whole run.
/// Whatever ends the address loop (exhausted list, stop request, observer
/// failure) the connection is closed exactly once before the summary is
/// returned.
use anyhow::Result;
use serde::Serialize;
use std::{
    collections::HashSet,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use super::{
    probe::probe_device,
    traits::{Connector, ModbusTransport, ScanObserver},
    transport::TransportError,
    types::{DeviceAddress, DeviceReport},
    ScanOptions,
};

/// Visit order: priority addresses first (first occurrence wins), then every
/// remaining address of `start..=end` ascending.
///
/// Priority addresses outside the range are kept.
pub fn ordered_addresses(
    priority: &[DeviceAddress],
    start: DeviceAddress,
    end: DeviceAddress,
) -> Vec<DeviceAddress> {
    let mut seen = HashSet::new();
    let mut ordered = Vec::new();

    for &address in priority {
        if seen.insert(address) {
            ordered.push(address);
        }
    }
    for value in start.get()..=end.get() {
        let Ok(address) = DeviceAddress::new(value) else {
            continue;
        };
        if seen.insert(address) {
            ordered.push(address);
        }
    }

    ordered
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Failed,
}

/// Mutable state of one run.
#[derive(Debug, Clone)]
pub struct ScanSession {
    pub ordered_addresses: Vec<DeviceAddress>,
    pub state: ConnectionState,
    /// Only addresses where a device was found.
    pub reports: Vec<DeviceReport>,
    /// Number of addresses whose probe batch completed.
    pub scanned: usize,
}

impl ScanSession {
    pub fn new(ordered_addresses: Vec<DeviceAddress>) -> Self {
        Self {
            ordered_addresses,
            state: ConnectionState::Disconnected,
            reports: Vec::new(),
            scanned: 0,
        }
    }

    fn into_summary(self, endpoint: String, end: ScanEnd) -> ScanSummary {
        ScanSummary {
            endpoint,
            total: self.ordered_addresses.len(),
            scanned: self.scanned,
            not_found: self.scanned - self.reports.len(),
            reports: self.reports,
            end,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanProgress {
    /// 1-based position of `address` in the visit order.
    pub index: usize,
    pub total: usize,
    pub address: DeviceAddress,
}

impl ScanProgress {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.index as f64 * 100.0 / self.total as f64
    }
}

/// How the address loop ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ScanEnd {
    Completed,
    Cancelled,
    Aborted(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    pub endpoint: String,
    pub total: usize,
    pub scanned: usize,
    pub not_found: usize,
    pub reports: Vec<DeviceReport>,
    pub end: ScanEnd,
}

impl ScanSummary {
    pub fn found_addresses(&self) -> Vec<DeviceAddress> {
        self.reports.iter().map(|report| report.address).collect()
    }
}

/// Fatal run-level failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    ConnectionFailed {
        endpoint: String,
        attempts: u32,
        last_error: TransportError,
    },
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanError::ConnectionFailed {
                endpoint,
                attempts,
                last_error,
            } => write!(
                f,
                "could not connect to {endpoint} after {attempts} attempts: {last_error}"
            ),
        }
    }
}

impl std::error::Error for ScanError {}

/// Requests a running scan to stop. Cloneable so it can be moved into a
/// signal handler.
#[derive(Clone)]
pub struct StopHandle {
    sender: flume::Sender<()>,
    stopped: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        // Nobody waiting is fine, the flag is what counts
        let _ = self.sender.try_send(());
    }
}

/// Observed by the scan loop between probe batches and during delays.
#[derive(Clone)]
pub struct StopSignal {
    receiver: flume::Receiver<()>,
    stopped: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Resolves once a stop was requested. Pending forever if every
    /// [`StopHandle`] is dropped without stopping.
    pub async fn wait(&self) {
        while !self.is_stopped() {
            if self.receiver.recv_async().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (sender, receiver) = flume::bounded(1);
    let stopped = Arc::new(AtomicBool::new(false));
    (
        StopHandle {
            sender,
            stopped: stopped.clone(),
        },
        StopSignal { receiver, stopped },
    )
}

pub struct Scanner<C: Connector> {
    connector: C,
    options: ScanOptions,
}

impl<C: Connector> Scanner<C> {
    pub fn new(connector: C, options: ScanOptions) -> Self {
        Self { connector, options }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Connect, scan the configured range and release the connection.
    ///
    /// Only a connection that could not be established within the attempt
    /// budget is an `Err` (a [`ScanError`]); cancellation and loop failures
    /// are reported through [`ScanSummary::end`].
    pub async fn run(&self, observer: &dyn ScanObserver, stop: &StopSignal) -> Result<ScanSummary> {
        let endpoint = self.connector.endpoint();
        let mut session = ScanSession::new(ordered_addresses(
            &self.options.priority_addresses,
            self.options.start_address,
            self.options.end_address,
        ));

        let Some(mut transport) = self.connect(&endpoint, &mut session, observer, stop).await?
        else {
            log::info!("Stop requested before a connection was established");
            return Ok(session.into_summary(endpoint, ScanEnd::Cancelled));
        };
        observer.on_connected(&endpoint);

        let end = self
            .scan_addresses(&mut transport, &mut session, observer, stop)
            .await;

        transport.close().await;
        session.state = ConnectionState::Disconnected;
        observer.on_connection_closed();

        log::info!(
            "Scan of {endpoint} ended ({end:?}): {} found, {} scanned",
            session.reports.len(),
            session.scanned
        );
        Ok(session.into_summary(endpoint, end))
    }

    /// `Ok(None)` when a stop was requested while connecting.
    async fn connect(
        &self,
        endpoint: &str,
        session: &mut ScanSession,
        observer: &dyn ScanObserver,
        stop: &StopSignal,
    ) -> Result<Option<C::Transport>> {
        let attempts = self.options.connect_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            if stop.is_stopped() {
                return Ok(None);
            }

            match self.connector.connect().await {
                Ok(transport) => {
                    session.state = ConnectionState::Connected;
                    return Ok(Some(transport));
                }
                Err(err) => {
                    let will_retry = attempt < attempts;
                    log::debug!("Connect attempt {attempt}/{attempts} to {endpoint} failed: {err}");
                    observer.on_connect_failed(attempt, attempts, &err, will_retry);
                    last_error = Some(err);

                    if will_retry {
                        tokio::select! {
                            _ = tokio::time::sleep(self.options.connect_retry_delay) => {}
                            _ = stop.wait() => return Ok(None),
                        }
                    }
                }
            }
        }

        session.state = ConnectionState::Failed;
        Err(ScanError::ConnectionFailed {
            endpoint: endpoint.to_string(),
            attempts,
            last_error: last_error
                .unwrap_or_else(|| TransportError::Connect("no attempt made".to_string())),
        }
        .into())
    }

    async fn scan_addresses(
        &self,
        transport: &mut C::Transport,
        session: &mut ScanSession,
        observer: &dyn ScanObserver,
        stop: &StopSignal,
    ) -> ScanEnd {
        let total = session.ordered_addresses.len();
        observer.on_scan_start(total);

        for index in 0..total {
            if stop.is_stopped() {
                return ScanEnd::Cancelled;
            }

            let address = session.ordered_addresses[index];
            let progress = ScanProgress {
                index: index + 1,
                total,
                address,
            };
            if let Err(err) = observer.on_progress(&progress) {
                log::error!("Scan aborted at address {address}: {err:#}");
                return ScanEnd::Aborted(format!("{err:#}"));
            }

            let report = probe_device(transport, address, &self.options.probes).await;
            session.scanned += 1;

            if report.found {
                let notified = observer.on_device_found(&report);
                session.reports.push(report);
                if let Err(err) = notified {
                    log::error!("Scan aborted after address {address}: {err:#}");
                    return ScanEnd::Aborted(format!("{err:#}"));
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.options.pacing_delay) => {}
                _ = stop.wait() => return ScanEnd::Cancelled,
            }
        }

        ScanEnd::Completed
    }
}
