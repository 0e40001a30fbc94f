use anyhow::{Context, Result};
use std::{
    io::{self, Write},
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
    time::Duration,
};

use crate::api::modbus::{
    DeviceReport, ScanEnd, ScanObserver, ScanProgress, ScanSummary, TransportError,
};

const RULE_WIDTH: usize = 50;

const TROUBLESHOOTING: [&str; 5] = [
    "Check physical connection of devices to the gateway (cables, power)",
    "Check port settings on the gateway (baud rate, parity, stop bits)",
    "Make sure devices are set to a supported speed (typically 9600 or 19200)",
    "Test the gateway with other software (e.g., Modbus Poll or similar)",
    "Temporarily disconnect or install terminators at the ends of the RS-485 line",
];

fn rule(ch: char) -> String {
    ch.to_string().repeat(RULE_WIDTH)
}

pub fn write_banner(out: &mut dyn Write, endpoint: &str) -> io::Result<()> {
    writeln!(out, "Modbus device scanner")?;
    writeln!(out, "{}", rule('='))?;
    writeln!(out, "Gateway: {endpoint}")
}

fn write_functions(out: &mut dyn Write, report: &DeviceReport) -> io::Result<()> {
    if report.supported_functions.is_empty() {
        return writeln!(out, "  - Could not determine supported functions");
    }
    writeln!(out, "  Supported functions:")?;
    for function in &report.supported_functions {
        writeln!(out, "  - {}", function.name())?;
    }
    Ok(())
}

pub fn write_device(out: &mut dyn Write, report: &DeviceReport, sample_limit: usize) -> io::Result<()> {
    writeln!(out)?;
    writeln!(out, "Found device at address {}", report.address)?;
    write_functions(out, report)?;

    let samples = report.display_samples(sample_limit);
    if !samples.is_empty() {
        writeln!(out, "  Register data:")?;
        for sample in samples {
            writeln!(out, "  - {}: {}", sample.key, sample.payload)?;
        }
    }
    Ok(())
}

/// Final report: found devices, or the troubleshooting checklist.
pub fn write_summary(out: &mut dyn Write, summary: &ScanSummary) -> io::Result<()> {
    writeln!(out)?;
    writeln!(out, "{}", rule('='))?;

    match &summary.end {
        ScanEnd::Completed => {}
        ScanEnd::Cancelled => writeln!(out, "Scanning interrupted by user")?,
        ScanEnd::Aborted(reason) => writeln!(out, "Error during scanning: {reason}")?,
    }

    if summary.reports.is_empty() {
        if summary.end == ScanEnd::Completed {
            writeln!(out, "No devices found during standard scanning.")?;
        } else {
            writeln!(out, "No devices found before the scan stopped.")?;
        }
        writeln!(out)?;
        writeln!(out, "Try the following actions:")?;
        for (index, hint) in TROUBLESHOOTING.iter().enumerate() {
            writeln!(out, "{}. {hint}", index + 1)?;
        }
        return Ok(());
    }

    writeln!(out, "Devices found: {}", summary.reports.len())?;
    writeln!(
        out,
        "Addresses: {}",
        summary
            .found_addresses()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    )?;
    writeln!(
        out,
        "Scanned {} of {} addresses, {} without response",
        summary.scanned, summary.total, summary.not_found
    )?;

    writeln!(out)?;
    writeln!(out, "Detailed device information:")?;
    for report in &summary.reports {
        writeln!(out, "Device at address {}:", report.address)?;
        write_functions(out, report)?;
    }
    Ok(())
}

/// Human readable progress on a terminal.
///
/// The "Connection closed" line is held back until [`finish`] has written the
/// summary, so it is always the last thing printed.
///
/// [`finish`]: ConsoleObserver::finish
pub struct ConsoleObserver {
    out: Mutex<Box<dyn Write + Send>>,
    sample_limit: usize,
    retry_delay: Duration,
    closed: AtomicBool,
}

impl ConsoleObserver {
    pub fn stdout(sample_limit: usize) -> Self {
        Self::new(Box::new(io::stdout()), sample_limit)
    }

    pub fn new(out: Box<dyn Write + Send>, sample_limit: usize) -> Self {
        Self {
            out: Mutex::new(out),
            sample_limit,
            retry_delay: Duration::from_secs(2),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    fn emit(&self, f: impl FnOnce(&mut dyn Write) -> io::Result<()>) -> Result<()> {
        let mut out = self
            .out
            .lock()
            .map_err(|_| anyhow::anyhow!("Console output lock poisoned"))?;
        f(&mut **out)?;
        out.flush().context("Failed to flush console output")
    }

    /// Print the final summary, then the pending "Connection closed" line.
    pub fn finish(&self, summary: &ScanSummary) -> Result<()> {
        self.emit(|out| {
            write_summary(out, summary)?;
            if self.closed.load(Ordering::SeqCst) {
                writeln!(out, "Connection closed")?;
            }
            Ok(())
        })
    }

    /// For lifecycle hooks that cannot fail the scan.
    fn write_or_log(&self, f: impl FnOnce(&mut dyn Write) -> io::Result<()>) {
        if let Err(err) = self.emit(f) {
            log::warn!("Console output failed: {err:#}");
        }
    }
}

impl ScanObserver for ConsoleObserver {
    fn on_connect_failed(
        &self,
        attempt: u32,
        max_attempts: u32,
        error: &TransportError,
        will_retry: bool,
    ) {
        log::warn!("Connect attempt {attempt}/{max_attempts} failed: {error}");
        self.write_or_log(|out| {
            writeln!(
                out,
                "Attempt {attempt}/{max_attempts}: Failed to connect to gateway ({error})"
            )?;
            if will_retry {
                writeln!(
                    out,
                    "Retrying in {} seconds...",
                    self.retry_delay.as_secs_f64()
                )?;
            }
            Ok(())
        });
    }

    fn on_connected(&self, endpoint: &str) {
        self.write_or_log(|out| writeln!(out, "Successfully connected to {endpoint}"));
    }

    fn on_scan_start(&self, total: usize) {
        self.write_or_log(|out| {
            writeln!(out, "Scanning Modbus devices...")?;
            writeln!(out, "{}", rule('-'))?;
            writeln!(out, "Scanning {total} addresses...")
        });
    }

    fn on_progress(&self, progress: &ScanProgress) -> Result<()> {
        self.emit(|out| {
            write!(
                out,
                "\rChecking address: {} ({:.1}%)",
                progress.address,
                progress.percent()
            )
        })
    }

    fn on_device_found(&self, report: &DeviceReport) -> Result<()> {
        log::info!("Device found at address {}", report.address);
        self.emit(|out| write_device(out, report, self.sample_limit))
    }

    fn on_connection_closed(&self) {
        log::debug!("Gateway connection closed");
        self.closed.store(true, Ordering::SeqCst);
    }
}
