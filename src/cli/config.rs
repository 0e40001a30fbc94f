use anyhow::{bail, ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};

use crate::api::modbus::{
    default_probe_matrix, DeviceAddress, ProbeSpec, ScanOptions, TcpConnector,
    types::DEFAULT_PRIORITY_ADDRESSES,
};

/// Where the Modbus/TCP gateway lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Per-probe and per-connect timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 502,
            timeout_ms: 2000,
        }
    }
}

/// Static configuration of one scan run, loaded once at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_start_address")]
    pub start_address: u8,
    #[serde(default = "default_end_address")]
    pub end_address: u8,
    #[serde(default = "default_priority_addresses")]
    pub priority_addresses: Vec<u8>,
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    #[serde(default = "default_connect_retry_delay_ms")]
    pub connect_retry_delay_ms: u64,
    #[serde(default = "default_pacing_delay_ms")]
    pub pacing_delay_ms: u64,
    /// How many samples are printed per found device
    #[serde(default = "default_sample_display_limit")]
    pub sample_display_limit: usize,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default = "default_probe_matrix")]
    pub probes: Vec<ProbeSpec>,
}

fn default_start_address() -> u8 {
    DeviceAddress::MIN
}

fn default_end_address() -> u8 {
    DeviceAddress::MAX
}

fn default_priority_addresses() -> Vec<u8> {
    DEFAULT_PRIORITY_ADDRESSES.to_vec()
}

fn default_connect_attempts() -> u32 {
    3
}

fn default_connect_retry_delay_ms() -> u64 {
    2000
}

fn default_pacing_delay_ms() -> u64 {
    200
}

fn default_sample_display_limit() -> usize {
    3
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            start_address: default_start_address(),
            end_address: default_end_address(),
            priority_addresses: default_priority_addresses(),
            probes: default_probe_matrix(),
            connect_attempts: default_connect_attempts(),
            connect_retry_delay_ms: default_connect_retry_delay_ms(),
            pacing_delay_ms: default_pacing_delay_ms(),
            sample_display_limit: default_sample_display_limit(),
        }
    }
}

impl ScanConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).context("Invalid TOML scan configuration")
    }

    /// Parse configuration from a JSON string
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str).context("Invalid JSON scan configuration")
    }

    /// Read configuration from a file; `.json` files are JSON, anything else TOML
    pub fn from_file(file_path: impl AsRef<Path>) -> Result<Self> {
        let path = file_path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let config = if is_json {
            Self::from_json(&content)
        } else {
            Self::from_toml(&content)
        };
        config.with_context(|| format!("Failed to load {}", path.display()))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize scan configuration")
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize scan configuration")
    }

    pub fn validate(&self) -> Result<()> {
        let start = DeviceAddress::new(self.start_address)
            .context("start_address must be a valid device address")?;
        let end = DeviceAddress::new(self.end_address)
            .context("end_address must be a valid device address")?;
        ensure!(
            start <= end,
            "start_address {start} is greater than end_address {end}"
        );

        for &address in &self.priority_addresses {
            DeviceAddress::new(address).context("priority_addresses contains an invalid address")?;
        }

        ensure!(!self.probes.is_empty(), "The probe matrix is empty");
        for probe in &self.probes {
            if probe.count == 0 || probe.count > probe.function.max_count() {
                bail!(
                    "Probe {probe} must read between 1 and {} items",
                    probe.function.max_count()
                );
            }
        }

        ensure!(self.connect_attempts > 0, "connect_attempts must be at least 1");
        ensure!(self.gateway.timeout_ms > 0, "gateway.timeout_ms must be positive");
        ensure!(!self.gateway.host.is_empty(), "gateway.host must not be empty");
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.gateway.timeout_ms)
    }

    pub fn connector(&self) -> TcpConnector {
        TcpConnector::new(self.gateway.host.clone(), self.gateway.port, self.timeout())
    }

    /// Validate and convert into orchestrator options
    pub fn scan_options(&self) -> Result<ScanOptions> {
        self.validate()?;

        let priority = self
            .priority_addresses
            .iter()
            .map(|&address| DeviceAddress::new(address))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ScanOptions::default()
            .with_range(
                DeviceAddress::new(self.start_address)?,
                DeviceAddress::new(self.end_address)?,
            )
            .with_priority_addresses(priority)
            .with_probes(self.probes.clone())
            .with_connect_attempts(self.connect_attempts)
            .with_connect_retry_delay(Duration::from_millis(self.connect_retry_delay_ms))
            .with_pacing_delay(Duration::from_millis(self.pacing_delay_ms)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::modbus::FunctionCode;

    #[test]
    fn test_defaults_match_field_practice() {
        let config = ScanConfig::default();
        assert_eq!(config.gateway.port, 502);
        assert_eq!(config.gateway.timeout_ms, 2000);
        assert_eq!((config.start_address, config.end_address), (1, 247));
        assert_eq!(config.priority_addresses[0], 16);
        assert_eq!(config.probes.len(), 12);
        assert_eq!(config.connect_attempts, 3);
        assert_eq!(config.sample_display_limit, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() -> Result<()> {
        let config = ScanConfig::from_toml(
            r#"
            start_address = 10
            end_address = 20
            priority_addresses = [16]

            [gateway]
            host = "192.168.1.254"

            [[probes]]
            function = "holding"
            start = 4

            [[probes]]
            function = "discrete"
            start = 0
            count = 8
            "#,
        )?;

        assert_eq!(config.gateway.host, "192.168.1.254");
        assert_eq!(config.gateway.port, 502);
        assert_eq!(config.pacing_delay_ms, 200);
        assert_eq!(
            config.probes,
            vec![
                ProbeSpec::new(FunctionCode::ReadHoldingRegisters, 4, 1),
                ProbeSpec::new(FunctionCode::ReadDiscreteInputs, 0, 8),
            ]
        );

        let options = config.scan_options()?;
        assert_eq!(options.start_address.get(), 10);
        assert_eq!(options.priority_addresses.len(), 1);
        Ok(())
    }

    #[test]
    fn test_json_config() -> Result<()> {
        let config = ScanConfig::from_json(
            r#"{ "gateway": { "port": 5020, "timeout_ms": 500 }, "connect_attempts": 1 }"#,
        )?;
        assert_eq!(config.gateway.port, 5020);
        assert_eq!(config.timeout(), Duration::from_millis(500));
        assert_eq!(config.connect_attempts, 1);
        assert_eq!(config.end_address, 247);
        Ok(())
    }

    #[test]
    fn test_from_file_picks_format_by_extension() -> Result<()> {
        let dir = std::env::temp_dir().join(format!("mbscan-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir)?;

        let json_path = dir.join("scan.json");
        std::fs::write(&json_path, r#"{ "end_address": 32 }"#)?;
        assert_eq!(ScanConfig::from_file(&json_path)?.end_address, 32);

        let toml_path = dir.join("scan.toml");
        std::fs::write(&toml_path, ScanConfig::default().to_toml()?)?;
        assert_eq!(ScanConfig::from_file(&toml_path)?, ScanConfig::default());

        std::fs::remove_dir_all(&dir)?;
        Ok(())
    }

    fn rejected(mutate: impl FnOnce(&mut ScanConfig)) -> bool {
        let mut config = ScanConfig::default();
        mutate(&mut config);
        config.validate().is_err() && config.scan_options().is_err()
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(rejected(|c| c.start_address = 0));
        assert!(rejected(|c| c.end_address = 248));
        assert!(rejected(|c| {
            c.start_address = 50;
            c.end_address = 10;
        }));
        assert!(rejected(|c| c.priority_addresses.push(0)));
        assert!(rejected(|c| c.probes.clear()));
        assert!(rejected(|c| c.probes[0].count = 0));
        // Holding registers are limited to 125 per request
        assert!(rejected(|c| c.probes[0].count = 126));
        assert!(rejected(|c| c.connect_attempts = 0));
        assert!(rejected(|c| c.gateway.timeout_ms = 0));
        assert!(!rejected(|c| c.start_address = c.end_address));
    }
}
