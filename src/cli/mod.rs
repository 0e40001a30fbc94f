pub mod config;
pub mod ui;

use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};

pub use config::{GatewayConfig, ScanConfig};

fn command() -> Command {
    Command::new("mbscan")
        .about("Discover devices on an RS-485 bus behind a Modbus/TCP gateway")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .help("Load scan configuration from a TOML or JSON file")
                .value_name("FILE"),
        )
        .arg(
            Arg::new("host")
                .long("host")
                .short('H')
                .help("Gateway host name or IP address")
                .value_name("HOST"),
        )
        .arg(
            Arg::new("port")
                .long("port")
                .short('p')
                .help("Gateway TCP port")
                .value_name("PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("timeout-ms")
                .long("timeout-ms")
                .help("Timeout for connecting and for every single probe, in milliseconds")
                .value_name("MS")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("start")
                .long("start")
                .help("First device address of the scanned range")
                .value_name("ADDR")
                .value_parser(clap::value_parser!(u8)),
        )
        .arg(
            Arg::new("end")
                .long("end")
                .help("Last device address of the scanned range")
                .value_name("ADDR")
                .value_parser(clap::value_parser!(u8)),
        )
        .arg(
            Arg::new("priority")
                .long("priority")
                .help("Comma separated addresses to scan before the rest of the range")
                .value_name("LIST")
                .value_delimiter(',')
                .value_parser(clap::value_parser!(u8)),
        )
        .arg(
            Arg::new("pacing-ms")
                .long("pacing-ms")
                .help("Pause after each address, in milliseconds")
                .value_name("MS")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("attempts")
                .long("attempts")
                .help("How many times to try connecting to the gateway")
                .value_name("N")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .help("Print the scan summary as JSON instead of the human readable report")
                .action(clap::ArgAction::SetTrue),
        )
}

/// Parse command line arguments and return ArgMatches.
pub fn parse_args() -> ArgMatches {
    command().get_matches()
}

/// Build the effective configuration: file (or defaults), then CLI overrides.
pub fn build_config(matches: &ArgMatches) -> Result<ScanConfig> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => ScanConfig::from_file(path)?,
        None => ScanConfig::default(),
    };

    if let Some(host) = matches.get_one::<String>("host") {
        config.gateway.host = host.clone();
    }
    if let Some(&port) = matches.get_one::<u16>("port") {
        config.gateway.port = port;
    }
    if let Some(&timeout_ms) = matches.get_one::<u64>("timeout-ms") {
        config.gateway.timeout_ms = timeout_ms;
    }
    if let Some(&start) = matches.get_one::<u8>("start") {
        config.start_address = start;
    }
    if let Some(&end) = matches.get_one::<u8>("end") {
        config.end_address = end;
    }
    if let Some(priority) = matches.get_many::<u8>("priority") {
        config.priority_addresses = priority.copied().collect();
    }
    if let Some(&pacing_ms) = matches.get_one::<u64>("pacing-ms") {
        config.pacing_delay_ms = pacing_ms;
    }
    if let Some(&attempts) = matches.get_one::<u32>("attempts") {
        config.connect_attempts = attempts;
    }

    config.validate().context("Invalid scan configuration")?;
    Ok(config)
}
