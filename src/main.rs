use anyhow::{Context, Result};
use clap::ArgMatches;
use std::{
    io::{self, Write},
    process::ExitCode,
    time::Duration,
};

use mbscan::{
    boot,
    cli::{
        self,
        ui::{self, ConsoleObserver},
    },
    stop_channel, Connector, LoggingHandler, ScanEnd, ScanError, Scanner,
};

fn main() -> ExitCode {
    boot::init_logger();
    let matches = cli::parse_args();

    match run(&matches) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            log::error!("Scan failed: {err:#}");
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the run counts as successful.
fn run(matches: &ArgMatches) -> Result<bool> {
    let config = cli::build_config(matches)?;
    let json = matches.get_flag("json");
    let scanner = Scanner::new(config.connector(), config.scan_options()?);
    let endpoint = scanner.connector().endpoint();

    let (stop_handle, stop_signal) = stop_channel();
    ctrlc::set_handler(move || {
        log::info!("Interrupt received, stopping scan");
        stop_handle.stop();
    })
    .context("Failed to install Ctrl-C handler")?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let summary = if json {
        let summary = runtime.block_on(scanner.run(&LoggingHandler, &stop_signal))?;
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{}", serde_json::to_string_pretty(&summary)?)?;
        stdout.flush()?;
        summary
    } else {
        ui::write_banner(&mut io::stdout().lock(), &endpoint)?;
        let console = ConsoleObserver::stdout(config.sample_display_limit)
            .with_retry_delay(Duration::from_millis(config.connect_retry_delay_ms));

        let summary = match runtime.block_on(scanner.run(&console, &stop_signal)) {
            Ok(summary) => summary,
            Err(err) => {
                if err.downcast_ref::<ScanError>().is_some() {
                    println!("Failed to connect to gateway after several attempts");
                }
                return Err(err);
            }
        };
        console.finish(&summary)?;
        summary
    };

    Ok(!matches!(summary.end, ScanEnd::Aborted(_)))
}
