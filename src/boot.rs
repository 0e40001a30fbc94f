use chrono::Local;
use log::LevelFilter;
use std::io::{self, Write};

use env_logger::{Builder, Target};

/// Environment variable naming a log file; when set, everything down to
/// `debug` is appended there instead of going to stderr.
pub const LOG_FILE_ENV: &str = "MBSCAN_LOG_FILE";

/// Initialize logging for the scanner binary.
///
/// Without a log file only warnings reach stderr so the progress line stays
/// readable. `RUST_LOG` overrides the level in both cases.
pub fn init_logger() {
    if let Ok(path) = std::env::var(LOG_FILE_ENV) {
        match init_file_logger(&path) {
            Ok(()) => return,
            Err(err) => eprintln!("Failed to initialize file logger at '{path}': {err}"),
        }
    }
    init_stderr_logger();
}

fn init_stderr_logger() {
    let mut builder = Builder::new();
    builder
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .target(Target::Stderr)
        .filter_level(LevelFilter::Warn)
        .parse_default_env();

    if let Err(err) = builder.try_init() {
        eprintln!("Logger already initialized: {err}");
    }
}

fn init_file_logger(path: &str) -> io::Result<()> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;

    let mut builder = Builder::new();
    builder
        .format(|buf, record| {
            writeln!(
                buf,
                "{}:{} {} [{}] - {}",
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.args()
            )
        })
        .target(Target::Pipe(Box::new(file)))
        .filter_level(LevelFilter::Debug)
        .parse_default_env();

    builder
        .try_init()
        .map_err(|err| io::Error::other(err.to_string()))?;

    log::info!("File logger initialized at {path}");

    Ok(())
}
