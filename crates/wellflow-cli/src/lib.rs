//! WellFlow CLI - terminal front end
//!
//! Wires the engine, the real analysis steps and the JSON stores together
//! and drives workflows either interactively or from a fixed policy.

#![warn(unreachable_pub)]

pub mod commands;
pub mod config;
pub mod driver;
pub mod operator;

pub use commands::{parse_model, App, RunSummary};
pub use config::{AppConfig, LogConfig};
pub use driver::{drive, DriveOutcome, Transcript};
pub use operator::{AutoPolicy, ConsoleOperator, Operator};

/// Install the global tracing subscriber on stderr
///
/// `RUST_LOG` wins over the configured level.
pub fn init_tracing(log: &LogConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&log.level))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);
    let _ = if log.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
