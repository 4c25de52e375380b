//! Process-wide logging setup, trimmed down from `chronicle-telemetry`: the
//! `EnvFilter` + stdout `fmt` layer this connector keeps, minus the
//! OpenTelemetry exporter and flamegraph machinery it has no use for.

use tracing::subscriber::set_global_default;
use tracing_subscriber::{prelude::*, EnvFilter, Registry};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConsoleLogging {
    Off,
    #[default]
    Pretty,
    Json,
}

/// Install the global subscriber. Safe to call once per process; a second
/// call returns an error that is logged and otherwise ignored, matching
/// `chronicle-telemetry::telemetry`'s best-effort init.
pub fn init(console_logging: ConsoleLogging) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdio = tracing_subscriber::fmt::layer().with_level(true).with_target(true).with_thread_ids(true);

    let result = match console_logging {
        ConsoleLogging::Off => set_global_default(Registry::default().with(env_filter)),
        ConsoleLogging::Pretty => set_global_default(Registry::default().with(env_filter).with(stdio.pretty())),
        ConsoleLogging::Json => set_global_default(Registry::default().with(env_filter).with(stdio.json())),
    };
    if let Err(e) = result {
        eprintln!("failed to install global tracing subscriber: {e}");
    }
}
