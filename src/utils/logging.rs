// src/utils/logging.rs
//! Logging configuration and utilities
//!
//! Uses `env_logger` under the hood with custom formatting and filtering.
//! Protocol noise (header/tail/counter mismatches) is logged at debug/trace,
//! so the default `info` level shows device lifecycle and results only.

use env_logger::{Builder, Target};
use log::LevelFilter;
use std::env;

/// Initializes the logging subsystem with sensible defaults
///
/// Default level is `Info`; `RUST_LOG` overrides it when set.
pub fn init_logging() {
    init_with_default(LevelFilter::Info);
}

/// Configures benchmark-specific logging
///
/// Same format as [`init_logging`] but defaults to `Debug`.
pub fn init_bench_logging() {
    init_with_default(LevelFilter::Debug);
}

fn init_with_default(level: LevelFilter) {
    let mut builder = common_log_config();

    if env::var("RUST_LOG").is_err() {
        builder.filter_level(level);
    } else {
        builder.parse_env("RUST_LOG");
    }

    // A second init (tests, embedding) is harmless; keep the first logger.
    let _ = builder.try_init();
}

/// Creates a base logger builder: `[ts LEVEL module:line] message` to stdout
fn common_log_config() -> Builder {
    let mut builder = Builder::new();

    builder
        .format(|buf, record| {
            use std::io::Write;
            let ts = buf.timestamp_seconds();
            let level = record.level();
            let module = record.module_path().unwrap_or_default();
            let line = record.line().unwrap_or(0);

            writeln!(
                buf,
                "[{} {} {}:{}] {}",
                ts,
                level,
                module,
                line,
                record.args()
            )
        })
        .target(Target::Stdout);

    builder
}
