//! Tracing initialisation for the benchkit binary.
//!
//! `BENCHKIT_LOG` holds an `EnvFilter` directive (default `info`).
//! `BENCHKIT_LOG_FORMAT=json` switches to newline-delimited JSON.
//! Logs always go to stderr; stdout is reserved for command output.

use std::{env, io};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Install the global subscriber. Later calls are ignored.
pub fn init() {
    let filter = EnvFilter::try_from_env("BENCHKIT_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let json = env::var("BENCHKIT_LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).with_writer(io::stderr).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).with_writer(io::stderr))
            .try_init()
            .ok();
    }
}
