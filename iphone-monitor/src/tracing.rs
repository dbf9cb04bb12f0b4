//! Provide tracing, tailored to this program.
//!
//! At startup, the program should call [`init_journald_or_stdout`] to install
//! a tracing subscriber. The rest of the program can include
//! `use crate::tracing::prelude::*` for the `trace!()` through `error!()`
//! macros.

use std::env;
use time::macros::format_description;
use time::OffsetDateTime;
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt::{format::Writer, time::FormatTime},
    prelude::*,
};

pub mod prelude {
    #[allow(unused_imports)]
    pub use tracing::{debug, error, info, trace, warn};
}

use prelude::*;

/// Initialize logging.
///
/// If running under systemd, use journald; otherwise fall back to stdout.
/// `default_level` applies when `RUST_LOG` is unset; an unparsable level
/// falls back to INFO.
pub fn init_journald_or_stdout(default_level: &str) {
    if env::var("JOURNAL_STREAM").is_ok() {
        if let Ok(layer) = tracing_journald::layer() {
            tracing_subscriber::registry().with(layer).init();
        } else {
            use_stdout(default_level);
            error!("Failed to initialize journald logging, using stdout.");
        }
    } else {
        use_stdout(default_level);
    }
}

fn use_stdout(default_level: &str) {
    let level = default_level.parse::<LevelFilter>().unwrap_or(LevelFilter::INFO);
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .with_env_var("RUST_LOG")
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_timer(LocalTimer))
        .init();
}

/// Current wall-clock time, in the local offset when it can be determined.
///
/// The `time` crate refuses to read the local offset once a Unix process
/// has more than one thread, which is always the case under the tokio
/// runtime. There the result is UTC. Format it with [`format_timestamp`] so
/// the offset is always visible.
pub fn now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

/// Date, time, and UTC offset, e.g. `2026-10-14 08:30:05+02:00`.
pub fn format_timestamp(at: OffsetDateTime) -> String {
    match format_timer(at) {
        Ok(time) => format!("{} {}", at.date(), time),
        Err(_) => at.to_string(),
    }
}

fn format_timer(at: OffsetDateTime) -> Result<String, time::error::Format> {
    at.format(format_description!(
        "[hour]:[minute]:[second][offset_hour sign:mandatory]:[offset_minute]"
    ))
}

// Wall-clock time to the nearest second, labelled with its offset.
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let formatted = format_timer(now()).map_err(|_| std::fmt::Error)?;
        write!(w, "{}", formatted)
    }
}
