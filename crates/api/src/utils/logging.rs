use std::time::Duration;

use billsync_domain::BillSyncError;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_LOG_FILTER: &str = "info,billsync=debug";

/// Install the global subscriber.
///
/// `RUST_LOG` overrides [`DEFAULT_LOG_FILTER`]. With `json` set every event
/// is written as one flattened JSON object per line; otherwise the human
/// `fmt` layout is used. Calling this twice is a no-op.
pub fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let installed = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).flatten_event(true))
            .try_init()
    } else {
        tracing_subscriber::registry().with(filter).with(fmt::layer().with_target(false)).try_init()
    };

    if installed.is_ok() {
        tracing::debug!(json, "logging initialized");
    }
}

/// Log the outcome of one CLI command or HTTP handler with structured fields.
///
/// `surface` is `"cli"` or `"http"`; `failure` carries the [`error_label`]
/// of the error that ended the command, if any.
#[inline]
pub fn log_command_execution(
    command: &str,
    surface: &str,
    elapsed: Duration,
    failure: Option<&str>,
) {
    let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);

    match failure {
        None => info!(command, surface, duration_ms, "command_execution_success"),
        Some(error_type) => {
            warn!(command, surface, duration_ms, error_type, "command_execution_failure");
        }
    }
}

/// Stable label for logs; never includes the error message.
#[inline]
pub const fn error_label(error: &BillSyncError) -> &'static str {
    error.label()
}
