//! Diagnostic output
//!
//! The bridge logs through `tracing`. Lifecycle and state transitions go to
//! `info`, transient failures and dropped data to `warn`, per-chunk traffic
//! to `debug`/`trace`.

use crate::constants::PAYLOAD_PREVIEW_LEN;
use std::fmt;

/// Initialize tracing for bridge diagnostics
///
/// Call early in main() before any logging occurs.
/// `RUST_LOG` wins when set; otherwise `verbose` selects debug over info.
pub fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_file(false)
                .compact(),
        )
        .with(filter)
        .try_init();
}

/// Printable, bounded view of a payload for trace logs
pub struct Preview<'a>(&'a [u8]);

/// Wrap a payload for display in a log field
pub fn preview(data: &[u8]) -> Preview<'_> {
    Preview(data)
}

impl fmt::Display for Preview<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = &self.0[..self.0.len().min(PAYLOAD_PREVIEW_LEN)];
        write!(f, "{}", shown.escape_ascii())?;
        if self.0.len() > shown.len() {
            write!(f, "...(+{} bytes)", self.0.len() - shown.len())?;
        }
        Ok(())
    }
}
