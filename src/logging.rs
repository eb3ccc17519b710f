//! Structured logging setup and the per-cause rate limiter described in
//! the error handling design (repeated failures of the same kind produce
//! at most one log line per minute).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing_subscriber::{fmt, EnvFilter};

use crate::error::DaemonError;

const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

/// Initializes the global tracing subscriber.
///
/// `debug` raises the default verbosity from `info` to `trace` so every
/// controller/tuner decision gets logged; it never changes daemon
/// behavior, only observability. Writes to stderr rather than the
/// default stdout: when daemonized, stdout is redirected to `/dev/null`
/// while stderr is deliberately kept open (see `main`), so this is the
/// only writer that survives into the production, non-foreground path.
pub fn init(debug: bool) {
    let default_directive = if debug { "ecfand=trace" } else { "ecfand=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Tracks the last time each distinct failure cause was logged, so a
/// succession of identical failures produces at most one log entry per
/// unique cause per minute.
#[derive(Default)]
pub struct RateLimiter {
    last_logged: HashMap<String, Instant>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` the first time a cause is seen, and at most once per
    /// [`RATE_LIMIT_WINDOW`] thereafter.
    pub fn should_log(&mut self, key: &str) -> bool {
        let now = Instant::now();
        match self.last_logged.get(key) {
            Some(last) if now.duration_since(*last) < RATE_LIMIT_WINDOW => false,
            _ => {
                self.last_logged.insert(key.to_string(), now);
                true
            }
        }
    }

    /// Logs `err` at `warn` level, subject to rate limiting on its
    /// [`DaemonError::rate_limit_key`].
    pub fn warn_once_per_minute(&mut self, err: &DaemonError) {
        let key = err.rate_limit_key();
        if self.should_log(&key) {
            tracing::warn!(cause = %key, "{err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_occurrence_always_logs() {
        let mut rl = RateLimiter::new();
        assert!(rl.should_log("ec_timeout:07"));
    }

    #[test]
    fn repeated_occurrence_within_window_is_suppressed() {
        let mut rl = RateLimiter::new();
        assert!(rl.should_log("ec_timeout:07"));
        assert!(!rl.should_log("ec_timeout:07"));
    }

    #[test]
    fn distinct_causes_are_independent() {
        let mut rl = RateLimiter::new();
        assert!(rl.should_log("ec_timeout:07"));
        assert!(rl.should_log("ec_short_read"));
    }
}
