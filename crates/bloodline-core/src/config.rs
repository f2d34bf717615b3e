//! Engine configuration.

use std::{env, fmt::Display, str::FromStr, time::Duration};

use tracing::{info, warn};

/// Tunables for the allocation engine and matching query.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Result count when a worklist query gives no limit.
    pub nearby_default_limit: u32,
    /// Hard cap on worklist results.
    pub nearby_max_limit: u32,
    /// Attempts per transaction when SQLite reports a competing writer.
    pub max_attempts: u32,
    /// Base pause between attempts; attempt `n` waits `n * retry_backoff`.
    pub retry_backoff: Duration,
    /// How long one attempt waits on a locked database.
    pub busy_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            nearby_default_limit: 20,
            nearby_max_limit: 100,
            max_attempts: 3,
            retry_backoff: Duration::from_millis(25),
            busy_timeout: Duration::from_millis(2000),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `BLOODLINE_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            nearby_default_limit: try_load(
                "BLOODLINE_NEARBY_DEFAULT_LIMIT",
                defaults.nearby_default_limit,
            ),
            nearby_max_limit: try_load("BLOODLINE_NEARBY_MAX_LIMIT", defaults.nearby_max_limit),
            max_attempts: try_load("BLOODLINE_MAX_ATTEMPTS", defaults.max_attempts),
            retry_backoff: Duration::from_millis(try_load(
                "BLOODLINE_RETRY_BACKOFF_MS",
                defaults.retry_backoff.as_millis() as u64,
            )),
            busy_timeout: Duration::from_millis(try_load(
                "BLOODLINE_BUSY_TIMEOUT_MS",
                defaults.busy_timeout.as_millis() as u64,
            )),
        }
        .normalized()
    }

    /// Clamp fields into their usable ranges.
    pub fn normalized(mut self) -> Self {
        if self.max_attempts == 0 {
            warn!("max_attempts must be at least 1, using 1");
            self.max_attempts = 1;
        }
        if self.nearby_max_limit == 0 {
            warn!("nearby_max_limit must be at least 1, using 1");
            self.nearby_max_limit = 1;
        }
        if self.nearby_default_limit == 0 || self.nearby_default_limit > self.nearby_max_limit {
            let clamped = self.nearby_default_limit.clamp(1, self.nearby_max_limit);
            warn!(
                requested = self.nearby_default_limit,
                clamped, "nearby_default_limit out of range"
            );
            self.nearby_default_limit = clamped;
        }
        self
    }

    /// Resolve a caller-supplied worklist limit. `None` means the default,
    /// `Some(0)` is rejected, anything above the cap is clamped.
    pub fn resolve_limit(&self, requested: Option<u32>) -> Option<u32> {
        match requested {
            None => Some(self.nearby_default_limit),
            Some(0) => None,
            Some(n) => Some(n.min(self.nearby_max_limit)),
        }
    }
}

fn try_load<T: FromStr + Display>(key: &str, default: T) -> T
where
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|e| {
            warn!("Invalid {key} value {raw:?}: {e}, using default: {default}");
            default
        }),
        Err(_) => {
            info!("{key} not set, using default: {default}");
            default
        }
    }
}
