//! Tunables for the identity engines.

use chrono::Duration;

const DEFAULT_CODE_TTL_SECONDS: i64 = 15 * 60;

/// Engine configuration with builder-style overrides.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    code_ttl_seconds: i64,
}

impl AuthConfig {
    /// Defaults: verification codes live for 15 minutes.
    #[must_use]
    pub fn new() -> Self {
        Self {
            code_ttl_seconds: DEFAULT_CODE_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_code_ttl_seconds(mut self, seconds: i64) -> Self {
        self.code_ttl_seconds = seconds.max(1);
        self
    }

    /// Verification code lifetime.
    #[must_use]
    pub fn code_ttl(&self) -> Duration {
        Duration::seconds(self.code_ttl_seconds)
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new()
    }
}
