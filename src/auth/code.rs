//! One-time verification code issuance.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

/// Length of every issued code, in digits.
pub const CODE_LENGTH: usize = 4;

/// Draw a fresh code, uniform in `1000..=9999`.
///
/// The leading digit is never zero, so the string form is always exactly
/// four digits. Cheap enough to call on every issuance and resend.
#[must_use]
pub fn generate_code() -> String {
    rand::thread_rng().gen_range(1000..=9999_u16).to_string()
}

/// Expiry for a code issued at `now`.
#[must_use]
pub fn code_expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    now + ttl
}
