//! # Mural Identity (Accounts & Email Verification Core)
//!
//! `mural-identity` is the identity core of the Mural campus board. It owns
//! account registration, one-time code email verification, login gating, and
//! the client-side session/role state the rest of the application reads to
//! decide what a user may do.
//!
//! ## Account Model
//!
//! Two account kinds share one record: **students** (carry a full name and a
//! campus enrollment id, `BRG` + five digits) and **visitors**. Usernames and
//! emails are normalized to lowercase and globally unique; the enrollment id
//! is unique among students.
//!
//! ## Verification
//!
//! Registration issues a 4-digit one-time code with a 15-minute expiry and
//! mails it to the account's address. An account cannot log in until the code
//! is confirmed. Resending a code invalidates the previous one immediately;
//! at most one code is valid per account at any time.
//!
//! ## Backing Service
//!
//! Persistence, password credentials, session issuance, and outbound email
//! are owned by an external backing service, reached through the
//! [`backing::BackingService`] trait. [`backing::HttpBacking`] talks to the
//! hosted backend; [`backing::MemoryBacking`] backs tests and local
//! development. Uniqueness pre-checks in this crate are advisory; the backing
//! store's constraints are the authority, and insert-time unique violations
//! are mapped back to field conflicts.

pub mod auth;
pub mod backing;
pub mod session;

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
