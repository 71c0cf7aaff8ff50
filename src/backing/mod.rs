//! Seam to the external backing service.
//!
//! The backing service owns password credentials, session issuance, account
//! record storage, the administrator-role table, and outbound email. This
//! crate is a logic layer over that interface: engines call through
//! [`BackingService`] and never touch storage directly. [`HttpBacking`]
//! reaches the hosted backend; [`MemoryBacking`] backs tests and local runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::auth::types::{Account, AccountPatch, Authenticated, LookupField, Session};

mod http;
mod memory;

pub use http::HttpBacking;
pub use memory::{MemoryBacking, SentEmail};

/// Failures crossing the backing seam.
#[derive(Debug, Error)]
pub enum BackingError {
    /// The service understood the request and refused it (bad credentials,
    /// constraint violation, unknown record). Carries the service's message
    /// verbatim.
    #[error("backing service rejected request: {message}")]
    Rejected {
        message: String,
        /// Set when the rejection was a storage-level uniqueness violation,
        /// the authoritative conflict signal.
        unique_violation: bool,
    },

    /// Network, protocol, or decode failure; nothing can be said about the
    /// request's fate.
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

impl BackingError {
    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
            unique_violation: false,
        }
    }

    #[must_use]
    pub fn unique_violation(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
            unique_violation: true,
        }
    }

    #[must_use]
    pub fn is_unique_violation(&self) -> bool {
        matches!(
            self,
            Self::Rejected {
                unique_violation: true,
                ..
            }
        )
    }
}

/// Session lifecycle notifications pushed by the backing service.
///
/// Consumers receive them in arrival order over a broadcast channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthChange {
    SignedIn(Authenticated),
    SignedOut,
    TokenRefreshed(Session),
}

/// Everything the identity core needs from the backing service.
///
/// All calls are asynchronous and non-blocking; no method holds internal
/// locks across its await points longer than the single operation needs.
#[async_trait]
pub trait BackingService: Send + Sync {
    /// Create a password credential; the returned id doubles as the account
    /// id for the profile record inserted afterwards.
    async fn create_credential(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<Uuid, BackingError>;

    /// Compensating delete for a credential whose profile insert failed.
    async fn delete_credential(&self, id: Uuid) -> Result<(), BackingError>;

    /// Check a password credential and issue a session on success.
    async fn authenticate(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<Authenticated, BackingError>;

    /// Durable session from a previous run, if one is still live.
    async fn current_session(&self) -> Result<Option<Authenticated>, BackingError>;

    /// Re-seed the service with a session restored from a durable snapshot,
    /// so `current_session` can revalidate it after a process restart.
    async fn adopt_session(&self, authenticated: &Authenticated) -> Result<(), BackingError>;

    /// Invalidate the current session.
    async fn sign_out(&self) -> Result<(), BackingError>;

    /// Subscribe to session lifecycle notifications.
    fn subscribe(&self) -> broadcast::Receiver<AuthChange>;

    async fn insert_account(&self, account: &Account) -> Result<(), BackingError>;

    async fn fetch_account(&self, id: Uuid) -> Result<Option<Account>, BackingError>;

    /// Read-only existence probe used by the uniqueness guard.
    async fn account_exists(&self, field: LookupField, value: &str) -> Result<bool, BackingError>;

    async fn update_account(&self, id: Uuid, patch: &AccountPatch) -> Result<(), BackingError>;

    /// Compare-and-swap on the pending verification code: apply `patch` only
    /// if the stored code still equals `expected_code`. Returns whether the
    /// swap happened.
    async fn swap_verification(
        &self,
        id: Uuid,
        expected_code: &str,
        patch: &AccountPatch,
    ) -> Result<bool, BackingError>;

    /// Permission tier from the administrator-role table; `None` means the
    /// account is not an administrator.
    async fn admin_level(&self, id: Uuid) -> Result<Option<i16>, BackingError>;

    /// Best-effort outbound email carrying a verification code.
    async fn send_verification_email(
        &self,
        email: &str,
        code: &str,
        display_name: &str,
    ) -> Result<(), BackingError>;
}

/// Timestamp used for session expiries issued by test doubles.
#[must_use]
pub(crate) fn session_expiry(now: DateTime<Utc>) -> DateTime<Utc> {
    now + chrono::Duration::hours(12)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_violation_flag_round_trips() {
        assert!(BackingError::unique_violation("dup").is_unique_violation());
        assert!(!BackingError::rejected("nope").is_unique_violation());
        assert!(!BackingError::Transport(anyhow::anyhow!("io")).is_unique_violation());
    }
}
