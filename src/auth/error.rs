//! Error taxonomy for the identity engines.

use thiserror::Error;
use uuid::Uuid;

use crate::backing::BackingError;

/// Field a uniqueness conflict was detected on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConflictField {
    Username,
    Email,
    RecordId,
}

impl ConflictField {
    /// Stable machine-readable code, used in logs and API payloads.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Username => "username_taken",
            Self::Email => "email_taken",
            Self::RecordId => "record_taken",
        }
    }
}

impl std::fmt::Display for ConflictField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Failures surfaced by registration, verification, and login.
///
/// Email dispatch failure is deliberately absent: it is never an error,
/// only an `email_sent=false` flag on the successful result.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Input failed shape validation before any I/O.
    #[error("invalid {field}: {reason}")]
    Validation {
        field: &'static str,
        reason: String,
    },

    /// A uniqueness pre-check or insert-time constraint rejected a field.
    #[error("{0}")]
    Conflict(ConflictField),

    /// The backing service refused to create the password credential.
    #[error("credential rejected: {0}")]
    Credential(String),

    /// No account exists for the given id.
    #[error("account not found")]
    NotFound,

    /// The pending verification code is past its expiry.
    #[error("verification code expired")]
    Expired,

    /// The submitted code does not match the pending one.
    #[error("verification code mismatch")]
    Mismatch,

    /// The account's email is already verified; no mutation was performed.
    #[error("email already verified")]
    AlreadyVerified,

    /// Uniform login failure; never distinguishes unknown email from wrong
    /// password.
    #[error("invalid email or password")]
    InvalidCredentials,

    /// The account is banned; any fresh session has been signed out.
    #[error("account banned: {}", .0.as_deref().unwrap_or("no reason given"))]
    Banned(Option<String>),

    /// Credentials were correct but the email is unverified. Carries the
    /// account id so callers can route straight into verification.
    #[error("email verification required")]
    NeedsVerification(Uuid),

    /// The backing service failed underneath an otherwise valid operation.
    #[error(transparent)]
    Backing(#[from] BackingError),
}

impl AuthError {
    /// True when the caller should route the user into the verification flow.
    #[must_use]
    pub fn needs_verification(&self) -> Option<Uuid> {
        match self {
            Self::NeedsVerification(id) => Some(*id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_field_codes_are_stable() {
        assert_eq!(ConflictField::Username.code(), "username_taken");
        assert_eq!(ConflictField::Email.code(), "email_taken");
        assert_eq!(ConflictField::RecordId.code(), "record_taken");
    }

    #[test]
    fn banned_display_includes_reason() {
        let err = AuthError::Banned(Some("spam".to_string()));
        assert_eq!(err.to_string(), "account banned: spam");

        let err = AuthError::Banned(None);
        assert_eq!(err.to_string(), "account banned: no reason given");
    }

    #[test]
    fn needs_verification_extracts_account_id() {
        let id = Uuid::new_v4();
        assert_eq!(AuthError::NeedsVerification(id).needs_verification(), Some(id));
        assert_eq!(AuthError::NotFound.needs_verification(), None);
    }
}
