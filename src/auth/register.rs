//! Account registration for students and visitors.

use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use crate::backing::{BackingError, BackingService};

use super::code::{code_expiry, generate_code};
use super::config::AuthConfig;
use super::error::{AuthError, ConflictField};
use super::guard::check_conflicts;
use super::types::{Account, AccountKind};
use super::validate::{
    normalize_email, sanitize, valid_email, valid_full_name, valid_password, valid_record_id,
    valid_username,
};

/// Registration input, one variant per account kind.
#[derive(Debug)]
pub enum RegisterRequest {
    Student {
        full_name: String,
        username: String,
        record_id: String,
        email: String,
        password: SecretString,
    },
    Visitor {
        username: String,
        email: String,
        password: SecretString,
    },
}

/// Successful registration. When `email_sent` is false the dispatch failed
/// and `fallback_code` carries the issued code so the caller can present it
/// through another channel; losing email must never block account creation.
#[derive(Debug)]
pub struct Registration {
    pub account_id: Uuid,
    pub email_sent: bool,
    pub fallback_code: Option<String>,
}

struct Candidate {
    kind: AccountKind,
    username: String,
    email: String,
    password: SecretString,
}

/// Sanitize, normalize, and shape-check the request fields.
fn validate(request: RegisterRequest) -> Result<Candidate, AuthError> {
    let invalid = |field: &'static str, reason: &str| AuthError::Validation {
        field,
        reason: reason.to_string(),
    };

    match request {
        RegisterRequest::Student {
            full_name,
            username,
            record_id,
            email,
            password,
        } => {
            let full_name = sanitize(&full_name);
            let username = sanitize(&username).to_lowercase();
            let record_id = sanitize(&record_id).to_uppercase();
            let email = normalize_email(&sanitize(&email));

            if !valid_full_name(&full_name) {
                return Err(invalid("full_name", "expected a first and last name"));
            }
            if !valid_username(&username) {
                return Err(invalid("username", "use 3-30 letters, digits, underscore"));
            }
            if !valid_record_id(&record_id) {
                return Err(invalid("record_id", "expected format BRG12345"));
            }
            if !valid_email(&email) {
                return Err(invalid("email", "not a valid address"));
            }
            if !valid_password(password.expose_secret()) {
                return Err(invalid("password", "must be 8-128 characters"));
            }
            Ok(Candidate {
                kind: AccountKind::Student {
                    full_name,
                    record_id,
                },
                username,
                email,
                password,
            })
        }
        RegisterRequest::Visitor {
            username,
            email,
            password,
        } => {
            let username = sanitize(&username).to_lowercase();
            let email = normalize_email(&sanitize(&email));

            if !valid_username(&username) {
                return Err(invalid("username", "use 3-30 letters, digits, underscore"));
            }
            if !valid_email(&email) {
                return Err(invalid("email", "not a valid address"));
            }
            if !valid_password(password.expose_secret()) {
                return Err(invalid("password", "must be 8-128 characters"));
            }
            Ok(Candidate {
                kind: AccountKind::Visitor,
                username,
                email,
                password,
            })
        }
    }
}

/// Register a new account.
///
/// Credential creation and profile insertion hit two independent stores, so
/// an insert failure triggers a compensating credential delete; no
/// authable-but-profile-less credential may remain. Email dispatch failure
/// is non-fatal and only flips `email_sent`.
#[instrument(skip(backing, config, request))]
pub async fn register(
    backing: &dyn BackingService,
    config: &AuthConfig,
    request: RegisterRequest,
) -> Result<Registration, AuthError> {
    let candidate = validate(request)?;

    if let Some(conflict) = check_conflicts(
        backing,
        &candidate.username,
        &candidate.email,
        candidate.kind.record_id(),
    )
    .await?
    {
        debug!(conflict = %conflict, "registration rejected by uniqueness guard");
        return Err(AuthError::Conflict(conflict));
    }

    let credential_id = match backing
        .create_credential(&candidate.email, &candidate.password)
        .await
    {
        Ok(id) => id,
        Err(BackingError::Rejected { message, .. }) => {
            // Surfaced verbatim; no account record exists yet.
            return Err(AuthError::Credential(message));
        }
        Err(err) => return Err(err.into()),
    };

    let code = generate_code();
    let expires_at = code_expiry(Utc::now(), config.code_ttl());
    let account = Account {
        id: credential_id,
        kind: candidate.kind,
        username: candidate.username,
        email: candidate.email,
        email_verified: false,
        verification_code: Some(code.clone()),
        code_expires_at: Some(expires_at),
        banned: false,
        ban_reason: None,
        last_access: None,
    };

    if let Err(insert_err) = backing.insert_account(&account).await {
        // Compensate: the credential must not outlive the failed profile.
        if let Err(delete_err) = backing.delete_credential(credential_id).await {
            error!("failed to delete orphaned credential: {delete_err}");
        }
        if insert_err.is_unique_violation() {
            // The store is the authority on uniqueness; name the field when
            // a re-probe can still see the winner.
            let field = check_conflicts(
                backing,
                &account.username,
                &account.email,
                account.kind.record_id(),
            )
            .await
            .ok()
            .flatten()
            .unwrap_or(ConflictField::Email);
            return Err(AuthError::Conflict(field));
        }
        return Err(insert_err.into());
    }

    let email_sent = match backing
        .send_verification_email(&account.email, &code, account.display_name())
        .await
    {
        Ok(()) => true,
        Err(err) => {
            error!("verification email dispatch failed: {err}");
            false
        }
    };

    Ok(Registration {
        account_id: account.id,
        email_sent,
        fallback_code: if email_sent { None } else { Some(code) },
    })
}
