//! Login gate: credential check, then ban and verification preconditions.

use chrono::Utc;
use secrecy::SecretString;
use tracing::{debug, error, instrument};

use crate::backing::{BackingError, BackingService};

use super::error::AuthError;
use super::types::{Account, AccountPatch, Session};
use super::validate::{normalize_email, sanitize};

/// Successful login: the loaded account plus the session to adopt.
#[derive(Debug)]
pub struct Login {
    pub account: Account,
    pub session: Session,
}

/// Authenticate and gate a login attempt.
///
/// Credential failures are uniform `InvalidCredentials`; an unknown email is
/// never distinguishable from a wrong password. A banned account has its
/// fresh session signed out before the error returns; an unverified account
/// fails with `NeedsVerification` carrying the account id so the caller can
/// route into the verification flow without asking for credentials again.
#[instrument(skip(backing, password))]
pub async fn login(
    backing: &dyn BackingService,
    email: &str,
    password: &SecretString,
) -> Result<Login, AuthError> {
    let email = normalize_email(&sanitize(email));

    let authenticated = match backing.authenticate(&email, password).await {
        Ok(authenticated) => authenticated,
        Err(BackingError::Rejected { .. }) => return Err(AuthError::InvalidCredentials),
        Err(err) => return Err(err.into()),
    };

    let Some(account) = backing.fetch_account(authenticated.account_id).await? else {
        // Credential without a profile record; treat like a bad login rather
        // than leaking the inconsistency.
        error!("authenticated credential has no account record");
        if let Err(err) = backing.sign_out().await {
            error!("failed to discard session: {err}");
        }
        return Err(AuthError::InvalidCredentials);
    };

    if account.banned {
        // Ban precedence: the session must die regardless of verification.
        if let Err(err) = backing.sign_out().await {
            error!("failed to discard banned account session: {err}");
        }
        return Err(AuthError::Banned(account.ban_reason));
    }

    if !account.email_verified {
        return Err(AuthError::NeedsVerification(account.id));
    }

    let now = Utc::now();
    if let Err(err) = backing
        .update_account(account.id, &AccountPatch::touch_last_access(now))
        .await
    {
        // Best-effort bookkeeping; a lost write never fails the login.
        debug!("failed to touch last_access: {err}");
    }

    let mut account = account;
    account.last_access = Some(now);
    Ok(Login {
        account,
        session: authenticated.session,
    })
}
