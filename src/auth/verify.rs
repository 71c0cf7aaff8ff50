//! Email ownership verification: code check and resend.
//!
//! Per-account state machine: `Unverified(code, expires_at)` moves to the
//! terminal `Verified` on a correct, fresh code, or to `Expired` once the
//! clock passes the expiry; `Expired` is recovered by a resend, which also
//! kills any still-valid prior code the instant it runs.

use chrono::Utc;
use tracing::{debug, error, instrument};
use uuid::Uuid;

use crate::backing::BackingService;

use super::code::{code_expiry, generate_code};
use super::config::AuthConfig;
use super::error::AuthError;
use super::types::AccountPatch;
use super::validate::valid_code_shape;

/// Successful resend. `fallback_code` is set only when dispatch failed, so
/// the new code can still reach the user through another channel.
#[derive(Debug)]
pub struct Resend {
    pub email_sent: bool,
    pub fallback_code: Option<String>,
}

/// Check a submitted code against the account's pending challenge.
///
/// The comparison is exact string equality: no trimming, no leading-zero
/// normalization. The verified flag is set through a compare-and-swap on the
/// code that was read, so of two racing attempts only one reports success;
/// the loser sees `Mismatch`.
#[instrument(skip(backing, submitted_code))]
pub async fn verify(
    backing: &dyn BackingService,
    account_id: Uuid,
    submitted_code: &str,
) -> Result<(), AuthError> {
    if !valid_code_shape(submitted_code) {
        return Err(AuthError::Validation {
            field: "code",
            reason: "expected exactly four digits".to_string(),
        });
    }

    let account = backing
        .fetch_account(account_id)
        .await?
        .ok_or(AuthError::NotFound)?;

    if account.email_verified {
        // Idempotent rejection; the first success already cleared the code.
        return Err(AuthError::AlreadyVerified);
    }

    let (Some(code), Some(expires_at)) = (&account.verification_code, account.code_expires_at)
    else {
        // No pending challenge; a resend issues one.
        return Err(AuthError::Expired);
    };

    if Utc::now() > expires_at {
        debug!("verification code past expiry");
        return Err(AuthError::Expired);
    }
    if submitted_code != code {
        return Err(AuthError::Mismatch);
    }

    let swapped = backing
        .swap_verification(account_id, code, &AccountPatch::verified())
        .await?;
    if !swapped {
        // The stored code changed between read and write.
        return Err(AuthError::Mismatch);
    }
    Ok(())
}

/// Issue a fresh code, unconditionally replacing any pending one.
///
/// The previous code becomes permanently invalid the instant the overwrite
/// lands, even if it had time left: at most one valid code per account.
/// Dispatch failure does not roll the new code back.
#[instrument(skip(backing, config))]
pub async fn resend(
    backing: &dyn BackingService,
    config: &AuthConfig,
    account_id: Uuid,
) -> Result<Resend, AuthError> {
    let account = backing
        .fetch_account(account_id)
        .await?
        .ok_or(AuthError::NotFound)?;

    if account.email_verified {
        // A verified account must never regress to holding a pending code.
        return Err(AuthError::AlreadyVerified);
    }

    let code = generate_code();
    let expires_at = code_expiry(Utc::now(), config.code_ttl());
    backing
        .update_account(account_id, &AccountPatch::new_code(code.clone(), expires_at))
        .await?;

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

    Ok(Resend {
        email_sent,
        fallback_code: if email_sent { None } else { Some(code) },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::register::{RegisterRequest, register};
    use crate::backing::MemoryBacking;
    use anyhow::Result;
    use chrono::Duration;
    use secrecy::SecretString;

    async fn registered(backing: &MemoryBacking) -> Result<(Uuid, String)> {
        let config = AuthConfig::new();
        let registration = register(
            backing,
            &config,
            RegisterRequest::Visitor {
                username: "ana".to_string(),
                email: "ana@x.com".to_string(),
                password: SecretString::from("Abcd1234!".to_string()),
            },
        )
        .await?;
        let code = backing
            .pending_code(registration.account_id)
            .await
            .expect("pending code");
        Ok((registration.account_id, code))
    }

    #[tokio::test]
    async fn correct_code_verifies_once_then_already_verified() -> Result<()> {
        let backing = MemoryBacking::new();
        let (id, code) = registered(&backing).await?;

        verify(&backing, id, &code).await?;
        let account = backing.fetch_account(id).await?.unwrap();
        assert!(account.email_verified);
        assert_eq!(account.verification_code, None);
        assert_eq!(account.code_expires_at, None);

        let err = verify(&backing, id, &code).await.unwrap_err();
        assert!(matches!(err, AuthError::AlreadyVerified));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_account_is_not_found() {
        let backing = MemoryBacking::new();
        let err = verify(&backing, Uuid::new_v4(), "1234").await.unwrap_err();
        assert!(matches!(err, AuthError::NotFound));
    }

    #[tokio::test]
    async fn malformed_code_rejected_before_lookup() {
        let backing = MemoryBacking::new();
        // Shape failures never reach the store, so even an unknown id
        // reports the validation error.
        let err = verify(&backing, Uuid::new_v4(), " 1234").await.unwrap_err();
        assert!(matches!(err, AuthError::Validation { field: "code", .. }));
    }

    #[tokio::test]
    async fn wrong_code_is_mismatch() -> Result<()> {
        let backing = MemoryBacking::new();
        let (id, code) = registered(&backing).await?;
        let wrong = if code == "1234" { "4321" } else { "1234" };

        let err = verify(&backing, id, wrong).await.unwrap_err();
        assert!(matches!(err, AuthError::Mismatch));
        let account = backing.fetch_account(id).await?.unwrap();
        assert!(!account.email_verified);
        Ok(())
    }

    #[tokio::test]
    async fn code_valid_one_second_before_expiry() -> Result<()> {
        let backing = MemoryBacking::new();
        let (id, code) = registered(&backing).await?;

        backing
            .set_code_expiry(id, Utc::now() + Duration::seconds(1))
            .await;
        verify(&backing, id, &code).await?;
        Ok(())
    }

    #[tokio::test]
    async fn code_expired_one_second_after_expiry() -> Result<()> {
        let backing = MemoryBacking::new();
        let (id, code) = registered(&backing).await?;

        backing
            .set_code_expiry(id, Utc::now() - Duration::seconds(1))
            .await;
        let err = verify(&backing, id, &code).await.unwrap_err();
        assert!(matches!(err, AuthError::Expired));
        Ok(())
    }

    #[tokio::test]
    async fn resend_invalidates_prior_code_immediately() -> Result<()> {
        let backing = MemoryBacking::new();
        let config = AuthConfig::new();
        let (id, old_code) = registered(&backing).await?;

        let resent = resend(&backing, &config, id).await?;
        assert!(resent.email_sent);
        let new_code = backing.pending_code(id).await.expect("new code");

        if old_code != new_code {
            let err = verify(&backing, id, &old_code).await.unwrap_err();
            assert!(matches!(err, AuthError::Mismatch));
        }
        verify(&backing, id, &new_code).await?;
        Ok(())
    }

    #[tokio::test]
    async fn resend_after_verification_is_rejected() -> Result<()> {
        let backing = MemoryBacking::new();
        let config = AuthConfig::new();
        let (id, code) = registered(&backing).await?;
        verify(&backing, id, &code).await?;

        let err = resend(&backing, &config, id).await.unwrap_err();
        assert!(matches!(err, AuthError::AlreadyVerified));
        let account = backing.fetch_account(id).await?.unwrap();
        assert_eq!(account.verification_code, None);
        Ok(())
    }

    #[tokio::test]
    async fn resend_dispatch_failure_keeps_the_new_code() -> Result<()> {
        let backing = MemoryBacking::new();
        let config = AuthConfig::new();
        let (id, _) = registered(&backing).await?;

        backing.set_email_failure(true).await;
        let resent = resend(&backing, &config, id).await?;
        assert!(!resent.email_sent);
        let fallback = resent.fallback_code.expect("fallback code");
        verify(&backing, id, &fallback).await?;
        Ok(())
    }
}
