//! In-memory backing service for tests and local development.
//!
//! Behaves like the hosted backend at the seam: storage-level uniqueness is
//! enforced on insert, credentials are checked on authenticate, and session
//! lifecycle events go out over the broadcast channel. Passwords are kept in
//! plain strings here; this double never leaves a test or a dev machine.

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use tokio::sync::{Mutex, broadcast};
use uuid::Uuid;

use crate::auth::types::{Account, AccountPatch, Authenticated, LookupField, Session};

use super::{AuthChange, BackingError, BackingService, session_expiry};

const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Outbound email captured instead of being delivered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentEmail {
    pub to: String,
    pub code: String,
    pub display_name: String,
}

#[derive(Clone, Debug)]
struct Credential {
    id: Uuid,
    email: String,
    password: String,
}

#[derive(Default)]
struct Inner {
    accounts: HashMap<Uuid, Account>,
    credentials: Vec<Credential>,
    admins: HashMap<Uuid, i16>,
    current: Option<Authenticated>,
    sent_mail: Vec<SentEmail>,
    fail_email: bool,
    fail_next_insert: bool,
    fail_session_lookup: bool,
}

pub struct MemoryBacking {
    inner: Mutex<Inner>,
    events: broadcast::Sender<AuthChange>,
}

impl MemoryBacking {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Mutex::new(Inner::default()),
            events,
        }
    }

    /// Every verification email captured so far.
    pub async fn sent_mail(&self) -> Vec<SentEmail> {
        self.inner.lock().await.sent_mail.clone()
    }

    /// Make subsequent email dispatch fail (degraded-channel paths).
    pub async fn set_email_failure(&self, fail: bool) {
        self.inner.lock().await.fail_email = fail;
    }

    /// Make the next `insert_account` fail, to exercise compensation.
    pub async fn fail_next_insert(&self) {
        self.inner.lock().await.fail_next_insert = true;
    }

    /// Make `current_session` fail, to exercise fail-open initialization.
    pub async fn set_session_lookup_failure(&self, fail: bool) {
        self.inner.lock().await.fail_session_lookup = fail;
    }

    pub async fn grant_admin(&self, id: Uuid, level: i16) {
        self.inner.lock().await.admins.insert(id, level);
    }

    pub async fn set_banned(&self, id: Uuid, reason: Option<&str>) {
        if let Some(account) = self.inner.lock().await.accounts.get_mut(&id) {
            account.banned = true;
            account.ban_reason = reason.map(str::to_string);
        }
    }

    /// Rewrite the pending code's expiry, for boundary tests.
    pub async fn set_code_expiry(&self, id: Uuid, expires_at: DateTime<Utc>) {
        if let Some(account) = self.inner.lock().await.accounts.get_mut(&id) {
            account.code_expires_at = Some(expires_at);
        }
    }

    pub async fn pending_code(&self, id: Uuid) -> Option<String> {
        self.inner
            .lock()
            .await
            .accounts
            .get(&id)
            .and_then(|account| account.verification_code.clone())
    }

    pub async fn has_credential(&self, email: &str) -> bool {
        self.inner
            .lock()
            .await
            .credentials
            .iter()
            .any(|credential| credential.email == email)
    }

    /// Push an out-of-band lifecycle event, as the hosted backend would on
    /// a token refresh.
    pub fn emit(&self, change: AuthChange) {
        let _ = self.events.send(change);
    }

    fn issue_session(account_id: Uuid) -> Authenticated {
        Authenticated {
            account_id,
            session: Session {
                access_token: Uuid::new_v4().to_string(),
                expires_at: Some(session_expiry(Utc::now())),
            },
        }
    }
}

impl Default for MemoryBacking {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl BackingService for MemoryBacking {
    async fn create_credential(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<Uuid, BackingError> {
        let mut inner = self.inner.lock().await;
        let email = email.to_lowercase();
        if inner
            .credentials
            .iter()
            .any(|credential| credential.email == email)
        {
            return Err(BackingError::unique_violation(
                "credential already exists for email",
            ));
        }
        let id = Uuid::new_v4();
        inner.credentials.push(Credential {
            id,
            email,
            password: password.expose_secret().to_string(),
        });
        Ok(id)
    }

    async fn delete_credential(&self, id: Uuid) -> Result<(), BackingError> {
        let mut inner = self.inner.lock().await;
        let before = inner.credentials.len();
        inner.credentials.retain(|credential| credential.id != id);
        if inner.credentials.len() == before {
            return Err(BackingError::rejected("unknown credential"));
        }
        Ok(())
    }

    async fn authenticate(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<Authenticated, BackingError> {
        let mut inner = self.inner.lock().await;
        let email = email.to_lowercase();
        let account_id = inner
            .credentials
            .iter()
            .find(|credential| {
                credential.email == email && credential.password == password.expose_secret()
            })
            .map(|credential| credential.id)
            .ok_or_else(|| BackingError::rejected("invalid login credentials"))?;

        let authenticated = Self::issue_session(account_id);
        inner.current = Some(authenticated.clone());
        let _ = self.events.send(AuthChange::SignedIn(authenticated.clone()));
        Ok(authenticated)
    }

    async fn current_session(&self) -> Result<Option<Authenticated>, BackingError> {
        let inner = self.inner.lock().await;
        if inner.fail_session_lookup {
            return Err(BackingError::Transport(anyhow::anyhow!(
                "session lookup unavailable"
            )));
        }
        Ok(inner.current.clone())
    }

    async fn adopt_session(&self, authenticated: &Authenticated) -> Result<(), BackingError> {
        let mut inner = self.inner.lock().await;
        if !inner.accounts.contains_key(&authenticated.account_id) {
            return Err(BackingError::rejected("unknown account"));
        }
        inner.current = Some(authenticated.clone());
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), BackingError> {
        self.inner.lock().await.current = None;
        let _ = self.events.send(AuthChange::SignedOut);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.events.subscribe()
    }

    async fn insert_account(&self, account: &Account) -> Result<(), BackingError> {
        let mut inner = self.inner.lock().await;
        if inner.fail_next_insert {
            inner.fail_next_insert = false;
            return Err(BackingError::rejected("simulated insert failure"));
        }
        let username = account.username.to_lowercase();
        let email = account.email.to_lowercase();
        let record_id = account.kind.record_id().map(str::to_uppercase);
        for existing in inner.accounts.values() {
            if existing.username.to_lowercase() == username {
                return Err(BackingError::unique_violation("username already exists"));
            }
            if existing.email.to_lowercase() == email {
                return Err(BackingError::unique_violation("email already exists"));
            }
            if let (Some(new_id), Some(old_id)) = (&record_id, existing.kind.record_id()) {
                if old_id.to_uppercase() == *new_id {
                    return Err(BackingError::unique_violation("record id already exists"));
                }
            }
        }
        if inner.accounts.contains_key(&account.id) {
            return Err(BackingError::unique_violation("account id already exists"));
        }
        inner.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn fetch_account(&self, id: Uuid) -> Result<Option<Account>, BackingError> {
        Ok(self.inner.lock().await.accounts.get(&id).cloned())
    }

    async fn account_exists(&self, field: LookupField, value: &str) -> Result<bool, BackingError> {
        let inner = self.inner.lock().await;
        let found = inner.accounts.values().any(|account| match field {
            LookupField::Username => account.username.eq_ignore_ascii_case(value),
            LookupField::Email => account.email.eq_ignore_ascii_case(value),
            LookupField::RecordId => account
                .kind
                .record_id()
                .is_some_and(|record_id| record_id.eq_ignore_ascii_case(value)),
        });
        Ok(found)
    }

    async fn update_account(&self, id: Uuid, patch: &AccountPatch) -> Result<(), BackingError> {
        let mut inner = self.inner.lock().await;
        let account = inner
            .accounts
            .get_mut(&id)
            .ok_or_else(|| BackingError::rejected("unknown account"))?;
        patch.apply(account);
        Ok(())
    }

    async fn swap_verification(
        &self,
        id: Uuid,
        expected_code: &str,
        patch: &AccountPatch,
    ) -> Result<bool, BackingError> {
        let mut inner = self.inner.lock().await;
        let account = inner
            .accounts
            .get_mut(&id)
            .ok_or_else(|| BackingError::rejected("unknown account"))?;
        if account.verification_code.as_deref() != Some(expected_code) {
            return Ok(false);
        }
        patch.apply(account);
        Ok(true)
    }

    async fn admin_level(&self, id: Uuid) -> Result<Option<i16>, BackingError> {
        Ok(self.inner.lock().await.admins.get(&id).copied())
    }

    async fn send_verification_email(
        &self,
        email: &str,
        code: &str,
        display_name: &str,
    ) -> Result<(), BackingError> {
        let mut inner = self.inner.lock().await;
        if inner.fail_email {
            return Err(BackingError::rejected("email dispatch unavailable"));
        }
        inner.sent_mail.push(SentEmail {
            to: email.to_string(),
            code: code.to_string(),
            display_name: display_name.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::types::AccountKind;
    use anyhow::Result;

    fn account(username: &str, email: &str, record_id: Option<&str>) -> Account {
        Account {
            id: Uuid::new_v4(),
            kind: record_id.map_or(AccountKind::Visitor, |record_id| AccountKind::Student {
                full_name: "Ana Souza".to_string(),
                record_id: record_id.to_string(),
            }),
            username: username.to_string(),
            email: email.to_string(),
            email_verified: false,
            verification_code: Some("1234".to_string()),
            code_expires_at: Some(Utc::now()),
            banned: false,
            ban_reason: None,
            last_access: None,
        }
    }

    #[tokio::test]
    async fn insert_enforces_uniqueness_case_insensitively() -> Result<()> {
        let backing = MemoryBacking::new();
        backing
            .insert_account(&account("ana", "ana@x.com", Some("BRG12345")))
            .await?;

        let err = backing
            .insert_account(&account("ANA", "other@x.com", None))
            .await
            .unwrap_err();
        assert!(err.is_unique_violation());

        let err = backing
            .insert_account(&account("bea", "ANA@X.com", None))
            .await
            .unwrap_err();
        assert!(err.is_unique_violation());

        let err = backing
            .insert_account(&account("bea", "bea@x.com", Some("brg12345")))
            .await
            .unwrap_err();
        assert!(err.is_unique_violation());
        Ok(())
    }

    #[tokio::test]
    async fn authenticate_checks_password_and_emits_signed_in() -> Result<()> {
        let backing = MemoryBacking::new();
        let mut events = backing.subscribe();
        let password = SecretString::from("Abcd1234!".to_string());
        let id = backing.create_credential("ana@x.com", &password).await?;

        let wrong = SecretString::from("nope".to_string());
        assert!(backing.authenticate("ana@x.com", &wrong).await.is_err());

        let authenticated = backing.authenticate("ana@x.com", &password).await?;
        assert_eq!(authenticated.account_id, id);
        assert_eq!(
            events.recv().await?,
            AuthChange::SignedIn(authenticated.clone())
        );

        backing.sign_out().await?;
        assert_eq!(events.recv().await?, AuthChange::SignedOut);
        assert_eq!(backing.current_session().await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn adopt_session_restores_current_for_known_account() -> Result<()> {
        let backing = MemoryBacking::new();
        let record = account("ana", "ana@x.com", None);
        backing.insert_account(&record).await?;

        let authenticated = Authenticated {
            account_id: record.id,
            session: Session {
                access_token: "restored-token".to_string(),
                expires_at: None,
            },
        };
        backing.adopt_session(&authenticated).await?;
        assert_eq!(backing.current_session().await?, Some(authenticated));

        let unknown = Authenticated {
            account_id: Uuid::new_v4(),
            session: Session {
                access_token: "stale-token".to_string(),
                expires_at: None,
            },
        };
        assert!(backing.adopt_session(&unknown).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn swap_verification_is_compare_and_swap() -> Result<()> {
        let backing = MemoryBacking::new();
        let record = account("ana", "ana@x.com", None);
        backing.insert_account(&record).await?;

        let swapped = backing
            .swap_verification(record.id, "9999", &AccountPatch::verified())
            .await?;
        assert!(!swapped);

        let swapped = backing
            .swap_verification(record.id, "1234", &AccountPatch::verified())
            .await?;
        assert!(swapped);
        let stored = backing.fetch_account(record.id).await?.unwrap();
        assert!(stored.email_verified);
        assert_eq!(stored.verification_code, None);
        Ok(())
    }

    #[tokio::test]
    async fn email_failure_switch_reports_dispatch_errors() -> Result<()> {
        let backing = MemoryBacking::new();
        backing
            .send_verification_email("ana@x.com", "1234", "Ana")
            .await?;
        backing.set_email_failure(true).await;
        assert!(
            backing
                .send_verification_email("ana@x.com", "1234", "Ana")
                .await
                .is_err()
        );
        assert_eq!(backing.sent_mail().await.len(), 1);
        Ok(())
    }
}
