//! Serialize/deserialize boundary for the durable part of the auth state.
//!
//! Only `account`, `session`, `is_admin`, and `admin_level` cross restarts;
//! `loading`/`initialized` are process state and always come back at their
//! initial values. A missing or corrupt snapshot loads as logged-out.

use anyhow::{Context, Result};
use std::path::Path;
use tokio::fs;
use tracing::{debug, warn};

use crate::auth::types::Authenticated;

use super::{ClientAuthState, SessionStore};

impl SessionStore {
    /// Write the durable fields to `path` as a JSON snapshot.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let snapshot = self.snapshot().await;
        let bytes =
            serde_json::to_vec_pretty(&snapshot).context("failed to serialize auth snapshot")?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("failed to create snapshot directory")?;
        }
        fs::write(path, bytes)
            .await
            .with_context(|| format!("failed to write auth snapshot to {}", path.display()))
    }

    /// Restore durable fields from `path`, if a readable snapshot exists.
    ///
    /// A restored session is also re-seeded into the backing service, so a
    /// later `initialize` revalidates it instead of finding no session and
    /// clearing the restored login.
    ///
    /// Never fails the caller: unreadable or corrupt snapshots leave the
    /// store logged-out, and `initialize` revalidates against the backing
    /// service either way.
    pub async fn load(&self, path: &Path) {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!("no auth snapshot at {}", path.display());
                return;
            }
            Err(err) => {
                warn!("failed to read auth snapshot: {err}");
                return;
            }
        };
        match serde_json::from_slice::<ClientAuthState>(&bytes) {
            Ok(restored) => {
                let adopt = match (&restored.account, &restored.session) {
                    (Some(account), Some(session)) => Some(Authenticated {
                        account_id: account.id,
                        session: session.clone(),
                    }),
                    _ => None,
                };
                *self.state.lock().await = restored;
                if let Some(authenticated) = adopt {
                    if let Err(err) = self.backing.adopt_session(&authenticated).await {
                        warn!("failed to re-seed restored session: {err}");
                    }
                }
            }
            Err(err) => {
                warn!("discarding corrupt auth snapshot: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::config::AuthConfig;
    use crate::auth::login::login as gate_login;
    use crate::auth::register::{RegisterRequest, register};
    use crate::auth::verify::verify;
    use crate::backing::{BackingService, MemoryBacking};
    use anyhow::Result;
    use secrecy::SecretString;
    use std::sync::Arc;

    async fn logged_in_store(backing: &Arc<MemoryBacking>) -> Result<SessionStore> {
        let registration = register(
            backing.as_ref(),
            &AuthConfig::new(),
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
        verify(backing.as_ref(), registration.account_id, &code).await?;
        backing.grant_admin(registration.account_id, 2).await;

        let gated = gate_login(
            backing.as_ref(),
            "ana@x.com",
            &SecretString::from("Abcd1234!".to_string()),
        )
        .await?;
        let store = SessionStore::new(Arc::clone(backing) as Arc<dyn BackingService>);
        store.login(gated.account, gated.session).await;
        Ok(store)
    }

    #[tokio::test]
    async fn snapshot_round_trip_resets_process_flags() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("auth.json");

        let backing = Arc::new(MemoryBacking::new());
        let store = logged_in_store(&backing).await?;
        store.save(&path).await?;

        let restored = SessionStore::new(Arc::clone(&backing) as Arc<dyn BackingService>);
        restored.load(&path).await;

        let state = restored.snapshot().await;
        assert!(state.is_authenticated());
        assert!(state.is_admin);
        assert_eq!(state.admin_level, Some(2));
        // Process flags come back at initial values, not persisted ones.
        assert!(state.loading);
        assert!(!state.initialized);
        Ok(())
    }

    #[tokio::test]
    async fn restored_session_survives_initialize() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("auth.json");

        let backing = Arc::new(MemoryBacking::new());
        let store = logged_in_store(&backing).await?;
        store.save(&path).await?;

        // The backing forgets the live session, as it would across a
        // process restart.
        backing.sign_out().await?;

        let restored = SessionStore::new(Arc::clone(&backing) as Arc<dyn BackingService>);
        restored.load(&path).await;
        restored.initialize().await;

        // load re-seeded the session, so initialize revalidated it instead
        // of clearing the restored login.
        let state = restored.snapshot().await;
        assert!(state.is_authenticated());
        assert!(state.is_admin);
        assert_eq!(state.admin_level, Some(2));
        assert!(state.initialized);
        assert!(!state.loading);
        Ok(())
    }

    #[tokio::test]
    async fn missing_snapshot_leaves_store_logged_out() {
        let dir = tempfile::tempdir().unwrap();
        let backing = Arc::new(MemoryBacking::new());
        let store = SessionStore::new(backing as Arc<dyn BackingService>);

        store.load(&dir.path().join("absent.json")).await;
        assert!(!store.snapshot().await.is_authenticated());
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_discarded() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("auth.json");
        fs::write(&path, b"{not json").await?;

        let backing = Arc::new(MemoryBacking::new());
        let store = SessionStore::new(backing as Arc<dyn BackingService>);
        store.load(&path).await;
        assert!(!store.snapshot().await.is_authenticated());
        Ok(())
    }
}
