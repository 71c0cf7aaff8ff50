//! Client-side session and role state.
//!
//! The [`SessionStore`] is the single source of truth the application reads
//! to decide what a user may do. It is explicitly constructed around a
//! backing service handle, has a defined lifecycle (initialize, login,
//! logout), and reacts to the backing service's session notifications in
//! arrival order through a cancellable listener. Durable fields cross
//! restarts through the serialize/deserialize boundary in [`persist`];
//! `loading`/`initialized` describe in-flight process state and never do.

pub mod persist;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast::error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

use crate::auth::types::{Account, AccountKind, AccountPatch, Session};
use crate::backing::{AuthChange, BackingService};

/// Process-wide authentication state.
///
/// `loading` and `initialized` are process-lifetime flags guarding redundant
/// re-initialization; everything else is durable truth mirrored from the
/// backing service.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientAuthState {
    pub account: Option<Account>,
    pub session: Option<Session>,
    pub is_admin: bool,
    pub admin_level: Option<i16>,
    #[serde(skip, default = "default_loading")]
    pub loading: bool,
    #[serde(skip)]
    pub initialized: bool,
}

fn default_loading() -> bool {
    true
}

impl ClientAuthState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            account: None,
            session: None,
            is_admin: false,
            admin_level: None,
            loading: true,
            initialized: false,
        }
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.account.is_some() && self.session.is_some()
    }

    #[must_use]
    pub fn is_email_verified(&self) -> bool {
        self.account
            .as_ref()
            .is_some_and(|account| account.email_verified)
    }

    #[must_use]
    pub fn is_student(&self) -> bool {
        self.account
            .as_ref()
            .is_some_and(|account| account.kind.is_student())
    }

    #[must_use]
    pub fn is_visitor(&self) -> bool {
        self.account
            .as_ref()
            .is_some_and(|account| matches!(account.kind, AccountKind::Visitor))
    }

    fn clear(&mut self) {
        self.account = None;
        self.session = None;
        self.is_admin = false;
        self.admin_level = None;
    }
}

impl Default for ClientAuthState {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancellable handle for the session-change listener task.
///
/// Dropping the handle unsubscribes; events already received are still
/// processed in order before the task notices.
pub struct ListenerHandle {
    task: JoinHandle<()>,
}

impl ListenerHandle {
    pub fn unsubscribe(self) {
        self.task.abort();
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub struct SessionStore {
    backing: Arc<dyn BackingService>,
    state: Mutex<ClientAuthState>,
}

impl SessionStore {
    #[must_use]
    pub fn new(backing: Arc<dyn BackingService>) -> Self {
        Self {
            backing,
            state: Mutex::new(ClientAuthState::new()),
        }
    }

    /// Current state, cloned. Predicates live on [`ClientAuthState`] so the
    /// lock is held only for the copy.
    pub async fn snapshot(&self) -> ClientAuthState {
        self.state.lock().await.clone()
    }

    /// Hydrate from any durable session the backing service still holds.
    ///
    /// Idempotent: no-ops once initialized unless a load is in flight. Ends
    /// with `loading=false, initialized=true` no matter what failed along
    /// the way; a broken lookup degrades to logged-out, never to a store
    /// stuck loading.
    #[instrument(skip(self))]
    pub async fn initialize(&self) {
        {
            let mut state = self.state.lock().await;
            if state.initialized && !state.loading {
                return;
            }
            state.loading = true;
        }
        self.refresh_from_backing().await;
    }

    /// Unconditional reload, used by the listener on sign-in events.
    async fn refresh_from_backing(&self) {
        let resolved = self.resolve_current().await;
        let mut state = self.state.lock().await;
        match resolved {
            Ok(Some((account, session, admin_level))) => {
                state.is_admin = admin_level.is_some();
                state.admin_level = admin_level;
                state.account = Some(account);
                state.session = Some(session);
            }
            Ok(None) => state.clear(),
            Err(err) => {
                error!("session hydration failed: {err}");
                state.clear();
            }
        }
        state.loading = false;
        state.initialized = true;
    }

    async fn resolve_current(
        &self,
    ) -> Result<Option<(Account, Session, Option<i16>)>, crate::backing::BackingError> {
        let Some(authenticated) = self.backing.current_session().await? else {
            return Ok(None);
        };
        let Some(account) = self.backing.fetch_account(authenticated.account_id).await? else {
            debug!("durable session points at a missing account");
            return Ok(None);
        };
        let admin_level = self.backing.admin_level(account.id).await?;
        Ok(Some((account, authenticated.session, admin_level)))
    }

    /// Adopt a freshly gated login. Role resolution happens here so the
    /// login gate itself stays free of store concerns.
    #[instrument(skip(self, account, session), fields(account_id = %account.id))]
    pub async fn login(&self, account: Account, session: Session) {
        let admin_level = match self.backing.admin_level(account.id).await {
            Ok(level) => level,
            Err(err) => {
                // Role lookup failure degrades to non-admin.
                error!("admin role lookup failed: {err}");
                None
            }
        };
        let mut state = self.state.lock().await;
        state.is_admin = admin_level.is_some();
        state.admin_level = admin_level;
        state.account = Some(account);
        state.session = Some(session);
        state.loading = false;
    }

    /// Clear all auth fields. The backing service sign-out is the caller's
    /// responsibility; this only forgets local state.
    pub async fn logout(&self) {
        let mut state = self.state.lock().await;
        state.clear();
        state.loading = false;
    }

    /// Merge a partial update into the current account; no-op when logged
    /// out.
    pub async fn update_account(&self, patch: &AccountPatch) {
        let mut state = self.state.lock().await;
        if let Some(account) = state.account.as_mut() {
            patch.apply(account);
        }
    }

    /// Swap only the session, keeping account and role untouched. Used on
    /// pure token refreshes to avoid redundant role re-resolution.
    async fn refresh_session(&self, session: Session) {
        let mut state = self.state.lock().await;
        if state.account.is_some() {
            state.session = Some(session);
            return;
        }
        drop(state);
        // A refresh with no local account means we missed the sign-in.
        self.refresh_from_backing().await;
    }

    /// React to backing-service session notifications in arrival order.
    ///
    /// Sign-in re-hydrates, sign-out clears, token refresh swaps only the
    /// session. Returns a handle whose drop (or `unsubscribe`) stops the
    /// task.
    #[must_use]
    pub fn subscribe_changes(self: &Arc<Self>) -> ListenerHandle {
        let mut receiver = self.backing.subscribe();
        let store = Arc::clone(self);
        let task = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(AuthChange::SignedIn(_)) => store.refresh_from_backing().await,
                    Ok(AuthChange::SignedOut) => store.logout().await,
                    Ok(AuthChange::TokenRefreshed(session)) => {
                        store.refresh_session(session).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        // Catch up by re-hydrating; individual events are
                        // idempotent against current backing state.
                        warn!("session listener lagged by {skipped} events");
                        store.refresh_from_backing().await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        ListenerHandle { task }
    }
}
