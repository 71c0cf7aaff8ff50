//! HTTP client for the hosted backing service.
//!
//! Thin JSON-over-HTTP binding of [`BackingService`]. Rejections (4xx with a
//! `message` body) map to [`BackingError::Rejected`], with `409` marking a
//! storage-level uniqueness violation; anything else is transport. Session
//! lifecycle events observed by this client (its own sign-in/sign-out) are
//! replayed on the local broadcast channel so store listeners behave the same
//! against the hosted backend and the in-memory double.

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, error, instrument};
use url::Url;
use uuid::Uuid;

use crate::APP_USER_AGENT;
use crate::auth::types::{Account, AccountPatch, Authenticated, LookupField, Session};

use super::{AuthChange, BackingError, BackingService};

const EVENT_CHANNEL_CAPACITY: usize = 100;
const API_KEY_HEADER: &str = "x-api-key";

pub struct HttpBacking {
    client: Client,
    base: Url,
    api_key: SecretString,
    bearer: Mutex<Option<String>>,
    events: broadcast::Sender<AuthChange>,
}

#[derive(Deserialize)]
struct CredentialCreated {
    id: Uuid,
}

#[derive(Deserialize)]
struct SessionPayload {
    account_id: Uuid,
    access_token: String,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct ExistsPayload {
    exists: bool,
}

#[derive(Deserialize)]
struct SwapPayload {
    swapped: bool,
}

#[derive(Deserialize)]
struct AdminPayload {
    level: i16,
}

impl HttpBacking {
    pub fn new(base_url: &str, api_key: SecretString) -> Result<Self, BackingError> {
        let base = Url::parse(base_url)
            .with_context(|| format!("invalid backing service URL: {base_url}"))?;
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .build()
            .context("failed to build HTTP client")?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            client,
            base,
            api_key,
            bearer: Mutex::new(None),
            events,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, BackingError> {
        Ok(self
            .base
            .join(path)
            .with_context(|| format!("invalid endpoint path: {path}"))?)
    }

    async fn bearer(&self) -> Option<String> {
        self.bearer.lock().await.clone()
    }

    /// Decode a rejection body, falling back to the bare status line.
    async fn rejection(response: Response) -> BackingError {
        let status = response.status();
        let message = response
            .json::<Value>()
            .await
            .ok()
            .and_then(|value| value["message"].as_str().map(str::to_string))
            .unwrap_or_else(|| format!("status {status}"));
        match status {
            StatusCode::UNAUTHORIZED
            | StatusCode::FORBIDDEN
            | StatusCode::NOT_FOUND
            | StatusCode::CONFLICT
            | StatusCode::UNPROCESSABLE_ENTITY => {
                error!("backing service rejected request: {message}");
                BackingError::Rejected {
                    message,
                    unique_violation: status == StatusCode::CONFLICT,
                }
            }
            _ => BackingError::Transport(anyhow!("{status}: {message}")),
        }
    }
}

fn session_from(payload: SessionPayload) -> Authenticated {
    Authenticated {
        account_id: payload.account_id,
        session: Session {
            access_token: payload.access_token,
            expires_at: payload.expires_at,
        },
    }
}

#[async_trait::async_trait]
impl BackingService for HttpBacking {
    #[instrument(skip(self, password))]
    async fn create_credential(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<Uuid, BackingError> {
        let response = self
            .client
            .post(self.endpoint("v1/credentials")?)
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .json(&json!({
                "email": email,
                "password": password.expose_secret(),
            }))
            .send()
            .await
            .context("credential create request failed")?;

        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        let created: CredentialCreated = response
            .json()
            .await
            .context("failed to decode credential response")?;
        Ok(created.id)
    }

    #[instrument(skip(self))]
    async fn delete_credential(&self, id: Uuid) -> Result<(), BackingError> {
        let response = self
            .client
            .delete(self.endpoint(&format!("v1/credentials/{id}"))?)
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .send()
            .await
            .context("credential delete request failed")?;
        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        Ok(())
    }

    #[instrument(skip(self, password))]
    async fn authenticate(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<Authenticated, BackingError> {
        let response = self
            .client
            .post(self.endpoint("v1/sessions")?)
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .json(&json!({
                "email": email,
                "password": password.expose_secret(),
            }))
            .send()
            .await
            .context("authenticate request failed")?;

        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        let payload: SessionPayload = response
            .json()
            .await
            .context("failed to decode session response")?;
        let authenticated = session_from(payload);

        *self.bearer.lock().await = Some(authenticated.session.access_token.clone());
        let _ = self.events.send(AuthChange::SignedIn(authenticated.clone()));
        Ok(authenticated)
    }

    #[instrument(skip(self))]
    async fn current_session(&self) -> Result<Option<Authenticated>, BackingError> {
        let Some(bearer) = self.bearer().await else {
            return Ok(None);
        };
        let response = self
            .client
            .get(self.endpoint("v1/sessions/current")?)
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .bearer_auth(&bearer)
            .send()
            .await
            .context("session lookup request failed")?;

        match response.status() {
            StatusCode::NO_CONTENT => Ok(None),
            status if status.is_success() => {
                let payload: SessionPayload = response
                    .json()
                    .await
                    .context("failed to decode session response")?;
                Ok(Some(session_from(payload)))
            }
            StatusCode::UNAUTHORIZED => {
                // Stale bearer from a previous run; treat as logged out.
                debug!("stored session no longer valid");
                *self.bearer.lock().await = None;
                Ok(None)
            }
            _ => Err(Self::rejection(response).await),
        }
    }

    #[instrument(skip(self, authenticated))]
    async fn adopt_session(&self, authenticated: &Authenticated) -> Result<(), BackingError> {
        // The hosted backend keeps no client-side state; holding the restored
        // bearer is all that is needed for current_session to revalidate it.
        *self.bearer.lock().await = Some(authenticated.session.access_token.clone());
        Ok(())
    }

    #[instrument(skip(self))]
    async fn sign_out(&self) -> Result<(), BackingError> {
        let bearer = self.bearer.lock().await.take();
        if let Some(bearer) = bearer {
            let response = self
                .client
                .post(self.endpoint("v1/sessions/logout")?)
                .header(API_KEY_HEADER, self.api_key.expose_secret())
                .bearer_auth(&bearer)
                .send()
                .await
                .context("sign out request failed")?;
            if !response.status().is_success() {
                return Err(Self::rejection(response).await);
            }
        }
        let _ = self.events.send(AuthChange::SignedOut);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.events.subscribe()
    }

    #[instrument(skip(self, account), fields(account_id = %account.id))]
    async fn insert_account(&self, account: &Account) -> Result<(), BackingError> {
        let response = self
            .client
            .post(self.endpoint("v1/accounts")?)
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .json(account)
            .send()
            .await
            .context("account insert request failed")?;
        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn fetch_account(&self, id: Uuid) -> Result<Option<Account>, BackingError> {
        let response = self
            .client
            .get(self.endpoint(&format!("v1/accounts/{id}"))?)
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .send()
            .await
            .context("account fetch request failed")?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let account: Account = response
                    .json()
                    .await
                    .context("failed to decode account response")?;
                Ok(Some(account))
            }
            _ => Err(Self::rejection(response).await),
        }
    }

    #[instrument(skip(self))]
    async fn account_exists(&self, field: LookupField, value: &str) -> Result<bool, BackingError> {
        let mut endpoint = self.endpoint("v1/accounts/exists")?;
        endpoint
            .query_pairs_mut()
            .append_pair("field", field.column())
            .append_pair("value", value);
        let response = self
            .client
            .get(endpoint)
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .send()
            .await
            .context("existence probe request failed")?;
        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        let payload: ExistsPayload = response
            .json()
            .await
            .context("failed to decode existence response")?;
        Ok(payload.exists)
    }

    #[instrument(skip(self, patch))]
    async fn update_account(&self, id: Uuid, patch: &AccountPatch) -> Result<(), BackingError> {
        let response = self
            .client
            .patch(self.endpoint(&format!("v1/accounts/{id}"))?)
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .json(&patch.to_json())
            .send()
            .await
            .context("account update request failed")?;
        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        Ok(())
    }

    #[instrument(skip(self, patch))]
    async fn swap_verification(
        &self,
        id: Uuid,
        expected_code: &str,
        patch: &AccountPatch,
    ) -> Result<bool, BackingError> {
        let response = self
            .client
            .post(self.endpoint(&format!("v1/accounts/{id}/verification-swap"))?)
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .json(&json!({
                "expected_code": expected_code,
                "patch": patch.to_json(),
            }))
            .send()
            .await
            .context("verification swap request failed")?;
        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        let payload: SwapPayload = response
            .json()
            .await
            .context("failed to decode swap response")?;
        Ok(payload.swapped)
    }

    #[instrument(skip(self))]
    async fn admin_level(&self, id: Uuid) -> Result<Option<i16>, BackingError> {
        let response = self
            .client
            .get(self.endpoint(&format!("v1/admins/{id}"))?)
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .send()
            .await
            .context("admin lookup request failed")?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let payload: AdminPayload = response
                    .json()
                    .await
                    .context("failed to decode admin response")?;
                Ok(Some(payload.level))
            }
            _ => Err(Self::rejection(response).await),
        }
    }

    #[instrument(skip(self, code))]
    async fn send_verification_email(
        &self,
        email: &str,
        code: &str,
        display_name: &str,
    ) -> Result<(), BackingError> {
        let response = self
            .client
            .post(self.endpoint("v1/emails/verification")?)
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .json(&json!({
                "email": email,
                "code": code,
                "display_name": display_name,
            }))
            .send()
            .await
            .context("email dispatch request failed")?;
        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        Ok(())
    }
}
