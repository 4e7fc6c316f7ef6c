//! Account endpoints and session persistence

use crate::config::SyncConfig;
use crate::remote::RemoteError;
use crate::store::LocalStore;
use crate::SyncError;
use itemsync_common::{validate_registration, AuthResponse, Registration, User};
use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
struct RegisterRequest<'a> {
    username: &'a str,
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct MeResponse {
    user: User,
}

/// REST client for `/api/auth`
pub struct AuthClient {
    client: reqwest::Client,
    base_url: String,
}

impl AuthClient {
    pub fn new(config: &SyncConfig) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SyncError::Config(anyhow::anyhow!(e)))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/auth/{}", self.base_url, path)
    }

    /// Create an account and start a session
    pub async fn register(&self, store: &LocalStore, form: &Registration) -> crate::Result<User> {
        validate_registration(form)?;

        let request = self.client.post(self.url("register")).json(&RegisterRequest {
            username: form.username.trim(),
            email: form.email.trim(),
            password: &form.password,
        });
        let session: AuthResponse = self.send_json(request).await?;
        self.start_session(store, session)
    }

    pub async fn login(
        &self,
        store: &LocalStore,
        username: &str,
        password: &str,
    ) -> crate::Result<User> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(SyncError::Validation(
                "Username and password are required".to_string(),
            ));
        }

        let request = self.client.post(self.url("login")).json(&LoginRequest {
            username: username.trim(),
            password,
        });
        let session: AuthResponse = self.send_json(request).await?;
        self.start_session(store, session)
    }

    /// Check the stored token with the server; a rejected token ends the session
    pub async fn me(&self, store: &LocalStore) -> crate::Result<User> {
        let token = store
            .read_token()
            .ok_or_else(|| SyncError::Unauthorized("not logged in".to_string()))?;

        let request = self.client.get(self.url("me")).bearer_auth(token);
        match self.send_json::<MeResponse>(request).await {
            Ok(me) => {
                store.write_user(&me.user)?;
                Ok(me.user)
            }
            Err(SyncError::Unauthorized(msg)) => {
                store.clear_session()?;
                tracing::info!("Session rejected by server, logged out");
                Err(SyncError::Unauthorized(msg))
            }
            Err(e) => Err(e),
        }
    }

    /// Forget everything stored locally
    pub fn logout(&self, store: &LocalStore) -> crate::Result<()> {
        store.clear_all()
    }

    fn start_session(&self, store: &LocalStore, session: AuthResponse) -> crate::Result<User> {
        store.write_token(&session.token)?;
        store.write_user(&session.user)?;
        tracing::info!("Logged in as {}", session.user.username);
        Ok(session.user)
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> crate::Result<T> {
        let response = request.send().await.map_err(auth_failure)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(auth_failure(RemoteError::from_status(
                status,
                crate::remote::error_message(&body),
            )));
        }
        response.json::<T>().await.map_err(auth_failure)
    }
}

fn auth_failure(error: impl Into<RemoteError>) -> SyncError {
    match error.into() {
        RemoteError::Unauthorized => SyncError::Unauthorized("invalid credentials".to_string()),
        RemoteError::Connectivity(msg) => SyncError::Connectivity(msg),
        RemoteError::Rejected(msg) => SyncError::Rejected(msg),
        RemoteError::Conflict => SyncError::Rejected("account already exists".to_string()),
        RemoteError::NotFound => SyncError::Rejected("auth endpoint not found".to_string()),
    }
}
