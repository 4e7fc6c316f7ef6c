//! Remote collection endpoint
//!
//! `RemoteCollection` is the contract the engine consumes; `HttpRemote`
//! speaks it over REST.

use crate::config::SyncConfig;
use async_trait::async_trait;
use itemsync_common::{Item, ItemDraft, ItemFilter, ItemPatch, ItemsPage};
use reqwest::{RequestBuilder, Response, StatusCode};
use std::sync::RwLock;

/// Header attributing a mutation to one channel connection
pub const CONNECTION_ID_HEADER: &str = "X-Connection-Id";

/// Failure classes of a remote call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// Transport failure or server-side error; worth retrying later
    #[error("unreachable: {0}")]
    Connectivity(String),

    #[error("not found")]
    NotFound,

    /// Supplied version is stale
    #[error("version conflict")]
    Conflict,

    /// Permanently refused (malformed or invalid input)
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("unauthorized")]
    Unauthorized,
}

impl RemoteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Connectivity(_))
    }

    /// Map an HTTP status to a failure class
    pub fn from_status(status: StatusCode, message: String) -> Self {
        match status {
            StatusCode::NOT_FOUND => RemoteError::NotFound,
            StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => RemoteError::Conflict,
            StatusCode::UNAUTHORIZED => RemoteError::Unauthorized,
            s if s.is_server_error() || s == StatusCode::REQUEST_TIMEOUT => {
                RemoteError::Connectivity(format!("{}: {}", s, message))
            }
            s => RemoteError::Rejected(format!("{}: {}", s, message)),
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => RemoteError::from_status(status, e.to_string()),
            None if e.is_decode() => RemoteError::Rejected(e.to_string()),
            None => RemoteError::Connectivity(e.to_string()),
        }
    }
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Server-backed item collection
#[async_trait]
pub trait RemoteCollection: Send + Sync {
    async fn query(&self, filter: &ItemFilter, page: u32, limit: u32) -> RemoteResult<ItemsPage>;

    async fn get(&self, id: i64) -> RemoteResult<Item>;

    /// `origin` is the connection identity of the caller, if any
    async fn create(&self, draft: &ItemDraft, origin: Option<&str>) -> RemoteResult<Item>;

    async fn update(&self, id: i64, patch: &ItemPatch, origin: Option<&str>)
        -> RemoteResult<Item>;

    async fn delete(&self, id: i64, origin: Option<&str>) -> RemoteResult<()>;
}

/// REST client for the item collection
pub struct HttpRemote {
    client: reqwest::Client,
    items_url: String,
    token: RwLock<Option<String>>,
}

impl HttpRemote {
    pub fn new(config: &SyncConfig, token: Option<String>) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| crate::SyncError::Config(anyhow::anyhow!(e)))?;

        Ok(Self {
            client,
            items_url: config.items_url(),
            token: RwLock::new(token),
        })
    }

    /// Replace the bearer token (login, logout)
    pub fn set_token(&self, token: Option<String>) {
        if let Ok(mut guard) = self.token.write() {
            *guard = token;
        }
    }

    fn authorize(&self, request: RequestBuilder, origin: Option<&str>) -> RequestBuilder {
        let mut request = request;
        if let Some(token) = self.token.read().ok().and_then(|t| t.clone()) {
            request = request.bearer_auth(token);
        }
        if let Some(origin) = origin {
            request = request.header(CONNECTION_ID_HEADER, origin);
        }
        request
    }

    fn item_url(&self, id: i64) -> String {
        format!("{}/{}", self.items_url, id)
    }

    async fn send(&self, request: RequestBuilder) -> RemoteResult<Response> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::from_status(status, error_message(&body)))
    }
}

/// Pull `error`/`message` out of a JSON error body, else the raw text
pub(crate) fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .or_else(|| v.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}

fn query_params(filter: &ItemFilter, page: u32, limit: u32) -> Vec<(&'static str, String)> {
    let mut params = vec![("page", page.to_string()), ("limit", limit.to_string())];
    if let Some(ref text) = filter.text {
        if !text.trim().is_empty() {
            params.push(("text", text.trim().to_string()));
        }
    }
    if let Some(completed) = filter.completed {
        params.push(("completed", completed.to_string()));
    }
    if let Some(from) = filter.date_from {
        params.push(("dateFrom", from.to_string()));
    }
    if let Some(to) = filter.date_to {
        params.push(("dateTo", to.to_string()));
    }
    params
}

#[async_trait]
impl RemoteCollection for HttpRemote {
    async fn query(&self, filter: &ItemFilter, page: u32, limit: u32) -> RemoteResult<ItemsPage> {
        let request = self
            .client
            .get(&self.items_url)
            .query(&query_params(filter, page, limit));
        let response = self.send(self.authorize(request, None)).await?;
        Ok(response.json::<ItemsPage>().await?)
    }

    async fn get(&self, id: i64) -> RemoteResult<Item> {
        let request = self.client.get(self.item_url(id));
        let response = self.send(self.authorize(request, None)).await?;
        Ok(response.json::<Item>().await?)
    }

    async fn create(&self, draft: &ItemDraft, origin: Option<&str>) -> RemoteResult<Item> {
        let request = self.client.post(&self.items_url).json(draft);
        let response = self.send(self.authorize(request, origin)).await?;
        Ok(response.json::<Item>().await?)
    }

    async fn update(
        &self,
        id: i64,
        patch: &ItemPatch,
        origin: Option<&str>,
    ) -> RemoteResult<Item> {
        let request = self
            .client
            .put(self.item_url(id))
            .header(reqwest::header::ETAG, patch.version.to_string())
            .json(patch);
        let response = self.send(self.authorize(request, origin)).await?;
        Ok(response.json::<Item>().await?)
    }

    async fn delete(&self, id: i64, origin: Option<&str>) -> RemoteResult<()> {
        let request = self.client.delete(self.item_url(id));
        self.send(self.authorize(request, origin)).await?;
        Ok(())
    }
}
