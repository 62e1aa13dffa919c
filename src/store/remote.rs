//! Realtime-database REST adapter.
//!
//! Maps the [`Store`] capability onto `{base}/{path}.json`:
//! GET reads, PUT replaces, PATCH on the root applies a multi-path update,
//! DELETE removes. Conditional writes use `X-Firebase-ETag` on read and
//! `if-match` on write; a `412` means the node changed underneath us.

use std::collections::BTreeMap;
use std::time::Duration;

use futures_util::future::BoxFuture;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use tracing::debug;

use super::{Etag, Store, StoreError, Versioned};

/// Remote store configuration.
#[derive(Clone)]
pub struct RemoteStoreConfig {
    /// Database base URL (e.g. `https://project.firebaseio.com`).
    pub base_url: String,
    /// Database secret or access token, sent as the `auth` query parameter.
    pub auth: Option<String>,
    /// Bound on every request.
    pub timeout: Duration,
}

impl std::fmt::Debug for RemoteStoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStoreConfig")
            .field("base_url", &self.base_url)
            .field("auth", &self.auth.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RemoteStoreConfig {
    /// Read `STORE_URL` / `STORE_AUTH`. Returns `None` when no URL is set.
    pub fn from_env(timeout: Duration) -> Option<Self> {
        let base_url = std::env::var("STORE_URL").ok().filter(|v| !v.is_empty())?;
        Some(Self {
            base_url,
            auth: std::env::var("STORE_AUTH").ok().filter(|v| !v.is_empty()),
            timeout,
        })
    }
}

/// Store backed by a realtime-database REST endpoint.
pub struct RemoteStore {
    config: RemoteStoreConfig,
    client: Client,
}

fn transport(err: reqwest::Error) -> StoreError {
    if err.is_timeout() {
        StoreError::Timeout
    } else {
        StoreError::Transport(err.to_string())
    }
}

async fn check(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Rejected {
        status: status.as_u16(),
        body,
    })
}

async fn body_json(response: Response) -> Result<Option<Value>, StoreError> {
    let value: Value = response.json().await.map_err(transport)?;
    Ok((!value.is_null()).then_some(value))
}

impl RemoteStore {
    /// Create a store client.
    pub fn new(config: RemoteStoreConfig) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(transport)?;
        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}.json",
            self.config.base_url.trim_end_matches('/'),
            path.trim_matches('/')
        )
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.auth {
            Some(auth) => request.query(&[("auth", auth)]),
            None => request,
        }
    }
}

impl Store for RemoteStore {
    fn get<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Option<Value>, StoreError>> {
        Box::pin(async move {
            let response = self
                .authed(self.client.get(self.url(path)))
                .send()
                .await
                .map_err(transport)?;
            body_json(check(response).await?).await
        })
    }

    fn get_versioned<'a>(
        &'a self,
        path: &'a str,
    ) -> BoxFuture<'a, Result<Versioned<Value>, StoreError>> {
        Box::pin(async move {
            let response = self
                .authed(self.client.get(self.url(path)))
                .header("X-Firebase-ETag", "true")
                .send()
                .await
                .map_err(transport)?;
            let response = check(response).await?;
            let etag = response
                .headers()
                .get(reqwest::header::ETAG)
                .and_then(|v| v.to_str().ok())
                .map(|v| Etag(v.to_string()))
                .ok_or_else(|| StoreError::Malformed {
                    path: path.to_string(),
                    reason: "response carried no ETag".to_string(),
                })?;
            let value = body_json(response).await?;
            Ok(Versioned { value, etag })
        })
    }

    fn set<'a>(&'a self, path: &'a str, value: Value) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let request = if value.is_null() {
                self.client.delete(self.url(path))
            } else {
                self.client.put(self.url(path)).json(&value)
            };
            let response = self.authed(request).send().await.map_err(transport)?;
            check(response).await?;
            Ok(())
        })
    }

    fn set_if<'a>(
        &'a self,
        path: &'a str,
        value: Value,
        expected: &'a Etag,
    ) -> BoxFuture<'a, Result<bool, StoreError>> {
        Box::pin(async move {
            let response = self
                .authed(self.client.put(self.url(path)))
                .header("X-Firebase-ETag", "true")
                .header(reqwest::header::IF_MATCH, expected.0.as_str())
                .json(&value)
                .send()
                .await
                .map_err(transport)?;
            if response.status() == StatusCode::PRECONDITION_FAILED {
                debug!(path, "conditional write lost the race");
                return Ok(false);
            }
            check(response).await?;
            Ok(true)
        })
    }

    fn update<'a>(
        &'a self,
        updates: BTreeMap<String, Value>,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            if updates.is_empty() {
                return Ok(());
            }
            let body: serde_json::Map<String, Value> = updates
                .into_iter()
                .map(|(path, value)| (path.trim_matches('/').to_string(), value))
                .collect();
            let response = self
                .authed(self.client.patch(self.url("")))
                .json(&body)
                .send()
                .await
                .map_err(transport)?;
            check(response).await?;
            Ok(())
        })
    }
}
