//! Authenticated request execution.
//!
//! Every request gets the bearer token and the `app` identifier. Read
//! requests retry connection failures with backoff; writes go out once. A
//! 401 response triggers one token refresh and one resend.

use reqwest::{Method, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::auth::TokenManager;
use crate::error::{AuthError, BackendError, ClioResult};
use crate::retry::{is_retryable, RetryConfig};
use crate::url::with_app_identifier;

/// Whether a request may be retried on connection failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestKind {
    Read,
    Write,
}

pub(crate) struct Transport {
    http: reqwest::Client,
    tokens: TokenManager,
    app_id: String,
    retry: RetryConfig,
}

impl Transport {
    pub fn new(http: reqwest::Client, tokens: TokenManager, app_id: &str, retry: RetryConfig) -> Self {
        Self {
            http,
            tokens,
            app_id: app_id.to_string(),
            retry,
        }
    }

    pub async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
        kind: RequestKind,
    ) -> ClioResult<Response> {
        let url = with_app_identifier(url, &self.app_id);
        let mut token = self.tokens.bearer(&self.http).await?;
        let mut refreshed = false;
        let mut attempt = 0u32;
        let mut delay = self.retry.initial_delay;

        loop {
            let mut request = self
                .http
                .request(method.clone(), url.clone())
                .bearer_auth(&token);
            if let Some(body) = body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(response) if response.status() == StatusCode::UNAUTHORIZED => {
                    if refreshed {
                        return Err(AuthError::Rejected.into());
                    }
                    tracing::info!(url = %url, "Token rejected, refreshing and retrying once");
                    token = self.tokens.refresh(&self.http, &token).await?;
                    refreshed = true;
                }
                Ok(response) => return ensure_success(response).await,
                Err(e)
                    if kind == RequestKind::Read
                        && attempt < self.retry.max_retries
                        && is_retryable(&e) =>
                {
                    attempt += 1;
                    tracing::warn!(
                        url = %url,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Request failed, retrying",
                    );
                    tokio::time::sleep(delay).await;
                    delay = self.retry.delay_after(delay);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: Url) -> ClioResult<T> {
        let response = self.send(Method::GET, url, None, RequestKind::Read).await?;
        parse_json(response).await
    }

    /// POST to a query endpoint. Queries are reads and may be retried.
    pub async fn query_json<T: DeserializeOwned>(&self, url: Url, body: &Value) -> ClioResult<T> {
        let response = self
            .send(Method::POST, url, Some(body), RequestKind::Read)
            .await?;
        parse_json(response).await
    }

    /// GET carrying a JSON body, as DVID's bulk label endpoints expect.
    pub async fn get_json_with_body<T: DeserializeOwned>(
        &self,
        url: Url,
        body: &Value,
    ) -> ClioResult<T> {
        let response = self
            .send(Method::GET, url, Some(body), RequestKind::Read)
            .await?;
        parse_json(response).await
    }

    pub async fn post_write(&self, url: Url, body: &Value) -> ClioResult<()> {
        self.send(Method::POST, url, Some(body), RequestKind::Write)
            .await?;
        Ok(())
    }
}

/// Turn a non-2xx response into [`BackendError::Status`].
async fn ensure_success(response: Response) -> ClioResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().to_string();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string());
    Err(BackendError::Status {
        status: status.as_u16(),
        url,
        body,
    }
    .into())
}

async fn parse_json<T: DeserializeOwned>(response: Response) -> ClioResult<T> {
    let url = response.url().to_string();
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| {
        BackendError::Decode {
            url,
            reason: e.to_string(),
        }
        .into()
    })
}
