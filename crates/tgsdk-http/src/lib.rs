//! HTTP transport adapter (Telegram Bot API).
//!
//! Implements the `tgsdk-core` Transport port over `reqwest`. The only
//! remote methods this SDK touches are `getUpdates` and `deleteWebhook`,
//! both in service of the polling engine.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::Value;

use tgsdk_core::{config::Config, errors::Error, transport::Transport, Result};

/// Extra headroom on the HTTP timeout so the client never cuts a healthy
/// long poll short.
const HTTP_MARGIN_SECS: u64 = 5;

/// Bot API response envelope.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i64>,
}

/// `Transport` over the Bot API.
///
/// No retry wrapper on purpose: the dispatch engine treats a failed poll as
/// fatal, and retrying here would only mask that policy.
pub struct HttpTransport {
    client: Client,
    token: String,
    api_base: String,
}

impl HttpTransport {
    pub fn new(cfg: &Config) -> Result<Self> {
        let timeout = Duration::from_secs(cfg.poll_timeout.max(0) as u64 + HTTP_MARGIN_SECS);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Transport(format!("http client: {e}")))?;
        Ok(Self {
            client,
            token: cfg.token.clone(),
            api_base: cfg.api_base.clone(),
        })
    }

    fn url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.api_base.trim_end_matches('/'),
            self.token,
            method
        )
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, payload: Value) -> Result<T> {
        let res = self
            .client
            .post(self.url(method))
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("{method} request: {e}")))?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(Error::Transport(format!("{method} {status}: {body}")));
        }

        let body: ApiResponse<T> = res
            .json()
            .await
            .map_err(|e| Error::Transport(format!("decode {method} response: {e}")))?;
        if !body.ok {
            return Err(Error::Transport(format!(
                "{method} failed ({}): {}",
                body.error_code.unwrap_or_default(),
                body.description
                    .unwrap_or_else(|| "unknown error".to_string())
            )));
        }
        body.result
            .ok_or_else(|| Error::Transport(format!("{method}: missing result")))
    }
}

fn fetch_payload(offset: Option<i64>, limit: i64, timeout: i64) -> Value {
    let mut payload = serde_json::json!({ "limit": limit, "timeout": timeout });
    if let Some(offset) = offset {
        payload["offset"] = offset.into();
    }
    payload
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, offset: Option<i64>, limit: i64, timeout: i64) -> Result<Vec<Value>> {
        self.call("getUpdates", fetch_payload(offset, limit, timeout))
            .await
    }

    async fn advance(&self, offset: i64) -> Result<()> {
        let _: Vec<Value> = self
            .call("getUpdates", fetch_payload(Some(offset), 1, 0))
            .await?;
        Ok(())
    }

    async fn remove_webhook(&self) -> Result<()> {
        let _: Value = self.call("deleteWebhook", serde_json::json!({})).await?;
        Ok(())
    }
}
