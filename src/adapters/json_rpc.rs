//! Minimal JSON-RPC 2.0 transport shared by the EVM and Bitcoin Core adapters.

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, instrument};

use crate::domain::Chain;
use crate::error::{AdapterError, AdapterErrorKind, FlowError, Result};

/// Build the HTTP client every chain adapter uses
pub(crate) fn http_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .user_agent(concat!("exflow/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| FlowError::Internal(format!("failed to build HTTP client: {}", e)))
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<Value>,
}

pub struct JsonRpcTransport {
    http: Client,
    url: String,
    basic_auth: Option<(String, String)>,
    chain: Chain,
    next_id: AtomicU64,
}

impl JsonRpcTransport {
    pub fn new(chain: Chain, url: &str, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            http: http_client(timeout_secs)?,
            url: url.to_string(),
            basic_auth: None,
            chain,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn with_basic_auth(mut self, user: &str, pass: &str) -> Self {
        if !user.is_empty() {
            self.basic_auth = Some((user.to_string(), pass.to_string()));
        }
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Issue one call and return the raw `result` member (may be `null`)
    #[instrument(skip(self, params), fields(chain = %self.chain))]
    pub async fn call_raw(&self, method: &str, params: Value) -> std::result::Result<Value, AdapterError> {
        let body = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let mut request = self.http.post(&self.url).json(&body);
        if let Some((user, pass)) = &self.basic_auth {
            request = request.basic_auth(user, Some(pass));
        }

        let response = request
            .send()
            .await
            .map_err(|e| AdapterError::transport(self.chain, method, e))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AdapterError::transport(self.chain, method, e))?;

        // Bitcoin Core answers RPC errors with HTTP 500 and a JSON error body
        let parsed: std::result::Result<RpcResponse, _> = serde_json::from_str(&text);
        match parsed {
            Ok(RpcResponse {
                error: Some(err), ..
            }) if !err.is_null() => Err(AdapterError::new(
                self.chain,
                method,
                AdapterErrorKind::Rpc(err.to_string()),
            )),
            _ if !status.is_success() => Err(AdapterError::new(
                self.chain,
                method,
                AdapterErrorKind::Status {
                    status: status.as_u16(),
                    body: truncate(&text, 256),
                },
            )),
            Ok(resp) => {
                debug!("{} ok", method);
                Ok(resp.result)
            }
            Err(e) => Err(AdapterError::decode(self.chain, method, e)),
        }
    }

    /// Issue one call and decode a non-null `result`
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> std::result::Result<T, AdapterError> {
        let result = self.call_raw(method, params).await?;
        if result.is_null() {
            return Err(AdapterError::missing(self.chain, method, "null result"));
        }
        serde_json::from_value(result).map_err(|e| AdapterError::decode(self.chain, method, e))
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}
