use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::config::GraphConfig;
use crate::constants::{FB_BUC_RATE_LIMIT_CODES, FB_RATE_LIMIT_CODES};
use crate::rate_limit::Retryable;

#[derive(Error, Debug)]
pub enum FacebookApiError {
    #[error("No response received from Facebook API: {0}")]
    Transport(String),
    #[error("Facebook API error ({kind}, code {code}): {message}")]
    Api {
        message: String,
        kind: String,
        code: i64,
        subcode: Option<i64>,
        status: u16,
    },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Default, Deserialize)]
struct ErrorPayload {
    message: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    code: Option<i64>,
    error_subcode: Option<i64>,
}

impl FacebookApiError {
    fn from_payload(payload: &Value, status: u16) -> Self {
        let payload: ErrorPayload = serde_json::from_value(payload.clone()).unwrap_or_default();
        Self::Api {
            message: payload.message.unwrap_or_else(|| "unknown error".to_string()),
            kind: payload.kind.unwrap_or_default(),
            code: payload.code.unwrap_or_default(),
            subcode: payload.error_subcode,
            status,
        }
    }

    /// Throttling errors: HTTP 429, the app/user/page limits and the
    /// business-use-case limits of the Marketing API.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Self::Api { code, status, .. } => {
                *status == 429
                    || FB_RATE_LIMIT_CODES.contains(code)
                    || FB_BUC_RATE_LIMIT_CODES.contains(code)
            }
            _ => false,
        }
    }
}

impl Retryable for FacebookApiError {
    fn is_rate_limited(&self) -> bool {
        FacebookApiError::is_rate_limited(self)
    }
}

/// A single request/response exchange with the Graph API.
#[async_trait]
pub trait GraphApi: Send + Sync {
    /// Ad account the client acts on, without the `act_` prefix.
    fn account_id(&self) -> &str;

    async fn call(
        &self,
        endpoint: &str,
        method: Method,
        params: Value,
    ) -> Result<Value, FacebookApiError>;
}

pub struct FacebookAPI {
    client: Client,
    access_token: String,
    account_id: String,
    base_url: String,
}

impl FacebookAPI {
    pub fn new(config: GraphConfig) -> Self {
        Self {
            client: Client::new(),
            access_token: config.access_token,
            account_id: config.account_id,
            base_url: format!(
                "{}/{}",
                config.base_url.trim_end_matches('/'),
                config.api_version
            ),
        }
    }
}

/// Flattens request params into key/value pairs the way the Graph API
/// expects them: `fields` arrays comma-joined, strings as-is, everything
/// else (filters, time ranges, nested specs) JSON-encoded.
pub fn encode_params(params: &Value) -> Vec<(String, String)> {
    let Some(map) = params.as_object() else {
        return Vec::new();
    };

    map.iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| {
            let encoded = match value {
                Value::String(s) => s.clone(),
                Value::Array(items) if key == "fields" => items
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(","),
                other => other.to_string(),
            };
            (key.clone(), encoded)
        })
        .collect()
}

#[async_trait]
impl GraphApi for FacebookAPI {
    fn account_id(&self) -> &str {
        &self.account_id
    }

    async fn call(
        &self,
        endpoint: &str,
        method: Method,
        params: Value,
    ) -> Result<Value, FacebookApiError> {
        let url = format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'));
        debug!(endpoint, method = %method, params = %params, "Making API call");

        let mut pairs = encode_params(&params);
        pairs.push(("access_token".to_string(), self.access_token.clone()));

        let request = if method == Method::GET {
            self.client.get(&url).query(&pairs)
        } else {
            self.client.request(method.clone(), &url).form(&pairs)
        };

        let response = request.send().await.map_err(|e| {
            error!(endpoint, "No response received from Facebook API: {e}");
            FacebookApiError::Transport(e.to_string())
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| FacebookApiError::Transport(e.to_string()))?;

        let value: Value = serde_json::from_str(&body).map_err(|e| {
            FacebookApiError::InvalidResponse(format!("HTTP {status}: {e}"))
        })?;

        if let Some(payload) = value.get("error") {
            let err = FacebookApiError::from_payload(payload, status.as_u16());
            if let FacebookApiError::Api {
                message,
                kind,
                code,
                subcode,
                ..
            } = &err
            {
                error!(
                    endpoint,
                    %message,
                    %kind,
                    code,
                    subcode = ?subcode,
                    "Facebook API Error"
                );
            }
            return Err(err);
        }

        if !status.is_success() {
            return Err(FacebookApiError::InvalidResponse(format!(
                "HTTP {status} without an error payload"
            )));
        }

        if method == Method::GET && value["data"].as_array().is_some_and(|d| d.is_empty()) {
            warn!(endpoint, "No data found for the query");
        }

        debug!(endpoint, response = %value, "API Response");
        Ok(value)
    }
}
