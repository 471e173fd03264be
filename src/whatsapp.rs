use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, error};

use crate::config::WhatsAppConfig;
use crate::constants::{CONTENT_TYPE_HEADER, CONTENT_TYPE_JSON};

#[derive(Error, Debug)]
pub enum WhatsAppError {
    #[error("API request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("WhatsApp API error (code {code}): {message}")]
    Api { message: String, code: i64 },
    #[error("Failed to parse response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
    code: Option<i64>,
}

/// Sends approved message templates. Implemented by [`WhatsAppClient`] and by
/// fakes in tests.
#[async_trait]
pub trait TemplateSender: Send + Sync {
    async fn send_template(
        &self,
        to: &str,
        template: &str,
        language: &str,
        components: Vec<Value>,
    ) -> Result<Value, WhatsAppError>;
}

pub struct WhatsAppClient {
    client: Client,
    messages_url: String,
    access_token: String,
}

/// The Cloud API wants the number without a leading `+`.
fn clean_number(to: &str) -> &str {
    to.strip_prefix('+').unwrap_or(to)
}

impl WhatsAppClient {
    pub fn new(config: WhatsAppConfig) -> Self {
        Self {
            client: Client::new(),
            messages_url: format!(
                "{}/{}/{}/messages",
                config.base_url.trim_end_matches('/'),
                config.api_version,
                config.phone_number_id
            ),
            access_token: config.access_token,
        }
    }

    pub async fn send_text(&self, to: &str, text: &str) -> Result<Value, WhatsAppError> {
        let body = json!({
            "messaging_product": "whatsapp",
            "to": clean_number(to),
            "type": "text",
            "text": { "body": text }
        });
        self.send(body).await
    }

    async fn send(&self, body: Value) -> Result<Value, WhatsAppError> {
        debug!(to = %body["to"], kind = %body["type"], "Sending WhatsApp message");

        let response = self
            .client
            .post(&self.messages_url)
            .bearer_auth(&self.access_token)
            .header(CONTENT_TYPE_HEADER, CONTENT_TYPE_JSON)
            .json(&body)
            .send()
            .await?;

        let text = response.text().await?;
        let parsed: Value = serde_json::from_str(&text)
            .map_err(|_| WhatsAppError::InvalidResponse(text.clone()))?;

        if let Some(err) = parsed.get("error") {
            let err: ApiErrorBody = serde_json::from_value(err.clone()).unwrap_or_default();
            let message = err.message.unwrap_or_else(|| "unknown error".to_string());
            error!(code = err.code, "WhatsApp API Error: {message}");
            return Err(WhatsAppError::Api {
                message,
                code: err.code.unwrap_or_default(),
            });
        }

        debug!(response = %parsed, "WhatsApp response");
        Ok(parsed)
    }
}

#[async_trait]
impl TemplateSender for WhatsAppClient {
    async fn send_template(
        &self,
        to: &str,
        template: &str,
        language: &str,
        components: Vec<Value>,
    ) -> Result<Value, WhatsAppError> {
        let body = json!({
            "messaging_product": "whatsapp",
            "to": clean_number(to),
            "type": "template",
            "template": {
                "name": template,
                "language": { "code": language },
                "components": components
            }
        });
        self.send(body).await
    }
}
