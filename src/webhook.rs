//! HTTP listener for WhatsApp delivery-status callbacks.
//!
//! Raw payloads land in `webhook_{ts}.json`; every status is appended to
//! `status_log.txt` and `delivery_status.csv`. Appends are not locked, so
//! lines from concurrent callbacks may interleave.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::config::WebhookConfig;
use crate::output::{self, file_timestamp, OutputError};

pub const STATUS_LOG_FILE: &str = "status_log.txt";
pub const DELIVERY_CSV_FILE: &str = "delivery_status.csv";
const DELIVERY_CSV_COLUMNS: [&str; 6] = [
    "timestamp",
    "phone",
    "status",
    "message_id",
    "error_code",
    "error_title",
];

#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("Could not bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("Webhook server error: {0}")]
    Serve(std::io::Error),
    #[error(transparent)]
    Output(#[from] OutputError),
}

#[derive(Debug)]
pub struct WebhookState {
    pub verify_token: String,
    pub log_dir: PathBuf,
}

pub type SharedState = Arc<WebhookState>;

#[derive(Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// One entry of `entry[].changes[].value.statuses[]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryStatus {
    pub recipient: String,
    pub status: String,
    pub message_id: String,
    pub error_code: String,
    pub error_title: String,
}

fn text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn extract_statuses(payload: &Value) -> Vec<DeliveryStatus> {
    let list = |value: &Value, key: &str| value.get(key).and_then(Value::as_array).cloned().unwrap_or_default();

    list(payload, "entry")
        .iter()
        .flat_map(|entry| list(entry, "changes"))
        .filter_map(|change| change.get("value").cloned())
        .flat_map(|value| list(&value, "statuses"))
        .map(|status| {
            let first_error = &status["errors"][0];
            DeliveryStatus {
                recipient: text(&status["recipient_id"]),
                status: text(&status["status"]),
                message_id: text(&status["id"]),
                error_code: text(&first_error["code"]),
                error_title: text(&first_error["title"]),
            }
        })
        .collect()
}

/// One CSV line, quoted where needed.
fn csv_row<I>(fields: I) -> Result<Vec<u8>, OutputError>
where
    I: IntoIterator,
    I::Item: AsRef<[u8]>,
{
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(fields)?;
    writer
        .into_inner()
        .map_err(|e| OutputError::Io(e.into_error()))
}

impl DeliveryStatus {
    fn log_line(&self, timestamp: &str) -> String {
        format!(
            "{} | {} | {} | {}\n",
            timestamp, self.recipient, self.status, self.message_id
        )
    }

    fn csv_line(&self, timestamp: &str) -> Result<Vec<u8>, OutputError> {
        csv_row([
            timestamp,
            self.recipient.as_str(),
            self.status.as_str(),
            self.message_id.as_str(),
            self.error_code.as_str(),
            self.error_title.as_str(),
        ])
    }
}

async fn append(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path).await?;
    file.write_all(content).await
}

/// Writes the raw payload and appends its statuses to the ledgers. Returns
/// the number of statuses recorded.
pub async fn record_payload(log_dir: &Path, payload: &Value) -> Result<usize, OutputError> {
    let now = Utc::now();
    let timestamp = now.to_rfc3339_opts(SecondsFormat::Millis, true);

    let raw_path = log_dir.join(format!("webhook_{}.json", file_timestamp(now)));
    output::write_json(&raw_path, payload).await?;

    let statuses = extract_statuses(payload);
    let csv_path = log_dir.join(DELIVERY_CSV_FILE);
    for status in &statuses {
        info!(recipient = %status.recipient, status = %status.status, "Delivery status");
        append(
            &log_dir.join(STATUS_LOG_FILE),
            status.log_line(&timestamp).as_bytes(),
        )
        .await?;

        if !fs::try_exists(&csv_path).await? {
            append(&csv_path, &csv_row(DELIVERY_CSV_COLUMNS)?).await?;
        }
        append(&csv_path, &status.csv_line(&timestamp)?).await?;
    }
    Ok(statuses.len())
}

async fn verify(
    State(state): State<SharedState>,
    Query(params): Query<VerifyParams>,
) -> impl IntoResponse {
    let mode = params.mode.as_deref().unwrap_or("");
    let token = params.verify_token.as_deref().unwrap_or("");

    if mode == "subscribe" && token == state.verify_token {
        info!("Webhook verified");
        (StatusCode::OK, params.challenge.unwrap_or_default())
    } else {
        warn!("Webhook verification failed");
        (StatusCode::FORBIDDEN, "Forbidden".to_string())
    }
}

async fn receive(State(state): State<SharedState>, body: String) -> impl IntoResponse {
    let payload: Value = match serde_json::from_str(&body) {
        Ok(payload) => payload,
        Err(e) => {
            error!("Error processing webhook: {e}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Error");
        }
    };

    match record_payload(&state.log_dir, &payload).await {
        Ok(_) => (StatusCode::OK, "OK"),
        Err(e) => {
            error!("Error processing webhook: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Error")
        }
    }
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not found")
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/webhook", get(verify).post(receive).fallback(not_found))
        .fallback(not_found)
        .with_state(state)
}

pub async fn serve_on(listener: TcpListener, state: SharedState) -> Result<(), WebhookError> {
    fs::create_dir_all(&state.log_dir)
        .await
        .map_err(OutputError::from)?;
    axum::serve(listener, router(state))
        .await
        .map_err(WebhookError::Serve)
}

pub async fn serve(config: WebhookConfig) -> Result<(), WebhookError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| WebhookError::Bind { addr, source })?;
    info!(
        %addr,
        log_dir = %config.log_dir.display(),
        "Webhook server running; callback path is /webhook"
    );

    let state = Arc::new(WebhookState {
        verify_token: config.verify_token,
        log_dir: config.log_dir,
    });
    serve_on(listener, state).await
}
