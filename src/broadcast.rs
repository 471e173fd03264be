//! Sends one WhatsApp template to every number of a phone list.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::{fs, time};
use tracing::{info, warn};

use crate::config::OutputConfig;
use crate::constants::{BROADCAST_DELAY_MS, BROADCAST_DIR};
use crate::output::{self, file_timestamp, sanitize_name, OutputError};
use crate::whatsapp::TemplateSender;

#[derive(Error, Debug)]
pub enum BroadcastError {
    #[error("Could not read phone list {path}: {source}")]
    PhoneList {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Output(#[from] OutputError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recipient {
    pub number: String,
    pub language: Option<String>,
    pub template: Option<String>,
    pub name: Option<String>,
}

impl Recipient {
    fn bare(number: &str) -> Self {
        Self {
            number: number.to_string(),
            language: None,
            template: None,
            name: None,
        }
    }
}

/// Parses either a CSV with a header line mentioning `phone` or a plain list
/// with one number per line. Blank lines and rows without a number are
/// skipped.
pub fn parse_phone_list(content: &str) -> Vec<Recipient> {
    let has_header = content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .is_some_and(|first| first.contains("phone"));

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(has_header)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let (phone_idx, lang_idx, msg_idx, name_idx) = if has_header {
        let header: Vec<String> = match reader.headers() {
            Ok(header) => header.iter().map(str::to_lowercase).collect(),
            Err(e) => {
                warn!("Could not read phone list header: {e}");
                return Vec::new();
            }
        };
        let column = |name: &str| header.iter().position(|h| h == name);
        (
            header.iter().position(|h| h.contains("phone")),
            column("language"),
            column("message"),
            column("name_sponsor"),
        )
    } else {
        (Some(0), None, None, None)
    };

    reader
        .records()
        .filter_map(|row| {
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    warn!("Skipping unreadable row: {e}");
                    return None;
                }
            };
            let get = |idx: Option<usize>| {
                idx.and_then(|i| row.get(i))
                    .filter(|v| !v.is_empty())
                    .map(str::to_string)
            };
            let Some(number) = get(phone_idx) else {
                warn!(row = ?row, "Skipping row without a phone number");
                return None;
            };
            Some(Recipient {
                number,
                language: get(lang_idx),
                template: get(msg_idx),
                name: get(name_idx),
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivered {
    pub phone: String,
    pub template: String,
    pub language: String,
    pub name: Option<String>,
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Failed {
    pub phone: String,
    pub template: String,
    pub error: String,
}

/// End-of-run summary, also written to disk.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastReport {
    pub success: Vec<Delivered>,
    pub failed: Vec<Failed>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

pub struct Broadcaster<S> {
    sender: Arc<S>,
    delay: Duration,
    output: OutputConfig,
}

impl<S: TemplateSender> Broadcaster<S> {
    pub fn new(sender: Arc<S>, output: OutputConfig) -> Self {
        Self {
            sender,
            delay: Duration::from_millis(BROADCAST_DELAY_MS),
            output,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Loads `phones_file`, sends to everyone on it and saves the report.
    pub async fn run(
        &self,
        phones_file: &Path,
        template: &str,
        language: &str,
    ) -> Result<(BroadcastReport, PathBuf), BroadcastError> {
        info!(phones = %phones_file.display(), template, language, "Broadcast starting");
        let content = fs::read_to_string(phones_file)
            .await
            .map_err(|source| BroadcastError::PhoneList {
                path: phones_file.to_path_buf(),
                source,
            })?;
        let recipients = parse_phone_list(&content);
        info!(count = recipients.len(), "Loaded phone numbers");

        let report = self.broadcast(&recipients, template, language).await;
        let path = self.save(&report, template).await?;

        info!(
            success = report.success.len(),
            failed = report.failed.len(),
            "Broadcast complete"
        );
        Ok((report, path))
    }

    /// Sends sequentially, pausing between sends but not after the last one.
    /// A failed send is recorded and the run moves on.
    pub async fn broadcast(
        &self,
        recipients: &[Recipient],
        template: &str,
        language: &str,
    ) -> BroadcastReport {
        let start_time = Utc::now();
        let mut success = Vec::new();
        let mut failed = Vec::new();

        for (i, recipient) in recipients.iter().enumerate() {
            let use_template = recipient.template.as_deref().unwrap_or(template);
            let use_language = recipient.language.as_deref().unwrap_or(language);
            info!(
                progress = format_args!("{}/{}", i + 1, recipients.len()),
                phone = %recipient.number,
                template = use_template,
                language = use_language,
                "Sending"
            );

            match self
                .sender
                .send_template(&recipient.number, use_template, use_language, Vec::new())
                .await
            {
                Ok(response) => {
                    let message_id = response["messages"][0]["id"].as_str().map(str::to_string);
                    info!(message_id = ?message_id, "Sent");
                    success.push(Delivered {
                        phone: recipient.number.clone(),
                        template: use_template.to_string(),
                        language: use_language.to_string(),
                        name: recipient.name.clone(),
                        message_id,
                    });
                }
                Err(e) => {
                    warn!(phone = %recipient.number, "Failed: {e}");
                    failed.push(Failed {
                        phone: recipient.number.clone(),
                        template: use_template.to_string(),
                        error: e.to_string(),
                    });
                }
            }

            if i + 1 < recipients.len() {
                time::sleep(self.delay).await;
            }
        }

        BroadcastReport {
            success,
            failed,
            start_time,
            end_time: Utc::now(),
        }
    }

    async fn save(&self, report: &BroadcastReport, template: &str) -> Result<PathBuf, OutputError> {
        let path = self.output.dir.join(BROADCAST_DIR).join(format!(
            "broadcast_{}_{}.json",
            sanitize_name(template),
            file_timestamp(Utc::now())
        ));
        output::write_json(&path, report).await?;
        info!(path = %path.display(), "Results saved");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::whatsapp::WhatsAppError;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeSender {
        sent: Mutex<Vec<(String, String, String)>>,
        failing: Option<&'static str>,
    }

    #[async_trait]
    impl TemplateSender for FakeSender {
        async fn send_template(
            &self,
            to: &str,
            template: &str,
            language: &str,
            _components: Vec<Value>,
        ) -> Result<Value, WhatsAppError> {
            self.sent
                .lock()
                .unwrap()
                .push((to.to_string(), template.to_string(), language.to_string()));
            if self.failing == Some(to) {
                return Err(WhatsAppError::Api {
                    message: "Recipient phone number not in allowed list".into(),
                    code: 131030,
                });
            }
            Ok(json!({"messages": [{"id": format!("wamid.{to}")}]}))
        }
    }

    #[test]
    fn csv_with_header() {
        let recipients = parse_phone_list("phone_number,language\n+420777111222,cs\n+49151000,de\n");

        assert_eq!(recipients.len(), 2);
        assert_eq!(recipients[0].number, "+420777111222");
        assert_eq!(recipients[0].language.as_deref(), Some("cs"));
        assert_eq!(recipients[1].language.as_deref(), Some("de"));
        assert!(recipients.iter().all(|r| r.template.is_none() && r.name.is_none()));
    }

    #[test]
    fn plain_list() {
        let recipients = parse_phone_list("+420777111222\n\n  +420777333444  \n+420777555666");

        assert_eq!(recipients.len(), 3);
        assert_eq!(recipients[1], Recipient::bare("+420777333444"));
    }

    #[test]
    fn csv_with_all_columns() {
        let recipients = parse_phone_list(
            "phone,Language,Message,Name_Sponsor\n420777,cs,winter_cs,Jana\n420888,,,\n",
        );

        assert_eq!(recipients[0].template.as_deref(), Some("winter_cs"));
        assert_eq!(recipients[0].name.as_deref(), Some("Jana"));
        assert_eq!(recipients[1], Recipient::bare("420888"));
    }

    #[test]
    fn quoted_fields_keep_their_commas() {
        let recipients =
            parse_phone_list("phone,name_sponsor,language\n420777,\"Novak, Jana\",cs\n");

        assert_eq!(recipients.len(), 1);
        assert_eq!(recipients[0].number, "420777");
        assert_eq!(recipients[0].name.as_deref(), Some("Novak, Jana"));
        assert_eq!(recipients[0].language.as_deref(), Some("cs"));
    }

    #[test]
    fn short_rows_and_missing_numbers() {
        let recipients = parse_phone_list("phone,language,message\n420777\n,cs,promo\n420888,de\n");

        assert_eq!(recipients.len(), 2);
        assert_eq!(recipients[0], Recipient::bare("420777"));
        assert_eq!(recipients[1].language.as_deref(), Some("de"));
    }

    #[tokio::test(start_paused = true)]
    async fn failures_do_not_stop_the_broadcast() {
        let sender = Arc::new(FakeSender {
            failing: Some("420002"),
            ..FakeSender::default()
        });
        let dir = tempfile::tempdir().unwrap();
        let broadcaster = Broadcaster::new(sender.clone(), OutputConfig::new(dir.path()))
            .with_delay(Duration::from_secs(1));
        let recipients = parse_phone_list("phone,message\n420001,\n420002,\n420003,spring_promo\n");

        let started = time::Instant::now();
        let report = broadcaster.broadcast(&recipients, "winter_promo", "en").await;

        assert_eq!(started.elapsed(), Duration::from_secs(2));
        assert_eq!(report.success.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].phone, "420002");
        assert_eq!(report.success[1].template, "spring_promo");
        assert_eq!(report.success[0].message_id.as_deref(), Some("wamid.420001"));
        assert_eq!(sender.sent.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn run_saves_report() {
        let dir = tempfile::tempdir().unwrap();
        let phones = dir.path().join("phones.txt");
        tokio::fs::write(&phones, "+420777111222\n").await.unwrap();

        let broadcaster = Broadcaster::new(Arc::new(FakeSender::default()), OutputConfig::new(dir.path()));
        let (report, path) = broadcaster.run(&phones, "winter_promo", "cs").await.unwrap();

        assert_eq!(report.success[0].language, "cs");
        assert!(path.starts_with(dir.path().join(BROADCAST_DIR)));
        let saved: Value = output::read_json(&path).await.unwrap();
        assert_eq!(saved["success"][0]["phone"], "+420777111222");
        assert!(saved.get("startTime").is_some());
    }

    #[tokio::test]
    async fn template_cannot_escape_the_report_dir() {
        let dir = tempfile::tempdir().unwrap();
        let phones = dir.path().join("phones.txt");
        tokio::fs::write(&phones, "420777\n").await.unwrap();

        let broadcaster = Broadcaster::new(Arc::new(FakeSender::default()), OutputConfig::new(dir.path()));
        let (_, path) = broadcaster.run(&phones, "../../promo", "en").await.unwrap();

        assert_eq!(path.parent(), Some(dir.path().join(BROADCAST_DIR).as_path()));
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("broadcast_______promo_"));
    }

    #[tokio::test]
    async fn missing_phone_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let broadcaster = Broadcaster::new(Arc::new(FakeSender::default()), OutputConfig::new(dir.path()));

        let err = broadcaster
            .run(&dir.path().join("nope.csv"), "t", "en")
            .await
            .unwrap_err();
        assert!(matches!(err, BroadcastError::PhoneList { .. }));
    }
}
