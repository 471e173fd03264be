//! Pushes localized ad texts: builds a new creative from the ad's current one
//! with the texts swapped in, creates it and points the ad at it.

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use thiserror::Error;
use tracing::{error, info};

use crate::config::{LandingConfig, OutputConfig};
use crate::constants::{DEFAULT_LANGUAGE, FB_PUSH_AD_FIELDS};
use crate::details::numeric_campaign_id;
use crate::facebook::{FacebookApiError, GraphApi};
use crate::fetchers::normalize_creative;
use crate::manifest::Manifest;
use crate::models::CreativeText;
use crate::output::{self, file_timestamp, sanitize_name, OutputError};

static LANGUAGE_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"__([a-z]{2})(?:_|$)").expect("valid regex"));
static TRAILING_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)(?:__[a-z]{2})?$").expect("valid regex"));

#[derive(Error, Debug)]
pub enum PushError {
    #[error(transparent)]
    Api(#[from] FacebookApiError),
    #[error(transparent)]
    Output(#[from] OutputError),
    #[error("Could not find creative for ad {0}")]
    NoCreative(String),
    #[error("Creative is missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),
    #[error("Failed to create new creative: {0}")]
    CreationFailed(Value),
    #[error("Could not extract language from ad name: {0}")]
    NoLanguage(String),
    #[error("No texts found for language {0}")]
    NoTexts(String),
    #[error("No theme found in texts configuration")]
    NoTheme,
    #[error("Campaign {0} has no details on record; fetch its details first")]
    UnknownCampaign(String),
    #[error("No ads found in campaign details for {0}")]
    NoAds(String),
}

/// One text variant of a theme, as written in the texts file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextVariant {
    pub primary_text: String,
    pub headline: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Theme {
    /// Variants keyed by two-letter language code.
    pub content: BTreeMap<String, Vec<TextVariant>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TextsFile {
    pub themes: Vec<Theme>,
}

impl TextsFile {
    /// Only the first theme is pushed.
    pub fn first_theme(&self) -> Result<&Theme, PushError> {
        self.themes.first().ok_or(PushError::NoTheme)
    }
}

/// Two-letter language code from a `__xx` marker in an ad name.
pub fn infer_language(name: &str) -> Option<&str> {
    LANGUAGE_SUFFIX
        .captures(name)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Numeric id at the end of an ad name, before an optional language suffix.
pub fn trailing_campaign_id(name: &str) -> Option<&str> {
    TRAILING_ID
        .captures(name)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LandingUrls {
    pub website: String,
    pub display: String,
}

pub fn landing_urls(language: &str, ad_name: &str, landing: &LandingConfig) -> LandingUrls {
    let base = landing.base_url.as_str().trim_end_matches('/');
    let host_path = base.split_once("://").map_or(base, |(_, rest)| rest);

    let (page, display) = if language == landing.home_language {
        (format!("{base}/"), host_path.to_string())
    } else {
        (format!("{base}/{language}/"), format!("{host_path}/{language}/"))
    };

    let website = match trailing_campaign_id(ad_name) {
        Some(id) => format!("{page}?id={id}"),
        None => page,
    };
    LandingUrls { website, display }
}

fn labels(item: Option<&Value>) -> Option<&Value> {
    item.and_then(|i| i.get("adlabels"))
}

fn text_item(text: &str, labels: Option<&Value>) -> Value {
    let mut item = Map::new();
    item.insert("text".into(), json!(text));
    if let Some(labels) = labels.filter(|l| !l.is_null()) {
        item.insert("adlabels".into(), labels.clone());
    }
    Value::Object(item)
}

/// Body of the `adcreatives` request: the original creative with its texts
/// and link replaced. Labels of the first body, title and link are kept.
pub fn build_creative(
    original: &Value,
    texts: &[TextVariant],
    urls: &LandingUrls,
    now: DateTime<Utc>,
) -> Result<Value, PushError> {
    let spec = original
        .get("asset_feed_spec")
        .and_then(Value::as_object)
        .ok_or_else(|| PushError::MissingFields(vec!["asset_feed_spec".into()]))?;

    let first = |key: &str| spec.get(key).and_then(Value::as_array).and_then(|a| a.first());
    let (body, title, link) = (first("bodies"), first("titles"), first("link_urls"));
    let missing: Vec<String> = [("bodies", body), ("titles", title), ("link_urls", link)]
        .into_iter()
        .filter(|(_, item)| item.is_none())
        .map(|(key, _)| key.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(PushError::MissingFields(missing));
    }

    let mut feed = spec.clone();
    feed.insert(
        "bodies".into(),
        texts.iter().map(|t| text_item(&t.primary_text, labels(body))).collect(),
    );
    feed.insert(
        "titles".into(),
        texts.iter().map(|t| text_item(&t.headline, labels(title))).collect(),
    );
    feed.insert(
        "descriptions".into(),
        texts.iter().map(|t| text_item(&t.description, None)).collect(),
    );

    let mut link_url = Map::new();
    link_url.insert("website_url".into(), json!(urls.website));
    link_url.insert("display_url".into(), json!(urls.display));
    if let Some(l) = labels(link).filter(|l| !l.is_null()) {
        link_url.insert("adlabels".into(), l.clone());
    }
    feed.insert("link_urls".into(), json!([link_url]));
    feed.insert("ad_formats".into(), json!(["AUTOMATIC_FORMAT"]));

    let name = original
        .get("name")
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
        .unwrap_or("Creative");

    Ok(json!({
        "object_story_spec": original.get("object_story_spec").cloned().unwrap_or(Value::Null),
        "asset_feed_spec": feed,
        "object_type": original.get("object_type").cloned().unwrap_or(Value::Null),
        "name": format!("{name} - Updated {}", now.to_rfc3339_opts(SecondsFormat::Millis, true)),
    }))
}

/// Result of swapping an ad onto a new creative.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreativeUpdate {
    pub ad_id: String,
    pub ad_name: String,
    pub language: String,
    pub creative_id: String,
    pub previous_texts: CreativeText,
    pub api_response: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PushRecord<'a> {
    ad_id: &'a str,
    ad_name: &'a str,
    timestamp: &'a str,
    texts_file: &'a Path,
    language: &'a str,
    updated_texts: &'a [TextVariant],
    previous_texts: &'a CreativeText,
    api_response: &'a Value,
}

/// Per-ad outcome of a campaign push.
#[derive(Debug, Clone, PartialEq)]
pub struct AdPushResult {
    pub ad_id: String,
    pub ad_name: String,
    pub result: Result<PathBuf, String>,
}

impl AdPushResult {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

pub struct TextPusher<G> {
    api: Arc<G>,
    landing: LandingConfig,
    output: OutputConfig,
}

impl<G: GraphApi> TextPusher<G> {
    pub fn new(api: Arc<G>, landing: LandingConfig, output: OutputConfig) -> Self {
        Self {
            api,
            landing,
            output,
        }
    }

    /// Creates a creative carrying `texts` and assigns it to `ad_id`. The
    /// language comes from the ad name and falls back to English.
    pub async fn update_ad_creative(
        &self,
        ad_id: &str,
        texts: &[TextVariant],
    ) -> Result<CreativeUpdate, PushError> {
        let ad = self
            .api
            .call(
                &format!("/{ad_id}"),
                Method::GET,
                json!({ "fields": FB_PUSH_AD_FIELDS }),
            )
            .await?;

        let creative = ad
            .get("creative")
            .filter(|c| c.get("id").and_then(Value::as_str).is_some())
            .ok_or_else(|| PushError::NoCreative(ad_id.to_string()))?;
        let account_id = ad
            .get("account_id")
            .and_then(Value::as_str)
            .unwrap_or_else(|| self.api.account_id());
        let ad_name = ad.get("name").and_then(Value::as_str).unwrap_or_default();
        let language = infer_language(ad_name).unwrap_or(DEFAULT_LANGUAGE);

        let urls = landing_urls(language, ad_name, &self.landing);
        let body = build_creative(creative, texts, &urls, Utc::now())?;

        let created = self
            .api
            .call(&format!("/act_{account_id}/adcreatives"), Method::POST, body)
            .await?;
        let creative_id = created
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| PushError::CreationFailed(created.clone()))?
            .to_string();
        info!(ad_id, creative_id, language, "Created creative");

        let api_response = self
            .api
            .call(
                &format!("/{ad_id}"),
                Method::POST,
                json!({ "creative": { "creative_id": creative_id } }),
            )
            .await?;

        Ok(CreativeUpdate {
            ad_id: ad_id.to_string(),
            ad_name: ad_name.to_string(),
            language: language.to_string(),
            creative_id,
            previous_texts: normalize_creative(creative).text,
            api_response,
        })
    }

    /// Pushes the theme's texts for the ad's language and writes a record of
    /// the update.
    pub async fn push_ad(
        &self,
        ad_id: &str,
        ad_name: &str,
        theme: &Theme,
        texts_file: &Path,
    ) -> Result<PathBuf, PushError> {
        let language =
            infer_language(ad_name).ok_or_else(|| PushError::NoLanguage(ad_name.to_string()))?;
        let texts = theme
            .content
            .get(language)
            .ok_or_else(|| PushError::NoTexts(language.to_string()))?;

        let update = self.update_ad_creative(ad_id, texts).await?;

        let timestamp = file_timestamp(Utc::now());
        let path = self.output.dir.join(format!(
            "text_push_{}___{}___{}.json",
            ad_id,
            sanitize_name(ad_name),
            timestamp
        ));
        let record = PushRecord {
            ad_id,
            ad_name,
            timestamp: &timestamp,
            texts_file,
            language,
            updated_texts: texts,
            previous_texts: &update.previous_texts,
            api_response: &update.api_response,
        };
        output::write_json(&path, &record).await?;
        info!(ad_id, path = %path.display(), "Text update completed");
        Ok(path)
    }

    /// Pushes texts to every ad recorded for the campaign, one ad at a time.
    /// A failing ad does not stop the others.
    pub async fn push_campaign(
        &self,
        campaign_id: &str,
        texts_file: &Path,
    ) -> Result<Vec<AdPushResult>, PushError> {
        let campaign_id = numeric_campaign_id(campaign_id);
        let texts: TextsFile = output::read_json(texts_file).await?;
        let theme = texts.first_theme()?;

        let manifest = Manifest::load(&self.output.dir).await?;
        let entry = manifest
            .campaign(campaign_id)
            .ok_or_else(|| PushError::UnknownCampaign(campaign_id.to_string()))?;
        if entry.ads.is_empty() {
            return Err(PushError::NoAds(campaign_id.to_string()));
        }

        let mut results = Vec::with_capacity(entry.ads.len());
        for ad in &entry.ads {
            info!(ad_id = %ad.id, ad = %ad.name, "Updating texts for ad");
            let result = self
                .push_ad(&ad.id, &ad.name, theme, texts_file)
                .await
                .map_err(|e| {
                    error!(ad_id = %ad.id, "Text update failed: {e}");
                    e.to_string()
                });
            results.push(AdPushResult {
                ad_id: ad.id.clone(),
                ad_name: ad.name.clone(),
                result,
            });
        }
        Ok(results)
    }
}
