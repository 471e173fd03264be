//! Full structure of one campaign: the campaign itself, its ad sets with
//! targeting and budget, and every ad with its normalized creative.

use chrono::Utc;
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::OutputConfig;
use crate::facebook::{FacebookApiError, GraphApi};
use crate::fetchers::{missing_fields, AdFetcher, AdSetFetcher, CampaignFetcher, MISSING_FIELDS_KEY};
use crate::manifest::{self, AdEntry};
use crate::models::AgeRange;
use crate::output::{self, file_timestamp, OutputError};

const ERROR_KEY: &str = "_error";
const REQUIRED_CAMPAIGN_FIELDS: &[&str] = &["id", "name", "status", "objective"];

static NUMERIC_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("valid regex"));

#[derive(Error, Debug)]
pub enum DetailsError {
    #[error(transparent)]
    Api(#[from] FacebookApiError),
    #[error(transparent)]
    Output(#[from] OutputError),
}

/// Accepts `123`, `act_123` or a pasted URL fragment and keeps the first run
/// of digits.
pub fn numeric_campaign_id(input: &str) -> &str {
    NUMERIC_ID
        .find(input)
        .map(|m| m.as_str())
        .unwrap_or(input)
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CampaignStructure {
    pub campaign: Value,
    pub ad_sets: Vec<Value>,
    pub ads: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetailsReport {
    pub structure: CampaignStructure,
    pub details_path: PathBuf,
    pub summary_path: PathBuf,
}

fn field(value: &Value, key: &str) -> Value {
    value.get(key).cloned().unwrap_or(Value::Null)
}

fn with_fields(mut base: Value, extra: Vec<(&str, Value)>) -> Value {
    if let Some(map) = base.as_object_mut() {
        for (key, value) in extra {
            map.insert(key.to_string(), value);
        }
    }
    base
}

fn missing_list(value: &Value) -> Vec<Value> {
    value
        .get(MISSING_FIELDS_KEY)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

pub struct DetailsFetcher<G> {
    campaigns: CampaignFetcher<G>,
    ad_sets: AdSetFetcher<G>,
    ads: AdFetcher<G>,
    output: OutputConfig,
}

impl<G: GraphApi> DetailsFetcher<G> {
    pub fn new(api: Arc<G>, output: OutputConfig) -> Self {
        Self {
            campaigns: CampaignFetcher::new(api.clone()),
            ad_sets: AdSetFetcher::new(api.clone()),
            ads: AdFetcher::new(api),
            output,
        }
    }

    /// Fetches the campaign structure and writes the details and summary
    /// files. Fails only when the campaign itself cannot be read.
    pub async fn fetch_all(&self, campaign_id: &str) -> Result<DetailsReport, DetailsError> {
        let campaign_id = numeric_campaign_id(campaign_id);
        info!(campaign_id, "Starting detailed fetch");

        let structure = self.fetch_structure(campaign_id).await?;

        let stem = format!("campaign_{}_{}", campaign_id, file_timestamp(Utc::now()));
        let details_path = self.output.dir.join(format!("{stem}_details.json"));
        let summary_path = self.output.dir.join(format!("{stem}_summary.json"));

        output::write_json(&details_path, &structure).await?;
        output::write_json(&summary_path, &summarize(&structure)).await?;
        info!(
            details = %details_path.display(),
            summary = %summary_path.display(),
            "Files saved"
        );

        let name = structure.campaign["name"].as_str().unwrap_or_default().to_string();
        let ads: Vec<AdEntry> = structure
            .ads
            .iter()
            .filter_map(|ad| {
                Some(AdEntry {
                    id: ad["id"].as_str()?.to_string(),
                    name: ad["name"].as_str().unwrap_or_default().to_string(),
                })
            })
            .collect();
        let path = details_path.clone();
        if let Err(e) = manifest::update(&self.output.dir, |m| {
            m.record_details(campaign_id, &name, path, ads)
        })
        .await
        {
            warn!("Could not update manifest: {e}");
        }

        Ok(DetailsReport {
            structure,
            details_path,
            summary_path,
        })
    }

    async fn fetch_structure(&self, campaign_id: &str) -> Result<CampaignStructure, DetailsError> {
        let campaign = self.fetch_campaign(campaign_id).await?;
        info!(name = %campaign["name"].as_str().unwrap_or_default(), "Campaign basic info retrieved");

        let ad_sets = self.ad_sets.fetch_ad_sets(campaign_id).await?;
        info!(count = ad_sets.len(), "Found ad sets");

        let mut structure = CampaignStructure {
            campaign,
            ad_sets: Vec::with_capacity(ad_sets.len()),
            ads: Vec::new(),
        };
        for ad_set in ad_sets {
            let processed = self.process_ad_set(ad_set).await;
            if let Some(ads) = processed.get("ads").and_then(Value::as_array) {
                structure.ads.extend(ads.iter().cloned());
            }
            structure.ad_sets.push(processed);
        }
        Ok(structure)
    }

    async fn fetch_campaign(&self, campaign_id: &str) -> Result<Value, DetailsError> {
        let (basic, budget, schedule, insights) = tokio::join!(
            self.campaigns.fetch_basic(campaign_id),
            self.campaigns.fetch_budget(campaign_id),
            self.campaigns.fetch_schedule(campaign_id),
            self.campaigns.fetch_lifetime_insights(campaign_id),
        );
        let basic = basic?;

        let mut details = Map::new();
        for key in ["id", "name", "objective", "status", "special_ad_categories"] {
            details.insert(key.into(), field(&basic, key));
        }
        for key in ["daily_budget", "lifetime_budget", "budget_remaining", "spend_cap"] {
            details.insert(key.into(), field(&budget, key));
        }
        for key in ["start_time", "stop_time", "updated_time", "created_time"] {
            details.insert(key.into(), field(&schedule, key));
        }
        details.insert("insights".into(), insights);

        let mut details = Value::Object(details);
        let missing = missing_fields(&details, REQUIRED_CAMPAIGN_FIELDS);
        if !missing.is_empty() {
            warn!(campaign_id, missing = ?missing, "Campaign is missing required fields");
        }
        details[MISSING_FIELDS_KEY] = json!(missing);
        Ok(details)
    }

    async fn process_ad_set(&self, ad_set: Value) -> Value {
        let id = ad_set["id"].as_str().unwrap_or_default().to_string();
        info!(ad_set = %ad_set["name"].as_str().unwrap_or_default(), id, "Processing ad set");

        let (targeting, schedule) = tokio::join!(
            self.ad_sets.fetch_targeting(&id),
            self.ad_sets.fetch_schedule_and_budget(&id),
        );
        let result = async {
            let (targeting, schedule) = (targeting?, schedule?);
            let ads = self.ads.fetch_ads(&id).await?;
            Ok::<_, FacebookApiError>((targeting, schedule, ads))
        }
        .await;

        match result {
            Ok((targeting, schedule, ads)) => {
                info!(count = ads.len(), "Found ads in ad set");
                let mut processed = Vec::with_capacity(ads.len());
                for ad in ads {
                    processed.push(self.process_ad(ad).await);
                }
                let mut missing = missing_list(&targeting);
                missing.extend(missing_list(&schedule));
                with_fields(
                    ad_set,
                    vec![
                        ("targeting", targeting),
                        ("scheduleAndBudget", schedule),
                        ("ads", Value::Array(processed)),
                        (MISSING_FIELDS_KEY, Value::Array(missing)),
                    ],
                )
            }
            Err(e) => {
                error!(ad_set = %id, "Error processing ad set: {e}");
                with_fields(ad_set, vec![(ERROR_KEY, json!(e.to_string()))])
            }
        }
    }

    async fn process_ad(&self, ad: Value) -> Value {
        let Some(creative_id) = ad["creative"]["id"].as_str().map(str::to_string) else {
            warn!(ad = %ad["id"], "No creative ID found for ad");
            return with_fields(ad, vec![(ERROR_KEY, json!("No creative ID found"))]);
        };

        match self.ads.fetch_media(&creative_id).await {
            Ok(media) => with_fields(
                ad,
                vec![
                    ("media", json!(media)),
                    (MISSING_FIELDS_KEY, json!([])),
                ],
            ),
            Err(e) => {
                error!(ad = %ad["id"], "Error processing ad: {e}");
                with_fields(ad, vec![(ERROR_KEY, json!(e.to_string()))])
            }
        }
    }
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Counts {
    pub ad_sets: usize,
    pub ads: usize,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub campaign: Value,
    pub ad_sets: BTreeMap<String, usize>,
    pub ads: BTreeMap<String, usize>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct Statistics {
    pub counts: Counts,
    pub status: StatusCounts,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct TargetingSummary {
    pub locations: Vec<String>,
    pub ages: AgeRange,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SummaryDetails {
    pub ad_sets: Vec<Value>,
    pub ads: Vec<Value>,
}

/// Condensed view of a [`CampaignStructure`], written next to it.
#[derive(Debug, Serialize, PartialEq)]
pub struct DetailsSummary {
    pub campaign: Value,
    pub statistics: Statistics,
    pub targeting: TargetingSummary,
    pub details: SummaryDetails,
}

fn histogram(items: &[Value]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for item in items {
        let status = item["status"].as_str().unwrap_or("UNKNOWN").to_string();
        *counts.entry(status).or_default() += 1;
    }
    counts
}

fn positive(value: &Value) -> Option<i64> {
    value.as_i64().filter(|v| *v != 0)
}

pub fn summarize(structure: &CampaignStructure) -> DetailsSummary {
    let c = &structure.campaign;
    let campaign = json!({
        "basic": {
            "id": c["id"],
            "name": c["name"],
            "status": c["status"],
            "objective": c["objective"],
            "special_ad_categories": c.get("special_ad_categories").filter(|v| !v.is_null()).cloned().unwrap_or_else(|| json!([])),
        },
        "timing": {
            "created": c["created_time"],
            "updated": c["updated_time"],
            "start": c["start_time"],
            "end": c["stop_time"],
        },
        "budget": {
            "daily": c["daily_budget"],
            "lifetime": c["lifetime_budget"],
            "remaining": c["budget_remaining"],
        },
    });

    let ad_sets: Vec<Value> = structure
        .ad_sets
        .iter()
        .map(|ad_set| {
            let spec = &ad_set["targeting"]["targeting"];
            let schedule = &ad_set["scheduleAndBudget"];
            let excluded = spec["excluded_custom_audiences"].as_array().map(|audiences| {
                audiences
                    .iter()
                    .map(|a| json!({"id": a["id"], "name": a["name"]}))
                    .collect::<Vec<_>>()
            });
            json!({
                "id": ad_set["id"],
                "name": ad_set["name"],
                "status": ad_set["status"],
                "targeting": {
                    "demographics": {
                        "age": {"min": spec["age_min"], "max": spec["age_max"]},
                        "locales": spec["locales"],
                    },
                    "locations": spec["geo_locations"],
                    "excluded_audiences": excluded,
                },
                "optimization": {
                    "goal": ad_set["targeting"]["optimization_goal"],
                    "billing": ad_set["targeting"]["billing_event"],
                },
                "budget": {
                    "daily": schedule["daily_budget"],
                    "lifetime": schedule["lifetime_budget"],
                },
                "schedule": {
                    "start": schedule["start_time"],
                    "end": schedule["end_time"],
                },
            })
        })
        .collect();

    let ads: Vec<Value> = structure
        .ads
        .iter()
        .map(|ad| {
            json!({
                "id": ad["id"],
                "name": ad["name"],
                "status": ad["status"],
                "creative": {
                    "id": ad["creative"]["id"],
                    "content": ad["media"]["content"],
                },
            })
        })
        .collect();

    let locations: BTreeSet<String> = ad_sets
        .iter()
        .flat_map(|s| {
            s["targeting"]["locations"]["cities"]
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(|city| city["name"].as_str().map(str::to_string))
        })
        .collect();
    let ages = |bound: &str| -> Vec<i64> {
        ad_sets
            .iter()
            .filter_map(|s| positive(&s["targeting"]["demographics"]["age"][bound]))
            .collect()
    };

    DetailsSummary {
        statistics: Statistics {
            counts: Counts {
                ad_sets: ad_sets.len(),
                ads: ads.len(),
            },
            status: StatusCounts {
                campaign: campaign["basic"]["status"].clone(),
                ad_sets: histogram(&ad_sets),
                ads: histogram(&ads),
            },
        },
        targeting: TargetingSummary {
            locations: locations.into_iter().collect(),
            ages: AgeRange {
                min: ages("min").into_iter().min(),
                max: ages("max").into_iter().max(),
            },
        },
        campaign,
        details: SummaryDetails { ad_sets, ads },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facebook::testing::{FakeGraph, Reply};
    use crate::manifest::Manifest;
    use reqwest::Method;

    fn fake_campaign() -> Arc<FakeGraph> {
        let fake = Arc::new(FakeGraph::new("42"));
        fake.on(
            Method::GET,
            "/act_42/campaigns",
            Reply::Ok(json!({"data": [
                {"id": "10", "name": "Winter Sale", "status": "ACTIVE", "objective": "OUTCOME_TRAFFIC"}
            ]})),
        );
        fake.on(
            Method::GET,
            "/10",
            Reply::Ok(json!({"id": "10", "daily_budget": "5000", "start_time": "2024-01-01T00:00:00+0100"})),
        );
        fake.on(
            Method::GET,
            "/10/insights",
            Reply::Ok(json!({"data": [{"impressions": "1000"}]})),
        );
        fake.on(
            Method::GET,
            "/10/adsets",
            Reply::Ok(json!({"data": [
                {"id": "100", "name": "Prague", "status": "ACTIVE"},
                {"id": "101", "name": "Brno", "status": "PAUSED"}
            ]})),
        );
        fake.on(
            Method::GET,
            "/100",
            Reply::Ok(json!({
                "id": "100",
                "optimization_goal": "LINK_CLICKS",
                "targeting": {
                    "age_min": 25,
                    "age_max": 45,
                    "geo_locations": {"cities": [{"name": "Prague"}]}
                }
            })),
        );
        fake.on(Method::GET, "/101", Reply::Api(100, "Unsupported get request"));
        fake.on(
            Method::GET,
            "/100/ads",
            Reply::Ok(json!({"data": [
                {"id": "1000", "name": "Ad A", "status": "ACTIVE", "creative": {"id": "900"}},
                {"id": "1001", "name": "Ad B", "status": "ACTIVE"}
            ]})),
        );
        fake.on(
            Method::GET,
            "/900",
            Reply::Ok(json!({"id": "900", "asset_feed_spec": {"bodies": [{"text": "Hello"}]}})),
        );
        fake
    }

    #[test]
    fn extracts_numeric_id() {
        assert_eq!(numeric_campaign_id("act_120210"), "120210");
        assert_eq!(numeric_campaign_id("120210"), "120210");
        assert_eq!(numeric_campaign_id("none"), "none");
    }

    #[tokio::test]
    async fn fetches_structure_and_annotates_failures() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = DetailsFetcher::new(fake_campaign(), OutputConfig::new(dir.path()));

        let report = fetcher.fetch_all("act_10").await.unwrap();
        let structure = &report.structure;

        assert_eq!(structure.campaign["name"], "Winter Sale");
        assert_eq!(structure.campaign["daily_budget"], "5000");
        assert_eq!(structure.campaign["insights"]["impressions"], "1000");
        assert_eq!(structure.campaign[MISSING_FIELDS_KEY], json!([]));

        assert_eq!(structure.ad_sets.len(), 2);
        assert!(structure.ad_sets[1][ERROR_KEY]
            .as_str()
            .unwrap()
            .contains("Unsupported get request"));
        assert_eq!(structure.ads.len(), 2);
        assert_eq!(structure.ads[0]["media"]["content"]["text"]["body"], "Hello");
        assert_eq!(structure.ads[1][ERROR_KEY], "No creative ID found");

        assert!(report.details_path.exists());
        let file_name = report.summary_path.file_name().unwrap().to_str().unwrap();
        assert!(file_name.starts_with("campaign_10_"));
        assert!(file_name.ends_with("_summary.json"));

        let manifest = Manifest::load(dir.path()).await.unwrap();
        let entry = manifest.campaign("10").unwrap();
        assert_eq!(entry.details_path.as_ref(), Some(&report.details_path));
        assert_eq!(entry.ads[0].name, "Ad A");
    }

    #[tokio::test]
    async fn missing_campaign_fails() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeGraph::new("42"));
        fake.on(Method::GET, "/act_42/campaigns", Reply::Ok(json!({"data": []})));
        fake.on(Method::GET, "/10", Reply::Ok(json!({})));
        fake.on(Method::GET, "/10/insights", Reply::Ok(json!({"data": []})));

        let err = DetailsFetcher::new(fake, OutputConfig::new(dir.path()))
            .fetch_all("10")
            .await
            .unwrap_err();
        assert!(matches!(err, DetailsError::Api(FacebookApiError::NotFound(_))));
    }

    #[test]
    fn summary_collects_statistics() {
        let structure = CampaignStructure {
            campaign: json!({"id": "10", "name": "Winter", "status": "ACTIVE"}),
            ad_sets: vec![
                json!({"id": "1", "status": "ACTIVE", "targeting": {"targeting": {
                    "age_min": 18, "age_max": 35,
                    "geo_locations": {"cities": [{"name": "Prague"}, {"name": "Brno"}]}
                }}}),
                json!({"id": "2", "status": "ACTIVE", "targeting": {"targeting": {
                    "age_min": 25, "age_max": 65,
                    "geo_locations": {"cities": [{"name": "Prague"}]}
                }}}),
                json!({"id": "3", "status": "PAUSED"}),
            ],
            ads: vec![json!({"id": "a", "status": "ACTIVE"})],
        };

        let summary = summarize(&structure);

        assert_eq!(summary.statistics.counts, Counts { ad_sets: 3, ads: 1 });
        assert_eq!(summary.statistics.status.ad_sets["ACTIVE"], 2);
        assert_eq!(summary.statistics.status.ad_sets["PAUSED"], 1);
        assert_eq!(summary.targeting.locations, vec!["Brno", "Prague"]);
        assert_eq!(summary.targeting.ages, AgeRange { min: Some(18), max: Some(65) });
        assert_eq!(summary.campaign["basic"]["special_ad_categories"], json!([]));
    }
}
