use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::OutputConfig;
use crate::constants::FB_INSIGHT_FIELDS;
use crate::dates::TimeWindow;
use crate::facebook::{FacebookApiError, GraphApi};
use crate::fetchers::{fetch_insights, AdFetcher, AdSetFetcher, CampaignFetcher, StatusFilter};
use crate::manifest;
use crate::models::{EntityRef, InsightRecord};
use crate::output::{self, file_timestamp, sanitize_name, OutputError};
use crate::rate_limit::{retry, RetryPolicy, Retryable, Throttle};

#[derive(Error, Debug)]
pub enum InsightsError {
    #[error(transparent)]
    Api(#[from] FacebookApiError),
    #[error(transparent)]
    Output(#[from] OutputError),
}

impl Retryable for InsightsError {
    fn is_rate_limited(&self) -> bool {
        match self {
            Self::Api(e) => e.is_rate_limited(),
            Self::Output(_) => false,
        }
    }
}

/// How output files are laid out under the output directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputLayout {
    /// `insight_{id}___{name}___{timestamp}.json`
    #[default]
    Flat,
    /// `campaign={name}/type=insights/date={date}/insights_{id}_{timestamp}.json`
    Partitioned,
}

impl OutputLayout {
    pub fn path_for(
        &self,
        dir: &Path,
        campaign: &EntityRef,
        date: NaiveDate,
        timestamp: &str,
    ) -> PathBuf {
        let name = sanitize_name(&campaign.name);
        match self {
            Self::Flat => dir.join(format!("insight_{}___{}___{}.json", campaign.id, name, timestamp)),
            Self::Partitioned => dir
                .join(format!("campaign={name}"))
                .join("type=insights")
                .join(format!("date={}", date.format("%Y-%m-%d")))
                .join(format!("insights_{}_{}.json", campaign.id, timestamp)),
        }
    }
}

impl fmt::Display for OutputLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flat => f.write_str("flat"),
            Self::Partitioned => f.write_str("partitioned"),
        }
    }
}

impl FromStr for OutputLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "flat" => Ok(Self::Flat),
            "partitioned" => Ok(Self::Partitioned),
            other => Err(format!("unknown layout `{other}` (expected flat or partitioned)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InsightsOptions {
    pub window: TimeWindow,
    pub status: StatusFilter,
    pub layout: OutputLayout,
    pub campaign_name: Option<String>,
    pub fields: String,
}

impl Default for InsightsOptions {
    fn default() -> Self {
        Self {
            window: TimeWindow::default(),
            status: StatusFilter::All,
            layout: OutputLayout::Flat,
            campaign_name: None,
            fields: FB_INSIGHT_FIELDS.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Metadata {
    fetched_at: DateTime<Utc>,
    active_only: bool,
    window: TimeWindow,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EntityInsights {
    id: String,
    name: String,
    status: Option<String>,
    effective_status: Option<String>,
    insights: Vec<InsightRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl EntityInsights {
    fn new(entity: &EntityRef, result: Result<Vec<InsightRecord>, FacebookApiError>) -> Self {
        let (insights, error) = match result {
            Ok(rows) => (rows, None),
            Err(e) => (Vec::new(), Some(e.to_string())),
        };
        Self {
            id: entity.id.clone(),
            name: entity.name.clone(),
            status: entity.status.clone(),
            effective_status: entity.effective_status.clone(),
            insights,
            error,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SkippedEntity {
    id: String,
    kind: &'static str,
    error: String,
}

/// The JSON artifact written per campaign.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InsightsDocument {
    metadata: Metadata,
    campaign: EntityInsights,
    ad_sets: Vec<EntityInsights>,
    ads: Vec<EntityInsights>,
    skipped: Vec<SkippedEntity>,
}

/// What happened to one campaign during a run.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CampaignOutcome {
    pub id: String,
    pub name: String,
    pub path: Option<PathBuf>,
    pub ads_total: usize,
    pub skipped_ads: Vec<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub campaigns: Vec<CampaignOutcome>,
}

impl RunReport {
    pub fn failed_campaigns(&self) -> usize {
        self.campaigns.iter().filter(|c| c.error.is_some()).count()
    }
}

/// Walks campaigns → ad sets → ads, one throttled request at a time, and
/// writes one insights document per campaign.
pub struct InsightsOrchestrator<G> {
    api: Arc<G>,
    campaigns: CampaignFetcher<G>,
    ad_sets: AdSetFetcher<G>,
    ads: AdFetcher<G>,
    throttle: Arc<Throttle>,
    retry: RetryPolicy,
    output: OutputConfig,
}

impl<G: GraphApi> InsightsOrchestrator<G> {
    pub fn new(api: Arc<G>, output: OutputConfig, throttle: Throttle, retry: RetryPolicy) -> Self {
        let throttle = Arc::new(throttle);
        Self {
            campaigns: CampaignFetcher::new(api.clone()).with_throttle(throttle.clone()),
            ad_sets: AdSetFetcher::new(api.clone()).with_throttle(throttle.clone()),
            ads: AdFetcher::new(api.clone()).with_throttle(throttle.clone()),
            api,
            throttle,
            retry,
            output,
        }
    }

    /// Runs the whole fetch, retrying it when it fails before any campaign
    /// could be processed.
    pub async fn run(&self, options: &InsightsOptions) -> Result<RunReport, InsightsError> {
        retry(&self.retry, "insights run", || self.run_once(options)).await
    }

    async fn run_once(&self, options: &InsightsOptions) -> Result<RunReport, InsightsError> {
        let started_at = Utc::now();
        info!(
            active_only = options.status.is_active_only(),
            window = ?options.window,
            "Starting to fetch campaigns"
        );

        let campaigns = self
            .campaigns
            .list(options.status, options.campaign_name.as_deref())
            .await?;
        info!(count = campaigns.len(), "Found campaigns to process");

        let mut outcomes = Vec::with_capacity(campaigns.len());
        for campaign in &campaigns {
            info!(
                campaign = %campaign.name,
                status = campaign.effective_status.as_deref().unwrap_or("UNKNOWN"),
                "Processing campaign"
            );
            let outcome = match self.process_campaign(campaign, options).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(campaign = %campaign.name, "Error processing campaign: {e}");
                    CampaignOutcome {
                        id: campaign.id.clone(),
                        name: campaign.name.clone(),
                        path: None,
                        ads_total: 0,
                        skipped_ads: Vec::new(),
                        error: Some(e.to_string()),
                    }
                }
            };
            outcomes.push(outcome);
        }

        Ok(RunReport {
            started_at,
            finished_at: Utc::now(),
            campaigns: outcomes,
        })
    }

    async fn insights_for(
        &self,
        entity_id: &str,
        options: &InsightsOptions,
    ) -> Result<Vec<InsightRecord>, FacebookApiError> {
        self.throttle.acquire().await;
        fetch_insights(self.api.as_ref(), entity_id, &options.fields, &options.window).await
    }

    async fn process_campaign(
        &self,
        campaign: &EntityRef,
        options: &InsightsOptions,
    ) -> Result<CampaignOutcome, InsightsError> {
        let now = Utc::now();
        let path = options.layout.path_for(
            &self.output.dir,
            campaign,
            options.window.partition_date(now.date_naive()),
            &file_timestamp(now),
        );

        let campaign_insights = self.insights_for(&campaign.id, options).await?;

        let ad_sets = self.ad_sets.list(&campaign.id, options.status).await?;

        let mut document = InsightsDocument {
            metadata: Metadata {
                fetched_at: now,
                active_only: options.status.is_active_only(),
                window: options.window.clone(),
            },
            campaign: EntityInsights::new(campaign, Ok(campaign_insights)),
            ad_sets: Vec::with_capacity(ad_sets.len()),
            ads: Vec::new(),
            skipped: Vec::new(),
        };

        for ad_set in &ad_sets {
            let result = self.insights_for(&ad_set.id, options).await;
            if let Err(e) = &result {
                warn!(ad_set = %ad_set.name, "Skipping ad set insights: {e}");
                document.skipped.push(SkippedEntity {
                    id: ad_set.id.clone(),
                    kind: "adset",
                    error: e.to_string(),
                });
            }
            document.ad_sets.push(EntityInsights::new(ad_set, result));
        }
        output::write_json(&path, &document).await?;

        let ads = self.ads.list(&campaign.id, options.status).await?;
        let mut skipped_ads = Vec::new();

        for (index, ad) in ads.iter().enumerate() {
            info!(
                ad = %ad.name,
                progress = format_args!("{}/{}", index + 1, ads.len()),
                "Fetching insights for ad"
            );
            let result = self.insights_for(&ad.id, options).await;
            if let Err(e) = &result {
                warn!(ad = %ad.name, "Skipping ad insights: {e}");
                skipped_ads.push(ad.id.clone());
                document.skipped.push(SkippedEntity {
                    id: ad.id.clone(),
                    kind: "ad",
                    error: e.to_string(),
                });
            }
            document.ads.push(EntityInsights::new(ad, result));
            output::write_json(&path, &document).await?;
        }

        if let Err(e) = manifest::update(&self.output.dir, |m| {
            m.record_insights(&campaign.id, &campaign.name, path.clone())
        })
        .await
        {
            warn!("Could not update manifest: {e}");
        }

        info!(campaign = %campaign.name, path = %path.display(), "Saved insights");
        Ok(CampaignOutcome {
            id: campaign.id.clone(),
            name: campaign.name.clone(),
            path: Some(path),
            ads_total: ads.len(),
            skipped_ads,
            error: None,
        })
    }
}
