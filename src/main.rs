use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use adpulse::broadcast::Broadcaster;
use adpulse::config::{GraphConfig, LandingConfig, OutputConfig, WebhookConfig, WhatsAppConfig};
use adpulse::constants::{
    BROADCAST_DELAY_MS, DEFAULT_LANGUAGE, FB_ACCOUNT_INSIGHT_FIELDS, INSIGHTS_DELAY_SECS,
};
use adpulse::dates::{DatePreset, TimeWindow};
use adpulse::details::DetailsFetcher;
use adpulse::facebook::FacebookAPI;
use adpulse::fetchers::{fetch_account_insights, InsightsLevel, StatusFilter};
use adpulse::insights::{InsightsOptions, InsightsOrchestrator, OutputLayout};
use adpulse::output::{file_timestamp, write_json};
use adpulse::pusher::TextPusher;
use adpulse::rate_limit::{RetryPolicy, Throttle};
use adpulse::webhook;
use adpulse::whatsapp::WhatsAppClient;
use anyhow::{bail, Result};
use chrono::{NaiveDate, Utc};
use clap::{ArgAction, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "adpulse",
    version,
    about = "Facebook Marketing API fetcher, text pusher and WhatsApp broadcaster"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch campaign, ad set and ad insights
    Insights {
        /// Only campaigns, ad sets and ads that are delivering
        #[arg(long, action = ArgAction::Set, num_args = 0..=1, default_value_t = false, default_missing_value = "true")]
        active: bool,

        /// Relative window such as last_7d or this_month
        #[arg(long)]
        preset: Option<DatePreset>,

        #[arg(long, requires = "to_date")]
        from_date: Option<NaiveDate>,

        #[arg(long, requires = "from_date")]
        to_date: Option<NaiveDate>,

        /// ISO year of --week; defaults to the current one
        #[arg(long, requires = "week")]
        year: Option<i32>,

        /// ISO week number (1-53)
        #[arg(long)]
        week: Option<u32>,

        /// Only campaigns whose name contains this text
        #[arg(long)]
        campaign_name: Option<String>,

        /// flat or partitioned
        #[arg(long, default_value = "flat")]
        layout: OutputLayout,

        /// Minimum seconds between API requests
        #[arg(long, default_value_t = INSIGHTS_DELAY_SECS)]
        delay_secs: u64,
    },

    /// Account-level insights for several campaigns in one request
    Compare {
        campaign_ids: Vec<String>,

        /// account, campaign, adset or ad
        #[arg(long, default_value = "campaign")]
        level: InsightsLevel,

        #[arg(long, default_value = "last_7d")]
        preset: DatePreset,
    },

    /// Fetch the full structure of one campaign
    Details { campaign_id: String },

    /// Push localized texts to every ad of a campaign
    PushTexts {
        campaign_id: String,
        texts_file: PathBuf,
    },

    /// Send a WhatsApp template to a phone list
    Broadcast {
        /// CSV with a phone header, or one number per line
        #[arg(long)]
        phones: PathBuf,

        #[arg(long)]
        template: String,

        #[arg(long, default_value = DEFAULT_LANGUAGE)]
        language: String,

        #[arg(long, default_value_t = BROADCAST_DELAY_MS)]
        delay_ms: u64,
    },

    /// Run the WhatsApp delivery-status webhook listener
    Webhook {
        /// Overrides WEBHOOK_PORT
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let output = OutputConfig::from_env();

    match cli.command {
        Commands::Insights {
            active,
            preset,
            from_date,
            to_date,
            year,
            week,
            campaign_name,
            layout,
            delay_secs,
        } => {
            let window = TimeWindow::from_parts(
                preset,
                from_date,
                to_date,
                year,
                week,
                Utc::now().date_naive(),
            )?;
            let options = InsightsOptions {
                window,
                status: StatusFilter::from_active(active),
                layout,
                campaign_name,
                ..InsightsOptions::default()
            };

            let api = Arc::new(FacebookAPI::new(GraphConfig::from_env()?));
            let orchestrator = InsightsOrchestrator::new(
                api,
                output,
                Throttle::every(Duration::from_secs(delay_secs)),
                RetryPolicy::default(),
            );
            let report = orchestrator.run(&options).await?;

            let failed = report.failed_campaigns();
            info!(
                campaigns = report.campaigns.len(),
                failed,
                skipped_ads = report.campaigns.iter().map(|c| c.skipped_ads.len()).sum::<usize>(),
                "Insights fetch finished"
            );
            if failed > 0 {
                bail!("{failed} of {} campaigns failed", report.campaigns.len());
            }
        }
        Commands::Compare {
            campaign_ids,
            level,
            preset,
        } => {
            let api = FacebookAPI::new(GraphConfig::from_env()?);
            let rows = fetch_account_insights(
                &api,
                level,
                &campaign_ids,
                FB_ACCOUNT_INSIGHT_FIELDS,
                &TimeWindow::Preset { preset },
            )
            .await?;

            let path = output.dir.join(format!(
                "account_insights_{level}_{}.json",
                file_timestamp(Utc::now())
            ));
            write_json(&path, &rows).await?;
            info!(rows = rows.len(), path = %path.display(), "Account insights saved");
        }
        Commands::Details { campaign_id } => {
            let api = Arc::new(FacebookAPI::new(GraphConfig::from_env()?));
            let report = DetailsFetcher::new(api, output).fetch_all(&campaign_id).await?;
            info!(
                ad_sets = report.structure.ad_sets.len(),
                ads = report.structure.ads.len(),
                details = %report.details_path.display(),
                "Fetch completed"
            );
        }
        Commands::PushTexts {
            campaign_id,
            texts_file,
        } => {
            let api = Arc::new(FacebookAPI::new(GraphConfig::from_env()?));
            let pusher = TextPusher::new(api, LandingConfig::from_env()?, output);
            let results = pusher.push_campaign(&campaign_id, &texts_file).await?;

            let failures: Vec<_> = results.iter().filter(|r| !r.is_success()).collect();
            for failure in &failures {
                warn!(ad_id = %failure.ad_id, ad = %failure.ad_name, "Update failed");
            }
            if !failures.is_empty() {
                bail!("{} of {} ad updates failed", failures.len(), results.len());
            }
            info!(ads = results.len(), "All texts updated successfully");
        }
        Commands::Broadcast {
            phones,
            template,
            language,
            delay_ms,
        } => {
            let client = Arc::new(WhatsAppClient::new(WhatsAppConfig::from_env()?));
            let broadcaster =
                Broadcaster::new(client, output).with_delay(Duration::from_millis(delay_ms));
            let (report, path) = broadcaster.run(&phones, &template, &language).await?;
            info!(
                success = report.success.len(),
                failed = report.failed.len(),
                path = %path.display(),
                "Broadcast summary"
            );
        }
        Commands::Webhook { port } => {
            let mut config = WebhookConfig::from_env()?;
            if let Some(port) = port {
                config.port = port;
            }
            webhook::serve(config).await?;
        }
    }

    Ok(())
}
