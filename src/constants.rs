// API Versions
pub const FACEBOOK_API_VERSION: &str = "v18.0";

// API Base URLs
pub const FACEBOOK_BASE_URL: &str = "https://graph.facebook.com";

// Content Types
pub const CONTENT_TYPE_HEADER: &str = "Content-Type";
pub const CONTENT_TYPE_JSON: &str = "application/json";

// Environment
pub const ENV_ACCOUNT_ID: &str = "FB_PROD_ACCOUNT_ID";
pub const ENV_ACCESS_TOKEN: &str = "FB_PROD_ACCESS_TOKEN";
pub const ENV_API_VERSION: &str = "FB_API_VERSION";
pub const ENV_GRAPH_BASE_URL: &str = "FB_GRAPH_BASE_URL";
pub const ENV_WHATSAPP_PHONE_ID: &str = "WHATSAPP_PHONE_NUMBER_ID";
pub const ENV_WEBHOOK_VERIFY_TOKEN: &str = "WEBHOOK_VERIFY_TOKEN";
pub const ENV_WEBHOOK_PORT: &str = "WEBHOOK_PORT";
pub const ENV_WEBHOOK_LOG_DIR: &str = "WEBHOOK_LOG_DIR";
pub const ENV_LANDING_BASE_URL: &str = "LANDING_BASE_URL";
pub const ENV_LANDING_HOME_LANGUAGE: &str = "LANDING_HOME_LANGUAGE";
pub const ENV_OUTPUT_DIR: &str = "ADPULSE_OUTPUT_DIR";

// Defaults
pub const DEFAULT_OUTPUT_DIR: &str = "output";
pub const DEFAULT_WEBHOOK_PORT: u16 = 3000;
pub const DEFAULT_WEBHOOK_LOG_DIR: &str = "_scratch/whatsapp_webhooks";
pub const DEFAULT_LANGUAGE: &str = "en";
pub const BROADCAST_DIR: &str = "whatsapp_broadcasts";

// Throttling
pub const INSIGHTS_DELAY_SECS: u64 = 60;
pub const BROADCAST_DELAY_MS: u64 = 1000;
pub const MAX_RUN_RETRIES: u32 = 3;
pub const RETRY_BACKOFF_SECS: u64 = 5;
pub const MAX_RATE_LIMIT_BACKOFF_SECS: u64 = 300;

// Facebook API Fields
pub const FB_LIST_FIELDS: &str = "id,name,status,effective_status";
pub const FB_INSIGHT_FIELDS: &str = "impressions,clicks,spend,reach,cpc,ctr,unique_clicks";
pub const FB_ACCOUNT_INSIGHT_FIELDS: &str =
    "campaign_id,campaign_name,impressions,clicks,spend,reach,cpc,ctr,unique_clicks";
pub const FB_CAMPAIGN_BASIC_FIELDS: &str = "id,name,objective,special_ad_categories,status";
pub const FB_CAMPAIGN_BUDGET_FIELDS: &str = "daily_budget,lifetime_budget,budget_remaining,spend_cap";
pub const FB_CAMPAIGN_SCHEDULE_FIELDS: &str = "start_time,stop_time,updated_time,created_time";
pub const FB_CAMPAIGN_INSIGHT_FIELDS: &str = "reach,impressions,spend,clicks,ctr";
pub const FB_ADSET_FIELDS: &str = "id,name,status,targeting";
pub const FB_ADSET_TARGETING_FIELDS: &str = "targeting,promoted_object,optimization_goal,billing_event";
pub const FB_ADSET_SCHEDULE_FIELDS: &str =
    "start_time,end_time,daily_budget,lifetime_budget,optimization_goal,bid_amount";
pub const FB_AD_FIELDS: &str = "id,name,status,creative";
pub const FB_CREATIVE_FIELDS: &str = "id,name,title,body,image_url,video_id,thumbnail_url,link_url,call_to_action_type,object_story_spec,asset_feed_spec";
pub const FB_PUSH_AD_FIELDS: &str =
    "creative{id,name,object_story_spec,object_type,asset_feed_spec},account_id,name";
pub const FB_CAMPAIGN_LIMIT: u32 = 1000;

// Rate-limit error codes returned by the Graph API
pub const FB_RATE_LIMIT_CODES: &[i64] = &[4, 17, 32, 613];
pub const FB_BUC_RATE_LIMIT_CODES: std::ops::RangeInclusive<i64> = 80000..=80014;
