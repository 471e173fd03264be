//! Narrow read operations per Graph entity type.

pub mod ad;
pub mod adset;
pub mod campaign;
pub mod creative;

pub use ad::AdFetcher;
pub use adset::AdSetFetcher;
pub use campaign::CampaignFetcher;
pub use creative::normalize_creative;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::dates::TimeWindow;
use crate::facebook::{FacebookApiError, GraphApi};
use crate::models::InsightRecord;
use crate::rate_limit::Throttle;

/// Key under which validation results are attached to a record.
pub const MISSING_FIELDS_KEY: &str = "_missingFields";

/// Which delivery states a listing should include.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusFilter {
    #[default]
    All,
    ActiveOnly,
}

impl StatusFilter {
    pub fn from_active(active_only: bool) -> Self {
        if active_only {
            Self::ActiveOnly
        } else {
            Self::All
        }
    }

    pub fn is_active_only(&self) -> bool {
        matches!(self, Self::ActiveOnly)
    }

    fn filter(&self, statuses: &[&str]) -> Option<Value> {
        match self {
            Self::All => None,
            Self::ActiveOnly => Some(json!({
                "field": "effective_status",
                "operator": "IN",
                "value": statuses,
            })),
        }
    }

    /// Campaigns paused at campaign level still count as active.
    pub fn campaign_filter(&self) -> Option<Value> {
        self.filter(&["ACTIVE", "CAMPAIGN_PAUSED"])
    }

    pub fn child_filter(&self) -> Option<Value> {
        self.filter(&["ACTIVE", "PAUSED"])
    }
}

/// A Graph value counts as present when it is truthy: not null, not false,
/// not an empty string and not zero.
fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(_) => true,
    }
}

pub fn missing_fields(value: &Value, required: &[&str]) -> Vec<String> {
    required
        .iter()
        .filter(|field| !is_present(value.get(**field)))
        .map(|field| field.to_string())
        .collect()
}

/// Attaches `_missingFields` when any required field is absent. The record
/// is returned either way.
pub fn annotate(mut value: Value, required: &[&str]) -> Value {
    let missing = missing_fields(&value, required);
    if !missing.is_empty() {
        warn!(missing = ?missing, "Missing fields");
        if let Some(map) = value.as_object_mut() {
            map.insert(MISSING_FIELDS_KEY.to_string(), json!(missing));
        }
    }
    value
}

pub(crate) fn params(fields: &str, filters: Vec<Value>) -> Map<String, Value> {
    let mut params = Map::new();
    params.insert("fields".into(), Value::String(fields.to_string()));
    if !filters.is_empty() {
        params.insert("filtering".into(), Value::Array(filters));
    }
    params
}

/// Deserializes the `data` array of a list response.
pub(crate) fn data<T: DeserializeOwned>(mut response: Value) -> Result<Vec<T>, FacebookApiError> {
    match response.get_mut("data").map(Value::take) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(data) => serde_json::from_value(data)
            .map_err(|e| FacebookApiError::InvalidResponse(format!("unexpected data shape: {e}"))),
    }
}

/// Cursor of the following page, present only while `paging.next` is.
fn next_cursor(response: &Value) -> Option<String> {
    let paging = response.get("paging")?;
    paging.get("next").filter(|next| next.is_string())?;
    paging
        .pointer("/cursors/after")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// GETs every page of a list endpoint, re-issuing the request with
/// `after=<cursor>` until the response stops carrying `paging.next`. Each
/// page waits on `throttle` when one is given.
pub(crate) async fn list_all<G, T>(
    api: &G,
    throttle: Option<&Throttle>,
    endpoint: &str,
    mut params: Map<String, Value>,
) -> Result<Vec<T>, FacebookApiError>
where
    G: GraphApi + ?Sized,
    T: DeserializeOwned,
{
    let mut items = Vec::new();
    let mut pages = 0;
    loop {
        if let Some(throttle) = throttle {
            throttle.acquire().await;
        }
        let response = api
            .call(endpoint, Method::GET, Value::Object(params.clone()))
            .await?;
        pages += 1;

        let cursor = next_cursor(&response);
        items.extend(data::<T>(response)?);

        match cursor {
            Some(after) if params.get("after").and_then(Value::as_str) != Some(after.as_str()) => {
                debug!(endpoint, pages, items = items.len(), "Following next page");
                params.insert("after".into(), Value::String(after));
            }
            _ => return Ok(items),
        }
    }
}

/// Insight rows for one campaign, ad set or ad over `window`.
pub async fn fetch_insights<G: GraphApi + ?Sized>(
    api: &G,
    entity_id: &str,
    fields: &str,
    window: &TimeWindow,
) -> Result<Vec<InsightRecord>, FacebookApiError> {
    let mut params = params(fields, Vec::new());
    window.apply(&mut params);

    let response = api
        .call(&format!("/{entity_id}/insights"), Method::GET, Value::Object(params))
        .await?;
    data(response)
}

/// Aggregation level of account-wide insights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InsightsLevel {
    Account,
    #[default]
    Campaign,
    AdSet,
    Ad,
}

impl InsightsLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Account => "account",
            Self::Campaign => "campaign",
            Self::AdSet => "adset",
            Self::Ad => "ad",
        }
    }
}

impl fmt::Display for InsightsLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InsightsLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "account" => Ok(Self::Account),
            "campaign" => Ok(Self::Campaign),
            "adset" => Ok(Self::AdSet),
            "ad" => Ok(Self::Ad),
            other => Err(format!("unknown level `{other}` (expected account, campaign, adset or ad)")),
        }
    }
}

/// Insight rows for the whole ad account in one request, broken down by
/// `level`. A non-empty `campaign_ids` restricts rows to those campaigns so
/// they can be compared side by side.
pub async fn fetch_account_insights<G: GraphApi + ?Sized>(
    api: &G,
    level: InsightsLevel,
    campaign_ids: &[String],
    fields: &str,
    window: &TimeWindow,
) -> Result<Vec<InsightRecord>, FacebookApiError> {
    let filters = if campaign_ids.is_empty() {
        Vec::new()
    } else {
        vec![json!({"field": "campaign.id", "operator": "IN", "value": campaign_ids})]
    };
    let mut params = params(fields, filters);
    params.insert("level".into(), json!(level.as_str()));
    window.apply(&mut params);

    list_all(api, None, &format!("/act_{}/insights", api.account_id()), params).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::FB_LIST_FIELDS;
    use crate::dates::DatePreset;
    use crate::facebook::testing::{FakeGraph, Reply};
    use crate::models::EntityRef;

    #[test]
    fn missing_fields_follow_truthiness() {
        let value = json!({
            "id": "1",
            "name": "",
            "status": null,
            "daily_budget": 0,
            "targeting": {},
        });
        assert_eq!(
            missing_fields(&value, &["id", "name", "status", "daily_budget", "targeting", "objective"]),
            vec!["name", "status", "daily_budget", "objective"]
        );
    }

    #[test]
    fn annotate_keeps_record_and_lists_gaps() {
        let annotated = annotate(json!({"id": "1"}), &["id", "name"]);
        assert_eq!(annotated["id"], "1");
        assert_eq!(annotated[MISSING_FIELDS_KEY], json!(["name"]));

        let complete = annotate(json!({"id": "1", "name": "x"}), &["id", "name"]);
        assert!(complete.get(MISSING_FIELDS_KEY).is_none());
    }

    #[test]
    fn status_filters() {
        assert!(StatusFilter::All.campaign_filter().is_none());
        assert_eq!(
            StatusFilter::ActiveOnly.campaign_filter().unwrap()["value"],
            json!(["ACTIVE", "CAMPAIGN_PAUSED"])
        );
        assert_eq!(
            StatusFilter::ActiveOnly.child_filter().unwrap()["value"],
            json!(["ACTIVE", "PAUSED"])
        );
    }

    #[tokio::test]
    async fn fetch_insights_sends_window() {
        let fake = FakeGraph::new("1");
        fake.on(
            Method::GET,
            "/55/insights",
            Reply::Ok(json!({"data": [{"impressions": "120", "spend": "3.50"}]})),
        );

        let window = TimeWindow::Preset {
            preset: DatePreset::Last7d,
        };
        let rows = fetch_insights(&fake, "55", "impressions,spend", &window)
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].impressions.as_deref(), Some("120"));
        let call = &fake.calls()[0];
        assert_eq!(call.params["date_preset"], "last_7d");
        assert_eq!(call.params["fields"], "impressions,spend");
    }

    #[tokio::test]
    async fn account_insights_filter_by_campaign() {
        let fake = FakeGraph::new("42");
        fake.on(
            Method::GET,
            "/act_42/insights",
            Reply::Ok(json!({"data": [
                {"campaign_id": "10", "campaign_name": "Winter", "spend": "4.00"},
                {"campaign_id": "11", "campaign_name": "Spring", "spend": "9.10"}
            ]})),
        );

        let window = TimeWindow::Preset {
            preset: DatePreset::Last7d,
        };
        let ids = vec!["10".to_string(), "11".to_string()];
        let rows = fetch_account_insights(&fake, InsightsLevel::Campaign, &ids, "spend", &window)
            .await
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].extra["campaign_name"], "Spring");
        let params = &fake.calls()[0].params;
        assert_eq!(params["level"], "campaign");
        assert_eq!(params["date_preset"], "last_7d");
        assert_eq!(
            params["filtering"],
            json!([{"field": "campaign.id", "operator": "IN", "value": ["10", "11"]}])
        );
    }

    #[tokio::test]
    async fn account_insights_without_ids_are_unfiltered() {
        let fake = FakeGraph::new("42");
        fake.on(Method::GET, "/act_42/insights", Reply::Ok(json!({"data": []})));

        fetch_account_insights(&fake, InsightsLevel::Ad, &[], "spend", &TimeWindow::default())
            .await
            .unwrap();

        let params = &fake.calls()[0].params;
        assert_eq!(params["level"], "ad");
        assert!(params.get("filtering").is_none());
    }

    #[test]
    fn parses_levels() {
        assert_eq!("adset".parse::<InsightsLevel>(), Ok(InsightsLevel::AdSet));
        assert!("region".parse::<InsightsLevel>().is_err());
    }

    #[tokio::test]
    async fn list_all_follows_next_pages() {
        let fake = FakeGraph::new("42");
        fake.on(
            Method::GET,
            "/10/ads",
            Reply::Ok(json!({
                "data": [{"id": "1", "name": "A"}],
                "paging": {"cursors": {"after": "c1"}, "next": "https://graph.facebook.com/next1"}
            })),
        )
        .on(
            Method::GET,
            "/10/ads",
            Reply::Ok(json!({
                "data": [{"id": "2", "name": "B"}],
                "paging": {"cursors": {"after": "c2"}, "next": "https://graph.facebook.com/next2"}
            })),
        )
        .on(
            Method::GET,
            "/10/ads",
            Reply::Ok(json!({
                "data": [{"id": "3", "name": "C"}],
                "paging": {"cursors": {"before": "c2", "after": "c3"}}
            })),
        );

        let ads: Vec<EntityRef> = list_all(&fake, None, "/10/ads", params(FB_LIST_FIELDS, Vec::new()))
            .await
            .unwrap();

        let ids: Vec<&str> = ads.iter().map(|ad| ad.id.as_str()).collect();
        assert_eq!(ids, ["1", "2", "3"]);
        let calls = fake.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[0].params.get("after").is_none());
        assert_eq!(calls[1].params["after"], "c1");
        assert_eq!(calls[2].params["after"], "c2");
        assert_eq!(calls[2].params["fields"], FB_LIST_FIELDS);
    }

    #[tokio::test]
    async fn list_all_stops_on_a_repeated_cursor() {
        let fake = FakeGraph::new("42");
        fake.on(
            Method::GET,
            "/10/adsets",
            Reply::Ok(json!({
                "data": [{"id": "1"}],
                "paging": {"cursors": {"after": "same"}, "next": "https://graph.facebook.com/next"}
            })),
        );

        let rows: Vec<Value> = list_all(&fake, None, "/10/adsets", Map::new()).await.unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(fake.count(Method::GET, "/10/adsets"), 2);
    }

    #[test]
    fn data_tolerates_missing_array() {
        let rows: Vec<InsightRecord> = data(json!({})).unwrap();
        assert!(rows.is_empty());
        assert!(data::<InsightRecord>(json!({"data": "nope"})).is_err());
    }
}
