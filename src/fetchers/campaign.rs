use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

use super::{data, list_all, params, StatusFilter};
use crate::constants::{
    FB_CAMPAIGN_BASIC_FIELDS, FB_CAMPAIGN_BUDGET_FIELDS, FB_CAMPAIGN_INSIGHT_FIELDS,
    FB_CAMPAIGN_LIMIT, FB_CAMPAIGN_SCHEDULE_FIELDS, FB_LIST_FIELDS,
};
use crate::facebook::{FacebookApiError, GraphApi};
use crate::models::EntityRef;
use crate::rate_limit::Throttle;

pub struct CampaignFetcher<G> {
    api: Arc<G>,
    throttle: Option<Arc<Throttle>>,
}

impl<G: GraphApi> CampaignFetcher<G> {
    pub fn new(api: Arc<G>) -> Self {
        Self { api, throttle: None }
    }

    /// Paces every listing page through `throttle`.
    pub fn with_throttle(mut self, throttle: Arc<Throttle>) -> Self {
        self.throttle = Some(throttle);
        self
    }

    /// Campaigns of the ad account, optionally restricted to delivering ones
    /// and to names containing `name`.
    pub async fn list(
        &self,
        status: StatusFilter,
        name: Option<&str>,
    ) -> Result<Vec<EntityRef>, FacebookApiError> {
        let mut filters = Vec::new();
        filters.extend(status.campaign_filter());
        if let Some(name) = name {
            filters.push(json!({"field": "name", "operator": "CONTAIN", "value": name}));
        }

        let mut params = params(FB_LIST_FIELDS, filters);
        params.insert("limit".into(), json!(FB_CAMPAIGN_LIMIT));

        list_all(
            self.api.as_ref(),
            self.throttle.as_deref(),
            &format!("/act_{}/campaigns", self.api.account_id()),
            params,
        )
        .await
    }

    /// Id, name, objective and status of one campaign.
    pub async fn fetch_basic(&self, campaign_id: &str) -> Result<Value, FacebookApiError> {
        let filters = vec![json!({"field": "id", "operator": "EQUAL", "value": campaign_id})];
        let response = self
            .api
            .call(
                &format!("/act_{}/campaigns", self.api.account_id()),
                Method::GET,
                Value::Object(params(FB_CAMPAIGN_BASIC_FIELDS, filters)),
            )
            .await?;

        data::<Value>(response)?
            .into_iter()
            .next()
            .ok_or_else(|| FacebookApiError::NotFound(format!("campaign {campaign_id}")))
    }

    pub async fn fetch_budget(&self, campaign_id: &str) -> Value {
        self.fetch_node_or_empty(campaign_id, FB_CAMPAIGN_BUDGET_FIELDS, "budget details")
            .await
    }

    pub async fn fetch_schedule(&self, campaign_id: &str) -> Value {
        self.fetch_node_or_empty(campaign_id, FB_CAMPAIGN_SCHEDULE_FIELDS, "schedule details")
            .await
    }

    /// First lifetime insights row, or `{}` when unavailable.
    pub async fn fetch_lifetime_insights(&self, campaign_id: &str) -> Value {
        let mut params = params(FB_CAMPAIGN_INSIGHT_FIELDS, Vec::new());
        params.insert("date_preset".into(), json!("lifetime"));

        let result = self
            .api
            .call(
                &format!("/{campaign_id}/insights"),
                Method::GET,
                Value::Object(params),
            )
            .await
            .and_then(data::<Value>);

        match result {
            Ok(rows) => rows.into_iter().next().unwrap_or_else(|| json!({})),
            Err(e) => {
                warn!(campaign_id, "Could not fetch insights: {e}");
                json!({})
            }
        }
    }

    async fn fetch_node_or_empty(&self, node_id: &str, fields: &str, what: &str) -> Value {
        match self
            .api
            .call(
                &format!("/{node_id}"),
                Method::GET,
                Value::Object(params(fields, Vec::new())),
            )
            .await
        {
            Ok(value) => value,
            Err(e) => {
                warn!(node_id, "Could not fetch {what}: {e}");
                json!({})
            }
        }
    }
}
