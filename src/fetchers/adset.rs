use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;

use super::{annotate, list_all, params, StatusFilter};
use crate::constants::{
    FB_ADSET_FIELDS, FB_ADSET_SCHEDULE_FIELDS, FB_ADSET_TARGETING_FIELDS, FB_LIST_FIELDS,
};
use crate::facebook::{FacebookApiError, GraphApi};
use crate::models::EntityRef;
use crate::rate_limit::Throttle;

pub struct AdSetFetcher<G> {
    api: Arc<G>,
    throttle: Option<Arc<Throttle>>,
}

impl<G: GraphApi> AdSetFetcher<G> {
    pub fn new(api: Arc<G>) -> Self {
        Self { api, throttle: None }
    }

    pub fn with_throttle(mut self, throttle: Arc<Throttle>) -> Self {
        self.throttle = Some(throttle);
        self
    }

    pub async fn list(
        &self,
        campaign_id: &str,
        status: StatusFilter,
    ) -> Result<Vec<EntityRef>, FacebookApiError> {
        let filters = status.child_filter().into_iter().collect();
        list_all(
            self.api.as_ref(),
            self.throttle.as_deref(),
            &format!("/{campaign_id}/adsets"),
            params(FB_LIST_FIELDS, filters),
        )
        .await
    }

    /// Ad sets of a campaign with their targeting, annotated when `id` or
    /// `name` is missing.
    pub async fn fetch_ad_sets(&self, campaign_id: &str) -> Result<Vec<Value>, FacebookApiError> {
        let ad_sets: Vec<Value> = list_all(
            self.api.as_ref(),
            self.throttle.as_deref(),
            &format!("/{campaign_id}/adsets"),
            params(FB_ADSET_FIELDS, Vec::new()),
        )
        .await?;

        Ok(ad_sets
            .into_iter()
            .map(|ad_set| annotate(ad_set, &["id", "name"]))
            .collect())
    }

    pub async fn fetch_targeting(&self, ad_set_id: &str) -> Result<Value, FacebookApiError> {
        let response = self.fetch_node(ad_set_id, FB_ADSET_TARGETING_FIELDS).await?;
        Ok(annotate(response, &["targeting"]))
    }

    pub async fn fetch_schedule_and_budget(&self, ad_set_id: &str) -> Result<Value, FacebookApiError> {
        let response = self.fetch_node(ad_set_id, FB_ADSET_SCHEDULE_FIELDS).await?;
        Ok(annotate(response, &["optimization_goal"]))
    }

    async fn fetch_node(&self, node_id: &str, fields: &str) -> Result<Value, FacebookApiError> {
        self.api
            .call(
                &format!("/{node_id}"),
                Method::GET,
                Value::Object(params(fields, Vec::new())),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facebook::testing::{FakeGraph, Reply};
    use crate::fetchers::MISSING_FIELDS_KEY;
    use serde_json::json;

    #[tokio::test]
    async fn ad_sets_are_annotated_not_rejected() {
        let fake = Arc::new(FakeGraph::new("42"));
        fake.on(
            Method::GET,
            "/10/adsets",
            Reply::Ok(json!({"data": [
                {"id": "100", "name": "Prague", "status": "ACTIVE"},
                {"id": "101", "status": "PAUSED"}
            ]})),
        );

        let ad_sets = AdSetFetcher::new(fake).fetch_ad_sets("10").await.unwrap();

        assert_eq!(ad_sets.len(), 2);
        assert!(ad_sets[0].get(MISSING_FIELDS_KEY).is_none());
        assert_eq!(ad_sets[1][MISSING_FIELDS_KEY], json!(["name"]));
    }

    #[tokio::test]
    async fn targeting_requires_targeting_spec() {
        let fake = Arc::new(FakeGraph::new("42"));
        fake.on(
            Method::GET,
            "/100",
            Reply::Ok(json!({"id": "100", "optimization_goal": "LINK_CLICKS"})),
        );

        let fetcher = AdSetFetcher::new(fake.clone());
        let targeting = fetcher.fetch_targeting("100").await.unwrap();
        let schedule = fetcher.fetch_schedule_and_budget("100").await.unwrap();

        assert_eq!(targeting[MISSING_FIELDS_KEY], json!(["targeting"]));
        assert!(schedule.get(MISSING_FIELDS_KEY).is_none());
        assert_eq!(
            fake.calls()[1].params["fields"],
            FB_ADSET_SCHEDULE_FIELDS
        );
    }

    #[tokio::test]
    async fn list_filters_children_when_active_only() {
        let fake = Arc::new(FakeGraph::new("42"));
        fake.on(Method::GET, "/10/adsets", Reply::Ok(json!({"data": []})));

        AdSetFetcher::new(fake.clone())
            .list("10", StatusFilter::ActiveOnly)
            .await
            .unwrap();

        assert_eq!(
            fake.calls()[0].params["filtering"][0]["value"],
            json!(["ACTIVE", "PAUSED"])
        );
    }
}
