use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;

use super::{list_all, normalize_creative, params, StatusFilter};
use crate::constants::{FB_AD_FIELDS, FB_CREATIVE_FIELDS, FB_LIST_FIELDS};
use crate::facebook::{FacebookApiError, GraphApi};
use crate::models::{CreativeMedia, CreativeText, EntityRef};
use crate::rate_limit::Throttle;

pub struct AdFetcher<G> {
    api: Arc<G>,
    throttle: Option<Arc<Throttle>>,
}

impl<G: GraphApi> AdFetcher<G> {
    pub fn new(api: Arc<G>) -> Self {
        Self { api, throttle: None }
    }

    pub fn with_throttle(mut self, throttle: Arc<Throttle>) -> Self {
        self.throttle = Some(throttle);
        self
    }

    /// All ads under a campaign, across its ad sets.
    pub async fn list(
        &self,
        campaign_id: &str,
        status: StatusFilter,
    ) -> Result<Vec<EntityRef>, FacebookApiError> {
        let filters = status.child_filter().into_iter().collect();
        list_all(
            self.api.as_ref(),
            self.throttle.as_deref(),
            &format!("/{campaign_id}/ads"),
            params(FB_LIST_FIELDS, filters),
        )
        .await
    }

    /// Ads of one ad set, including their creative reference.
    pub async fn fetch_ads(&self, ad_set_id: &str) -> Result<Vec<Value>, FacebookApiError> {
        list_all(
            self.api.as_ref(),
            self.throttle.as_deref(),
            &format!("/{ad_set_id}/ads"),
            params(FB_AD_FIELDS, Vec::new()),
        )
        .await
    }

    pub async fn fetch_creative(&self, creative_id: &str) -> Result<Value, FacebookApiError> {
        self.api
            .call(
                &format!("/{creative_id}"),
                Method::GET,
                Value::Object(params(FB_CREATIVE_FIELDS, Vec::new())),
            )
            .await
    }

    pub async fn fetch_media(&self, creative_id: &str) -> Result<CreativeMedia, FacebookApiError> {
        let creative = self.fetch_creative(creative_id).await?;
        Ok(CreativeMedia {
            id: creative.get("id").and_then(Value::as_str).map(str::to_string),
            name: creative.get("name").and_then(Value::as_str).map(str::to_string),
            content: normalize_creative(&creative),
        })
    }

    pub async fn fetch_text_content(&self, creative_id: &str) -> Result<CreativeText, FacebookApiError> {
        let creative = self.fetch_creative(creative_id).await?;
        Ok(normalize_creative(&creative).text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facebook::testing::{FakeGraph, Reply};
    use serde_json::json;

    fn fake_with_creative() -> Arc<FakeGraph> {
        let fake = Arc::new(FakeGraph::new("42"));
        fake.on(
            Method::GET,
            "/900",
            Reply::Ok(json!({
                "id": "900",
                "name": "Creative",
                "asset_feed_spec": {
                    "titles": [{"text": "Ski"}],
                    "bodies": [{"text": "Lessons for kids"}]
                }
            })),
        );
        fake
    }

    #[tokio::test]
    async fn media_carries_normalized_content() {
        let media = AdFetcher::new(fake_with_creative())
            .fetch_media("900")
            .await
            .unwrap();

        assert_eq!(media.id.as_deref(), Some("900"));
        assert_eq!(media.name.as_deref(), Some("Creative"));
        assert_eq!(media.content.text.title.as_deref(), Some("Ski"));
    }

    #[tokio::test]
    async fn text_content_is_the_text_part() {
        let text = AdFetcher::new(fake_with_creative())
            .fetch_text_content("900")
            .await
            .unwrap();

        assert_eq!(text.body.as_deref(), Some("Lessons for kids"));
        assert_eq!(text.description, None);
    }

    #[tokio::test]
    async fn fetch_ads_requests_creative_field() {
        let fake = Arc::new(FakeGraph::new("42"));
        fake.on(
            Method::GET,
            "/100/ads",
            Reply::Ok(json!({"data": [{"id": "1", "name": "A", "creative": {"id": "900"}}]})),
        );

        let ads = AdFetcher::new(fake.clone()).fetch_ads("100").await.unwrap();

        assert_eq!(ads[0]["creative"]["id"], "900");
        assert_eq!(fake.calls()[0].params["fields"], FB_AD_FIELDS);
    }
}
