use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identity and status of a campaign, ad set or ad as returned by list calls.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EntityRef {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub effective_status: Option<String>,
}

/// One row of the insights endpoint. The Graph API returns metrics as
/// decimal strings; they are kept verbatim.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct InsightRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impressions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clicks: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spend: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reach: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ctr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_clicks: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_stop: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Flat view of a creative's asset feed.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreativeContent {
    pub media: Vec<MediaAsset>,
    pub text: CreativeText,
    pub urls: Vec<LinkVariant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_to_action: Option<String>,
    pub placements: Vec<PlacementRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<PageRefs>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MediaAsset {
    Image {
        hash: Option<String>,
        labels: Option<Value>,
    },
    Video {
        id: Option<String>,
        thumbnail: Option<String>,
        labels: Option<Value>,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct CreativeText {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LinkVariant {
    pub website: Option<String>,
    pub display: Option<String>,
    pub labels: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PlacementRule {
    pub priority: Option<i64>,
    pub platforms: Option<Value>,
    pub positions: PlacementPositions,
    pub age: AgeRange,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PlacementPositions {
    pub facebook: Option<Value>,
    pub instagram: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct AgeRange {
    pub min: Option<i64>,
    pub max: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PageRefs {
    pub facebook: Option<String>,
    pub instagram: Option<String>,
}

/// A creative with its normalized content.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CreativeMedia {
    pub id: Option<String>,
    pub name: Option<String>,
    pub content: CreativeContent,
}
