//! Flattens a creative's `asset_feed_spec` into [`CreativeContent`].

use serde_json::Value;

use crate::models::{
    AgeRange, CreativeContent, CreativeText, LinkVariant, MediaAsset, PageRefs,
    PlacementPositions, PlacementRule,
};

fn string(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

fn cloned(value: &Value, key: &str) -> Option<Value> {
    value.get(key).filter(|v| !v.is_null()).cloned()
}

fn items<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn first_text(spec: &Value, key: &str) -> Option<String> {
    items(spec, key).first().and_then(|item| string(item, "text"))
}

/// Reads `creative` without modifying it; every label array in the result is
/// an independent copy.
pub fn normalize_creative(creative: &Value) -> CreativeContent {
    let mut content = CreativeContent::default();

    if let Some(spec) = creative.get("asset_feed_spec").filter(|s| s.is_object()) {
        content.media.extend(items(spec, "images").iter().map(|image| MediaAsset::Image {
            hash: string(image, "hash"),
            labels: cloned(image, "adlabels"),
        }));
        content.media.extend(items(spec, "videos").iter().map(|video| MediaAsset::Video {
            id: string(video, "video_id"),
            thumbnail: string(video, "thumbnail_url"),
            labels: cloned(video, "adlabels"),
        }));

        content.text = CreativeText {
            title: first_text(spec, "titles"),
            body: first_text(spec, "bodies"),
            description: first_text(spec, "descriptions"),
        };

        content.urls = items(spec, "link_urls")
            .iter()
            .map(|url| LinkVariant {
                website: string(url, "website_url"),
                display: string(url, "display_url"),
                labels: cloned(url, "adlabels"),
            })
            .collect();

        content.call_to_action = items(spec, "call_to_action_types")
            .first()
            .and_then(Value::as_str)
            .map(str::to_string);

        content.placements = items(spec, "asset_customization_rules")
            .iter()
            .map(|rule| {
                let custom = rule.get("customization_spec").unwrap_or(&Value::Null);
                PlacementRule {
                    priority: rule.get("priority").and_then(Value::as_i64),
                    platforms: cloned(custom, "publisher_platforms"),
                    positions: PlacementPositions {
                        facebook: cloned(custom, "facebook_positions"),
                        instagram: cloned(custom, "instagram_positions"),
                    },
                    age: AgeRange {
                        min: custom.get("age_min").and_then(Value::as_i64),
                        max: custom.get("age_max").and_then(Value::as_i64),
                    },
                }
            })
            .collect();
    }

    if let Some(story) = creative.get("object_story_spec").filter(|s| s.is_object()) {
        content.pages = Some(PageRefs {
            facebook: string(story, "page_id"),
            instagram: string(story, "instagram_actor_id"),
        });
    }

    content
}
