//! Index of everything written to the output directory, keyed by campaign id.
//!
//! Later commands (the text pusher) resolve a campaign's ads through this
//! file instead of scanning the directory for the newest matching name.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::output::{self, OutputError};

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    #[serde(default)]
    pub campaigns: BTreeMap<String, CampaignEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CampaignEntry {
    pub name: String,
    #[serde(default)]
    pub details_path: Option<PathBuf>,
    #[serde(default)]
    pub insights_paths: Vec<PathBuf>,
    #[serde(default)]
    pub ads: Vec<AdEntry>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdEntry {
    pub id: String,
    pub name: String,
}

impl Manifest {
    pub fn path(dir: &Path) -> PathBuf {
        dir.join(MANIFEST_FILE)
    }

    /// Loads the manifest from `dir`; a missing file is an empty manifest.
    pub async fn load(dir: &Path) -> Result<Self, OutputError> {
        let path = Self::path(dir);
        if fs::try_exists(&path).await? {
            output::read_json(&path).await
        } else {
            Ok(Self::default())
        }
    }

    /// Writes to a sibling temp file and renames it over the manifest.
    pub async fn save(&self, dir: &Path) -> Result<(), OutputError> {
        let path = Self::path(dir);
        let tmp = dir.join(format!("{MANIFEST_FILE}.tmp"));
        output::write_json(&tmp, self).await?;
        fs::rename(&tmp, &path).await?;
        debug!(path = %path.display(), campaigns = self.campaigns.len(), "Manifest saved");
        Ok(())
    }

    pub fn campaign(&self, campaign_id: &str) -> Option<&CampaignEntry> {
        self.campaigns.get(campaign_id)
    }

    fn entry(&mut self, campaign_id: &str, name: &str) -> &mut CampaignEntry {
        let entry = self
            .campaigns
            .entry(campaign_id.to_string())
            .or_insert_with(|| CampaignEntry {
                name: name.to_string(),
                details_path: None,
                insights_paths: Vec::new(),
                ads: Vec::new(),
                updated_at: Utc::now(),
            });
        if !name.is_empty() {
            entry.name = name.to_string();
        }
        entry.updated_at = Utc::now();
        entry
    }

    /// Points the campaign at its latest details file and ad list.
    pub fn record_details(&mut self, campaign_id: &str, name: &str, path: PathBuf, ads: Vec<AdEntry>) {
        let entry = self.entry(campaign_id, name);
        entry.details_path = Some(path);
        entry.ads = ads;
    }

    pub fn record_insights(&mut self, campaign_id: &str, name: &str, path: PathBuf) {
        let entry = self.entry(campaign_id, name);
        if !entry.insights_paths.contains(&path) {
            entry.insights_paths.push(path);
        }
    }
}

/// Load, apply `update`, save. Used by writers that only touch one entry.
pub async fn update<F>(dir: &Path, update: F) -> Result<(), OutputError>
where
    F: FnOnce(&mut Manifest),
{
    let mut manifest = Manifest::load(dir).await?;
    update(&mut manifest);
    manifest.save(dir).await
}
