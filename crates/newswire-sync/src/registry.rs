use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use newswire_core::NewSource;
use newswire_storage::SourceRepository;
use serde::Deserialize;
use tokio::fs;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<RegistryEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryEntry {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub fetch_interval_secs: Option<u64>,
}

impl RegistryEntry {
    pub fn to_new_source(&self) -> NewSource {
        let mut source = NewSource::new(self.name.clone(), self.url.clone());
        if let Some(category) = &self.category {
            source = source.with_category(category.clone());
        }
        source.fetch_interval_secs = self.fetch_interval_secs;
        source
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub created: usize,
    pub already_present: usize,
    pub rejected: usize,
}

impl SourceRegistry {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("parsing source registry yaml")
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn by_category<'a>(&'a self, category: &'a str) -> impl Iterator<Item = &'a RegistryEntry> + 'a {
        self.sources
            .iter()
            .filter(move |entry| entry.category.as_deref() == Some(category))
    }

    /// Distinct categories in first-seen order.
    pub fn categories(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for category in self.sources.iter().filter_map(|e| e.category.as_deref()) {
            if !seen.contains(&category) {
                seen.push(category);
            }
        }
        seen
    }

    /// Creates every registry source the tenant does not already have (matched
    /// by URL), optionally limited to one category. Entries that fail
    /// validation are logged and counted.
    pub async fn seed(
        &self,
        repo: &dyn SourceRepository,
        tenant_id: Uuid,
        category: Option<&str>,
    ) -> Result<SeedSummary> {
        let existing = repo
            .list_sources(tenant_id)
            .await
            .context("listing tenant sources")?
            .into_iter()
            .map(|s| s.url)
            .collect::<HashSet<_>>();

        let mut summary = SeedSummary::default();
        let selected = self
            .sources
            .iter()
            .filter(|entry| category.map_or(true, |c| entry.category.as_deref() == Some(c)));
        for entry in selected {
            if existing.contains(entry.url.trim()) {
                summary.already_present += 1;
                continue;
            }
            if let Err(err) = entry.to_new_source().validate() {
                warn!(name = %entry.name, url = %entry.url, error = %err, "skipping invalid registry source");
                summary.rejected += 1;
                continue;
            }
            repo.create_source(tenant_id, entry.to_new_source())
                .await
                .with_context(|| format!("creating source {}", entry.name))?;
            summary.created += 1;
        }

        info!(
            %tenant_id,
            category = category.unwrap_or("*"),
            created = summary.created,
            already_present = summary.already_present,
            rejected = summary.rejected,
            "source registry seeded"
        );
        Ok(summary)
    }
}
