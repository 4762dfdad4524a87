//! Core domain model for the newswire feed aggregator.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

pub const CRATE_NAME: &str = "newswire-core";

pub const MIN_FETCH_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_FETCH_INTERVAL_SECS: u64 = 3_600;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid feed url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("feed url {url} must use http or https, got {scheme}")]
    UnsupportedScheme { url: String, scheme: String },
    #[error("fetch interval {secs}s is below the {min}s minimum", min = MIN_FETCH_INTERVAL_SECS)]
    FetchIntervalTooShort { secs: u64 },
    #[error("source name must not be empty")]
    EmptyName,
    #[error("unknown item status {0:?}")]
    UnknownStatus(String),
}

/// Checks that `raw` is a well-formed absolute http(s) URL with a host.
pub fn validate_feed_url(raw: &str) -> Result<Url, ValidationError> {
    let parsed = Url::parse(raw.trim()).map_err(|e| ValidationError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ValidationError::UnsupportedScheme {
            url: raw.to_string(),
            scheme: parsed.scheme().to_string(),
        });
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(ValidationError::InvalidUrl {
            url: raw.to_string(),
            reason: "missing host".to_string(),
        });
    }
    Ok(parsed)
}

fn validate_fetch_interval(secs: u64) -> Result<(), ValidationError> {
    if secs < MIN_FETCH_INTERVAL_SECS {
        return Err(ValidationError::FetchIntervalTooShort { secs });
    }
    Ok(())
}

/// A configured feed endpoint owned by one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub url: String,
    pub category: Option<String>,
    pub active: bool,
    pub fetch_interval_secs: u64,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Source {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Whether the fleet aggregator should pick this source up.
    pub fn is_fetchable(&self) -> bool {
        self.active && !self.is_deleted()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSource {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub fetch_interval_secs: Option<u64>,
}

impl NewSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            category: None,
            fetch_interval_secs: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }
        validate_feed_url(&self.url)?;
        if let Some(secs) = self.fetch_interval_secs {
            validate_fetch_interval(secs)?;
        }
        Ok(())
    }

    pub fn effective_fetch_interval_secs(&self) -> u64 {
        self.fetch_interval_secs.unwrap_or(DEFAULT_FETCH_INTERVAL_SECS)
    }

    pub fn into_source(self, tenant_id: Uuid, created_at: DateTime<Utc>) -> Source {
        let fetch_interval_secs = self.effective_fetch_interval_secs();
        Source {
            id: Uuid::new_v4(),
            tenant_id,
            name: self.name.trim().to_string(),
            url: self.url.trim().to_string(),
            category: self.category,
            active: true,
            fetch_interval_secs,
            last_fetched_at: None,
            created_at,
            deleted_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceUpdate {
    pub name: Option<String>,
    pub url: Option<String>,
    pub category: Option<String>,
    pub active: Option<bool>,
    pub fetch_interval_secs: Option<u64>,
}

impl SourceUpdate {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(ValidationError::EmptyName);
            }
        }
        if let Some(url) = &self.url {
            validate_feed_url(url)?;
        }
        if let Some(secs) = self.fetch_interval_secs {
            validate_fetch_interval(secs)?;
        }
        Ok(())
    }

    pub fn apply_to(&self, source: &mut Source) {
        if let Some(name) = &self.name {
            source.name = name.trim().to_string();
        }
        if let Some(url) = &self.url {
            source.url = url.trim().to_string();
        }
        if let Some(category) = &self.category {
            source.category = Some(category.clone());
        }
        if let Some(active) = self.active {
            source.active = active;
        }
        if let Some(secs) = self.fetch_interval_secs {
            source.fetch_interval_secs = secs;
        }
    }
}

/// Lifecycle state of an ingested item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus {
    Pending,
    Enhanced,
    Scheduled,
    Posted,
    Skipped,
    Error,
}

impl ItemStatus {
    pub const ALL: [ItemStatus; 6] = [
        ItemStatus::Pending,
        ItemStatus::Enhanced,
        ItemStatus::Scheduled,
        ItemStatus::Posted,
        ItemStatus::Skipped,
        ItemStatus::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ItemStatus::Pending => "PENDING",
            ItemStatus::Enhanced => "ENHANCED",
            ItemStatus::Scheduled => "SCHEDULED",
            ItemStatus::Posted => "POSTED",
            ItemStatus::Skipped => "SKIPPED",
            ItemStatus::Error => "ERROR",
        }
    }

    /// Allow-list used by the strict transition policy. Staying in the same
    /// state is always allowed. SKIPPED and ERROR can be reopened by an
    /// operator; POSTED is final.
    pub fn can_transition_to(self, next: ItemStatus) -> bool {
        use ItemStatus::*;
        if self == next {
            return true;
        }
        match self {
            Pending => matches!(next, Enhanced | Scheduled | Skipped | Error),
            Enhanced => matches!(next, Scheduled | Skipped | Error),
            Scheduled => matches!(next, Posted | Enhanced | Skipped | Error),
            Skipped => matches!(next, Pending),
            Error => matches!(next, Pending | Skipped),
            Posted => false,
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ItemStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ValidationError::UnknownStatus(s.to_string()))
    }
}

/// One normalized piece of content derived from a feed entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub source_id: Uuid,
    pub title: String,
    pub original_content: String,
    pub enhanced_content: Option<String>,
    pub url: String,
    pub image_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
    pub status: ItemStatus,
    pub fingerprint: String,
    pub ai_enhanced: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Insert contract handed from ingestion to storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewItem {
    pub source_id: Uuid,
    pub tenant_id: Uuid,
    pub title: String,
    pub original_content: String,
    pub url: String,
    pub image_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub fingerprint: String,
}

impl NewItem {
    pub fn into_item(self, fetched_at: DateTime<Utc>) -> Item {
        Item {
            id: Uuid::new_v4(),
            tenant_id: self.tenant_id,
            source_id: self.source_id,
            title: self.title,
            original_content: self.original_content,
            enhanced_content: None,
            url: self.url,
            image_url: self.image_url,
            published_at: self.published_at,
            fetched_at,
            status: ItemStatus::Pending,
            fingerprint: self.fingerprint,
            ai_enhanced: false,
            deleted_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemUpdate {
    pub enhanced_content: Option<String>,
    pub status: Option<ItemStatus>,
    pub ai_enhanced: Option<bool>,
}

impl ItemUpdate {
    pub fn apply_to(&self, item: &mut Item) {
        if let Some(content) = &self.enhanced_content {
            item.enhanced_content = Some(content.clone());
        }
        if let Some(status) = self.status {
            item.status = status;
        }
        if let Some(ai_enhanced) = self.ai_enhanced {
            item.ai_enhanced = ai_enhanced;
        }
    }
}

/// Filter + pagination for item listings. Pages are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemQuery {
    pub status: Option<ItemStatus>,
    pub source_id: Option<Uuid>,
    pub page: usize,
    pub limit: usize,
}

impl Default for ItemQuery {
    fn default() -> Self {
        Self {
            status: None,
            source_id: None,
            page: 1,
            limit: 20,
        }
    }
}

impl ItemQuery {
    pub fn offset(&self) -> usize {
        self.page.max(1).saturating_sub(1).saturating_mul(self.limit)
    }

    pub fn matches(&self, item: &Item) -> bool {
        self.status.map_or(true, |s| item.status == s)
            && self.source_id.map_or(true, |s| item.source_id == s)
    }
}

/// Records that an item resulted in a published post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostedLink {
    pub id: Uuid,
    pub item_id: Uuid,
    pub post_id: String,
    pub tenant_id: Uuid,
    pub posted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFailure {
    pub source_id: Uuid,
    pub source_name: String,
    pub error: String,
}

/// Aggregate outcome of one fetch cycle. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub new_items: usize,
    pub failures: Vec<SourceFailure>,
}

impl RunReport {
    pub fn empty(run_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: started_at,
            total: 0,
            successful: 0,
            failed: 0,
            new_items: 0,
            failures: Vec::new(),
        }
    }
}

/// Result of a non-persisting dry run against a feed URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedProbe {
    pub valid: bool,
    pub item_count: Option<usize>,
    pub feed_title: Option<String>,
    pub error: Option<String>,
}

impl FeedProbe {
    pub fn valid(item_count: usize, feed_title: Option<String>) -> Self {
        Self {
            valid: true,
            item_count: Some(item_count),
            feed_title,
            error: None,
        }
    }

    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            item_count: None,
            feed_title: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsStats {
    pub total_sources: usize,
    pub active_sources: usize,
    pub pending_items: u64,
    pub enhanced_items: u64,
    pub posted_count: u64,
}
