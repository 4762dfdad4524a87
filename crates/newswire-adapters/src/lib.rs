//! Feed fetching, entry normalization and dedup fingerprints.
//!
//! Everything here is I/O free except [`HttpFeedFetcher`], which wraps the
//! bounded [`HttpFetcher`] from `newswire-storage`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use newswire_storage::{FetchError, HttpFetcher};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

pub const CRATE_NAME: &str = "newswire-adapters";

/// One entry as delivered by a feed, before any cleanup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEntry {
    pub title: Option<String>,
    pub link: Option<String>,
    /// Full content (`content:encoded`, Atom `content`, or RSS `description`).
    pub content: Option<String>,
    pub content_snippet: Option<String>,
    /// RFC 3339 publish date.
    pub iso_date: Option<String>,
    /// Free-form date string, usually RFC 2822.
    pub pub_date: Option<String>,
    pub enclosure_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub entries: Vec<RawEntry>,
}

#[async_trait]
pub trait FeedFetcher: Send + Sync {
    /// Fetches and parses the feed at `url`. Exactly one attempt is made.
    async fn fetch(&self, url: &str) -> Result<ParsedFeed, FetchError>;
}

#[derive(Debug, Clone)]
pub struct HttpFeedFetcher {
    http: Arc<HttpFetcher>,
}

impl HttpFeedFetcher {
    pub fn new(http: Arc<HttpFetcher>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl FeedFetcher for HttpFeedFetcher {
    async fn fetch(&self, url: &str) -> Result<ParsedFeed, FetchError> {
        let response = self.http.fetch_bytes(url).await?;
        parse_feed(url, &response.body)
    }
}

/// Parses RSS, Atom or JSON Feed bytes into raw entries, preserving feed order.
pub fn parse_feed(url: &str, bytes: &[u8]) -> Result<ParsedFeed, FetchError> {
    let feed = feed_rs::parser::parse(bytes).map_err(|e| FetchError::Parse {
        url: url.to_string(),
        message: e.to_string(),
    })?;

    let entries = feed.entries.into_iter().map(raw_entry).collect::<Vec<_>>();
    debug!(url, entries = entries.len(), "parsed feed");

    Ok(ParsedFeed {
        title: feed.title.map(|t| t.content),
        entries,
    })
}

fn raw_entry(entry: feed_rs::model::Entry) -> RawEntry {
    let link = entry
        .links
        .iter()
        .find(|l| l.rel.as_deref().map_or(true, |rel| rel == "alternate"))
        .or_else(|| entry.links.first())
        .map(|l| l.href.clone());

    let enclosure_url = entry
        .media
        .iter()
        .flat_map(|m| m.content.iter())
        .find_map(|c| c.url.as_ref().map(|u| u.to_string()))
        .or_else(|| {
            entry
                .links
                .iter()
                .find(|l| l.rel.as_deref() == Some("enclosure"))
                .map(|l| l.href.clone())
        });

    let snippet = entry.summary.map(|s| s.content);
    let content = entry
        .content
        .and_then(|c| c.body)
        .or_else(|| snippet.clone());

    RawEntry {
        title: entry.title.map(|t| t.content),
        link,
        content,
        content_snippet: snippet,
        iso_date: entry.published.map(|d| d.to_rfc3339()),
        pub_date: entry.updated.map(|d| d.to_rfc2822()),
        enclosure_url,
    }
}

/// Canonical fields derived from a [`RawEntry`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedEntry {
    pub title: String,
    pub body: String,
    pub link: String,
    pub image_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("tag regex"));
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));
static IMG_SRC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<img[^>]+src="([^">]+)""#).expect("img regex"));

const ENTITIES: [(&str, &str); 6] = [
    ("&nbsp;", " "),
    ("&amp;", "&"),
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&quot;", "\""),
    ("&#39;", "'"),
];

fn text_or_none(value: Option<&str>) -> Option<String> {
    let trimmed = value?.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Returns `None` when the entry lacks a usable title or link.
pub fn normalize_entry(entry: &RawEntry) -> Option<NormalizedEntry> {
    let title = text_or_none(entry.title.as_deref())?;
    let link = text_or_none(entry.link.as_deref())?;

    let raw_body = entry
        .content
        .as_deref()
        .filter(|c| !c.is_empty())
        .or(entry.content_snippet.as_deref())
        .unwrap_or("");

    Some(NormalizedEntry {
        title,
        body: clean_body(raw_body),
        link,
        image_url: extract_image_url(entry),
        published_at: parse_published_at(entry.iso_date.as_deref(), entry.pub_date.as_deref()),
    })
}

/// Strips tags, decodes common entities and collapses whitespace.
pub fn clean_body(raw: &str) -> String {
    let mut text = TAG_RE.replace_all(raw, "").into_owned();
    for (entity, replacement) in ENTITIES {
        text = text.replace(entity, replacement);
    }
    WHITESPACE_RE.replace_all(&text, " ").trim().to_string()
}

/// Enclosure first, then the first `<img src>` in the unstripped content.
pub fn extract_image_url(entry: &RawEntry) -> Option<String> {
    if let Some(url) = text_or_none(entry.enclosure_url.as_deref()) {
        return Some(url);
    }
    let content = entry.content.as_deref()?;
    IMG_SRC_RE
        .captures(content)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Unparsable or missing dates yield `None`.
pub fn parse_published_at(iso_date: Option<&str>, pub_date: Option<&str>) -> Option<DateTime<Utc>> {
    if let Some(parsed) = iso_date.and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok()) {
        return Some(parsed.with_timezone(&Utc));
    }
    let fallback = pub_date?.trim();
    DateTime::parse_from_rfc2822(fallback)
        .or_else(|_| DateTime::parse_from_rfc3339(fallback))
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Hex sha256 of `"{title}-{link}"`. Used as the dedup key per source.
pub fn fingerprint(title: &str, link: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(b"-");
    hasher.update(link.as_bytes());
    hex::encode(hasher.finalize())
}
