//! Test doubles shared by the sync unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use newswire_adapters::{FeedFetcher, ParsedFeed, RawEntry};
use newswire_core::{Item, ItemQuery, ItemUpdate, NewItem};
use newswire_storage::{FetchError, ItemRepository, MemoryStore, StorageError, StorageResult};
use uuid::Uuid;

pub fn entry(title: &str, link: &str) -> RawEntry {
    RawEntry {
        title: Some(title.to_string()),
        link: Some(link.to_string()),
        content: Some(format!("<p>{title}</p>")),
        ..Default::default()
    }
}

enum StubFeed {
    Entries(Vec<RawEntry>),
    Status(u16),
    Hang,
}

#[derive(Default)]
pub struct StubFetcher {
    feeds: HashMap<String, StubFeed>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub calls: AtomicUsize,
}

impl StubFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_feed(mut self, url: &str, entries: Vec<RawEntry>) -> Self {
        self.feeds.insert(url.to_string(), StubFeed::Entries(entries));
        self
    }

    pub fn with_failure(mut self, url: &str, status: u16) -> Self {
        self.feeds.insert(url.to_string(), StubFeed::Status(status));
        self
    }

    pub fn with_hang(mut self, url: &str) -> Self {
        self.feeds.insert(url.to_string(), StubFeed::Hang);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl FeedFetcher for StubFetcher {
    async fn fetch(&self, url: &str) -> Result<ParsedFeed, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let result = match self.feeds.get(url) {
            Some(StubFeed::Entries(entries)) => Ok(ParsedFeed {
                title: Some(format!("Feed at {url}")),
                entries: entries.clone(),
            }),
            Some(StubFeed::Status(status)) => Err(FetchError::HttpStatus {
                status: *status,
                url: url.to_string(),
            }),
            Some(StubFeed::Hang) => {
                tokio::time::sleep(Duration::from_secs(3_600)).await;
                Ok(ParsedFeed::default())
            }
            None => Err(FetchError::HttpStatus {
                status: 404,
                url: url.to_string(),
            }),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Item repository over [`MemoryStore`] with injectable failures.
#[derive(Default)]
pub struct FlakyItems {
    inner: MemoryStore,
    fail_create_title: Option<String>,
    fail_exists: bool,
    blind_exists: bool,
    pub exists_calls: AtomicUsize,
}

impl FlakyItems {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_create_for(mut self, title: &str) -> Self {
        self.fail_create_title = Some(title.to_string());
        self
    }

    pub fn fail_exists(mut self) -> Self {
        self.fail_exists = true;
        self
    }

    /// Existence checks always report "absent", leaving dedup to the insert.
    pub fn blind_exists(mut self) -> Self {
        self.blind_exists = true;
        self
    }

    fn simulated() -> StorageError {
        StorageError::Corrupt {
            column: "news_items",
            message: "simulated failure".to_string(),
        }
    }
}

#[async_trait]
impl ItemRepository for FlakyItems {
    async fn item_exists(&self, fingerprint: &str, source_id: Uuid) -> StorageResult<bool> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_exists {
            return Err(Self::simulated());
        }
        if self.blind_exists {
            return Ok(false);
        }
        self.inner.item_exists(fingerprint, source_id).await
    }

    async fn create_item(&self, new: NewItem) -> StorageResult<Option<Item>> {
        if self.fail_create_title.as_deref() == Some(new.title.as_str()) {
            return Err(Self::simulated());
        }
        self.inner.create_item(new).await
    }

    async fn find_item(&self, id: Uuid) -> StorageResult<Option<Item>> {
        self.inner.find_item(id).await
    }

    async fn list_items(&self, tenant_id: Uuid, query: &ItemQuery) -> StorageResult<Vec<Item>> {
        self.inner.list_items(tenant_id, query).await
    }

    async fn count_items(&self, tenant_id: Uuid, query: &ItemQuery) -> StorageResult<u64> {
        self.inner.count_items(tenant_id, query).await
    }

    async fn update_item(&self, id: Uuid, tenant_id: Uuid, update: ItemUpdate) -> StorageResult<Item> {
        self.inner.update_item(id, tenant_id, update).await
    }

    async fn delete_item(&self, id: Uuid, tenant_id: Uuid) -> StorageResult<()> {
        self.inner.delete_item(id, tenant_id).await
    }
}
