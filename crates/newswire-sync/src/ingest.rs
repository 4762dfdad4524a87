use std::sync::Arc;

use newswire_adapters::{fingerprint, normalize_entry, FeedFetcher};
use newswire_core::NewItem;
use newswire_storage::{FetchError, ItemRepository, RetryDisposition, StorageError};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl IngestError {
    pub fn is_retryable(&self) -> bool {
        match self {
            IngestError::Fetch(err) => err.retry_disposition() == RetryDisposition::Retryable,
            IngestError::Storage(StorageError::Database(_)) => true,
            IngestError::Storage(_) => false,
        }
    }
}

/// Per-source tallies from one ingestion pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceIngest {
    pub new_items: usize,
    pub duplicates: usize,
    /// Entries without a title or link.
    pub skipped: usize,
    /// Entries whose insert failed. The rest of the feed is still processed.
    pub failed_items: usize,
}

pub struct IngestionCoordinator {
    fetcher: Arc<dyn FeedFetcher>,
    items: Arc<dyn ItemRepository>,
}

impl IngestionCoordinator {
    pub fn new(fetcher: Arc<dyn FeedFetcher>, items: Arc<dyn ItemRepository>) -> Self {
        Self { fetcher, items }
    }

    /// Fetches `url` and persists every entry not already stored for
    /// `source_id`. Fetch failures and failed existence checks abort the
    /// source; a failed insert only skips that entry.
    pub async fn ingest_source(
        &self,
        source_id: Uuid,
        tenant_id: Uuid,
        url: &str,
    ) -> Result<SourceIngest, IngestError> {
        let feed = self.fetcher.fetch(url).await?;
        let mut outcome = SourceIngest::default();

        for entry in &feed.entries {
            let Some(normalized) = normalize_entry(entry) else {
                outcome.skipped += 1;
                continue;
            };
            let fingerprint = fingerprint(&normalized.title, &normalized.link);

            if self.items.item_exists(&fingerprint, source_id).await? {
                outcome.duplicates += 1;
                continue;
            }

            let new_item = NewItem {
                source_id,
                tenant_id,
                title: normalized.title,
                original_content: normalized.body,
                url: normalized.link,
                image_url: normalized.image_url,
                published_at: normalized.published_at,
                fingerprint,
            };
            match self.items.create_item(new_item).await {
                Ok(Some(_)) => outcome.new_items += 1,
                Ok(None) => outcome.duplicates += 1,
                Err(err) => {
                    warn!(%source_id, error = %err, "failed to store feed entry");
                    outcome.failed_items += 1;
                }
            }
        }

        debug!(
            %source_id,
            new_items = outcome.new_items,
            duplicates = outcome.duplicates,
            skipped = outcome.skipped,
            failed_items = outcome.failed_items,
            "source ingested"
        );
        Ok(outcome)
    }

    /// Number of newly created items for the source.
    pub async fn fetch_from_source(
        &self,
        source_id: Uuid,
        tenant_id: Uuid,
        url: &str,
    ) -> Result<usize, IngestError> {
        Ok(self.ingest_source(source_id, tenant_id, url).await?.new_items)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use newswire_adapters::RawEntry;
    use newswire_storage::MemoryStore;

    use super::*;
    use crate::testing::{entry, FlakyItems, StubFetcher};

    const FEED_URL: &str = "https://example.com/feed";

    #[tokio::test]
    async fn second_run_over_unchanged_feed_adds_nothing() {
        let fetcher = StubFetcher::new().with_feed(
            FEED_URL,
            vec![entry("Rates rise", "https://example.com/a"), entry("Rates fall", "https://example.com/b")],
        );
        let store = Arc::new(MemoryStore::new());
        let coordinator = IngestionCoordinator::new(Arc::new(fetcher), store.clone());
        let (source, tenant) = (Uuid::new_v4(), Uuid::new_v4());

        assert_eq!(coordinator.fetch_from_source(source, tenant, FEED_URL).await.unwrap(), 2);
        let again = coordinator.ingest_source(source, tenant, FEED_URL).await.unwrap();
        assert_eq!(again.new_items, 0);
        assert_eq!(again.duplicates, 2);
        assert_eq!(store.item_count().await, 2);
    }

    #[tokio::test]
    async fn only_unseen_entries_are_created() {
        let existing = entry("Already stored", "https://example.com/old");
        let fetcher = StubFetcher::new().with_feed(
            FEED_URL,
            vec![existing.clone(), entry("Brand new", "https://example.com/new")],
        );
        let store = Arc::new(MemoryStore::new());
        let coordinator = IngestionCoordinator::new(Arc::new(fetcher), store.clone());
        let (source, tenant) = (Uuid::new_v4(), Uuid::new_v4());

        store
            .create_item(NewItem {
                source_id: source,
                tenant_id: tenant,
                title: "Already stored".to_string(),
                original_content: String::new(),
                url: "https://example.com/old".to_string(),
                image_url: None,
                published_at: None,
                fingerprint: fingerprint("Already stored", "https://example.com/old"),
            })
            .await
            .unwrap();

        let created = coordinator.fetch_from_source(source, tenant, FEED_URL).await.unwrap();
        assert_eq!(created, 1);
    }

    #[tokio::test]
    async fn entries_missing_title_or_link_are_skipped_silently() {
        let fetcher = StubFetcher::new().with_feed(
            FEED_URL,
            vec![
                RawEntry {
                    title: Some("No link".to_string()),
                    ..Default::default()
                },
                RawEntry {
                    link: Some("https://example.com/untitled".to_string()),
                    ..Default::default()
                },
                entry("Complete", "https://example.com/complete"),
            ],
        );
        let store = Arc::new(MemoryStore::new());
        let coordinator = IngestionCoordinator::new(Arc::new(fetcher), store.clone());

        let outcome = coordinator
            .ingest_source(Uuid::new_v4(), Uuid::new_v4(), FEED_URL)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            SourceIngest {
                new_items: 1,
                duplicates: 0,
                skipped: 2,
                failed_items: 0,
            }
        );
    }

    #[tokio::test]
    async fn stored_item_carries_normalized_fields() {
        let mut raw = entry("  Spaced title ", "https://example.com/n");
        raw.content = Some(r#"<p>Rates &amp; trends</p><img src="https://cdn.example.com/i.png">"#.to_string());
        raw.iso_date = Some("2024-03-01T12:00:00Z".to_string());
        let fetcher = StubFetcher::new().with_feed(FEED_URL, vec![raw]);
        let store = Arc::new(MemoryStore::new());
        let coordinator = IngestionCoordinator::new(Arc::new(fetcher), store.clone());
        let tenant = Uuid::new_v4();

        coordinator
            .fetch_from_source(Uuid::new_v4(), tenant, FEED_URL)
            .await
            .unwrap();
        let items = store
            .list_items(tenant, &Default::default())
            .await
            .unwrap();
        let item = &items[0];
        assert_eq!(item.title, "Spaced title");
        assert_eq!(item.original_content, "Rates & trends");
        assert_eq!(item.image_url.as_deref(), Some("https://cdn.example.com/i.png"));
        assert_eq!(item.status, newswire_core::ItemStatus::Pending);
        assert_eq!(item.fingerprint, fingerprint("Spaced title", "https://example.com/n"));
        assert!(item.published_at.is_some());
    }

    #[tokio::test]
    async fn fetch_failure_propagates_unchanged() {
        let fetcher = StubFetcher::new().with_failure(FEED_URL, 503);
        let coordinator = IngestionCoordinator::new(Arc::new(fetcher), Arc::new(MemoryStore::new()));
        let err = coordinator
            .fetch_from_source(Uuid::new_v4(), Uuid::new_v4(), FEED_URL)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Fetch(FetchError::HttpStatus { status: 503, .. })));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn failed_insert_skips_only_that_entry() {
        let fetcher = StubFetcher::new().with_feed(
            FEED_URL,
            vec![
                entry("First", "https://example.com/1"),
                entry("Poison", "https://example.com/2"),
                entry("Third", "https://example.com/3"),
            ],
        );
        let items = Arc::new(FlakyItems::new().fail_create_for("Poison"));
        let coordinator = IngestionCoordinator::new(Arc::new(fetcher), items.clone());

        let outcome = coordinator
            .ingest_source(Uuid::new_v4(), Uuid::new_v4(), FEED_URL)
            .await
            .unwrap();
        assert_eq!(outcome.new_items, 2);
        assert_eq!(outcome.failed_items, 1);
    }

    #[tokio::test]
    async fn failed_existence_check_fails_the_source() {
        let fetcher = StubFetcher::new().with_feed(FEED_URL, vec![entry("One", "https://example.com/1")]);
        let items = Arc::new(FlakyItems::new().fail_exists());
        let coordinator = IngestionCoordinator::new(Arc::new(fetcher), items.clone());

        let err = coordinator
            .ingest_source(Uuid::new_v4(), Uuid::new_v4(), FEED_URL)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Storage(_)));
    }

    #[tokio::test]
    async fn insert_race_counts_as_duplicate() {
        let fetcher = StubFetcher::new().with_feed(FEED_URL, vec![entry("Raced", "https://example.com/r")]);
        let items = Arc::new(FlakyItems::new().blind_exists());
        let (source, tenant) = (Uuid::new_v4(), Uuid::new_v4());
        let coordinator = IngestionCoordinator::new(Arc::new(fetcher), items.clone());

        coordinator.ingest_source(source, tenant, FEED_URL).await.unwrap();
        let second = coordinator.ingest_source(source, tenant, FEED_URL).await.unwrap();
        assert_eq!(second.new_items, 0);
        assert_eq!(second.duplicates, 1);
        assert_eq!(second.failed_items, 0);
        assert_eq!(items.exists_calls.load(Ordering::SeqCst), 2);
    }
}
