//! Item status state machine and posted-link bookkeeping.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{Duration, Utc};
use newswire_core::{Item, ItemQuery, ItemStatus, ItemUpdate, NewsStats, PostedLink};
use newswire_storage::{
    ItemRepository, PostedLinkRepository, SourceRepository, StorageError, StorageResult,
};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

pub const DEFAULT_QUEUE_LIMIT: usize = 10;
pub const DEFAULT_RECENT_POSTED_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransitionPolicy {
    /// Only moves listed in [`ItemStatus::can_transition_to`].
    #[default]
    Strict,
    /// Any status may move to any other.
    Permissive,
}

impl TransitionPolicy {
    pub fn allows(self, from: ItemStatus, to: ItemStatus) -> bool {
        match self {
            TransitionPolicy::Strict => from.can_transition_to(to),
            TransitionPolicy::Permissive => true,
        }
    }
}

impl FromStr for TransitionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(TransitionPolicy::Strict),
            "permissive" => Ok(TransitionPolicy::Permissive),
            other => Err(format!("unknown transition policy {other:?}")),
        }
    }
}

#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("item status cannot move from {from} to {to}")]
    Forbidden { from: ItemStatus, to: ItemStatus },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub struct LifecycleManager {
    sources: Arc<dyn SourceRepository>,
    items: Arc<dyn ItemRepository>,
    posted: Arc<dyn PostedLinkRepository>,
    policy: TransitionPolicy,
}

impl LifecycleManager {
    pub fn new(
        sources: Arc<dyn SourceRepository>,
        items: Arc<dyn ItemRepository>,
        posted: Arc<dyn PostedLinkRepository>,
        policy: TransitionPolicy,
    ) -> Self {
        Self {
            sources,
            items,
            posted,
            policy,
        }
    }

    pub fn policy(&self) -> TransitionPolicy {
        self.policy
    }

    async fn checked_item(
        &self,
        item_id: Uuid,
        tenant_id: Uuid,
        next: ItemStatus,
    ) -> Result<Item, TransitionError> {
        let item = self.items.get_item(item_id, tenant_id).await?;
        if !self.policy.allows(item.status, next) {
            return Err(TransitionError::Forbidden {
                from: item.status,
                to: next,
            });
        }
        Ok(item)
    }

    pub async fn update_status(
        &self,
        item_id: Uuid,
        tenant_id: Uuid,
        status: ItemStatus,
    ) -> Result<Item, TransitionError> {
        let current = self.checked_item(item_id, tenant_id, status).await?;
        let item = self
            .items
            .update_item_status(item_id, tenant_id, status)
            .await?;
        info!(%item_id, from = %current.status, to = %status, "item status updated");
        Ok(item)
    }

    /// Stores enhanced content, flags the item as AI enhanced and moves it to
    /// ENHANCED.
    pub async fn record_enhancement(
        &self,
        item_id: Uuid,
        tenant_id: Uuid,
        enhanced_content: impl Into<String>,
    ) -> Result<Item, TransitionError> {
        self.checked_item(item_id, tenant_id, ItemStatus::Enhanced)
            .await?;
        let update = ItemUpdate {
            enhanced_content: Some(enhanced_content.into()),
            status: Some(ItemStatus::Enhanced),
            ai_enhanced: Some(true),
        };
        Ok(self.items.update_item(item_id, tenant_id, update).await?)
    }

    /// Forces the item to POSTED, then records the link. The two writes are
    /// not transactional; callers retry the whole operation on failure.
    pub async fn mark_posted(
        &self,
        item_id: Uuid,
        post_id: &str,
        tenant_id: Uuid,
    ) -> StorageResult<PostedLink> {
        self.items
            .update_item_status(item_id, tenant_id, ItemStatus::Posted)
            .await?;
        let link = self
            .posted
            .create_posted_link(item_id, post_id, tenant_id)
            .await?;
        info!(%item_id, post_id, "item marked as posted");
        Ok(link)
    }

    pub async fn pending_items(&self, tenant_id: Uuid, limit: Option<usize>) -> StorageResult<Vec<Item>> {
        self.items
            .items_with_status(
                tenant_id,
                ItemStatus::Pending,
                limit.unwrap_or(DEFAULT_QUEUE_LIMIT),
            )
            .await
    }

    pub async fn enhanced_items(&self, tenant_id: Uuid, limit: Option<usize>) -> StorageResult<Vec<Item>> {
        self.items
            .items_with_status(
                tenant_id,
                ItemStatus::Enhanced,
                limit.unwrap_or(DEFAULT_QUEUE_LIMIT),
            )
            .await
    }

    pub async fn posted_links(&self, item_id: Uuid) -> StorageResult<Vec<PostedLink>> {
        self.posted.posted_links_for_item(item_id).await
    }

    pub async fn links_for_post(&self, post_id: &str) -> StorageResult<Vec<PostedLink>> {
        self.posted.posted_links_for_post(post_id).await
    }

    pub async fn is_posted(&self, item_id: Uuid) -> StorageResult<bool> {
        Ok(!self.posted.posted_links_for_item(item_id).await?.is_empty())
    }

    pub async fn recent_posted(&self, tenant_id: Uuid, days: Option<i64>) -> StorageResult<Vec<PostedLink>> {
        let days = days.unwrap_or(DEFAULT_RECENT_POSTED_DAYS).max(0);
        let since = Utc::now() - Duration::days(days);
        self.posted.recent_posted_links(tenant_id, since).await
    }

    pub async fn stats(&self, tenant_id: Uuid) -> StorageResult<NewsStats> {
        let sources = self.sources.list_sources(tenant_id).await?;
        let count = |status| ItemQuery {
            status: Some(status),
            ..Default::default()
        };
        Ok(NewsStats {
            total_sources: sources.len(),
            active_sources: sources.iter().filter(|s| s.active).count(),
            pending_items: self.items.count_items(tenant_id, &count(ItemStatus::Pending)).await?,
            enhanced_items: self.items.count_items(tenant_id, &count(ItemStatus::Enhanced)).await?,
            posted_count: self.items.count_items(tenant_id, &count(ItemStatus::Posted)).await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use newswire_core::{NewItem, NewSource};
    use newswire_storage::MemoryStore;

    use super::*;

    fn manager(store: &Arc<MemoryStore>, policy: TransitionPolicy) -> LifecycleManager {
        LifecycleManager::new(store.clone(), store.clone(), store.clone(), policy)
    }

    async fn seed_item(store: &MemoryStore, tenant_id: Uuid, fingerprint: &str) -> Item {
        store
            .create_item(NewItem {
                source_id: Uuid::new_v4(),
                tenant_id,
                title: format!("Item {fingerprint}"),
                original_content: "Body".to_string(),
                url: format!("https://example.com/{fingerprint}"),
                image_url: None,
                published_at: None,
                fingerprint: fingerprint.to_string(),
            })
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn posting_forces_posted_status() {
        let store = Arc::new(MemoryStore::new());
        let tenant = Uuid::new_v4();
        let item = seed_item(&store, tenant, "post-me").await;
        let lifecycle = manager(&store, TransitionPolicy::Strict);

        let link = lifecycle.mark_posted(item.id, "post-42", tenant).await.unwrap();
        assert_eq!(link.item_id, item.id);
        assert_eq!(link.post_id, "post-42");

        let stored = store.get_item(item.id, tenant).await.unwrap();
        assert_eq!(stored.status, ItemStatus::Posted);
        assert!(lifecycle.is_posted(item.id).await.unwrap());
        assert_eq!(lifecycle.recent_posted(tenant, None).await.unwrap().len(), 1);

        let by_post = lifecycle.links_for_post("post-42").await.unwrap();
        assert_eq!(by_post.len(), 1);
        assert_eq!(by_post[0].item_id, item.id);
    }

    #[tokio::test]
    async fn strict_policy_rejects_reopening_posted_items() {
        let store = Arc::new(MemoryStore::new());
        let tenant = Uuid::new_v4();
        let item = seed_item(&store, tenant, "final").await;
        let strict = manager(&store, TransitionPolicy::Strict);
        strict.mark_posted(item.id, "post-1", tenant).await.unwrap();

        let err = strict
            .update_status(item.id, tenant, ItemStatus::Pending)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransitionError::Forbidden {
                from: ItemStatus::Posted,
                to: ItemStatus::Pending
            }
        ));

        let permissive = manager(&store, TransitionPolicy::Permissive);
        let reopened = permissive
            .update_status(item.id, tenant, ItemStatus::Pending)
            .await
            .unwrap();
        assert_eq!(reopened.status, ItemStatus::Pending);
    }

    #[tokio::test]
    async fn enhancement_moves_item_to_enhanced() {
        let store = Arc::new(MemoryStore::new());
        let tenant = Uuid::new_v4();
        let item = seed_item(&store, tenant, "enhance").await;
        let lifecycle = manager(&store, TransitionPolicy::Strict);

        let enhanced = lifecycle
            .record_enhancement(item.id, tenant, "Sharper copy")
            .await
            .unwrap();
        assert_eq!(enhanced.status, ItemStatus::Enhanced);
        assert!(enhanced.ai_enhanced);
        assert_eq!(enhanced.enhanced_content.as_deref(), Some("Sharper copy"));

        assert!(lifecycle.pending_items(tenant, None).await.unwrap().is_empty());
        assert_eq!(lifecycle.enhanced_items(tenant, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_item_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let lifecycle = manager(&store, TransitionPolicy::Strict);
        let err = lifecycle
            .update_status(Uuid::new_v4(), Uuid::new_v4(), ItemStatus::Skipped)
            .await
            .unwrap_err();
        assert!(matches!(err, TransitionError::Storage(ref e) if e.is_not_found()));
    }

    #[tokio::test]
    async fn pending_queue_is_newest_first_and_limited() {
        let store = Arc::new(MemoryStore::new());
        let tenant = Uuid::new_v4();
        let source_id = Uuid::new_v4();
        let base = Utc::now() - ChronoDuration::hours(1);
        for n in 0..12 {
            let item = NewItem {
                source_id,
                tenant_id: tenant,
                title: format!("Item {n}"),
                original_content: String::new(),
                url: format!("https://example.com/{n}"),
                image_url: None,
                published_at: None,
                fingerprint: format!("fp-{n}"),
            }
            .into_item(base + ChronoDuration::minutes(n));
            store.insert_item(item).await;
        }
        let lifecycle = manager(&store, TransitionPolicy::Strict);

        let queue = lifecycle.pending_items(tenant, None).await.unwrap();
        assert_eq!(queue.len(), DEFAULT_QUEUE_LIMIT);
        assert_eq!(queue[0].fingerprint, "fp-11");
        assert_eq!(queue[9].fingerprint, "fp-2");

        let short = lifecycle.pending_items(tenant, Some(3)).await.unwrap();
        assert_eq!(short.len(), 3);
    }

    #[tokio::test]
    async fn stats_count_sources_and_statuses() {
        let store = Arc::new(MemoryStore::new());
        let tenant = Uuid::new_v4();
        store
            .create_source(tenant, NewSource::new("Freddie Mac", "https://www.freddiemac.com/rss/news.xml"))
            .await
            .unwrap();
        let paused = store
            .create_source(tenant, NewSource::new("MBA NewsLink", "https://www.mba.org/rss/newslink"))
            .await
            .unwrap();
        store.toggle_source(paused.id, tenant, false).await.unwrap();

        let lifecycle = manager(&store, TransitionPolicy::Strict);
        let first = seed_item(&store, tenant, "one").await;
        seed_item(&store, tenant, "two").await;
        let third = seed_item(&store, tenant, "three").await;
        lifecycle.record_enhancement(first.id, tenant, "better").await.unwrap();
        lifecycle.mark_posted(third.id, "post-9", tenant).await.unwrap();

        let stats = lifecycle.stats(tenant).await.unwrap();
        assert_eq!(
            stats,
            NewsStats {
                total_sources: 2,
                active_sources: 1,
                pending_items: 1,
                enhanced_items: 1,
                posted_count: 1,
            }
        );
    }

    #[test]
    fn policy_parses_from_text() {
        assert_eq!("STRICT".parse::<TransitionPolicy>(), Ok(TransitionPolicy::Strict));
        assert_eq!(" permissive ".parse::<TransitionPolicy>(), Ok(TransitionPolicy::Permissive));
        assert!("loose".parse::<TransitionPolicy>().is_err());
    }
}
