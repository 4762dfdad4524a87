//! Persistence and HTTP plumbing for newswire.
//!
//! Repositories are expressed as traits so the ingestion pipeline can run
//! against Postgres in production and [`MemoryStore`] in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use newswire_core::{
    Item, ItemQuery, ItemStatus, ItemUpdate, NewItem, NewSource, PostedLink, Source,
    SourceUpdate, ValidationError,
};
use thiserror::Error;
use uuid::Uuid;

pub mod http;
pub mod memory;
pub mod postgres;

pub use http::{
    classify_reqwest_error, classify_status, FetchError, FetchedResponse, HttpClientConfig,
    HttpFetcher, RetryDisposition,
};
pub use memory::MemoryStore;
pub use postgres::PgStore;

pub const CRATE_NAME: &str = "newswire-storage";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("corrupt {column} value: {message}")]
    Corrupt {
        column: &'static str,
        message: String,
    },
}

impl StorageError {
    pub fn source_not_found(id: Uuid) -> Self {
        StorageError::NotFound {
            entity: "source",
            id,
        }
    }

    pub fn item_not_found(id: Uuid) -> Self {
        StorageError::NotFound { entity: "item", id }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait SourceRepository: Send + Sync {
    async fn create_source(&self, tenant_id: Uuid, new: NewSource) -> StorageResult<Source>;

    /// Returns the source when it exists, belongs to `tenant_id` and is not deleted.
    async fn get_source(&self, id: Uuid, tenant_id: Uuid) -> StorageResult<Source>;

    /// Every non-deleted source of a tenant, newest first.
    async fn list_sources(&self, tenant_id: Uuid) -> StorageResult<Vec<Source>>;

    /// Active, non-deleted sources. `None` spans every tenant.
    async fn list_active_sources(&self, tenant_id: Option<Uuid>) -> StorageResult<Vec<Source>>;

    async fn update_source(
        &self,
        id: Uuid,
        tenant_id: Uuid,
        update: SourceUpdate,
    ) -> StorageResult<Source>;

    async fn toggle_source(&self, id: Uuid, tenant_id: Uuid, active: bool) -> StorageResult<Source> {
        self.update_source(
            id,
            tenant_id,
            SourceUpdate {
                active: Some(active),
                ..Default::default()
            },
        )
        .await
    }

    /// Soft delete. The row stays so existing items keep their source.
    async fn delete_source(&self, id: Uuid, tenant_id: Uuid) -> StorageResult<()>;

    async fn update_source_last_fetched(&self, id: Uuid, at: DateTime<Utc>) -> StorageResult<()>;
}

#[async_trait]
pub trait ItemRepository: Send + Sync {
    async fn item_exists(&self, fingerprint: &str, source_id: Uuid) -> StorageResult<bool>;

    /// Inserts the item unless `(fingerprint, source_id)` is already stored.
    /// A lost race against a concurrent insert yields `Ok(None)`.
    async fn create_item(&self, new: NewItem) -> StorageResult<Option<Item>>;

    async fn find_item(&self, id: Uuid) -> StorageResult<Option<Item>>;

    async fn get_item(&self, id: Uuid, tenant_id: Uuid) -> StorageResult<Item> {
        match self.find_item(id).await? {
            Some(item) if item.tenant_id == tenant_id && item.deleted_at.is_none() => Ok(item),
            _ => Err(StorageError::item_not_found(id)),
        }
    }

    /// Newest fetched first, paginated by `query`.
    async fn list_items(&self, tenant_id: Uuid, query: &ItemQuery) -> StorageResult<Vec<Item>>;

    async fn count_items(&self, tenant_id: Uuid, query: &ItemQuery) -> StorageResult<u64>;

    async fn items_with_status(
        &self,
        tenant_id: Uuid,
        status: ItemStatus,
        limit: usize,
    ) -> StorageResult<Vec<Item>> {
        let query = ItemQuery {
            status: Some(status),
            limit,
            ..Default::default()
        };
        self.list_items(tenant_id, &query).await
    }

    async fn update_item(&self, id: Uuid, tenant_id: Uuid, update: ItemUpdate) -> StorageResult<Item>;

    async fn update_item_status(
        &self,
        id: Uuid,
        tenant_id: Uuid,
        status: ItemStatus,
    ) -> StorageResult<Item> {
        self.update_item(
            id,
            tenant_id,
            ItemUpdate {
                status: Some(status),
                ..Default::default()
            },
        )
        .await
    }

    async fn delete_item(&self, id: Uuid, tenant_id: Uuid) -> StorageResult<()>;
}

#[async_trait]
pub trait PostedLinkRepository: Send + Sync {
    /// Records `(item_id, post_id)`. Recording the same pair twice returns the
    /// existing link.
    async fn create_posted_link(
        &self,
        item_id: Uuid,
        post_id: &str,
        tenant_id: Uuid,
    ) -> StorageResult<PostedLink>;

    async fn posted_links_for_item(&self, item_id: Uuid) -> StorageResult<Vec<PostedLink>>;

    /// Every item published under `post_id`.
    async fn posted_links_for_post(&self, post_id: &str) -> StorageResult<Vec<PostedLink>>;

    /// Links posted at or after `since`, newest first.
    async fn recent_posted_links(
        &self,
        tenant_id: Uuid,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<PostedLink>>;
}

/// Convenience bound for stores that implement every repository.
pub trait NewsStore: SourceRepository + ItemRepository + PostedLinkRepository {}

impl<T> NewsStore for T where T: SourceRepository + ItemRepository + PostedLinkRepository {}
