//! Postgres-backed repositories.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use newswire_core::{
    Item, ItemQuery, ItemStatus, ItemUpdate, NewItem, NewSource, PostedLink, Source, SourceUpdate,
};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use crate::{
    ItemRepository, PostedLinkRepository, SourceRepository, StorageError, StorageResult,
};

const SOURCE_COLUMNS: &str = "id, tenant_id, name, url, category, active, fetch_interval_secs, \
                              last_fetched_at, created_at, deleted_at";

const ITEM_COLUMNS: &str = "id, tenant_id, source_id, title, original_content, enhanced_content, \
                            url, image_url, published_at, fetched_at, status, fingerprint, \
                            ai_enhanced, deleted_at";

const POSTED_COLUMNS: &str = "id, item_id, post_id, tenant_id, posted_at";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> StorageResult<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("database migrations applied");
        Ok(())
    }
}

fn interval_to_db(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX)
}

fn source_from_row(row: &PgRow) -> StorageResult<Source> {
    let interval: i64 = row.try_get("fetch_interval_secs")?;
    let fetch_interval_secs = u64::try_from(interval).map_err(|_| StorageError::Corrupt {
        column: "fetch_interval_secs",
        message: format!("negative interval {interval}"),
    })?;
    Ok(Source {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        name: row.try_get("name")?,
        url: row.try_get("url")?,
        category: row.try_get("category")?,
        active: row.try_get("active")?,
        fetch_interval_secs,
        last_fetched_at: row.try_get("last_fetched_at")?,
        created_at: row.try_get("created_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

fn item_from_row(row: &PgRow) -> StorageResult<Item> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<ItemStatus>()
        .map_err(|err| StorageError::Corrupt {
            column: "status",
            message: err.to_string(),
        })?;
    Ok(Item {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        source_id: row.try_get("source_id")?,
        title: row.try_get("title")?,
        original_content: row.try_get("original_content")?,
        enhanced_content: row.try_get("enhanced_content")?,
        url: row.try_get("url")?,
        image_url: row.try_get("image_url")?,
        published_at: row.try_get("published_at")?,
        fetched_at: row.try_get("fetched_at")?,
        status,
        fingerprint: row.try_get("fingerprint")?,
        ai_enhanced: row.try_get("ai_enhanced")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

fn posted_from_row(row: &PgRow) -> StorageResult<PostedLink> {
    Ok(PostedLink {
        id: row.try_get("id")?,
        item_id: row.try_get("item_id")?,
        post_id: row.try_get("post_id")?,
        tenant_id: row.try_get("tenant_id")?,
        posted_at: row.try_get("posted_at")?,
    })
}

#[async_trait]
impl SourceRepository for PgStore {
    async fn create_source(&self, tenant_id: Uuid, new: NewSource) -> StorageResult<Source> {
        new.validate()?;
        let source = new.into_source(tenant_id, Utc::now());
        let sql = format!(
            r#"
            INSERT INTO news_sources ({SOURCE_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {SOURCE_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(source.id)
            .bind(source.tenant_id)
            .bind(&source.name)
            .bind(&source.url)
            .bind(&source.category)
            .bind(source.active)
            .bind(interval_to_db(source.fetch_interval_secs))
            .bind(source.last_fetched_at)
            .bind(source.created_at)
            .bind(source.deleted_at)
            .fetch_one(&self.pool)
            .await?;
        source_from_row(&row)
    }

    async fn get_source(&self, id: Uuid, tenant_id: Uuid) -> StorageResult<Source> {
        let sql = format!(
            r#"
            SELECT {SOURCE_COLUMNS}
              FROM news_sources
             WHERE id = $1 AND tenant_id = $2 AND deleted_at IS NULL
            "#
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StorageError::source_not_found(id))?;
        source_from_row(&row)
    }

    async fn list_sources(&self, tenant_id: Uuid) -> StorageResult<Vec<Source>> {
        let sql = format!(
            r#"
            SELECT {SOURCE_COLUMNS}
              FROM news_sources
             WHERE tenant_id = $1 AND deleted_at IS NULL
             ORDER BY created_at DESC
            "#
        );
        let rows = sqlx::query(&sql).bind(tenant_id).fetch_all(&self.pool).await?;
        rows.iter().map(source_from_row).collect()
    }

    async fn list_active_sources(&self, tenant_id: Option<Uuid>) -> StorageResult<Vec<Source>> {
        let sql = format!(
            r#"
            SELECT {SOURCE_COLUMNS}
              FROM news_sources
             WHERE active AND deleted_at IS NULL
               AND ($1::uuid IS NULL OR tenant_id = $1)
             ORDER BY created_at
            "#
        );
        let rows = sqlx::query(&sql).bind(tenant_id).fetch_all(&self.pool).await?;
        rows.iter().map(source_from_row).collect()
    }

    async fn update_source(
        &self,
        id: Uuid,
        tenant_id: Uuid,
        update: SourceUpdate,
    ) -> StorageResult<Source> {
        update.validate()?;
        let mut source = self.get_source(id, tenant_id).await?;
        update.apply_to(&mut source);
        let sql = format!(
            r#"
            UPDATE news_sources
               SET name = $3,
                   url = $4,
                   category = $5,
                   active = $6,
                   fetch_interval_secs = $7
             WHERE id = $1 AND tenant_id = $2 AND deleted_at IS NULL
            RETURNING {SOURCE_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(tenant_id)
            .bind(&source.name)
            .bind(&source.url)
            .bind(&source.category)
            .bind(source.active)
            .bind(interval_to_db(source.fetch_interval_secs))
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StorageError::source_not_found(id))?;
        source_from_row(&row)
    }

    async fn delete_source(&self, id: Uuid, tenant_id: Uuid) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE news_sources
               SET deleted_at = NOW()
             WHERE id = $1 AND tenant_id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::source_not_found(id));
        }
        Ok(())
    }

    async fn update_source_last_fetched(&self, id: Uuid, at: DateTime<Utc>) -> StorageResult<()> {
        let result = sqlx::query("UPDATE news_sources SET last_fetched_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::source_not_found(id));
        }
        Ok(())
    }
}

#[async_trait]
impl ItemRepository for PgStore {
    async fn item_exists(&self, fingerprint: &str, source_id: Uuid) -> StorageResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM news_items WHERE fingerprint = $1 AND source_id = $2
            )
            "#,
        )
        .bind(fingerprint)
        .bind(source_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn create_item(&self, new: NewItem) -> StorageResult<Option<Item>> {
        let item = new.into_item(Utc::now());
        let sql = format!(
            r#"
            INSERT INTO news_items ({ITEM_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (fingerprint, source_id) DO NOTHING
            RETURNING {ITEM_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(item.id)
            .bind(item.tenant_id)
            .bind(item.source_id)
            .bind(&item.title)
            .bind(&item.original_content)
            .bind(&item.enhanced_content)
            .bind(&item.url)
            .bind(&item.image_url)
            .bind(item.published_at)
            .bind(item.fetched_at)
            .bind(item.status.as_str())
            .bind(&item.fingerprint)
            .bind(item.ai_enhanced)
            .bind(item.deleted_at)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(item_from_row).transpose()
    }

    async fn find_item(&self, id: Uuid) -> StorageResult<Option<Item>> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM news_items WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(item_from_row).transpose()
    }

    async fn list_items(&self, tenant_id: Uuid, query: &ItemQuery) -> StorageResult<Vec<Item>> {
        let sql = format!(
            r#"
            SELECT {ITEM_COLUMNS}
              FROM news_items
             WHERE tenant_id = $1
               AND deleted_at IS NULL
               AND ($2::text IS NULL OR status = $2)
               AND ($3::uuid IS NULL OR source_id = $3)
             ORDER BY fetched_at DESC
             LIMIT $4 OFFSET $5
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(tenant_id)
            .bind(query.status.map(ItemStatus::as_str))
            .bind(query.source_id)
            .bind(i64::try_from(query.limit).unwrap_or(i64::MAX))
            .bind(i64::try_from(query.offset()).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(item_from_row).collect()
    }

    async fn count_items(&self, tenant_id: Uuid, query: &ItemQuery) -> StorageResult<u64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
              FROM news_items
             WHERE tenant_id = $1
               AND deleted_at IS NULL
               AND ($2::text IS NULL OR status = $2)
               AND ($3::uuid IS NULL OR source_id = $3)
            "#,
        )
        .bind(tenant_id)
        .bind(query.status.map(ItemStatus::as_str))
        .bind(query.source_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }

    async fn update_item(&self, id: Uuid, tenant_id: Uuid, update: ItemUpdate) -> StorageResult<Item> {
        let sql = format!(
            r#"
            UPDATE news_items
               SET enhanced_content = COALESCE($3, enhanced_content),
                   status = COALESCE($4, status),
                   ai_enhanced = COALESCE($5, ai_enhanced)
             WHERE id = $1 AND tenant_id = $2 AND deleted_at IS NULL
            RETURNING {ITEM_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(tenant_id)
            .bind(&update.enhanced_content)
            .bind(update.status.map(ItemStatus::as_str))
            .bind(update.ai_enhanced)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StorageError::item_not_found(id))?;
        item_from_row(&row)
    }

    async fn delete_item(&self, id: Uuid, tenant_id: Uuid) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE news_items
               SET deleted_at = NOW()
             WHERE id = $1 AND tenant_id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::item_not_found(id));
        }
        Ok(())
    }
}

#[async_trait]
impl PostedLinkRepository for PgStore {
    async fn create_posted_link(
        &self,
        item_id: Uuid,
        post_id: &str,
        tenant_id: Uuid,
    ) -> StorageResult<PostedLink> {
        self.get_item(item_id, tenant_id).await?;

        let insert = format!(
            r#"
            INSERT INTO posted_news ({POSTED_COLUMNS})
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (item_id, post_id) DO NOTHING
            RETURNING {POSTED_COLUMNS}
            "#
        );
        let inserted = sqlx::query(&insert)
            .bind(Uuid::new_v4())
            .bind(item_id)
            .bind(post_id)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(row) = inserted {
            return posted_from_row(&row);
        }

        let existing = format!(
            "SELECT {POSTED_COLUMNS} FROM posted_news WHERE item_id = $1 AND post_id = $2"
        );
        let row = sqlx::query(&existing)
            .bind(item_id)
            .bind(post_id)
            .fetch_one(&self.pool)
            .await?;
        posted_from_row(&row)
    }

    async fn posted_links_for_item(&self, item_id: Uuid) -> StorageResult<Vec<PostedLink>> {
        let sql = format!(
            "SELECT {POSTED_COLUMNS} FROM posted_news WHERE item_id = $1 ORDER BY posted_at DESC"
        );
        let rows = sqlx::query(&sql).bind(item_id).fetch_all(&self.pool).await?;
        rows.iter().map(posted_from_row).collect()
    }

    async fn posted_links_for_post(&self, post_id: &str) -> StorageResult<Vec<PostedLink>> {
        let sql = format!(
            "SELECT {POSTED_COLUMNS} FROM posted_news WHERE post_id = $1 ORDER BY posted_at DESC"
        );
        let rows = sqlx::query(&sql).bind(post_id).fetch_all(&self.pool).await?;
        rows.iter().map(posted_from_row).collect()
    }

    async fn recent_posted_links(
        &self,
        tenant_id: Uuid,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<PostedLink>> {
        let sql = format!(
            r#"
            SELECT {POSTED_COLUMNS}
              FROM posted_news
             WHERE tenant_id = $1 AND posted_at >= $2
             ORDER BY posted_at DESC
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(tenant_id)
            .bind(since)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(posted_from_row).collect()
    }
}
