//! In-process store used by tests and dry runs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use newswire_core::{
    Item, ItemQuery, ItemUpdate, NewItem, NewSource, PostedLink, Source, SourceUpdate,
};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    ItemRepository, PostedLinkRepository, SourceRepository, StorageError, StorageResult,
};

#[derive(Debug, Default)]
struct State {
    sources: Vec<Source>,
    items: Vec<Item>,
    fingerprints: HashMap<(String, Uuid), Uuid>,
    posted: Vec<PostedLink>,
}

impl State {
    fn source_mut(&mut self, id: Uuid, tenant_id: Uuid) -> StorageResult<&mut Source> {
        self.sources
            .iter_mut()
            .find(|s| s.id == id && s.tenant_id == tenant_id && !s.is_deleted())
            .ok_or_else(|| StorageError::source_not_found(id))
    }

    fn item_mut(&mut self, id: Uuid, tenant_id: Uuid) -> StorageResult<&mut Item> {
        self.items
            .iter_mut()
            .find(|i| i.id == id && i.tenant_id == tenant_id && i.deleted_at.is_none())
            .ok_or_else(|| StorageError::item_not_found(id))
    }

    /// Visible items of a tenant matching `query`, newest fetched first.
    /// Ties keep the latest insert in front.
    fn matching_items(&self, tenant_id: Uuid, query: &ItemQuery) -> Vec<&Item> {
        let mut out = self
            .items
            .iter()
            .rev()
            .filter(|i| i.tenant_id == tenant_id && i.deleted_at.is_none() && query.matches(i))
            .collect::<Vec<_>>();
        out.sort_by(|a, b| b.fetched_at.cmp(&a.fetched_at));
        out
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a fully formed item, bypassing fingerprint checks. Test fixtures
    /// use this to seed items in arbitrary states.
    pub async fn insert_item(&self, item: Item) {
        let mut state = self.state.lock().await;
        state
            .fingerprints
            .insert((item.fingerprint.clone(), item.source_id), item.id);
        state.items.push(item);
    }

    pub async fn item_count(&self) -> usize {
        self.state.lock().await.items.len()
    }
}

#[async_trait]
impl SourceRepository for MemoryStore {
    async fn create_source(&self, tenant_id: Uuid, new: NewSource) -> StorageResult<Source> {
        new.validate()?;
        let source = new.into_source(tenant_id, Utc::now());
        self.state.lock().await.sources.push(source.clone());
        Ok(source)
    }

    async fn get_source(&self, id: Uuid, tenant_id: Uuid) -> StorageResult<Source> {
        let mut state = self.state.lock().await;
        state.source_mut(id, tenant_id).map(|s| s.clone())
    }

    async fn list_sources(&self, tenant_id: Uuid) -> StorageResult<Vec<Source>> {
        let state = self.state.lock().await;
        let mut out = state
            .sources
            .iter()
            .rev()
            .filter(|s| s.tenant_id == tenant_id && !s.is_deleted())
            .cloned()
            .collect::<Vec<_>>();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn list_active_sources(&self, tenant_id: Option<Uuid>) -> StorageResult<Vec<Source>> {
        let state = self.state.lock().await;
        Ok(state
            .sources
            .iter()
            .filter(|s| s.is_fetchable() && tenant_id.map_or(true, |t| s.tenant_id == t))
            .cloned()
            .collect())
    }

    async fn update_source(
        &self,
        id: Uuid,
        tenant_id: Uuid,
        update: SourceUpdate,
    ) -> StorageResult<Source> {
        update.validate()?;
        let mut state = self.state.lock().await;
        let source = state.source_mut(id, tenant_id)?;
        update.apply_to(source);
        Ok(source.clone())
    }

    async fn delete_source(&self, id: Uuid, tenant_id: Uuid) -> StorageResult<()> {
        let mut state = self.state.lock().await;
        let source = state.source_mut(id, tenant_id)?;
        source.deleted_at = Some(Utc::now());
        Ok(())
    }

    async fn update_source_last_fetched(&self, id: Uuid, at: DateTime<Utc>) -> StorageResult<()> {
        let mut state = self.state.lock().await;
        let source = state
            .sources
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| StorageError::source_not_found(id))?;
        source.last_fetched_at = Some(at);
        Ok(())
    }
}

#[async_trait]
impl ItemRepository for MemoryStore {
    async fn item_exists(&self, fingerprint: &str, source_id: Uuid) -> StorageResult<bool> {
        let state = self.state.lock().await;
        Ok(state
            .fingerprints
            .contains_key(&(fingerprint.to_string(), source_id)))
    }

    async fn create_item(&self, new: NewItem) -> StorageResult<Option<Item>> {
        let mut state = self.state.lock().await;
        let key = (new.fingerprint.clone(), new.source_id);
        if state.fingerprints.contains_key(&key) {
            return Ok(None);
        }
        let item = new.into_item(Utc::now());
        state.fingerprints.insert(key, item.id);
        state.items.push(item.clone());
        Ok(Some(item))
    }

    async fn find_item(&self, id: Uuid) -> StorageResult<Option<Item>> {
        let state = self.state.lock().await;
        Ok(state.items.iter().find(|i| i.id == id).cloned())
    }

    async fn list_items(&self, tenant_id: Uuid, query: &ItemQuery) -> StorageResult<Vec<Item>> {
        let state = self.state.lock().await;
        Ok(state
            .matching_items(tenant_id, query)
            .into_iter()
            .skip(query.offset())
            .take(query.limit)
            .cloned()
            .collect())
    }

    async fn count_items(&self, tenant_id: Uuid, query: &ItemQuery) -> StorageResult<u64> {
        let state = self.state.lock().await;
        Ok(state.matching_items(tenant_id, query).len() as u64)
    }

    async fn update_item(&self, id: Uuid, tenant_id: Uuid, update: ItemUpdate) -> StorageResult<Item> {
        let mut state = self.state.lock().await;
        let item = state.item_mut(id, tenant_id)?;
        update.apply_to(item);
        Ok(item.clone())
    }

    async fn delete_item(&self, id: Uuid, tenant_id: Uuid) -> StorageResult<()> {
        let mut state = self.state.lock().await;
        let item = state.item_mut(id, tenant_id)?;
        item.deleted_at = Some(Utc::now());
        Ok(())
    }
}

#[async_trait]
impl PostedLinkRepository for MemoryStore {
    async fn create_posted_link(
        &self,
        item_id: Uuid,
        post_id: &str,
        tenant_id: Uuid,
    ) -> StorageResult<PostedLink> {
        let mut state = self.state.lock().await;
        state.item_mut(item_id, tenant_id)?;
        if let Some(existing) = state
            .posted
            .iter()
            .find(|p| p.item_id == item_id && p.post_id == post_id)
        {
            return Ok(existing.clone());
        }
        let link = PostedLink {
            id: Uuid::new_v4(),
            item_id,
            post_id: post_id.to_string(),
            tenant_id,
            posted_at: Utc::now(),
        };
        state.posted.push(link.clone());
        Ok(link)
    }

    async fn posted_links_for_item(&self, item_id: Uuid) -> StorageResult<Vec<PostedLink>> {
        let state = self.state.lock().await;
        Ok(state
            .posted
            .iter()
            .filter(|p| p.item_id == item_id)
            .cloned()
            .collect())
    }

    async fn posted_links_for_post(&self, post_id: &str) -> StorageResult<Vec<PostedLink>> {
        let state = self.state.lock().await;
        Ok(state
            .posted
            .iter()
            .filter(|p| p.post_id == post_id)
            .cloned()
            .collect())
    }

    async fn recent_posted_links(
        &self,
        tenant_id: Uuid,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<PostedLink>> {
        let state = self.state.lock().await;
        let mut out = state
            .posted
            .iter()
            .rev()
            .filter(|p| p.tenant_id == tenant_id && p.posted_at >= since)
            .cloned()
            .collect::<Vec<_>>();
        out.sort_by(|a, b| b.posted_at.cmp(&a.posted_at));
        Ok(out)
    }
}
