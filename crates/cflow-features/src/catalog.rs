//! Content catalog and derived creator reach.
//!
//! Every event is attributed to a catalog entry: the first sighting of a
//! content id creates one (provisional if the payload carried no metadata).
//! Afterwards only the tag set grows, except that a provisional entry is
//! completed once real metadata shows up. Entries are striped by content id
//! and creators by creator id.

use std::collections::HashMap;

use cflow_core::{ContentItem, Creator, EngagementEvent, EventType};

use crate::shard::Striped;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogUpdate {
    pub created: bool,
    pub completed: bool,
    pub new_tags: usize,
}

#[derive(Debug)]
pub struct ContentCatalog {
    items: Striped<HashMap<String, ContentItem>>,
    creators: Striped<HashMap<String, Creator>>,
}

impl ContentCatalog {
    #[must_use]
    pub fn new(shards: usize) -> Self {
        Self {
            items: Striped::new(shards),
            creators: Striped::new(shards),
        }
    }

    pub async fn observe(&self, seen: &ContentItem) -> CatalogUpdate {
        let mut items = self.items.get(&seen.id).write().await;
        let Some(item) = items.get_mut(&seen.id) else {
            items.insert(seen.id.clone(), seen.clone());
            drop(items);
            if let Some(creator_id) = &seen.creator_id {
                self.count_content(creator_id, seen).await;
            }
            tracing::debug!(
                content_id = %seen.id,
                platform = %seen.platform,
                provisional = seen.provisional,
                "catalog entry created"
            );
            return CatalogUpdate {
                created: true,
                ..CatalogUpdate::default()
            };
        };

        let new_tags = item.enrich_tags(&seen.tags);
        let completed = item.provisional && !seen.provisional;
        if completed {
            item.creator_id.clone_from(&seen.creator_id);
            item.published_at = seen.published_at;
            item.provisional = false;
        }
        drop(items);
        if completed {
            if let Some(creator_id) = &seen.creator_id {
                self.count_content(creator_id, seen).await;
            }
        }
        CatalogUpdate {
            created: false,
            completed,
            new_tags,
        }
    }

    async fn count_content(&self, creator_id: &str, item: &ContentItem) {
        let mut creators = self.creators.get(creator_id).write().await;
        let creator = creators
            .entry(creator_id.to_owned())
            .or_insert_with(|| Creator {
                id: creator_id.to_owned(),
                platform: Some(item.platform),
                ..Creator::default()
            });
        creator.content_count += 1;
    }

    /// Fold one freshly applied event into its creator's reach.
    pub async fn record_engagement(&self, event: &EngagementEvent, weighted: f64) {
        let creator_id = self
            .items
            .get(&event.content_id)
            .read()
            .await
            .get(&event.content_id)
            .and_then(|item| item.creator_id.clone());
        let Some(creator_id) = creator_id else {
            return;
        };
        let mut creators = self.creators.get(&creator_id).write().await;
        let creator = creators.entry(creator_id.clone()).or_insert_with(|| Creator {
            id: creator_id,
            platform: Some(event.platform),
            ..Creator::default()
        });
        if event.event_type == EventType::View {
            creator.total_views += event.magnitude;
        }
        creator.total_engagement += weighted;
    }

    /// Forget a content item. Its creator keeps the accumulated reach but
    /// no longer counts the item.
    pub async fn remove(&self, content_id: &str) -> Option<ContentItem> {
        let removed = self.items.get(content_id).write().await.remove(content_id)?;
        if let Some(creator_id) = &removed.creator_id {
            if let Some(creator) = self.creators.get(creator_id).write().await.get_mut(creator_id) {
                creator.content_count = creator.content_count.saturating_sub(1);
            }
        }
        Some(removed)
    }

    pub async fn get(&self, content_id: &str) -> Option<ContentItem> {
        self.items.get(content_id).read().await.get(content_id).cloned()
    }

    pub async fn len(&self) -> usize {
        let mut total = 0;
        for stripe in self.items.iter() {
            total += stripe.read().await.len();
        }
        total
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Copy of every entry, ordered by content id.
    pub async fn items(&self) -> Vec<ContentItem> {
        let mut items = Vec::new();
        for stripe in self.items.iter() {
            items.extend(stripe.read().await.values().cloned());
        }
        items.sort_by(|a, b| a.id.cmp(&b.id));
        items
    }

    pub async fn creator(&self, creator_id: &str) -> Option<Creator> {
        self.creators.get(creator_id).read().await.get(creator_id).cloned()
    }

    pub async fn creators(&self) -> Vec<Creator> {
        let mut creators = Vec::new();
        for stripe in self.creators.iter() {
            creators.extend(stripe.read().await.values().cloned());
        }
        creators.sort_by(|a, b| a.id.cmp(&b.id));
        creators
    }

    /// Load checkpointed entries. Live entries win; checkpointed tags are
    /// still merged in.
    pub async fn restore(&self, items: Vec<ContentItem>, creators: Vec<Creator>) {
        for item in items {
            let mut live = self.items.get(&item.id).write().await;
            match live.get_mut(&item.id) {
                Some(existing) => {
                    existing.enrich_tags(&item.tags);
                }
                None => {
                    live.insert(item.id.clone(), item);
                }
            }
        }
        for creator in creators {
            self.creators
                .get(&creator.id)
                .write()
                .await
                .entry(creator.id.clone())
                .or_insert(creator);
        }
    }
}
