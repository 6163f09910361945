use async_trait::async_trait;
use dashmap::DashMap;
use ulid::Ulid;

use crate::model::*;

use super::{EventStore, StoreError};

pub struct InMemoryStore {
    events: DashMap<Ulid, Event>,
    /// Series root → member ids, for series-wide lookups and deletes.
    series: DashMap<Ulid, Vec<Ulid>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            events: DashMap::new(),
            series: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn contains(&self, id: &Ulid) -> bool {
        self.events.contains_key(id)
    }

    /// Insert or replace. A re-saved id is moved, never duplicated, in the
    /// series index.
    pub fn insert(&self, event: Event) {
        self.remove(&event.id);
        if let Some(root) = event.series_id() {
            self.series.entry(root).or_default().push(event.id);
        }
        self.events.insert(event.id, event);
    }

    pub fn remove(&self, id: &Ulid) -> Option<Event> {
        let (_, event) = self.events.remove(id)?;
        if let Some(root) = event.series_id()
            && let Some(mut members) = self.series.get_mut(&root)
        {
            members.retain(|m| m != id);
        }
        if let Some(root) = event.series_id() {
            self.series.remove_if(&root, |_, members| members.is_empty());
        }
        Some(event)
    }

    pub fn get(&self, id: &Ulid) -> Option<Event> {
        self.events.get(id).map(|e| e.value().clone())
    }

    pub fn series_members(&self, root: &Ulid) -> Vec<Ulid> {
        self.series
            .get(root)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    /// Matching events sorted by `(span.start, id)`.
    pub fn matching(&self, filter: &EventFilter) -> Vec<Event> {
        let mut out: Vec<Event> = match filter.series_id {
            Some(root) => self
                .series_members(&root)
                .iter()
                .filter_map(|id| self.get(id))
                .filter(|e| filter.matches(e))
                .collect(),
            None => self
                .events
                .iter()
                .filter(|e| filter.matches(e.value()))
                .map(|e| e.value().clone())
                .collect(),
        };
        out.sort_by_key(|e| (e.span.start, e.id));
        out
    }

    /// Snapshot of every stored event, for compaction.
    pub fn snapshot(&self) -> Vec<Event> {
        self.matching(&EventFilter::default())
    }
}

#[async_trait]
impl EventStore for InMemoryStore {
    async fn save(&self, event: &Event) -> Result<Ulid, StoreError> {
        self.insert(event.clone());
        Ok(event.id)
    }

    async fn list(&self, filter: &EventFilter) -> Result<Vec<Event>, StoreError> {
        Ok(self.matching(filter))
    }

    async fn get(&self, id: Ulid) -> Result<Option<Event>, StoreError> {
        Ok(InMemoryStore::get(self, &id))
    }

    async fn delete(&self, id: Ulid) -> Result<bool, StoreError> {
        Ok(self.remove(&id).is_some())
    }
}
