//! Persistence collaborator seam and two reference implementations.
//!
//! The engine only ever talks to [`EventStore`]; the hosted document store
//! the calendar app actually uses plugs in behind the same trait.

mod durable;
mod memory;

pub use durable::WalStore;
pub use memory::InMemoryStore;

use async_trait::async_trait;
use thiserror::Error;
use ulid::Ulid;

use crate::model::{Event, EventFilter};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec: {0}")]
    Codec(String),

    /// Opaque failure from a remote backend.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persist an event, returning the id it is stored under.
    async fn save(&self, event: &Event) -> Result<Ulid, StoreError>;

    /// Events matching `filter`, ordered by start then id.
    async fn list(&self, filter: &EventFilter) -> Result<Vec<Event>, StoreError>;

    async fn get(&self, id: Ulid) -> Result<Option<Event>, StoreError>;

    /// Returns false if nothing was stored under `id`.
    async fn delete(&self, id: Ulid) -> Result<bool, StoreError>;
}
