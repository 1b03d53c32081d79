//! Durable record of the highest `streamPosition` processed per `sourceUrl`.
//!
//! Sinks persist positions through the `checkpoint` stage; reader sources
//! consult the store on subscribe so a restarted pipeline resumes after the
//! last position that was durably processed.

mod memory;
mod sqlite;

pub use memory::MemoryPositionStore;
pub use sqlite::SqlitePositionStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from a position store backend.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("store lock poisoned")]
    Poisoned,
}

/// A stored position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePosition {
    pub source_url: String,
    pub position: u64,
}

/// Storage for resumable positions.
#[async_trait]
pub trait PositionStore: Send + Sync {
    /// Returns the highest recorded position for a source, if any.
    async fn load(&self, source_url: &str) -> Result<Option<u64>, StoreError>;

    /// Records a position. Lower positions than the stored one are ignored.
    async fn save(&self, source_url: &str, position: u64) -> Result<(), StoreError>;

    /// Lists all recorded positions ordered by source URL.
    async fn all(&self) -> Result<Vec<SourcePosition>, StoreError>;

    /// Forgets the position of a source so it is read from the start again.
    async fn reset(&self, source_url: &str) -> Result<(), StoreError>;
}
