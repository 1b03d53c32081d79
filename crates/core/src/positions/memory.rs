//! In-memory position store.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{PositionStore, SourcePosition, StoreError};

/// Process-local position store. Positions are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryPositionStore {
    positions: Mutex<BTreeMap<String, u64>>,
}

impl MemoryPositionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PositionStore for MemoryPositionStore {
    async fn load(&self, source_url: &str) -> Result<Option<u64>, StoreError> {
        let positions = self.positions.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(positions.get(source_url).copied())
    }

    async fn save(&self, source_url: &str, position: u64) -> Result<(), StoreError> {
        let mut positions = self.positions.lock().map_err(|_| StoreError::Poisoned)?;
        let entry = positions.entry(source_url.to_string()).or_insert(position);
        *entry = (*entry).max(position);
        Ok(())
    }

    async fn all(&self) -> Result<Vec<SourcePosition>, StoreError> {
        let positions = self.positions.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(positions
            .iter()
            .map(|(source_url, position)| SourcePosition {
                source_url: source_url.clone(),
                position: *position,
            })
            .collect())
    }

    async fn reset(&self, source_url: &str) -> Result<(), StoreError> {
        let mut positions = self.positions.lock().map_err(|_| StoreError::Poisoned)?;
        positions.remove(source_url);
        Ok(())
    }
}
