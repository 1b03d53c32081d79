//! Explicit per-subscription context threaded through sources and stages.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::crucible::PipelineHandle;
use crate::definition::PipelineDefinition;
use crate::error::FlowError;
use crate::positions::PositionStore;

/// Something that can start new pipelines while others are running.
pub trait PipelineSpawner: Send + Sync {
    fn spawn(&self, definition: PipelineDefinition) -> Result<PipelineHandle, FlowError>;
}

/// Context supplied when a flow is subscribed.
///
/// Carries pipeline identity, the positions to resume each source from, and
/// the collaborators a stage may need at run time.
#[derive(Clone, Default)]
pub struct PipelineContext {
    pipeline: Option<String>,
    resume_positions: BTreeMap<String, u64>,
    positions: Option<Arc<dyn PositionStore>>,
    spawner: Option<Arc<dyn PipelineSpawner>>,
}

impl PipelineContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_pipeline(name: impl Into<String>) -> Self {
        Self {
            pipeline: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_pipeline(mut self, name: impl Into<String>) -> Self {
        self.pipeline = Some(name.into());
        self
    }

    /// Resume `source_url` after `position`.
    pub fn with_resume_position(mut self, source_url: impl Into<String>, position: u64) -> Self {
        self.resume_positions.insert(source_url.into(), position);
        self
    }

    pub fn set_resume_position(&mut self, source_url: impl Into<String>, position: u64) {
        self.resume_positions.insert(source_url.into(), position);
    }

    pub fn with_position_store(mut self, store: Arc<dyn PositionStore>) -> Self {
        self.positions = Some(store);
        self
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn PipelineSpawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    pub fn pipeline(&self) -> Option<&str> {
        self.pipeline.as_deref()
    }

    pub fn position_store(&self) -> Option<&Arc<dyn PositionStore>> {
        self.positions.as_ref()
    }

    pub fn spawner(&self) -> Option<&Arc<dyn PipelineSpawner>> {
        self.spawner.as_ref()
    }

    pub fn resume_positions(&self) -> &BTreeMap<String, u64> {
        &self.resume_positions
    }

    /// Position to resume `source_url` from.
    ///
    /// An explicit position in this context wins over the position store.
    pub async fn resume_position(&self, source_url: &str) -> Result<Option<u64>, FlowError> {
        if let Some(position) = self.resume_positions.get(source_url) {
            return Ok(Some(*position));
        }
        match &self.positions {
            Some(store) => Ok(store.load(source_url).await?),
            None => Ok(None),
        }
    }
}

impl fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineContext")
            .field("pipeline", &self.pipeline)
            .field("resume_positions", &self.resume_positions)
            .field("position_store", &self.positions.is_some())
            .field("spawner", &self.spawner.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::positions::MemoryPositionStore;

    #[tokio::test]
    async fn test_explicit_position_wins_over_store() {
        let store = Arc::new(MemoryPositionStore::new());
        store.save("file:///a", 10).await.unwrap();
        store.save("file:///b", 3).await.unwrap();

        let ctx = PipelineContext::for_pipeline("p")
            .with_position_store(store)
            .with_resume_position("file:///a", 4);

        assert_eq!(ctx.resume_position("file:///a").await.unwrap(), Some(4));
        assert_eq!(ctx.resume_position("file:///b").await.unwrap(), Some(3));
        assert_eq!(ctx.resume_position("file:///c").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_empty_context_starts_at_zero() {
        let ctx = PipelineContext::new();
        assert!(ctx.pipeline().is_none());
        assert_eq!(ctx.resume_position("anything").await.unwrap(), None);
    }
}
