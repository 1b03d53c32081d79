//! Persists stream positions so restarted pipelines resume.

use std::sync::Arc;

use futures::StreamExt;
use tracing::trace;

use crate::cabinet::{BuildContext, StageJar};
use crate::definition::JarSpec;
use crate::error::FlowError;
use crate::flow::Flow;
use crate::item::Item;
use crate::metrics;
use crate::positions::PositionStore;

/// Saves the `streamPosition` of each item under its `sourceUrl` before
/// forwarding it.
///
/// Items without both keys pass through untouched. The store keeps the
/// highest position per source, so the next subscription resumes after the
/// last forwarded item.
pub struct CheckpointStageJar;

impl StageJar for CheckpointStageJar {
    fn new_stage(
        &self,
        _spec: &JarSpec,
        _build: &BuildContext<'_>,
        input: Flow,
    ) -> Result<Flow, FlowError> {
        Ok(input.transform(|items, ctx| {
            let store = ctx.position_store().map(Arc::clone);
            items
                .then(move |result| save_position(store.clone(), result))
                .boxed()
        }))
    }
}

async fn save_position(
    store: Option<Arc<dyn PositionStore>>,
    result: Result<Item, FlowError>,
) -> Result<Item, FlowError> {
    let item = result?;
    let (Some(url), Some(position)) = (item.metadata.source_url(), item.metadata.stream_position())
    else {
        return Ok(item);
    };
    let store = store.ok_or_else(|| FlowError::config("checkpoint requires a position store"))?;
    store.save(url, position).await?;
    metrics::POSITIONS_SAVED.inc();
    trace!(source_url = url, position, "Checkpointed position");
    Ok(item)
}
