//! Starts pipelines described by the items of another pipeline.

use futures::StreamExt;
use tracing::info;

use crate::cabinet::{BuildContext, StageJar};
use crate::context::PipelineContext;
use crate::definition::{JarSpec, PipelineDefinition};
use crate::error::FlowError;
use crate::flow::Flow;
use crate::item::Item;

/// Parses each object payload as a pipeline definition and starts it through
/// the context's spawner. The item is forwarded once the pipeline is
/// registered; items with any other payload are forwarded untouched.
pub struct CrucibleStageJar;

impl StageJar for CrucibleStageJar {
    fn new_stage(
        &self,
        _spec: &JarSpec,
        _build: &BuildContext<'_>,
        input: Flow,
    ) -> Result<Flow, FlowError> {
        Ok(input.transform(|items, ctx| {
            let ctx = ctx.clone();
            items
                .map(move |result| result.and_then(|item| spawn_from(&ctx, item)))
                .boxed()
        }))
    }
}

fn spawn_from(ctx: &PipelineContext, item: Item) -> Result<Item, FlowError> {
    if !item.data.is_object() {
        return Ok(item);
    }
    let spawner = ctx
        .spawner()
        .ok_or_else(|| FlowError::config("no pipeline registry available to start pipelines"))?;

    let definition = PipelineDefinition::from_value(item.data.clone())?;
    let name = definition.display_name().to_string();
    let handle = spawner.spawn(definition)?;
    info!(
        parent = ctx.pipeline().unwrap_or("unnamed"),
        pipeline = %name,
        handle = %handle,
        "Started pipeline from stream"
    );
    Ok(item)
}
