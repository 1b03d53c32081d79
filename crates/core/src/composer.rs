//! Turns pipeline definitions into flows.
//!
//! Composition is pure: it resolves jars by name and wires their flows
//! together, but nothing is read until the resulting flow is subscribed.
//! Every failure becomes an error flow so retry and logging stages see
//! configuration mistakes the same way they see runtime failures.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::cabinet::{BuildContext, Cabinet};
use crate::definition::{JarSpec, PipelineDefinition};
use crate::error::FlowError;
use crate::flow::Flow;
use crate::recipes::Recipes;

/// Resolves sources, stages and recipes against a cabinet.
#[derive(Clone)]
pub struct Composer {
    cabinet: Arc<Cabinet>,
    recipes: Arc<Recipes>,
}

impl Composer {
    pub fn new(cabinet: Arc<Cabinet>, recipes: Arc<Recipes>) -> Self {
        Self { cabinet, recipes }
    }

    pub fn cabinet(&self) -> &Cabinet {
        &self.cabinet
    }

    pub fn recipes(&self) -> &Recipes {
        &self.recipes
    }

    /// Builds the source flow for `spec`.
    ///
    /// An absent or disabled jar yields an `UnknownSource` error flow.
    pub fn resolve_source(&self, spec: &JarSpec, definition: &PipelineDefinition) -> Flow {
        let built = self
            .cabinet
            .source(&spec.jar)
            .ok_or_else(|| FlowError::UnknownSource(spec.jar.clone()))
            .and_then(|resolved| {
                let spec = spec.with_defaults(&resolved.defaults);
                let build = BuildContext {
                    composer: self,
                    definition,
                };
                resolved.jar.new_source(&spec, &build)
            });

        built_or_error(built, definition, spec)
    }

    /// Builds the stage for `spec` on top of `input`.
    pub fn resolve_stage(
        &self,
        spec: &JarSpec,
        definition: &PipelineDefinition,
        input: Flow,
    ) -> Flow {
        let built = self
            .cabinet
            .stage(&spec.jar)
            .ok_or_else(|| FlowError::UnknownStage(spec.jar.clone()))
            .and_then(|resolved| {
                let spec = spec.with_defaults(&resolved.defaults);
                let build = BuildContext {
                    composer: self,
                    definition,
                };
                resolved.jar.new_stage(&spec, &build, input)
            });

        built_or_error(built, definition, spec)
    }

    /// Applies `specs` left to right, skipping disabled ones.
    pub fn chain(&self, specs: &[JarSpec], definition: &PipelineDefinition, input: Flow) -> Flow {
        specs.iter().fold(input, |flow, spec| {
            if !spec.enabled {
                debug!(
                    pipeline = definition.display_name(),
                    stage = spec.display_name(),
                    "Skipping disabled stage"
                );
                return flow;
            }
            self.resolve_stage(spec, definition, flow)
        })
    }

    /// Expands recipes in `definition`.
    pub fn resolve_definition(
        &self,
        definition: &PipelineDefinition,
    ) -> Result<PipelineDefinition, FlowError> {
        self.recipes.resolve(definition)
    }

    /// Builds the full flow of a pipeline: its source followed by every
    /// enabled transform.
    pub fn compose(&self, definition: &PipelineDefinition) -> Flow {
        let resolved = match self.resolve_definition(definition) {
            Ok(resolved) => resolved,
            Err(e) => return Flow::error(e),
        };

        let source = match &resolved.source {
            Some(source) => source,
            None => {
                return Flow::error(FlowError::config(format!(
                    "pipeline '{}' has no source",
                    resolved.display_name()
                )))
            }
        };
        if !source.enabled {
            warn!(
                pipeline = resolved.display_name(),
                source = source.display_name(),
                "Source is disabled, pipeline will be empty"
            );
            return Flow::empty();
        }

        let flow = self.resolve_source(source, &resolved);
        self.chain(&resolved.transforms, &resolved, flow)
    }
}

/// Attaches pipeline/jar identity to errors raised while building.
fn built_or_error(
    built: Result<Flow, FlowError>,
    definition: &PipelineDefinition,
    spec: &JarSpec,
) -> Flow {
    built.unwrap_or_else(|e| {
        Flow::error(FlowError::in_stage(
            definition.name.as_deref(),
            spec.display_name(),
            e,
        ))
    })
}
