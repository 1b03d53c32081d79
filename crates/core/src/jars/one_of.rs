//! Selects one candidate spec by name when the pipeline is composed.

use crate::cabinet::{BuildContext, SourceJar, StageJar};
use crate::definition::JarSpec;
use crate::error::FlowError;
use crate::flow::Flow;

/// Finds the candidate named `selector`.
///
/// Aliases are matched first, then jar names; the first match wins.
fn select<'a>(candidates: &'a [JarSpec], selector: &str) -> Option<&'a JarSpec> {
    candidates
        .iter()
        .find(|c| c.name.as_deref() == Some(selector))
        .or_else(|| candidates.iter().find(|c| c.jar == selector))
}

fn candidates(spec: &JarSpec, key: &str) -> Result<Vec<JarSpec>, FlowError> {
    spec.spec_list(key)?.ok_or_else(|| FlowError::missing(key))
}

/// `oneOf` as a source: `source` names one of the `sources`.
pub struct OneOfSourceJar;

impl SourceJar for OneOfSourceJar {
    fn new_source(&self, spec: &JarSpec, build: &BuildContext<'_>) -> Result<Flow, FlowError> {
        let selector = spec.require_str("source")?;
        let sources = candidates(spec, "sources")?;
        let chosen =
            select(&sources, selector).ok_or_else(|| FlowError::not_found("source", selector))?;

        Ok(build.composer.resolve_source(chosen, build.definition))
    }
}

/// `oneOf` as a stage: `transmute` names one of the `transmutes`.
///
/// An unknown selector fails the stream when the first item arrives, so an
/// empty upstream still completes.
pub struct OneOfStageJar;

impl StageJar for OneOfStageJar {
    fn new_stage(
        &self,
        spec: &JarSpec,
        build: &BuildContext<'_>,
        input: Flow,
    ) -> Result<Flow, FlowError> {
        let selector = spec.require_str("transmute")?;
        let stages = candidates(spec, "transmutes")?;

        match select(&stages, selector) {
            Some(chosen) => Ok(build.composer.resolve_stage(chosen, build.definition, input)),
            None => {
                let err = FlowError::not_found("transmute", selector);
                Ok(input.map_items(move |_| Err(err.clone())))
            }
        }
    }
}
