//! Starts the configured pipelines and waits for all of them.

use tracing::{error, info};

use super::registry::Crucible;
use super::types::{CrucibleSummary, PipelineHandle};
use crate::definition::PipelineDefinition;

/// Boot-time runner over a crucible.
pub struct Bootstrap {
    crucible: Crucible,
}

impl Bootstrap {
    pub fn new(crucible: Crucible) -> Self {
        Self { crucible }
    }

    pub fn crucible(&self) -> &Crucible {
        &self.crucible
    }

    /// Starts every enabled definition.
    ///
    /// A definition that cannot be started is logged and skipped; it never
    /// prevents the others from starting.
    pub fn start_all(&self, definitions: &[PipelineDefinition]) -> Vec<PipelineHandle> {
        let mut handles = Vec::with_capacity(definitions.len());
        for definition in definitions {
            let name = definition.display_name();
            if !definition.enabled {
                info!(pipeline = name, "Pipeline disabled, not starting");
                continue;
            }
            match self.crucible.start(definition.clone()) {
                Ok(handle) => handles.push(handle),
                Err(e) => error!(pipeline = name, error = %e, "Failed to start pipeline"),
            }
        }
        info!(
            started = handles.len(),
            configured = definitions.len(),
            "Bootstrap started pipelines"
        );
        handles
    }

    /// Starts `definitions` and waits until every pipeline in the crucible,
    /// including ones started later by running pipelines, has finished.
    pub async fn run(&self, definitions: &[PipelineDefinition]) -> CrucibleSummary {
        self.start_all(definitions);
        let summary = self.crucible.wait_all().await;

        if summary.is_success() {
            info!(
                total = summary.total,
                items = summary.items,
                cancelled = summary.cancelled,
                "All pipelines finished"
            );
        } else {
            error!(
                total = summary.total,
                failed = summary.failed,
                items = summary.items,
                "Pipelines finished with failures"
            );
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cabinet::Cabinet;
    use crate::composer::Composer;
    use crate::recipes::Recipes;
    use serde_json::json;
    use std::sync::Arc;

    fn bootstrap() -> Bootstrap {
        let composer = Composer::new(
            Arc::new(Cabinet::with_builtin_jars()),
            Arc::new(Recipes::default()),
        );
        Bootstrap::new(Crucible::new(composer, 8))
    }

    #[tokio::test]
    async fn test_disabled_definitions_are_skipped() {
        let definitions: Vec<PipelineDefinition> = serde_json::from_value(json!([
            {"name": "on", "source": {"jar": "values", "values": [1]}},
            {"name": "off", "enabled": false, "source": {"jar": "values", "values": [1]}}
        ]))
        .unwrap();

        let bootstrap = bootstrap();
        let summary = bootstrap.run(&definitions).await;
        assert_eq!(summary.total, 1);
        assert_eq!(summary.completed, 1);
        assert_eq!(bootstrap.crucible().status()[0].name, "on");
    }

    #[tokio::test]
    async fn test_out_of_range_backoff_fails_only_its_pipeline() {
        let definitions: Vec<PipelineDefinition> = serde_json::from_value(json!([
            {
                "name": "bad",
                "source": {"jar": "values", "values": [1]},
                "transforms": [{
                    "jar": "retry",
                    "minBackoff": "99999999999999999999999h",
                    "maxBackoff": "99999999999999999999999h"
                }]
            },
            {"name": "good", "source": {"jar": "values", "values": [1, 2]}}
        ]))
        .unwrap();

        let bootstrap = bootstrap();
        let summary = bootstrap.run(&definitions).await;
        assert_eq!(summary.total, 2);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.items, 2);

        let bad = bootstrap
            .crucible()
            .status()
            .into_iter()
            .find(|status| status.name == "bad")
            .unwrap();
        assert!(bad.error.unwrap().contains("minBackoff"));
    }

    #[tokio::test]
    async fn test_run_with_nothing_configured() {
        let summary = bootstrap().run(&[]).await;
        assert_eq!(summary, CrucibleSummary::default());
    }
}
