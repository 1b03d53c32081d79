//! Crucible lifecycle integration tests.
//!
//! These drive whole pipelines through the cabinet, composer and crucible:
//! - Failure isolation between concurrently running pipelines
//! - Checkpointed resume across restarts with a SQLite position store
//! - Pipelines started from the items of another pipeline
//! - Retry over a flaky resumable source

use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;

use alembic_core::{
    testing::{CollectStage, FailingSource},
    Bootstrap, Cabinet, Composer, Crucible, PipelineDefinition, PipelineOutcome, PositionStore,
    Recipes, SqlitePositionStore,
};

/// Test helper wiring a crucible over the built-in jars plus a `collect` sink.
struct TestHarness {
    crucible: Crucible,
    collect: CollectStage,
}

impl TestHarness {
    fn new() -> Self {
        Self::with_cabinet(Cabinet::with_builtin_jars(), None)
    }

    fn with_cabinet(mut cabinet: Cabinet, positions: Option<Arc<dyn PositionStore>>) -> Self {
        let collect = CollectStage::new();
        cabinet.register_stage("collect", Arc::new(collect.clone()));

        let composer = Composer::new(Arc::new(cabinet), Arc::new(Recipes::new(Vec::new())));
        let mut crucible = Crucible::new(composer, 16);
        if let Some(store) = positions {
            crucible = crucible.with_position_store(store);
        }

        Self { crucible, collect }
    }
}

fn definition(value: Value) -> PipelineDefinition {
    PipelineDefinition::from_value(value).expect("valid definition")
}

#[tokio::test]
async fn test_failing_pipeline_does_not_affect_others() {
    let harness = TestHarness::new();
    let bootstrap = Bootstrap::new(harness.crucible.clone());

    let summary = bootstrap
        .run(&[
            definition(json!({
                "name": "first",
                "source": {"jar": "values", "values": [1, 2, 3]}
            })),
            definition(json!({
                "name": "broken",
                "source": {"jar": "values", "values": [{"nested": 1}]},
                "transforms": [{"jar": "oneOf", "transmute": "absent", "transmutes": [{"jar": "log"}]}]
            })),
            definition(json!({
                "name": "second",
                "source": {"jar": "values", "values": [4, 5]}
            })),
        ])
        .await;

    assert_eq!(summary.total, 3);
    assert_eq!(summary.completed, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.items, 5);
    assert!(!summary.is_success());

    let failed: Vec<_> = harness
        .crucible
        .status()
        .into_iter()
        .filter(|status| status.error.is_some())
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].name, "broken");
}

#[tokio::test]
async fn test_checkpointed_pipeline_resumes_after_restart() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let data_path = dir.path().join("events.jsonl");
    let db_path = dir.path().join("positions.db");

    // Record 3 is malformed, so the first run stops after three items
    std::fs::write(
        &data_path,
        "{\"n\": 0}\n{\"n\": 1}\n{\"n\": 2}\n{broken\n{\"n\": 4}\n",
    )
    .unwrap();

    let pipeline = definition(json!({
        "name": "events",
        "source": {"jar": "jsonl", "path": data_path.to_string_lossy(), "sourceUrl": "file:///events"},
        "transforms": [{"jar": "checkpoint"}, {"jar": "collect"}]
    }));

    {
        let store: Arc<dyn PositionStore> =
            Arc::new(SqlitePositionStore::new(&db_path).expect("Failed to open store"));
        let harness = TestHarness::with_cabinet(Cabinet::with_builtin_jars(), Some(store.clone()));

        let handle = harness.crucible.start(pipeline.clone()).unwrap();
        let outcome = harness.crucible.completion_of(handle).await.unwrap();

        assert!(matches!(outcome, PipelineOutcome::Failed(_)));
        assert_eq!(
            harness.collect.data(),
            vec![json!({"n": 0}), json!({"n": 1}), json!({"n": 2})]
        );
        assert_eq!(store.load("file:///events").await.unwrap(), Some(2));
    }

    // Fix the bad record and restart against the same database
    std::fs::write(
        &data_path,
        "{\"n\": 0}\n{\"n\": 1}\n{\"n\": 2}\n{\"n\": 3}\n{\"n\": 4}\n",
    )
    .unwrap();

    let store: Arc<dyn PositionStore> =
        Arc::new(SqlitePositionStore::new(&db_path).expect("Failed to reopen store"));
    let harness = TestHarness::with_cabinet(Cabinet::with_builtin_jars(), Some(store.clone()));

    let handle = harness.crucible.start(pipeline).unwrap();
    let outcome = harness.crucible.completion_of(handle).await.unwrap();

    assert_eq!(outcome.into_result().unwrap(), 2);
    assert_eq!(harness.collect.data(), vec![json!({"n": 3}), json!({"n": 4})]);
    let positions: Vec<u64> = harness
        .collect
        .items()
        .iter()
        .filter_map(|item| item.metadata.stream_position())
        .collect();
    assert_eq!(positions, vec![3, 4]);
    assert_eq!(store.load("file:///events").await.unwrap(), Some(4));
}

#[tokio::test]
async fn test_pipelines_started_from_stream_are_awaited() {
    let harness = TestHarness::new();

    let parent = definition(json!({
        "name": "parent",
        "source": {"jar": "values", "values": [
            {"name": "child-a", "source": {"jar": "values", "values": [1, 2]}, "transforms": [{"jar": "collect"}]},
            {"name": "child-b", "source": {"jar": "values", "values": [3]}, "transforms": [{"jar": "collect"}]}
        ]},
        "transforms": [{"jar": "crucible"}]
    }));

    harness.crucible.start(parent).unwrap();
    let summary = harness.crucible.wait_all().await;

    assert_eq!(summary.total, 3);
    assert_eq!(summary.completed, 3);
    // Two definitions forwarded by the parent plus three child items
    assert_eq!(summary.items, 5);

    let mut collected = harness.collect.data();
    collected.sort_by_key(|value| value.as_i64());
    assert_eq!(collected, vec![json!(1), json!(2), json!(3)]);

    let mut names: Vec<String> = harness
        .crucible
        .status()
        .into_iter()
        .map(|status| status.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["child-a", "child-b", "parent"]);
}

#[tokio::test]
async fn test_non_definition_items_pass_through_parent() {
    let harness = TestHarness::new();

    let handle = harness
        .crucible
        .start(definition(json!({
            "name": "parent",
            "source": {"jar": "values", "values": ["not a definition", 7]},
            "transforms": [{"jar": "crucible"}, {"jar": "collect"}]
        })))
        .unwrap();

    let outcome = harness.crucible.completion_of(handle).await.unwrap();
    assert_eq!(outcome.into_result().unwrap(), 2);
    assert_eq!(harness.collect.data(), vec![json!("not a definition"), json!(7)]);
    assert_eq!(harness.crucible.len(), 1);
}

#[tokio::test]
async fn test_invalid_child_definition_fails_parent() {
    let harness = TestHarness::new();

    let handle = harness
        .crucible
        .start(definition(json!({
            "name": "parent",
            "source": {"jar": "values", "values": [{"source": "csv"}]},
            "transforms": [{"jar": "crucible"}]
        })))
        .unwrap();

    let outcome = harness.crucible.completion_of(handle).await.unwrap();
    assert!(matches!(outcome, PipelineOutcome::Failed(_)));
    assert_eq!(harness.crucible.len(), 1);
}

#[tokio::test]
async fn test_retry_resumes_flaky_source_without_duplicates() {
    let flaky = FailingSource::new("mock://flaky", (1..=5).map(|n| json!(n)).collect())
        .fail_at(2, 2);
    let subscriptions = flaky.subscriptions();

    let mut cabinet = Cabinet::with_builtin_jars();
    cabinet.register_source("flaky", Arc::new(flaky));
    let harness = TestHarness::with_cabinet(cabinet, None);

    let handle = harness
        .crucible
        .start(definition(json!({
            "name": "flaky",
            "source": {"jar": "flaky"},
            "transforms": [
                {"jar": "retry", "minBackoff": "5ms", "maxBackoff": "5ms", "jitter": 0.0, "maxAttempts": 3},
                {"jar": "collect"}
            ]
        })))
        .unwrap();

    let outcome = harness.crucible.completion_of(handle).await.unwrap();

    assert_eq!(outcome.into_result().unwrap(), 5);
    assert_eq!(
        harness.collect.data(),
        vec![json!(1), json!(2), json!(3), json!(4), json!(5)]
    );
    assert_eq!(subscriptions.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retry_gives_up_after_max_attempts() {
    let flaky = FailingSource::new("mock://stubborn", vec![json!("a"), json!("b")]).fail_at(1, 10);
    let subscriptions = flaky.subscriptions();

    let mut cabinet = Cabinet::with_builtin_jars();
    cabinet.register_source("stubborn", Arc::new(flaky));
    let harness = TestHarness::with_cabinet(cabinet, None);

    let handle = harness
        .crucible
        .start(definition(json!({
            "name": "stubborn",
            "source": {"jar": "stubborn"},
            "transforms": [
                {"jar": "retry", "minBackoff": "1ms", "maxBackoff": "1ms", "jitter": 0.0, "maxAttempts": 2},
                {"jar": "collect"}
            ]
        })))
        .unwrap();

    let outcome = harness.crucible.completion_of(handle).await.unwrap();

    assert!(matches!(outcome, PipelineOutcome::Failed(_)));
    assert_eq!(subscriptions.load(Ordering::SeqCst), 3);
    assert_eq!(harness.collect.data(), vec![json!("a")]);
}
