//! Test doubles for sources and stages.
//!
//! These let tests drive flows without touching files:
//!
//! ```rust,ignore
//! use alembic_core::testing::{CollectStage, MockReader};
//!
//! let flow = MockReader::flow("mock://numbers", vec![json!(1), json!(2)]);
//! let collect = CollectStage::new();
//! cabinet.register_stage("collect", Arc::new(collect.clone()));
//! // ... run a pipeline ending in {"jar": "collect"} ...
//! assert_eq!(collect.items().len(), 2);
//! ```

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use serde_json::Value;

use crate::cabinet::{BuildContext, SourceJar, StageJar};
use crate::definition::JarSpec;
use crate::error::FlowError;
use crate::flow::{reader_flow, Flow, RecordReader};
use crate::item::Item;

/// In-memory record reader with an optional injected failure.
#[derive(Debug, Clone)]
pub struct MockReader {
    records: Arc<Vec<Value>>,
    fail_at: Option<usize>,
    closed: Arc<AtomicUsize>,
}

impl MockReader {
    pub fn new(records: Vec<Value>) -> Self {
        Self {
            records: Arc::new(records),
            fail_at: None,
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shorthand for a resumable flow over `records`.
    pub fn flow(source_url: impl Into<String>, records: Vec<Value>) -> Flow {
        Self::new(records).into_flow(source_url)
    }

    /// Fail with an I/O error instead of returning record `index`.
    pub fn fail_at(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }

    /// Number of times a reader was closed, across all subscriptions.
    pub fn closed_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.closed)
    }

    pub fn into_flow(self, source_url: impl Into<String>) -> Flow {
        reader_flow(source_url, move || {
            Ok(Box::new(MockCursor {
                reader: self.clone(),
                next: 0,
                fail: self.fail_at,
            }) as Box<dyn RecordReader>)
        })
    }
}

struct MockCursor {
    reader: MockReader,
    next: usize,
    fail: Option<usize>,
}

impl RecordReader for MockCursor {
    fn read_next(&mut self) -> Result<Option<Value>, FlowError> {
        if self.fail == Some(self.next) {
            return Err(injected_failure(self.next));
        }
        let record = self.reader.records.get(self.next).cloned();
        if record.is_some() {
            self.next += 1;
        }
        Ok(record)
    }

    fn skip(&mut self, n: u64) -> Result<u64, FlowError> {
        let available = self.reader.records.len().saturating_sub(self.next);
        let skipped = available.min(n as usize);
        self.next += skipped;
        Ok(skipped as u64)
    }

    fn close(&mut self) -> Result<(), FlowError> {
        self.reader.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn injected_failure(index: usize) -> FlowError {
    FlowError::Io(io::Error::other(format!("injected failure at record {}", index)))
}

/// A resumable source that fails at a fixed record for its first few
/// subscriptions, then succeeds.
#[derive(Debug, Clone)]
pub struct FailingSource {
    source_url: String,
    records: Arc<Vec<Value>>,
    fail_index: usize,
    failing_subscriptions: usize,
    subscriptions: Arc<AtomicUsize>,
}

impl FailingSource {
    pub fn new(source_url: impl Into<String>, records: Vec<Value>) -> Self {
        Self {
            source_url: source_url.into(),
            records: Arc::new(records),
            fail_index: usize::MAX,
            failing_subscriptions: 0,
            subscriptions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fail at record `index` during the first `times` subscriptions.
    pub fn fail_at(mut self, index: usize, times: u32) -> Self {
        self.fail_index = index;
        self.failing_subscriptions = times as usize;
        self
    }

    /// How many times the source was subscribed.
    pub fn subscriptions(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.subscriptions)
    }

    pub fn into_flow(self) -> Flow {
        let url = self.source_url.clone();
        reader_flow(url, move || {
            let subscription = self.subscriptions.fetch_add(1, Ordering::SeqCst) + 1;
            let fail = (subscription <= self.failing_subscriptions).then_some(self.fail_index);
            Ok(Box::new(MockCursor {
                reader: MockReader::new(self.records.to_vec()),
                next: 0,
                fail,
            }) as Box<dyn RecordReader>)
        })
    }
}

impl SourceJar for FailingSource {
    fn new_source(&self, _spec: &JarSpec, _build: &BuildContext<'_>) -> Result<Flow, FlowError> {
        Ok(self.clone().into_flow())
    }
}

/// A pass-through stage that records every item it forwards.
#[derive(Debug, Clone, Default)]
pub struct CollectStage {
    items: Arc<Mutex<Vec<Item>>>,
}

impl CollectStage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Items seen so far, in order.
    pub fn items(&self) -> Vec<Item> {
        self.items.lock().map(|items| items.clone()).unwrap_or_default()
    }

    /// Payloads seen so far, in order.
    pub fn data(&self) -> Vec<Value> {
        self.items().into_iter().map(|item| item.data).collect()
    }
}

impl StageJar for CollectStage {
    fn new_stage(
        &self,
        _spec: &JarSpec,
        _build: &BuildContext<'_>,
        input: Flow,
    ) -> Result<Flow, FlowError> {
        let items = Arc::clone(&self.items);
        Ok(input.transform(move |stream, _| {
            let items = Arc::clone(&items);
            stream
                .inspect(move |result| {
                    if let (Ok(item), Ok(mut items)) = (result, items.lock()) {
                        items.push(item.clone());
                    }
                })
                .boxed()
        }))
    }
}
