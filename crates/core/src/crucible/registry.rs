//! The crucible: supervisor of concurrently running pipelines.
//!
//! Each started pipeline runs on its own tokio task which subscribes to the
//! composed flow and pulls items in batches of `prefetch`. Pipelines never
//! share state except through this registry, and a pipeline's failure is
//! only ever reported through its own completion.

use std::collections::HashMap;
use std::future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::types::{CrucibleSummary, PipelineHandle, PipelineOutcome, PipelineState, PipelineStatus};
use crate::composer::Composer;
use crate::context::{PipelineContext, PipelineSpawner};
use crate::definition::PipelineDefinition;
use crate::error::FlowError;
use crate::flow::{Flow, Signal, Subscription};
use crate::metrics;
use crate::positions::PositionStore;

/// Default number of items requested at a time.
pub const DEFAULT_PREFETCH: u64 = 256;

#[derive(Debug, Clone)]
struct Finished {
    outcome: PipelineOutcome,
    at: DateTime<Utc>,
}

struct Entry {
    name: String,
    started_at: DateTime<Utc>,
    items: Arc<AtomicU64>,
    finished: watch::Receiver<Option<Finished>>,
    cancel: broadcast::Sender<()>,
}

impl Entry {
    fn status(&self, id: PipelineHandle) -> PipelineStatus {
        let finished = self.finished.borrow();
        PipelineStatus {
            id,
            name: self.name.clone(),
            state: finished
                .as_ref()
                .map_or(PipelineState::Running, |f| f.outcome.state()),
            items: self.items.load(Ordering::Relaxed),
            started_at: self.started_at,
            finished_at: finished.as_ref().map(|f| f.at),
            error: finished
                .as_ref()
                .and_then(|f| f.outcome.error())
                .map(|e| e.to_string()),
        }
    }
}

struct Inner {
    composer: Composer,
    prefetch: u64,
    pipelines: RwLock<HashMap<PipelineHandle, Entry>>,
}

/// Registry of running and finished pipelines.
#[derive(Clone)]
pub struct Crucible {
    inner: Arc<Inner>,
    positions: Option<Arc<dyn PositionStore>>,
}

impl Crucible {
    pub fn new(composer: Composer, prefetch: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                composer,
                prefetch: prefetch.max(1),
                pipelines: RwLock::new(HashMap::new()),
            }),
            positions: None,
        }
    }

    /// Position store handed to every pipeline started from now on.
    pub fn with_position_store(mut self, store: Arc<dyn PositionStore>) -> Self {
        self.positions = Some(store);
        self
    }

    pub fn composer(&self) -> &Composer {
        &self.inner.composer
    }

    fn pipelines(&self) -> RwLockReadGuard<'_, HashMap<PipelineHandle, Entry>> {
        self.inner
            .pipelines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Composes `definition`, registers it and starts driving it.
    ///
    /// Must be called from within a tokio runtime; safe to call from inside
    /// a running pipeline. A definition whose recipe cannot be resolved is
    /// still registered and fails through its completion.
    pub fn start(&self, definition: PipelineDefinition) -> Result<PipelineHandle, FlowError> {
        let runtime = Handle::try_current().map_err(|e| FlowError::Task(e.to_string()))?;

        let (name, flow) = match self.inner.composer.resolve_definition(&definition) {
            Ok(resolved) => {
                if !resolved.enabled {
                    return Err(FlowError::config(format!(
                        "pipeline '{}' is disabled",
                        resolved.display_name()
                    )));
                }
                let flow = self.inner.composer.compose(&resolved);
                (resolved.display_name().to_string(), flow)
            }
            Err(e) => (definition.display_name().to_string(), Flow::error(e)),
        };

        let handle = PipelineHandle::new();
        let items = Arc::new(AtomicU64::new(0));
        let (finished_tx, finished_rx) = watch::channel(None);
        let (cancel_tx, cancel_rx) = broadcast::channel(1);

        let mut pipelines = self
            .inner
            .pipelines
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        pipelines.insert(
            handle,
            Entry {
                name: name.clone(),
                started_at: Utc::now(),
                items: Arc::clone(&items),
                finished: finished_rx,
                cancel: cancel_tx,
            },
        );
        drop(pipelines);

        let mut ctx = PipelineContext::for_pipeline(name.clone())
            .with_spawner(Arc::new(self.clone()) as Arc<dyn PipelineSpawner>);
        if let Some(store) = &self.positions {
            ctx = ctx.with_position_store(Arc::clone(store));
        }

        metrics::PIPELINES_STARTED.inc();
        info!(pipeline = %name, handle = %handle, "Pipeline started");

        let span = info_span!("pipeline", pipeline = %name, handle = %handle);
        let driver = runtime.spawn(
            drive(flow, ctx, self.inner.prefetch, items, cancel_rx, name.clone())
                .instrument(span),
        );
        runtime.spawn(async move {
            let outcome = match driver.await {
                Ok(outcome) => outcome,
                Err(e) if e.is_cancelled() => PipelineOutcome::Cancelled,
                Err(e) => PipelineOutcome::Failed(FlowError::Task(e.to_string())),
            };
            record_outcome(&name, handle, &outcome);
            let _ = finished_tx.send(Some(Finished {
                outcome,
                at: Utc::now(),
            }));
        });

        Ok(handle)
    }

    /// Waits for the pipeline to finish.
    pub async fn completion_of(
        &self,
        handle: PipelineHandle,
    ) -> Result<PipelineOutcome, FlowError> {
        let mut finished = self
            .pipelines()
            .get(&handle)
            .map(|entry| entry.finished.clone())
            .ok_or_else(|| FlowError::not_found("pipeline", handle.to_string()))?;

        let done = finished
            .wait_for(Option::is_some)
            .await
            .map_err(|_| FlowError::Task("pipeline task was dropped".to_string()))?;
        match &*done {
            Some(f) => Ok(f.outcome.clone()),
            None => Err(FlowError::Task("pipeline task was dropped".to_string())),
        }
    }

    /// Asks a running pipeline to stop. Returns false for unknown or
    /// already finished pipelines.
    pub fn cancel(&self, handle: PipelineHandle) -> bool {
        let pipelines = self.pipelines();
        match pipelines.get(&handle) {
            Some(entry) if entry.finished.borrow().is_none() => {
                debug!(pipeline = %entry.name, handle = %handle, "Cancelling pipeline");
                entry.cancel.send(()).is_ok()
            }
            _ => false,
        }
    }

    /// Cancels every running pipeline and returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let handles: Vec<PipelineHandle> = self.pipelines().keys().copied().collect();
        handles.into_iter().filter(|h| self.cancel(*h)).count()
    }

    /// Snapshots of every registered pipeline, oldest first.
    pub fn status(&self) -> Vec<PipelineStatus> {
        let mut statuses: Vec<PipelineStatus> = self
            .pipelines()
            .iter()
            .map(|(id, entry)| entry.status(*id))
            .collect();
        statuses.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.name.cmp(&b.name))
        });
        statuses
    }

    pub fn status_of(&self, handle: PipelineHandle) -> Option<PipelineStatus> {
        self.pipelines().get(&handle).map(|entry| entry.status(handle))
    }

    /// Number of registered pipelines.
    pub fn len(&self) -> usize {
        self.pipelines().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Aggregate of the current state of every pipeline.
    pub fn summary(&self) -> CrucibleSummary {
        let statuses = self.status();
        let mut summary = CrucibleSummary {
            total: statuses.len(),
            ..Default::default()
        };
        for status in statuses {
            summary.items += status.items;
            match status.state {
                PipelineState::Completed => summary.completed += 1,
                PipelineState::Failed => summary.failed += 1,
                PipelineState::Cancelled => summary.cancelled += 1,
                PipelineState::Running => {}
            }
        }
        summary
    }

    /// Waits until every registered pipeline has finished, including those
    /// registered while waiting.
    pub async fn wait_all(&self) -> CrucibleSummary {
        loop {
            let pending: Vec<watch::Receiver<Option<Finished>>> = self
                .pipelines()
                .values()
                .map(|entry| entry.finished.clone())
                .collect();
            let seen = pending.len();

            for mut finished in pending {
                let _ = finished.wait_for(Option::is_some).await;
            }

            if self.len() == seen {
                return self.summary();
            }
        }
    }
}

impl PipelineSpawner for Crucible {
    fn spawn(&self, definition: PipelineDefinition) -> Result<PipelineHandle, FlowError> {
        self.start(definition)
    }
}

/// Resolves when a cancel signal arrives. A closed channel never cancels.
async fn cancelled(cancel: &mut broadcast::Receiver<()>) {
    match cancel.recv().await {
        Ok(()) | Err(RecvError::Lagged(_)) => {}
        Err(RecvError::Closed) => future::pending().await,
    }
}

async fn drive(
    flow: Flow,
    ctx: PipelineContext,
    prefetch: u64,
    items: Arc<AtomicU64>,
    mut cancel: broadcast::Receiver<()>,
    name: String,
) -> PipelineOutcome {
    let emitted = metrics::ITEMS_EMITTED.with_label_values(&[name.as_str()]);
    let mut subscription = Subscription::new(&flow, ctx);

    loop {
        if subscription.outstanding() == 0 {
            subscription.request(prefetch);
        }

        tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => {
                subscription.cancel();
                return PipelineOutcome::Cancelled;
            }
            signal = subscription.next_signal() => match signal {
                Some(Signal::Item(_)) => {
                    items.fetch_add(1, Ordering::Relaxed);
                    emitted.inc();
                }
                Some(Signal::Complete) | None => {
                    return PipelineOutcome::Completed {
                        items: items.load(Ordering::Relaxed),
                    };
                }
                Some(Signal::Error(e)) => return PipelineOutcome::Failed(e),
            }
        }
    }
}

fn record_outcome(name: &str, handle: PipelineHandle, outcome: &PipelineOutcome) {
    metrics::PIPELINES_FINISHED
        .with_label_values(&[outcome.state().as_str()])
        .inc();
    match outcome {
        PipelineOutcome::Completed { items } => {
            info!(pipeline = %name, handle = %handle, items, "Pipeline completed")
        }
        PipelineOutcome::Failed(e) => {
            error!(pipeline = %name, handle = %handle, error = %e, "Pipeline failed")
        }
        PipelineOutcome::Cancelled => {
            warn!(pipeline = %name, handle = %handle, "Pipeline cancelled")
        }
    }
}
