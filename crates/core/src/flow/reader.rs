//! Resumable sources over blocking record readers.

use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use tracing::{debug, warn};

use super::Flow;
use crate::context::PipelineContext;
use crate::error::FlowError;
use crate::item::{Item, Metadata};

/// A blocking, non-reentrant record reader (file handle, cursor, ...).
///
/// Readers are only ever touched from one blocking task at a time.
pub trait RecordReader: Send + 'static {
    /// Reads the next record, `None` once exhausted.
    fn read_next(&mut self) -> Result<Option<Value>, FlowError>;

    /// Skips up to `n` records and returns how many were skipped.
    ///
    /// The default reads and discards; readers over seekable media should
    /// override it.
    fn skip(&mut self, n: u64) -> Result<u64, FlowError> {
        let mut skipped = 0;
        while skipped < n {
            if self.read_next()?.is_none() {
                break;
            }
            skipped += 1;
        }
        Ok(skipped)
    }

    /// Releases the underlying resource.
    fn close(&mut self) -> Result<(), FlowError> {
        Ok(())
    }
}

type OpenFn = dyn Fn() -> Result<Box<dyn RecordReader>, FlowError> + Send + Sync;

/// Builds a resumable flow over readers produced by `open`.
///
/// Each subscription opens a fresh reader. If the context carries a resume
/// position `p` for `source_url`, exactly `p + 1` records are skipped and
/// numbering continues from `p + 1`. Every item is stamped with `sourceUrl`,
/// `timestamp` and `streamPosition`.
pub fn reader_flow<F>(source_url: impl Into<String>, open: F) -> Flow
where
    F: Fn() -> Result<Box<dyn RecordReader>, FlowError> + Send + Sync + 'static,
{
    let source_url: Arc<str> = Arc::from(source_url.into());
    let open: Arc<OpenFn> = Arc::new(open);

    Flow::new(move |ctx| {
        let source_url = Arc::clone(&source_url);
        let open = Arc::clone(&open);
        stream::unfold(ReadState::Opening(ctx), move |state| {
            step(state, Arc::clone(&source_url), Arc::clone(&open))
        })
        .boxed()
    })
}

enum ReadState {
    Opening(PipelineContext),
    Reading { reader: ReaderGuard, position: u64 },
    Done,
}

/// Owns a reader and closes it when dropped, e.g. on cancellation.
struct ReaderGuard {
    reader: Option<Box<dyn RecordReader>>,
}

impl ReaderGuard {
    fn new(reader: Box<dyn RecordReader>) -> Self {
        Self {
            reader: Some(reader),
        }
    }

    fn read_next(&mut self) -> Result<Option<Value>, FlowError> {
        match self.reader.as_mut() {
            Some(reader) => reader.read_next(),
            None => Ok(None),
        }
    }

    fn skip(&mut self, n: u64) -> Result<u64, FlowError> {
        match self.reader.as_mut() {
            Some(reader) => reader.skip(n),
            None => Ok(0),
        }
    }

    fn close(mut self) -> Result<(), FlowError> {
        match self.reader.take() {
            Some(mut reader) => reader.close(),
            None => Ok(()),
        }
    }
}

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        if let Some(mut reader) = self.reader.take() {
            if let Err(e) = reader.close() {
                warn!(error = %e, "Failed to close reader");
            }
        }
    }
}

enum ReadOutcome {
    Record(ReaderGuard, Value),
    Exhausted(Result<(), FlowError>),
    Failed(FlowError),
}

async fn blocking<T, F>(f: F) -> Result<T, FlowError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| FlowError::Task(e.to_string()))
}

async fn step(
    state: ReadState,
    source_url: Arc<str>,
    open: Arc<OpenFn>,
) -> Option<(Result<Item, FlowError>, ReadState)> {
    match state {
        ReadState::Done => None,
        ReadState::Opening(ctx) => {
            let resume = match ctx.resume_position(&source_url).await {
                Ok(resume) => resume,
                Err(e) => return Some((Err(e), ReadState::Done)),
            };

            let url = Arc::clone(&source_url);
            let opened = blocking(move || -> Result<(ReaderGuard, u64), FlowError> {
                let mut reader = ReaderGuard::new(open()?);
                let start = match resume {
                    Some(position) => {
                        let wanted = position.saturating_add(1);
                        let skipped = reader.skip(wanted)?;
                        debug!(source_url = %url, wanted, skipped, "Resumed reader");
                        wanted
                    }
                    None => 0,
                };
                Ok((reader, start))
            })
            .await;

            match opened.and_then(|r| r) {
                Ok((reader, position)) => read_one(reader, position, source_url).await,
                Err(e) => Some((Err(e), ReadState::Done)),
            }
        }
        ReadState::Reading { reader, position } => read_one(reader, position, source_url).await,
    }
}

async fn read_one(
    mut reader: ReaderGuard,
    position: u64,
    source_url: Arc<str>,
) -> Option<(Result<Item, FlowError>, ReadState)> {
    let outcome = blocking(move || match reader.read_next() {
        Ok(Some(value)) => ReadOutcome::Record(reader, value),
        Ok(None) => ReadOutcome::Exhausted(reader.close()),
        Err(e) => {
            drop(reader);
            ReadOutcome::Failed(e)
        }
    })
    .await;

    match outcome {
        Ok(ReadOutcome::Record(reader, value)) => {
            let mut metadata = Metadata::new();
            metadata.set_source_url(&*source_url);
            metadata.set_timestamp(Utc::now().timestamp_millis());
            metadata.set_stream_position(position);
            Some((
                Ok(Item::new(metadata, value)),
                ReadState::Reading {
                    reader,
                    position: position + 1,
                },
            ))
        }
        Ok(ReadOutcome::Exhausted(Ok(()))) => None,
        Ok(ReadOutcome::Exhausted(Err(e))) | Ok(ReadOutcome::Failed(e)) | Err(e) => {
            Some((Err(e), ReadState::Done))
        }
    }
}
