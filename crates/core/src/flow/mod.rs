//! Demand-driven item streams.
//!
//! A [`Flow`] is a re-subscribable description of an item stream. Building a
//! flow never produces anything; each call to [`Flow::subscribe`] starts an
//! independent production run that honours the context it was given (most
//! importantly the position to resume each source from).
//!
//! Subscribed flows are plain `futures` streams: pulling one item is one unit
//! of demand, so a producer cannot run ahead of its consumer. The
//! [`Subscription`] wrapper adds explicit `request(n)` accounting for
//! consumers that want to authorize several items at once.
//!
//! Every stream ends after its first `Err`; a stream that ends without an
//! error has completed.

mod reader;
mod subscription;

pub use reader::{reader_flow, RecordReader};
pub use subscription::{Signal, Subscription};

use std::fmt;
use std::sync::Arc;

use futures::future;
use futures::stream::{self, BoxStream, StreamExt};

use crate::context::PipelineContext;
use crate::error::FlowError;
use crate::item::Item;

/// A subscribed, single-consumer item stream.
pub type ItemStream = BoxStream<'static, Result<Item, FlowError>>;

type SubscribeFn = dyn Fn(PipelineContext) -> ItemStream + Send + Sync;

/// Re-subscribable item stream description.
#[derive(Clone)]
pub struct Flow {
    subscribe: Arc<SubscribeFn>,
}

impl Flow {
    /// Creates a flow from a subscribe function.
    pub fn new<F>(subscribe: F) -> Self
    where
        F: Fn(PipelineContext) -> ItemStream + Send + Sync + 'static,
    {
        Self {
            subscribe: Arc::new(subscribe),
        }
    }

    /// Starts a new production run.
    pub fn subscribe(&self, ctx: PipelineContext) -> ItemStream {
        terminate_on_error((self.subscribe)(ctx))
    }

    /// A flow that completes immediately.
    pub fn empty() -> Self {
        Self::new(|_| stream::empty().boxed())
    }

    /// A flow whose every subscription fails with `err`.
    pub fn error(err: FlowError) -> Self {
        Self::new(move |_| stream::once(future::ready(Err(err.clone()))).boxed())
    }

    /// A flow replaying a fixed list of items.
    pub fn from_items(items: Vec<Item>) -> Self {
        let items = Arc::new(items);
        Self::new(move |_| {
            let items = Arc::clone(&items);
            stream::iter((0..items.len()).map(move |i| Ok(items[i].clone()))).boxed()
        })
    }

    /// Builds a flow from a fallible constructor, turning a construction
    /// error into an error flow.
    pub fn try_build(build: impl FnOnce() -> Result<Flow, FlowError>) -> Self {
        build().unwrap_or_else(Flow::error)
    }

    /// Derives a flow by rewriting the stream of each subscription.
    pub fn transform<F>(self, f: F) -> Self
    where
        F: Fn(ItemStream, &PipelineContext) -> ItemStream + Send + Sync + 'static,
    {
        let upstream = self;
        Self::new(move |ctx| {
            let input = upstream.subscribe(ctx.clone());
            f(input, &ctx)
        })
    }

    /// Applies a fallible one-to-one function to every item.
    pub fn map_items<F>(self, f: F) -> Self
    where
        F: Fn(Item) -> Result<Item, FlowError> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.transform(move |input, _| {
            let f = Arc::clone(&f);
            input
                .map(move |result| result.and_then(|item| (*f)(item)))
                .boxed()
        })
    }
}

impl fmt::Debug for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Flow")
    }
}

/// Ends a stream right after its first error.
pub fn terminate_on_error(input: ItemStream) -> ItemStream {
    input
        .scan(false, |failed, result| {
            if *failed {
                return future::ready(None);
            }
            *failed = result.is_err();
            future::ready(Some(result))
        })
        .boxed()
}
