//! Consumer-side demand accounting over a subscribed flow.

use futures::StreamExt;

use super::{Flow, ItemStream};
use crate::context::PipelineContext;
use crate::error::FlowError;
use crate::item::Item;

/// A signal delivered to the consumer of a subscription.
#[derive(Debug)]
pub enum Signal {
    Item(Item),
    Complete,
    Error(FlowError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Active,
    Completed,
    Failed,
    Cancelled,
}

/// An attached consumer with explicit demand.
///
/// Items are only pulled from the producer while outstanding demand is
/// positive, so the number of emitted items never exceeds the sum of all
/// `request` calls. Exhaustion is observed on the next demanded pull.
pub struct Subscription {
    stream: Option<ItemStream>,
    outstanding: u64,
    emitted: u64,
    state: State,
}

impl Subscription {
    /// Subscribes to `flow` with `ctx`.
    pub fn new(flow: &Flow, ctx: PipelineContext) -> Self {
        Self::from_stream(flow.subscribe(ctx))
    }

    pub fn from_stream(stream: ItemStream) -> Self {
        Self {
            stream: Some(stream),
            outstanding: 0,
            emitted: 0,
            state: State::Active,
        }
    }

    /// Authorizes up to `n` more items. Requests are additive.
    pub fn request(&mut self, n: u64) {
        if n == 0 || self.state != State::Active {
            return;
        }
        self.outstanding = self.outstanding.saturating_add(n);
    }

    pub fn outstanding(&self) -> u64 {
        self.outstanding
    }

    /// Number of items delivered so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    pub fn is_terminated(&self) -> bool {
        self.state != State::Active
    }

    pub fn is_cancelled(&self) -> bool {
        self.state == State::Cancelled
    }

    /// Pulls the next signal.
    ///
    /// Returns `None` when there is no outstanding demand or the subscription
    /// has already terminated.
    pub async fn next_signal(&mut self) -> Option<Signal> {
        if self.state != State::Active || self.outstanding == 0 {
            return None;
        }
        let stream = self.stream.as_mut()?;

        match stream.next().await {
            Some(Ok(item)) => {
                self.outstanding -= 1;
                self.emitted += 1;
                Some(Signal::Item(item))
            }
            Some(Err(err)) => {
                self.release(State::Failed);
                Some(Signal::Error(err))
            }
            None => {
                self.release(State::Completed);
                Some(Signal::Complete)
            }
        }
    }

    /// Stops demand and releases the producer.
    pub fn cancel(&mut self) {
        if self.state == State::Active {
            self.release(State::Cancelled);
        }
    }

    fn release(&mut self, state: State) {
        self.stream = None;
        self.outstanding = 0;
        self.state = state;
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("outstanding", &self.outstanding)
            .field("emitted", &self.emitted)
            .field("state", &self.state)
            .finish()
    }
}
