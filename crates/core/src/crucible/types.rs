//! Types for the pipeline registry.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FlowError;

/// Opaque identifier of a started pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineHandle(Uuid);

impl PipelineHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PipelineHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PipelineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for PipelineHandle {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle state of a registered pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// How a pipeline ended.
#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    /// The stream completed after emitting `items` items.
    Completed { items: u64 },
    /// The stream ended with a terminal error.
    Failed(FlowError),
    Cancelled,
}

impl PipelineOutcome {
    pub fn state(&self) -> PipelineState {
        match self {
            Self::Completed { .. } => PipelineState::Completed,
            Self::Failed(_) => PipelineState::Failed,
            Self::Cancelled => PipelineState::Cancelled,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    pub fn error(&self) -> Option<&FlowError> {
        match self {
            Self::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// Item count on completion, the terminal error otherwise.
    pub fn into_result(self) -> Result<u64, FlowError> {
        match self {
            Self::Completed { items } => Ok(items),
            Self::Failed(e) => Err(e),
            Self::Cancelled => Err(FlowError::Cancelled),
        }
    }
}

/// Snapshot of one registered pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStatus {
    pub id: PipelineHandle,
    pub name: String,
    pub state: PipelineState,
    /// Items emitted so far.
    pub items: u64,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate over every registered pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrucibleSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Items emitted across all pipelines.
    pub items: u64,
}

impl CrucibleSummary {
    /// No pipeline failed.
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}
