//! Error types shared by every flow, jar and the crucible.

use std::error::Error as StdError;

use thiserror::Error;

use crate::positions::StoreError;

/// Terminal error carried by a flow.
///
/// Every failure, configuration mistakes included, travels through a stream
/// as one of these values so that retry and logging stages compose uniformly.
#[derive(Debug, Error)]
pub enum FlowError {
    /// Generic configuration problem.
    #[error("configuration error: {reason}")]
    Config { reason: String },

    /// No enabled source jar is registered under this name.
    #[error("unknown source: {0}")]
    UnknownSource(String),

    /// No enabled stage jar is registered under this name.
    #[error("unknown stage: {0}")]
    UnknownStage(String),

    /// A required option is absent.
    #[error("missing option: {0}")]
    MissingOption(String),

    /// An option is present but unusable.
    #[error("invalid option {option}: {reason}")]
    InvalidOption { option: String, reason: String },

    /// A named candidate could not be found.
    #[error("no {kind} named '{name}' found")]
    NotFound { kind: &'static str, name: String },

    /// A pipeline refers to a recipe that does not exist.
    #[error("recipe not found: {0}")]
    RecipeNotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload does not match what a stage expects.
    #[error("data error: {reason}")]
    Data { reason: String },

    /// Error raised inside a named pipeline/stage.
    #[error("{context}: {source}")]
    Stage {
        context: String,
        source: Box<FlowError>,
    },

    #[error("position store error: {0}")]
    Store(#[from] StoreError),

    /// A background task panicked or was aborted.
    #[error("task failed: {0}")]
    Task(String),

    #[error("pipeline cancelled")]
    Cancelled,
}

impl Clone for FlowError {
    /// I/O and JSON causes cannot be cloned; the copy rebuilds them from
    /// their kind and message.
    fn clone(&self) -> Self {
        match self {
            Self::Config { reason } => Self::Config {
                reason: reason.clone(),
            },
            Self::UnknownSource(name) => Self::UnknownSource(name.clone()),
            Self::UnknownStage(name) => Self::UnknownStage(name.clone()),
            Self::MissingOption(option) => Self::MissingOption(option.clone()),
            Self::InvalidOption { option, reason } => Self::InvalidOption {
                option: option.clone(),
                reason: reason.clone(),
            },
            Self::NotFound { kind, name } => Self::NotFound {
                kind: *kind,
                name: name.clone(),
            },
            Self::RecipeNotFound(name) => Self::RecipeNotFound(name.clone()),
            Self::Io(err) => Self::Io(std::io::Error::new(err.kind(), err.to_string())),
            Self::Json(err) => Self::Json(<serde_json::Error as serde::de::Error>::custom(
                err.to_string(),
            )),
            Self::Data { reason } => Self::Data {
                reason: reason.clone(),
            },
            Self::Stage { context, source } => Self::Stage {
                context: context.clone(),
                source: source.clone(),
            },
            Self::Store(err) => Self::Store(err.clone()),
            Self::Task(reason) => Self::Task(reason.clone()),
            Self::Cancelled => Self::Cancelled,
        }
    }
}

impl FlowError {
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    pub fn missing(option: impl Into<String>) -> Self {
        Self::MissingOption(option.into())
    }

    pub fn invalid(option: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidOption {
            option: option.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn data(reason: impl Into<String>) -> Self {
        Self::Data {
            reason: reason.into(),
        }
    }

    /// Wraps an error with `pipeline.stage` identity.
    pub fn in_stage(pipeline: Option<&str>, stage: &str, source: FlowError) -> Self {
        let context = match pipeline {
            Some(pipeline) => format!("{}.{}", pipeline, stage),
            None => stage.to_string(),
        };
        Self::Stage {
            context,
            source: Box::new(source),
        }
    }

    /// Simple name of this variant.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Config { .. } => "Config",
            Self::UnknownSource(_) => "UnknownSource",
            Self::UnknownStage(_) => "UnknownStage",
            Self::MissingOption(_) => "MissingOption",
            Self::InvalidOption { .. } => "InvalidOption",
            Self::NotFound { .. } => "NotFound",
            Self::RecipeNotFound(_) => "RecipeNotFound",
            Self::Io(_) => "Io",
            Self::Json(_) => "Json",
            Self::Data { .. } => "Data",
            Self::Stage { .. } => "Stage",
            Self::Store(_) => "Store",
            Self::Task(_) => "Task",
            Self::Cancelled => "Cancelled",
        }
    }

    /// Whether this is a configuration-class error.
    pub fn is_config(&self) -> bool {
        match self {
            Self::Config { .. }
            | Self::UnknownSource(_)
            | Self::UnknownStage(_)
            | Self::MissingOption(_)
            | Self::InvalidOption { .. }
            | Self::NotFound { .. }
            | Self::RecipeNotFound(_) => true,
            Self::Stage { source, .. } => source.is_config(),
            _ => false,
        }
    }

    /// Names of this error and every cause in its chain.
    ///
    /// Each error contributes a simple and a qualified name, e.g. `Io` and
    /// `FlowError::Io`, or `io::Error` and `std::io::Error`. I/O errors also
    /// contribute their `ErrorKind`, e.g. `ConnectionRefused`.
    pub fn names(&self) -> Vec<String> {
        let mut names = Vec::new();
        let mut current: Option<&(dyn StdError + 'static)> = Some(self);
        while let Some(err) = current {
            error_names(err, &mut names);
            current = err.source();
        }
        names
    }

    /// Whether any error in the chain is known by `name`.
    pub fn matches_name(&self, name: &str) -> bool {
        self.names().iter().any(|n| n == name)
    }
}

fn error_names(err: &(dyn StdError + 'static), out: &mut Vec<String>) {
    let flow = err
        .downcast_ref::<FlowError>()
        .or_else(|| err.downcast_ref::<Box<FlowError>>().map(|b| b.as_ref()));
    if let Some(flow) = flow {
        out.push(flow.kind_name().to_string());
        out.push(format!("FlowError::{}", flow.kind_name()));
    } else if let Some(io) = err.downcast_ref::<std::io::Error>() {
        out.push("io::Error".to_string());
        out.push("std::io::Error".to_string());
        out.push(format!("{:?}", io.kind()));
    } else if err.downcast_ref::<serde_json::Error>().is_some() {
        out.push("Error".to_string());
        out.push("serde_json::Error".to_string());
    } else if err.downcast_ref::<StoreError>().is_some() {
        out.push("StoreError".to_string());
        out.push("alembic_core::StoreError".to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_error_display() {
        let err = FlowError::not_found("source", "xml");
        assert_eq!(err.to_string(), "no source named 'xml' found");

        let err = FlowError::in_stage(Some("people"), "retry", FlowError::missing("minBackoff"));
        assert_eq!(err.to_string(), "people.retry: missing option: minBackoff");
    }

    #[test]
    fn test_names_walk_cause_chain() {
        let io = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        let err = FlowError::in_stage(Some("p"), "sink", FlowError::Io(io));

        let names = err.names();
        assert!(names.contains(&"Stage".to_string()));
        assert!(names.contains(&"FlowError::Io".to_string()));
        assert!(names.contains(&"std::io::Error".to_string()));
        assert!(names.contains(&"ConnectionRefused".to_string()));
        assert!(!names.contains(&"Data".to_string()));
    }

    #[test]
    fn test_clone_keeps_variant_and_kind() {
        let err = FlowError::in_stage(
            None,
            "jsonl",
            FlowError::Io(io::Error::new(io::ErrorKind::NotFound, "missing.jsonl")),
        );
        let copy = err.clone();
        assert_eq!(copy.to_string(), err.to_string());
        assert!(copy.matches_name("NotFound"));
        assert!(copy.matches_name("Io"));
    }

    #[test]
    fn test_is_config() {
        assert!(FlowError::UnknownStage("x".into()).is_config());
        assert!(FlowError::in_stage(None, "oneOf", FlowError::not_found("stage", "x")).is_config());
        assert!(!FlowError::data("bad").is_config());
    }
}
