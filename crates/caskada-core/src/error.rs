use std::fmt::Display;

use thiserror::Error;

/// All errors that can surface from a caskada run.
///
/// The engine never swallows an error: apart from the retry/fallback path of a
/// node's exec phase, every variant bubbles up to the caller of the outermost
/// `run`.
#[derive(Debug, Error)]
pub enum CaskadaError {
    /// The graph or memory was used in a way that can never succeed,
    /// e.g. writing a reserved memory key or a zero retry budget.
    #[error("Graph configuration error: {0}")]
    Configuration(String),

    /// A node was visited more often than the flow's `max_visits` allows.
    #[error("Maximum cycle count ({limit}) reached for {node}")]
    CycleLimitExceeded { node: String, limit: usize },

    /// `trigger` was called while the post window was closed.
    #[error("Trigger misuse: {0}")]
    TriggerMisuse(String),

    /// Error raised by user code in prep, exec or post.
    #[error("Node execution error: {0}")]
    Execution(String),

    /// An exec error annotated with the (0-indexed) retry it failed on.
    #[error("{source} (retry {retry_count})")]
    Retried {
        retry_count: usize,
        source: Box<CaskadaError>,
    },

    /// A value could not be converted to or from its JSON representation.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A specialized Result type for caskada operations
pub type CaskadaResult<T> = Result<T, CaskadaError>;

impl CaskadaError {
    /// Create a new execution error
    pub fn execution(message: impl Display) -> Self {
        Self::Execution(message.to_string())
    }

    /// Create a new execution error attributed to a node
    pub fn node_execution(node: impl Display, message: impl Display) -> Self {
        Self::Execution(format!("Node {}: {}", node, message))
    }

    /// Attach retry metadata, replacing any count already present.
    pub fn with_retry_count(self, retry_count: usize) -> Self {
        match self {
            Self::Retried { source, .. } => Self::Retried {
                retry_count,
                source,
            },
            other => Self::Retried {
                retry_count,
                source: Box::new(other),
            },
        }
    }

    /// The retry this error was raised on, if it went through the retry runner.
    pub fn retry_count(&self) -> Option<usize> {
        match self {
            Self::Retried { retry_count, .. } => Some(*retry_count),
            _ => None,
        }
    }

    /// The error as originally raised, without retry annotations.
    pub fn root_cause(&self) -> &CaskadaError {
        match self {
            Self::Retried { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
