//! Error taxonomy for the retrieval core.
//!
//! Every fallible operation returns [`RagError`]. Errors raised inside the
//! pipeline are wrapped in [`RagError::Stage`] so callers can tell which
//! step (chunking, embedding, retrieval, reranking, generation) failed.

use std::fmt;

use thiserror::Error;

/// Shorthand result type used throughout the crate.
pub type Result<T> = std::result::Result<T, RagError>;

/// Pipeline step an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Chunk,
    Embed,
    Retrieve,
    Rerank,
    Generate,
    Ingest,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Chunk => "chunk",
            Stage::Embed => "embed",
            Stage::Retrieve => "retrieve",
            Stage::Rerank => "rerank",
            Stage::Generate => "generate",
            Stage::Ingest => "ingest",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum RagError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<RagError>,
    },
}

impl RagError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        RagError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Tag this error with the stage it surfaced from.
    ///
    /// Already-tagged errors keep their innermost stage.
    pub fn at(self, stage: Stage) -> Self {
        match self {
            RagError::Stage { .. } => self,
            other => RagError::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// The error with any stage wrapping removed.
    pub fn root(&self) -> &RagError {
        match self {
            RagError::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            RagError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// True for `Cancelled` and `DeadlineExceeded`, wrapped or not.
    pub fn is_abort(&self) -> bool {
        matches!(
            self.root(),
            RagError::Cancelled | RagError::DeadlineExceeded
        )
    }
}

/// Extension for tagging a `Result` with a pipeline stage.
pub trait StageExt<T> {
    fn stage(self, stage: Stage) -> Result<T>;
}

impl<T> StageExt<T> for Result<T> {
    fn stage(self, stage: Stage) -> Result<T> {
        self.map_err(|e| e.at(stage))
    }
}
