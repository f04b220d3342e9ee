//! State store errors.

use shellmux_core::StorageError;
use thiserror::Error;

use crate::{
    hash::{BaseHash, DiffHash},
    linediff::LineDiffError,
};

/// Shell state error.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("invalid state pointer: {0} diffs, at most one is supported")]
    InvalidStatePtr(usize),
    #[error("shell state {0} not found")]
    BaseNotFound(BaseHash),
    #[error("shell state diff {0} not found")]
    DiffNotFound(DiffHash),
    #[error("diff was made against base {expected}, not {actual}")]
    BaseMismatch { expected: BaseHash, actual: BaseHash },
    #[error("cannot decode {kind}: {source}")]
    Decode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("cannot apply diff: {0}")]
    Apply(#[from] LineDiffError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
