//! Repository error taxonomy
//!
//! Every fallible operation returns `anyhow::Result`. Failures that callers
//! need to tell apart are raised as [`RepositoryError`] values inside the
//! `anyhow::Error`, and classified with `downcast_ref`:
//!
//! ```ignore
//! match err.downcast_ref::<RepositoryError>() {
//!     Some(RepositoryError::ReferenceConflict { .. }) => retry(),
//!     _ => return Err(err),
//! }
//! ```
//!
//! A merge that stops on conflicts is not an error: it is reported as
//! `MergeOutcome::Conflicted`.

use crate::artifacts::objects::object_id::ObjectId;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("object {0} not found")]
    ObjectNotFound(ObjectId),

    /// Stored bytes do not hash to the digest they are filed under.
    #[error("object {oid} is corrupt: {reason}")]
    ObjectCorrupt { oid: ObjectId, reason: String },

    /// Two different byte sequences claim the same digest.
    #[error("digest collision on object {0}")]
    DigestCollision(ObjectId),

    #[error("invalid object: {0}")]
    InvalidObject(String),

    #[error("unknown reference {0}")]
    UnknownReference(String),

    #[error(
        "reference {name} changed concurrently: expected {}, found {}",
        display_optional_oid(.expected),
        display_optional_oid(.actual)
    )]
    ReferenceConflict {
        name: String,
        expected: Option<ObjectId>,
        actual: Option<ObjectId>,
    },

    #[error("update of {reference} rejected: {reason}")]
    TransferRejected { reference: String, reason: String },

    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// The peer gave up with an `ERR` line; retrying would get the same answer.
    #[error("remote error: {0}")]
    RemoteError(String),

    #[error("index has unmerged paths: {}", display_paths(.0))]
    UnmergedIndex(Vec<PathBuf>),
}

impl RepositoryError {
    /// Errors that a caller may recover from by re-reading state and trying again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RepositoryError::ReferenceConflict { .. } | RepositoryError::TransportFailure(_)
        )
    }

    pub fn transport(reason: impl std::fmt::Display) -> Self {
        RepositoryError::TransportFailure(reason.to_string())
    }
}

/// Classify an `anyhow` error chain.
pub fn classify(error: &anyhow::Error) -> Option<&RepositoryError> {
    error.chain().find_map(|cause| cause.downcast_ref::<RepositoryError>())
}

pub fn is_retryable(error: &anyhow::Error) -> bool {
    classify(error).is_some_and(RepositoryError::is_retryable)
}

fn display_optional_oid(oid: &Option<ObjectId>) -> String {
    oid.as_ref()
        .map(ObjectId::to_string)
        .unwrap_or_else(|| "<absent>".to_string())
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use pretty_assertions::assert_eq;

    #[test]
    fn conflict_is_retryable_through_context() {
        let error: anyhow::Error = RepositoryError::ReferenceConflict {
            name: "refs/heads/main".to_string(),
            expected: None,
            actual: None,
        }
        .into();
        let error = Err::<(), _>(error)
            .context("pushing main")
            .expect_err("context keeps the error");

        assert!(is_retryable(&error));
    }

    #[test]
    fn corruption_is_not_retryable() {
        let error: anyhow::Error =
            RepositoryError::ObjectNotFound(ObjectId::zero()).into();

        assert!(!is_retryable(&error));
        assert_eq!(
            error.to_string(),
            "object 0000000000000000000000000000000000000000 not found"
        );
    }
}
