//! Build failure categories.
//!
//! These travel inside `anyhow::Error` so that context can be layered on top while
//! the category stays recoverable with `downcast_ref`.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    /// Something needed before the build can start is missing; nothing has been touched yet.
    #[error("{0}")]
    Precondition(String),

    /// A transformation met structure it can't handle.
    #[error("Failed to transform {path}: {reason}")]
    Transform { path: PathBuf, reason: String },

    /// An external tool failed or complained.
    #[error("{tool} failed: {detail}")]
    Collaborator { tool: String, detail: String },

    /// The validator reported problems with a package.
    #[error("Validation of {artifact} reported {} problem(s):\n{}", .diagnostics.len(), .diagnostics.join("\n"))]
    Validation {
        artifact: String,
        diagnostics: Vec<String>,
    },
}

impl BuildError {
    pub fn transform<P: Into<PathBuf>, S: ToString>(path: P, reason: S) -> BuildError {
        BuildError::Transform {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn collaborator<T: ToString, D: ToString>(tool: T, detail: D) -> BuildError {
        BuildError::Collaborator {
            tool: tool.to_string(),
            detail: detail.to_string(),
        }
    }
}
