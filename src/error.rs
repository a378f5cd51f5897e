//! Errors raised while building or writing a bundle.

use std::path::PathBuf;
use thiserror::Error;

/// A fatal failure. Any of these aborts the whole run.
#[derive(Error, Debug)]
pub enum BundleError {
    #[error("failed to inspect {}: {message}", path.display())]
    Inspection { path: PathBuf, message: String },

    #[error("'{tool}' not found on PATH. {hint}")]
    ToolMissing { tool: &'static str, hint: &'static str },

    #[error("failed to prepare output directory {}: {source}", path.display())]
    Layout {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to copy {} to {}: {source}", src.display(), dst.display())]
    Copy {
        src: PathBuf,
        dst: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to set permissions on {}: {source}", path.display())]
    Permission {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to rewrite references in {}: {message}", path.display())]
    Rewrite { path: PathBuf, message: String },

    #[error("unsupported host platform: {0}")]
    Unsupported(&'static str),
}

impl BundleError {
    pub(crate) fn inspection(path: impl Into<PathBuf>, msg: impl std::fmt::Display) -> Self {
        Self::Inspection {
            path: path.into(),
            message: msg.to_string(),
        }
    }
}

pub type Result<T, E = BundleError> = std::result::Result<T, E>;
