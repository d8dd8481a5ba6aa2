//! Top-level error types for fedlink.

use thiserror::Error;

use crate::directory::DirectoryError;
use crate::github::RepoError;
use crate::seal::SealError;
use crate::token::TokenError;

/// Top-level error type encompassing all fedlink errors.
#[derive(Debug, Error)]
pub enum FedlinkError {
    /// Error obtaining a GitHub installation token.
    #[error("token error: {0}")]
    Token(#[from] TokenError),

    /// Error sealing a secret value.
    #[error("seal error: {0}")]
    Seal(#[from] SealError),

    /// Error from the identity provider or resource manager.
    #[error("directory error: {0}")]
    Directory(DirectoryError),

    /// Error from a repository operation.
    #[error("repository error: {0}")]
    Repository(#[from] RepoError),

    /// A run-level precondition failed; nothing was provisioned.
    #[error("precondition failed: {message}")]
    Precondition { message: String },

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl From<DirectoryError> for FedlinkError {
    fn from(e: DirectoryError) -> Self {
        match e {
            DirectoryError::Precondition { message } => FedlinkError::Precondition { message },
            other => FedlinkError::Directory(other),
        }
    }
}
