use serde::Serialize;
use thiserror::Error;

use crate::blob::BlobError;
use crate::database::document::DocumentError;
use crate::database::store::StoreError;
use crate::identity::plans::CatalogError;

/// Failures of the identity layer. Expected outcomes (not found,
/// unauthorized, over quota) are [`Outcome`] values instead.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Neither the primary nor the fallback write predicate matched
    #[error("Write conflict: {0}")]
    WriteConflict(String),

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error("Principal already owns an active tenant")]
    AlreadyOwnsTenant,

    #[error("Slug '{0}' is already taken")]
    SlugTaken(String),

    #[error("No free slug could be derived from '{0}'")]
    SlugUnavailable(String),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Blob(#[from] BlobError),
}

impl IdentityError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, IdentityError::WriteConflict(_))
    }
}

/// Result of an authorized operation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome<T> {
    Applied(T),
    NotFound,
    Unauthorized,
    QuotaExceeded { limit: u32 },
}

impl<T> Outcome<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Applied(value) => Outcome::Applied(f(value)),
            Outcome::NotFound => Outcome::NotFound,
            Outcome::Unauthorized => Outcome::Unauthorized,
            Outcome::QuotaExceeded { limit } => Outcome::QuotaExceeded { limit },
        }
    }

    pub fn applied(self) -> Option<T> {
        match self {
            Outcome::Applied(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied(_))
    }
}
