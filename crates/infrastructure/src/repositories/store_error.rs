use domain::{CatalogError, DomainError};
use thiserror::Error;

/// Error type of the blocking store functions, so they can run inside diesel
/// transactions.
#[derive(Error, Debug)]
pub(crate) enum StoreError {
    #[error(transparent)]
    Query(#[from] diesel::result::Error),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl StoreError {
    pub(crate) fn into_domain(self, context: &str) -> DomainError {
        match self {
            StoreError::Query(err) => CatalogError::new(context, err).into(),
            StoreError::Domain(err) => err,
        }
    }
}

pub(crate) type StoreResult<T> = Result<T, StoreError>;
