use std::error::Error as StdError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Torrent not found with id: {0}")]
    TorrentNotFound(i32),

    #[error("Invalid torrent file: {0}")]
    InvalidTorrent(String),

    #[error("Unknown filter operator: {0}")]
    UnknownOperator(String),

    #[error("Unknown column `{column}` for {entity}")]
    UnknownColumn { entity: &'static str, column: String },

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Illegal transition `{transition}` from state `{from}`")]
    IllegalTransition { transition: String, from: String },

    #[error("App state `{name}` holds a {stored} value, refusing to store a {given}")]
    TypeMismatch {
        name: String,
        stored: String,
        given: String,
    },

    #[error("Unknown task: {0}")]
    UnknownTask(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl DomainError {
    /// Programming errors (bad filters, bad configuration) abort the run
    /// instead of being recorded on a torrent.
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            DomainError::UnknownOperator(_)
                | DomainError::UnknownColumn { .. }
                | DomainError::InvalidFilter(_)
                | DomainError::UnknownTask(_)
        )
    }
}

/// Any failure of the backing store, carrying the underlying cause.
#[derive(Error, Debug)]
#[error("Catalog error while {context}: {source}")]
pub struct CatalogError {
    context: String,
    #[source]
    source: Box<dyn StdError + Send + Sync>,
}

impl CatalogError {
    pub fn new(
        context: impl Into<String>,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self {
            context: context.into(),
            source: source.into(),
        }
    }

    pub fn context(&self) -> &str {
        &self.context
    }
}

/// Failure of a single task body. Stored on the media as `error_msg`.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("copying {from} to {to}: {source}")]
    Copy {
        from: String,
        to: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} failed: {detail}")]
    Command { command: String, detail: String },

    #[error("{0}")]
    Failed(String),
}

impl TaskError {
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        TaskError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    pub fn copy(
        from: impl AsRef<std::path::Path>,
        to: impl AsRef<std::path::Path>,
        source: std::io::Error,
    ) -> Self {
        TaskError::Copy {
            from: from.as_ref().display().to_string(),
            to: to.as_ref().display().to_string(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_error_keeps_its_cause() {
        let cause = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err = CatalogError::new("saving torrent", cause);

        assert_eq!(err.context(), "saving torrent");
        assert_eq!(err.to_string(), "Catalog error while saving torrent: disk full");
        assert_eq!(err.source().map(|s| s.to_string()).as_deref(), Some("disk full"));

        let domain = DomainError::from(err);
        assert!(!domain.is_programming_error());
    }
}
