//! Error type for fallible cache operations.
//!
//! Most public cache operations report absence or refusal through `Option`/`bool`
//! and log the underlying cause. `CacheError` is what the internal I/O helpers and
//! the fallible constructors return.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while managing the backing storage of a cache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The cache root or an entry's parent directory could not be created.
    #[error("failed to create directory {}: {source}", .path.display())]
    CreateDirectory {
        /// Directory that could not be created
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Writing an entry's content failed.
    #[error("failed to write {}: {source}", .path.display())]
    Write {
        /// Destination of the write
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Reading file metadata failed.
    #[error("failed to read metadata of {}: {source}", .path.display())]
    Metadata {
        /// File whose metadata was requested
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// An entry path has no parent directory to write into.
    #[error("{} has no parent directory", .0.display())]
    NoParent(PathBuf),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_messages_name_the_path() {
        let err = CacheError::Write {
            path: PathBuf::from("/cache/tile.bin"),
            source: io::Error::new(io::ErrorKind::Other, "disk full"),
        };
        assert_eq!(err.to_string(), "failed to write /cache/tile.bin: disk full");
        assert!(err.source().is_some());

        let err = CacheError::NoParent(PathBuf::from("/"));
        assert_eq!(err.to_string(), "/ has no parent directory");
    }
}
