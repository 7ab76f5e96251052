//! Error types for source adapters and the line reader.

use std::path::PathBuf;

use crate::watcher::WatcherError;

/// Errors surfaced while reading a session file incrementally.
///
/// Any of these, hit during a resumed read, makes the caller fall back to a
/// full parse; they only propagate when the full parse fails too.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("Failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The file is smaller than the saved offset, so it was truncated or
    /// rewritten since the last parse.
    #[error("Saved offset {offset} is beyond the end of {path} ({len} bytes)")]
    OffsetBeyondEof { path: PathBuf, offset: u64, len: u64 },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Errors surfaced by the adapter query surface.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Point lookups only; list queries return empty results instead.
    #[error("Session {0} not found")]
    SessionNotFound(String),

    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Read(#[from] ReadError),

    /// A whole-document session file that does not parse at all.
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error(transparent)]
    Watcher(#[from] WatcherError),

    #[error("Could not determine the home directory")]
    HomeDirUnavailable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_beyond_eof_display() {
        let err = ReadError::OffsetBeyondEof {
            path: PathBuf::from("/tmp/session.jsonl"),
            offset: 500,
            len: 100,
        };
        let text = err.to_string();
        assert!(text.contains("500"));
        assert!(text.contains("100"));
    }

    #[test]
    fn test_read_error_converts_to_source_error() {
        let err = ReadError::Open {
            path: PathBuf::from("/missing"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        let source: SourceError = err.into();
        assert!(matches!(source, SourceError::Read(_)));
    }
}
