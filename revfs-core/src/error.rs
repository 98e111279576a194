//! Error types for revision store reads

use crate::id::Revnum;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, FsError>;

/// Errors that can occur while reading the revision store
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("Corrupt data: {0}")]
    Corrupt(String),

    #[error("Corrupt representation '{locator}'")]
    CorruptRepresentation {
        locator: String,
        #[source]
        source: Box<FsError>,
    },

    #[error("Corrupt node-revision '{id}'")]
    CorruptNodeRevision {
        id: String,
        #[source]
        source: Box<FsError>,
    },

    #[error("Checksum mismatch while reading representation: expected {expected}, actual {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("No such revision {0}")]
    NoSuchRevision(Revnum),

    #[error("Reference to non-existent node '{id}' in filesystem '{fs_path}'")]
    DanglingId { id: String, fs_path: String },

    #[error("Can't get entries of non-directory '{0}'")]
    NotDirectory(String),

    #[error("Malformed ID string '{0}'")]
    MalformedId(String),

    #[error("Unsupported store format {0}")]
    UnsupportedFormat(u32),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FsError {
    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        FsError::Corrupt(msg.into())
    }

    /// Whether this error reports damaged or inconsistent store data
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            FsError::Corrupt(_)
                | FsError::CorruptRepresentation { .. }
                | FsError::CorruptNodeRevision { .. }
                | FsError::ChecksumMismatch { .. }
        )
    }

    /// Whether this error reports a missing revision or node
    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::NoSuchRevision(_) | FsError::DanglingId { .. })
    }

    /// The error at the bottom of any locator wrapping
    pub fn innermost(&self) -> &FsError {
        match self {
            FsError::CorruptRepresentation { source, .. } | FsError::CorruptNodeRevision { source, .. } => {
                source.innermost()
            }
            other => other,
        }
    }

    /// Attach a representation locator to corruption errors, pass others through.
    pub(crate) fn in_representation(self, locator: impl FnOnce() -> String) -> Self {
        if self.is_corruption() && !matches!(self, FsError::CorruptRepresentation { .. }) {
            FsError::CorruptRepresentation {
                locator: locator(),
                source: Box::new(self),
            }
        } else {
            self
        }
    }

    pub(crate) fn in_node_revision(self, id: impl FnOnce() -> String) -> Self {
        if self.is_corruption() {
            FsError::CorruptNodeRevision {
                id: id(),
                source: Box::new(self),
            }
        } else {
            self
        }
    }
}

impl From<FsError> for std::io::Error {
    fn from(err: FsError) -> Self {
        match err {
            FsError::Io(e) => e,
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corruption_is_wrapped_with_locator() {
        let err = FsError::corrupt("Malformed svndiff data in representation")
            .in_representation(|| "5 120 50 80 abc".to_string());
        assert!(err.is_corruption());
        assert_eq!(err.to_string(), "Corrupt representation '5 120 50 80 abc'");
    }

    #[test]
    fn test_innermost_skips_locators() {
        let err = FsError::corrupt("svndiff window length is corrupt")
            .in_representation(|| "7 0 10 10 abc".to_string())
            .in_node_revision(|| "0.0.r7/40".to_string());
        assert!(matches!(err, FsError::CorruptNodeRevision { .. }));
        assert_eq!(err.innermost().to_string(), "Corrupt data: svndiff window length is corrupt");
    }

    #[test]
    fn test_not_found_passes_through_wrapping() {
        let err = FsError::NoSuchRevision(7).in_representation(|| "unused".to_string());
        assert!(err.is_not_found());
        assert!(!err.is_corruption());
    }

    #[test]
    fn test_io_error_round_trips() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: FsError = io.into();
        let back: std::io::Error = err.into();
        assert_eq!(back.kind(), std::io::ErrorKind::PermissionDenied);
    }
}
