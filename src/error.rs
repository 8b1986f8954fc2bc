use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure to turn the reference file into records.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("reference dataset not found: {0:?}")]
    Missing(PathBuf),

    #[error("failed to read reference dataset {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse reference dataset {path:?}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("reference dataset {path:?} has no {column:?} column")]
    MissingColumn { path: PathBuf, column: &'static str },
}

impl LoadError {
    pub(crate) fn from_io(path: PathBuf, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            LoadError::Missing(path)
        } else {
            LoadError::Io { path, source }
        }
    }

    /// Errors worth retrying: the file exists but could not be read right now
    /// (e.g. locked or half-written by a concurrent writer).
    pub fn is_transient(&self) -> bool {
        match self {
            LoadError::Missing(_) | LoadError::MissingColumn { .. } => false,
            LoadError::Io { .. } => true,
            LoadError::Csv { source, .. } => matches!(source.kind(), csv::ErrorKind::Io(_)),
        }
    }
}

/// Caller bugs, surfaced immediately.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown territorial level: {0:?}")]
    UnknownLevel(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_missing() {
        let err = LoadError::from_io(
            PathBuf::from("/nope.csv"),
            io::Error::new(io::ErrorKind::NotFound, "gone"),
        );
        assert!(matches!(err, LoadError::Missing(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn other_io_errors_are_transient() {
        let err = LoadError::from_io(
            PathBuf::from("/locked.csv"),
            io::Error::new(io::ErrorKind::PermissionDenied, "locked"),
        );
        assert!(err.is_transient());
    }

    #[test]
    fn unknown_level_message_names_the_value() {
        let err = ConfigError::UnknownLevel("barrio".to_string());
        assert_eq!(err.to_string(), "unknown territorial level: \"barrio\"");
    }
}
