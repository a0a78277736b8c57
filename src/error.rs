use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Every failure is fatal to the run; there is no partial-success state.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("source not found: {}", path.display())]
    SourceNotFound { path: PathBuf },

    #[error("corrupt archive {}: {source}", path.display())]
    CorruptArchive {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("parse error near byte {offset}: {message}")]
    Parse { offset: u64, message: String },

    #[error("failed to write corpus {}: {source}", path.display())]
    CorpusWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write manifest {}: {source}", path.display())]
    ManifestWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read manifest {}: {message}", path.display())]
    ManifestRead { path: PathBuf, message: String },

    #[error("failed to read dataset file {}: {source}", path.display())]
    DatasetRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl PipelineError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SourceNotFound { .. } => "SourceNotFoundError",
            Self::CorruptArchive { .. } => "CorruptArchiveError",
            Self::Parse { .. } => "ParseError",
            Self::CorpusWrite { .. } => "CorpusWriteError",
            Self::ManifestWrite { .. } => "ManifestWriteError",
            Self::ManifestRead { .. } => "ManifestReadError",
            Self::DatasetRead { .. } => "DatasetReadError",
        }
    }

    /// Process exit code for this error kind (0 and 1 are reserved).
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::SourceNotFound { .. } => 2,
            Self::CorruptArchive { .. } => 3,
            Self::Parse { .. } => 4,
            Self::CorpusWrite { .. } => 5,
            Self::ManifestWrite { .. } => 6,
            Self::ManifestRead { .. } => 7,
            Self::DatasetRead { .. } => 8,
        }
    }

    pub(crate) fn parse(offset: u64, message: impl Into<String>) -> Self {
        Self::Parse {
            offset,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_and_exit_codes_are_distinct() {
        let errors = [
            PipelineError::SourceNotFound {
                path: PathBuf::from("x"),
            },
            PipelineError::CorruptArchive {
                path: PathBuf::from("x"),
                source: io::Error::other("bad block"),
            },
            PipelineError::parse(10, "oops"),
            PipelineError::CorpusWrite {
                path: PathBuf::from("x"),
                source: io::Error::other("disk full"),
            },
            PipelineError::ManifestWrite {
                path: PathBuf::from("x"),
                source: io::Error::other("denied"),
            },
            PipelineError::ManifestRead {
                path: PathBuf::from("x"),
                message: "missing".to_string(),
            },
            PipelineError::DatasetRead {
                path: PathBuf::from("x"),
                source: io::Error::other("denied"),
            },
        ];

        let mut kinds: Vec<_> = errors.iter().map(|e| e.kind()).collect();
        let mut codes: Vec<_> = errors.iter().map(|e| e.exit_code()).collect();
        kinds.sort();
        kinds.dedup();
        codes.sort();
        codes.dedup();
        assert_eq!(kinds.len(), errors.len());
        assert_eq!(codes.len(), errors.len());
        assert!(codes.iter().all(|c| *c > 1));
    }

    #[test]
    fn parse_error_names_offset() {
        let err = PipelineError::parse(1234, "unexpected end of input inside <page>");
        assert_eq!(
            err.to_string(),
            "parse error near byte 1234: unexpected end of input inside <page>"
        );
    }
}
