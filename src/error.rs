use std::error::Error as StdError;
use std::path::PathBuf;

use crate::Tier;

/// Custom Result type for seqcat operations, wrapping the custom [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the seqcat library, encompassing all possible error cases
/// that can occur while building or serving a catalog.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Errors raised by point lookups and filter queries
    #[error("Error querying catalog: {0}")]
    QueryError(#[from] QueryError),

    /// Structural violations found while building an index
    #[error("Error building index: {0}")]
    BuildError(#[from] BuildError),

    /// An artifact failed a shape check when opened
    #[error("Corrupt artifact: {0}")]
    ArtifactError(#[from] ArtifactError),

    /// Errors in build or serving configuration
    #[error("Error with configuration: {0}")]
    ConfigError(#[from] ConfigError),

    /// Standard I/O errors
    #[error("Error with IO: {0}")]
    IoError(#[from] std::io::Error),

    /// UTF-8 conversion errors
    #[error("Error with UTF8: {0}")]
    Utf8Error(#[from] std::str::Utf8Error),

    /// Errors while sniffing or opening a compressed input
    #[error("Error opening compressed input: {0}")]
    NifflerError(#[from] niffler::Error),

    /// Errors from the build thread pool
    #[error("Error creating thread pool: {0}")]
    ThreadPoolError(#[from] rayon::ThreadPoolBuildError),

    /// Generic errors for other unexpected situations
    #[error("Generic error: {0}")]
    GenericError(#[from] Box<dyn StdError + Send + Sync>),
}

/// Coarse classification of every error, used by outer layers to translate
/// errors into their own representation without matching nested enums.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidOrdinal,
    UnknownTier,
    MissingIndex,
    UnsortedInput,
    SkippedOrdinal,
    CorruptArtifact,
    Other,
}

impl Error {
    /// Returns the [`ErrorKind`] of this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::QueryError(err) => match err {
                QueryError::InvalidOrdinal { .. } => ErrorKind::InvalidOrdinal,
                QueryError::UnknownTier { .. } => ErrorKind::UnknownTier,
                QueryError::MissingIndex(_) => ErrorKind::MissingIndex,
                QueryError::InvalidSequenceId(_) | QueryError::TooManyIds { .. } => {
                    ErrorKind::Other
                }
            },
            Self::BuildError(err) => match err {
                BuildError::UnsortedInput { .. } => ErrorKind::UnsortedInput,
                BuildError::SkippedOrdinal { .. } => ErrorKind::SkippedOrdinal,
                _ => ErrorKind::Other,
            },
            Self::ArtifactError(_) => ErrorKind::CorruptArtifact,
            _ => ErrorKind::Other,
        }
    }

    /// Checks if the error is local to a single request
    ///
    /// Query errors are recoverable; build-time invariant violations and corrupt
    /// artifacts are fatal for the step or process that hit them.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::QueryError(_))
    }
}

/// Errors raised at query time. All of them are local to one request.
#[derive(thiserror::Error, Debug)]
pub enum QueryError {
    /// The ordinal lies outside `[0, max)` for the opened tier
    #[error("Requested ordinal ({requested}) is out of range ({max})")]
    InvalidOrdinal { requested: u64, max: u64 },

    /// The tier of the request does not match the opened store
    #[error("Only identifiers for tier {opened} are accepted (got {requested})")]
    UnknownTier { requested: String, opened: Tier },

    /// A predicate needs an artifact that was not loaded
    #[error("Missing index: {0} was not loaded")]
    MissingIndex(&'static str),

    /// The sequence identifier could not be parsed
    #[error("Invalid sequence identifier: {0}")]
    InvalidSequenceId(String),

    /// A batch lookup asked for more identifiers than allowed
    #[error("Too many identifiers requested ({requested}), the maximum is {max}")]
    TooManyIds { requested: usize, max: usize },
}

/// Structural violations found while building. These abort the build step.
#[derive(thiserror::Error, Debug)]
pub enum BuildError {
    /// A coarse ordinal decreased
    #[error("Line {line} not sorted: coarse ordinal {found} follows {previous}")]
    UnsortedInput {
        line: u64,
        previous: u64,
        found: u64,
    },

    /// A coarse ordinal jumped by more than one
    #[error("Line {line} skipped: coarse ordinal {found} follows {previous}")]
    SkippedOrdinal {
        line: u64,
        previous: i64,
        found: u64,
    },

    /// A line of an input file could not be parsed
    #[error("Malformed record on line {line}: {reason}")]
    MalformedRecord { line: u64, reason: String },

    /// A categorical label cannot be stored in a dictionary
    #[error("Label {0:?} contains a newline")]
    InvalidLabel(String),

    /// The second pass over an input disagrees with the first
    #[error("Input changed between passes: {0}")]
    InputChanged(String),
}

/// Shape-check failures when opening artifacts (the `CorruptArtifact` family)
#[derive(thiserror::Error, Debug)]
pub enum ArtifactError {
    /// The magic bytes of the header do not match
    #[error("Invalid magic number in {0}")]
    InvalidMagic(PathBuf),

    /// The format version is not supported
    #[error("Unsupported format version {version} in {path}")]
    UnsupportedVersion { path: PathBuf, version: u8 },

    /// The artifact holds a different kind of data than expected
    #[error("Unexpected artifact kind in {path}: expected {expected}, found {found}")]
    KindMismatch {
        path: PathBuf,
        expected: u8,
        found: u8,
    },

    /// The file is shorter or longer than its header declares
    #[error("Mismatch in size of {path}: header declares {expected} bytes, found {actual}")]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    /// The payload could not be viewed as the element type
    #[error("Unable to cast payload of {0} - likely an alignment error")]
    Misaligned(PathBuf),

    /// The offset array does not describe the archive
    #[error("Offsets do not match archive {path}: {reason}")]
    OffsetMismatch { path: PathBuf, reason: String },

    /// Two artifacts that should be row-aligned disagree in length
    #[error("Length mismatch for {artifact}: expected {expected} rows, found {found}")]
    LengthMismatch {
        artifact: &'static str,
        expected: u64,
        found: u64,
    },

    /// Some files of a multi-file artifact are present and others are not
    #[error("Incomplete {artifact}: {path} is missing")]
    Incomplete {
        artifact: &'static str,
        path: PathBuf,
    },

    /// A per-record code does not index into its dictionary
    #[error("Code {code} is out of range for dictionary of {labels} labels")]
    CodeOutOfRange { code: u32, labels: usize },

    /// A stored record does not have the header/payload layout
    #[error("Record {0} is malformed in the sequence archive")]
    MalformedRecord(u64),

    /// Artifacts are stored little-endian
    #[error("Artifacts can only be mapped on little-endian hosts")]
    UnsupportedEndianness,
}

/// Errors in build or serving configuration
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// The configuration file is not valid TOML for the expected schema
    #[error("Unable to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// The tier string is not one of the known tiers
    #[error("Unknown tier: {0} (expecting \"90AA\" or \"100AA\")")]
    UnknownTier(String),

    /// A build step has no input configured
    #[error("No input configured for {0}")]
    MissingInput(String),

    /// Two build entries would write the same artifacts
    #[error("Tier {0} is listed more than once")]
    DuplicateTier(Tier),
}

/// Trait for converting arbitrary errors into `Error`
pub trait IntoSeqcatError {
    fn into_seqcat_error(self) -> Error;
}

impl<E> IntoSeqcatError for E
where
    E: StdError + Send + Sync + 'static,
{
    fn into_seqcat_error(self) -> Error {
        Error::GenericError(Box::new(self))
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use thiserror::Error;

    #[derive(Error, Debug)]
    enum MyError {
        #[error("Custom error: {0}")]
        CustomError(String),
    }

    #[test]
    fn test_into_seqcat_error() {
        let my_error = MyError::CustomError(String::from("some error"));
        let error = my_error.into_seqcat_error();
        assert!(matches!(error, Error::GenericError(_)));
        assert_eq!(error.kind(), ErrorKind::Other);
    }

    #[test]
    fn test_kind_of_query_errors() {
        let error: Error = QueryError::InvalidOrdinal {
            requested: 10,
            max: 5,
        }
        .into();
        assert_eq!(error.kind(), ErrorKind::InvalidOrdinal);
        assert!(error.is_recoverable());

        let error: Error = QueryError::MissingIndex("quality table").into();
        assert_eq!(error.kind(), ErrorKind::MissingIndex);
        assert!(format!("{error}").contains("quality table"));

        let error: Error = QueryError::UnknownTier {
            requested: "100AA".to_string(),
            opened: Tier::Aa90,
        }
        .into();
        assert_eq!(error.kind(), ErrorKind::UnknownTier);
        assert!(format!("{error}").contains("90AA"));
    }

    #[test]
    fn test_kind_of_build_errors() {
        let error: Error = BuildError::UnsortedInput {
            line: 3,
            previous: 1,
            found: 0,
        }
        .into();
        assert_eq!(error.kind(), ErrorKind::UnsortedInput);
        assert!(!error.is_recoverable());

        let error: Error = BuildError::SkippedOrdinal {
            line: 2,
            previous: 0,
            found: 2,
        }
        .into();
        assert_eq!(error.kind(), ErrorKind::SkippedOrdinal);

        let error: Error = BuildError::MalformedRecord {
            line: 7,
            reason: "bad".to_string(),
        }
        .into();
        assert_eq!(error.kind(), ErrorKind::Other);
    }

    #[test]
    fn test_artifact_errors_are_corrupt() {
        let error: Error = ArtifactError::SizeMismatch {
            path: PathBuf::from("x.codes"),
            expected: 100,
            actual: 64,
        }
        .into();
        assert_eq!(error.kind(), ErrorKind::CorruptArtifact);
        let error_str = format!("{error}");
        assert!(error_str.contains("x.codes"));
        assert!(error_str.contains("100"));
        assert!(error_str.contains("64"));
    }

    #[test]
    fn test_build_error_messages() {
        let error = BuildError::SkippedOrdinal {
            line: 12,
            previous: 4,
            found: 9,
        };
        let error_str = format!("{error}");
        assert!(error_str.contains("12"));
        assert!(error_str.contains("skipped"));
    }

    #[test]
    fn test_error_from_io() {
        let io_error = std::io::Error::other("boom");
        let error: Error = io_error.into();
        assert!(matches!(error, Error::IoError(_)));
        assert_eq!(error.kind(), ErrorKind::Other);
    }
}
