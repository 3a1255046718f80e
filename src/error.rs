//! Error types for block container and library operations

use std::path::PathBuf;

use thiserror::Error;

use crate::blocks::MagicKey;

/// Photon library operation result type
pub type Result<T> = std::result::Result<T, PhotlibError>;

/// Errors raised by block-level I/O, the block file manager and the library
/// schema layer.
#[derive(Error, Debug)]
pub enum PhotlibError {
    /// I/O failure without further context (short read, short write, seek).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file could not be opened or created.
    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// I/O failure while reading a named piece of the file.
    #[error("error reading {what}: {source}")]
    Read {
        what: String,
        #[source]
        source: std::io::Error,
    },

    /// I/O failure while writing a named piece of the file.
    #[error("error writing {what}: {source}")]
    Write {
        what: String,
        #[source]
        source: std::io::Error,
    },

    /// A block carried a different magic key than the schema expects.
    #[error("unexpected key '{found}' for {what}, expected '{expected}'")]
    KeyMismatch {
        expected: MagicKey,
        found: MagicKey,
        what: String,
    },

    /// The file declares a format version this software does not support.
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u32),

    /// A block payload has a size incompatible with its declared content.
    #[error("{what}: block holds {actual} bytes, expected {expected}")]
    SizeMismatch {
        what: String,
        expected: u64,
        actual: u64,
    },

    /// Cross-field invariant violation in the library header.
    #[error("inconsistent {field}: expected {expected}, found {actual}")]
    Inconsistent {
        field: String,
        expected: String,
        actual: String,
    },

    /// A write operation was requested before any header was set or parsed.
    #[error("no header information available")]
    MissingHeader,

    /// A voxel index outside the table was passed where it is an error.
    #[error("invalid voxel index {0}")]
    InvalidVoxel(u64),
}

impl PhotlibError {
    /// Attaches a block description to a bare I/O failure.
    ///
    /// Errors that already carry context pass through unchanged.
    pub(crate) fn while_reading(self, what: &str) -> Self {
        match self {
            PhotlibError::Io(source) => PhotlibError::Read {
                what: what.to_string(),
                source,
            },
            other => other,
        }
    }

    /// Same as [`while_reading`](Self::while_reading), for the write path.
    pub(crate) fn while_writing(self, what: &str) -> Self {
        match self {
            PhotlibError::Io(source) => PhotlibError::Write {
                what: what.to_string(),
                source,
            },
            other => other,
        }
    }

    /// Whether this error reports running out of input data.
    pub fn is_eof(&self) -> bool {
        match self {
            PhotlibError::Io(source) => source.kind() == std::io::ErrorKind::UnexpectedEof,
            PhotlibError::Read { source, .. } => {
                source.kind() == std::io::ErrorKind::UnexpectedEof
            }
            _ => false,
        }
    }
}
