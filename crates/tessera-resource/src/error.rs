//! Error types for the resource system.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during resource operations.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// The requested resource or archive entry does not exist.
    #[error("Resource not found: {path}")]
    NotFound {
        /// The path, or the hex name hash when no path is known.
        path: String,
    },

    /// The archive header carries a version this build cannot read.
    #[error("Unsupported archive version {found} (expected {expected})")]
    VersionMismatch { expected: u32, found: u32 },

    /// The archive image is malformed.
    #[error("Invalid archive '{origin}': {reason}")]
    InvalidFormat { origin: String, reason: String },

    /// Reading from the underlying storage failed.
    #[error("IO error reading '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An allocation the operation depends on could not be made.
    #[error("Out of memory: {reason}")]
    OutOfMemory { reason: String },

    /// The live-resource table is at capacity.
    #[error("Resource table is full ({capacity} entries), raise `max_resources`")]
    OutOfResources { capacity: usize },

    /// A caller-provided buffer cannot hold the entry.
    #[error("Output buffer too small: need {needed} bytes, have {available}")]
    OutBufferTooSmall { needed: usize, available: usize },

    /// The hash is already present in the archive being built.
    #[error("Hash {hash:#018x} is already stored in the archive")]
    AlreadyStored { hash: u64 },

    /// The operation is not available for this resource or configuration.
    #[error("Operation not supported: {reason}")]
    NotSupported { reason: String },

    /// No resource type is registered for the extension.
    #[error("No resource type registered for extension: .{extension}")]
    UnknownType { extension: String },

    /// The path has no extension to select a resource type with.
    #[error("Resource path '{path}' has no file extension")]
    MissingExtension { path: String },

    /// The path is empty or otherwise unusable.
    #[error("Invalid resource path '{path}'")]
    InvalidPath { path: String },

    /// A type-checked downcast failed.
    #[error("Type mismatch: expected {expected}")]
    TypeMismatch { expected: &'static str },

    /// A resource requested itself while it was being created.
    #[error("Resource '{path}' depends on itself")]
    Loop { path: String },

    /// A type's create or recreate function rejected the bytes.
    #[error("Failed to decode '{path}': {message}")]
    Decode { path: String, message: String },

    /// Anything else.
    #[error("Resource error: {message}")]
    Unknown { message: String },
}

impl ResourceError {
    /// Convenience constructor for decode failures inside create/recreate.
    pub fn decode(path: impl Into<String>, message: impl std::fmt::Display) -> Self {
        ResourceError::Decode {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Convenience constructor for a missing hash.
    pub fn hash_not_found(hash: u64) -> Self {
        ResourceError::NotFound {
            path: format!("{hash:#018x}"),
        }
    }

    /// Map this error onto the flat result-code taxonomy.
    pub fn code(&self) -> ResultCode {
        match self {
            ResourceError::NotFound { .. }
            | ResourceError::UnknownType { .. }
            | ResourceError::MissingExtension { .. }
            | ResourceError::InvalidPath { .. } => ResultCode::NotFound,
            ResourceError::VersionMismatch { .. } => ResultCode::VersionMismatch,
            ResourceError::Io { .. } => ResultCode::IoError,
            ResourceError::OutOfMemory { .. } | ResourceError::OutOfResources { .. } => {
                ResultCode::MemError
            }
            ResourceError::OutBufferTooSmall { .. } => ResultCode::OutBufferTooSmall,
            ResourceError::AlreadyStored { .. } => ResultCode::AlreadyStored,
            ResourceError::NotSupported { .. } => ResultCode::NotSupported,
            ResourceError::InvalidFormat { .. }
            | ResourceError::TypeMismatch { .. }
            | ResourceError::Loop { .. }
            | ResourceError::Decode { .. }
            | ResourceError::Unknown { .. } => ResultCode::Unknown,
        }
    }

    /// Input errors are rejected before any state is touched.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            ResourceError::UnknownType { .. }
                | ResourceError::MissingExtension { .. }
                | ResourceError::InvalidPath { .. }
        )
    }
}

impl From<io::Error> for ResourceError {
    fn from(err: io::Error) -> Self {
        ResourceError::Io {
            path: PathBuf::new(),
            source: err,
        }
    }
}

/// Flat result codes, for callers that report or compare outcomes by class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    Ok,
    NotFound,
    VersionMismatch,
    IoError,
    MemError,
    OutBufferTooSmall,
    AlreadyStored,
    NotSupported,
    Unknown,
}

impl ResultCode {
    /// The code of an operation's result.
    pub fn of<T>(result: &ResourceResult<T>) -> Self {
        match result {
            Ok(_) => ResultCode::Ok,
            Err(err) => err.code(),
        }
    }
}

/// Result type alias for resource operations.
pub type ResourceResult<T> = Result<T, ResourceError>;

/// Misuse of the API by the caller: panics in debug builds, logs in release.
macro_rules! programmer_error {
    ($($arg:tt)+) => {{
        if cfg!(debug_assertions) && !std::thread::panicking() {
            panic!($($arg)+);
        } else {
            tracing::error!($($arg)+);
        }
    }};
}

pub(crate) use programmer_error;
