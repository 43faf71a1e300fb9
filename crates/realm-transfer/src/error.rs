use thiserror::Error;

/// Failures in positioning or moving the destination file
/// (`original_source/datasink/transfer.py` `TransferError`).
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("I don't know how to store by '{0}'")]
    UnknownStoreBy(String),

    #[error("storing by PROP-ID and propid is 'None': {0}")]
    MissingPropId(String),

    #[error("storing by instrument and insname is 'None': {0}")]
    MissingInsName(String),

    #[error("don't understand '{0}' as a transfermethod")]
    UnknownMethod(String),

    #[error("failed to rename existing file '{path}': {source}")]
    Rename {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to run transfer command '{cmd}': {source}")]
    Spawn {
        cmd: String,
        #[source]
        source: std::io::Error,
    },

    #[error("transfer command exited with status {0}")]
    NonZeroExit(i32),

    #[error("failed to stat destination '{path}': {source}")]
    Stat {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    #[error("failed to unpack '{path}': {source}")]
    Unpack {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to move '{from}' to '{to}': {source}")]
    Move {
        from: String,
        to: String,
        #[source]
        source: std::io::Error,
    },
}

/// File-size and checksum verification failures
/// (`original_source/datasink/transfer.py` `md5Error`).
#[derive(Error, Debug)]
pub enum IntegrityError {
    #[error("file size ({actual}) does not match sent size ({expected})")]
    SizeMismatch { actual: u64, expected: u64 },

    #[error("{path}: md5 checksums don't match recv='{actual}' sent='{expected}'")]
    Md5Mismatch {
        path: String,
        actual: String,
        expected: String,
    },

    #[error("error calculating md5sum for '{path}': {reason}")]
    Md5ComputeFailed { path: String, reason: String },
}
