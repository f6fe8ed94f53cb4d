//! Error types shared across the signer, fetcher, VFS, and query manager.

use thiserror::Error;

/// Errors that can surface from any stage of a session: signing a request,
/// fetching a byte range, or driving the SQLite connection through it.
#[derive(Debug, Error)]
pub enum Error {
    /// The HEAD response for the target object carried no
    /// `x-amz-version-id` header, meaning the bucket does not have
    /// versioning enabled. Without a version id, successive ranged GETs
    /// could observe different object generations mid-query.
    #[error("The bucket must have versioning enabled")]
    VersioningRequired,

    /// A network failure, a non-2xx response, or a ranged GET that
    /// returned a different number of bytes than requested.
    #[error("disk I/O error: {0}")]
    Io(String),

    /// A non-OK status from SQLite open/prepare/bind/step. Carries the
    /// numeric result code and SQLite's own error string.
    #[error("sqlite error ({code}): {message}")]
    Sqlite { code: i32, message: String },

    /// A `RowCursor` was used after its owning statement was finalized.
    #[error("Attempting to use finalized statement")]
    FinalizedStatement,

    /// A bound parameter value was not one of the supported variants
    /// (integer, double, text, blob, null).
    #[error("unsupported parameter type: {0}")]
    UnsupportedParameterType(String),

    /// A named parameter did not resolve to any placeholder in the
    /// prepared statement (`sqlite3_bind_parameter_index` returned 0).
    /// Distinct from `UnsupportedParameterType`, which is about the bound
    /// value's type, not the name's existence.
    #[error("no such named parameter: {0}")]
    UnknownParameter(String),

    /// Credentials or a header could not be encoded into a valid SigV4
    /// request (e.g. a non-ASCII header name).
    #[error("signing error: {0}")]
    Signing(String),
}

impl Error {
    /// Maps a SQLite result code + connection error string into an `Error`,
    /// the way the rest of the crate surfaces libsqlite3-sys failures.
    pub(crate) fn sqlite(code: i32, message: impl Into<String>) -> Self {
        Error::Sqlite {
            code,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Io(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
