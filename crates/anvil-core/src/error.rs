use thiserror::Error;

/// Core error type for the Anvil runtime.
///
/// Variants map onto the abstract error kinds named by the task-engine and
/// macaroon-token designs; callers that need to distinguish a sentinel from a
/// generic failure (e.g. a worker inspecting a handler's returned error)
/// should match on the specific variant rather than the rendered message.
#[derive(Error, Debug)]
pub enum AnvilError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sql error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("malformed token: {0}")]
    MalformedToken(String),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid token")]
    InvalidToken,

    #[error("invalid refresh token")]
    InvalidRefreshToken,

    #[error("unknown caveat type: {0}")]
    UnknownCaveatType(String),

    #[error("caveat already registered: {0}")]
    CaveatAlreadyRegistered(String),

    #[error("bad cron expression: {0}")]
    BadCronExpression(String),

    /// Handler-returned sentinel: fail immediately, bypassing the retry policy.
    #[error("fatal: {0}")]
    Fatal(String),

    /// Handler-returned sentinel: failed, but suppress the `task_error` event.
    #[error("retry silently: {0}")]
    RetrySilently(String),

    #[error("already in a transaction")]
    AlreadyInTransaction,

    #[error("backpressure")]
    Backpressure,

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for AnvilError {
    fn from(e: serde_json::Error) -> Self {
        AnvilError::Deserialization(e.to_string())
    }
}

/// Result type alias using [`AnvilError`].
pub type Result<T> = std::result::Result<T, AnvilError>;
