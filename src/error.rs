use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("Invalid timezone: {input}")]
    InvalidTimezone { input: String },

    #[error("Unsupported locale: {input}")]
    UnsupportedLocale { input: String },

    #[error("No password given (use --password or RIEGO_PASSWORD)")]
    MissingPassword,

    #[error("--data is not valid JSON: {0}")]
    InvalidBody(serde_json::Error),

    #[error("Stream failed: {0}")]
    Stream(#[from] StreamError),

    #[error("{0}")]
    Auth(#[from] AuthError),

    #[error("{0}")]
    Http(#[from] HttpError),

    #[error("{0}")]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Jq(#[from] JqError),

    #[error("Failed to render JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Why a token failed validation. All variants mean "no session".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub(crate) enum TokenError {
    #[error("malformed token: {reason}")]
    Malformed { reason: &'static str },

    #[error("token has no exp claim")]
    MissingExpiry,

    #[error("token expired (exp={exp})")]
    Expired { exp: i64 },

    #[error("unexpected issuer {found:?}")]
    IssuerMismatch { found: Option<String> },

    #[error("unexpected audience {found}")]
    AudienceMismatch { found: String },
}

#[derive(Debug, Error)]
pub(crate) enum StorageError {
    #[error("Failed to write session storage: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode session storage: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub(crate) enum HttpError {
    #[error("Connection failed: {0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Session expired or rejected by the server (HTTP 401)")]
    Unauthorized { body: String },

    #[error("Failed to read response: {0}")]
    Read(#[from] std::io::Error),

    #[error("Invalid JSON in response: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub(crate) enum AuthError {
    #[error("Login rejected: {message}")]
    Rejected { message: String },

    #[error("Login response did not contain a token")]
    MissingToken,

    #[error("The token received is not valid or has already expired ({0})")]
    InvalidToken(#[from] TokenError),

    #[error("Login request failed: {0}")]
    Http(HttpError),

    #[error("{0}")]
    Storage(#[from] StorageError),
}

/// Transport-level stream failures; stored in load state, so kept cloneable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub(crate) enum StreamError {
    #[error("HTTP {status}")]
    Status { status: u16 },

    #[error("unauthorized")]
    Unauthorized,

    #[error("connection failed: {0}")]
    Transport(String),

    #[error("read failed: {0}")]
    Read(String),
}

impl From<HttpError> for StreamError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::Status { status, .. } => StreamError::Status { status },
            HttpError::Unauthorized { .. } => StreamError::Unauthorized,
            HttpError::Transport(msg) => StreamError::Transport(msg),
            HttpError::Read(e) => StreamError::Read(e.to_string()),
            HttpError::Decode(e) => StreamError::Read(e.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub(crate) enum JqError {
    #[error("jq not found. Please install jq to use --jq option.")]
    NotFound,

    #[error("Failed to run jq: {0}")]
    Spawn(std::io::Error),

    #[error("Failed to write to jq stdin: {0}")]
    Stdin(std::io::Error),

    #[error("Failed to wait for jq: {0}")]
    Wait(std::io::Error),

    #[error("Invalid UTF-8 from jq: {0}")]
    Utf8(std::string::FromUtf8Error),

    #[error("jq error: {0}")]
    Filter(String),
}
