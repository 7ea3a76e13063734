//! Error types for gateway client operations

use thiserror::Error;

/// Result type alias for gateway client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Every failure the client can report, from configuration through transport,
/// framing and response decoding.
///
/// Transport and framing errors fail only the request they occurred on.
/// Decoding errors are raised to whoever asked for the decode.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Zero worker threads, empty host and similar setup mistakes
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    /// Host name lookup failed
    #[error("Failed to resolve address: {message}")]
    Resolve { message: String },

    /// No resolved address accepted the connection
    #[error("Failed to connect: {message}")]
    Connect { message: String },

    /// Writing the request to the socket failed
    #[error("Failed to write to socket: {message}")]
    Write { message: String },

    /// Reading the response failed, or the peer closed the stream
    #[error("Failed to read from socket: {message}")]
    Read { message: String },

    /// One-shot request exceeded the configured timeout
    #[error("Timeout error: {message}")]
    Timeout { message: String },

    /// Unbalanced braces or an oversized unterminated document in a stream
    #[error("Frame error: {message}")]
    Frame { message: String },

    /// Text that is not valid JSON
    #[error("Failed to parse json message: {message}")]
    Parse { message: String },

    /// The gateway answered with an error document
    #[error("Gateway returned an error: {code}: {message}")]
    Upstream { code: i64, message: String },

    #[error("Missing response header field '{field}'")]
    MissingHeaderField { field: String },

    #[error("Missing key-value field '{field}'")]
    MissingKvField { field: String },

    /// A field is present but its content cannot be decoded
    #[error("Malformed field '{field}': {message}")]
    MalformedField { field: String, message: String },

    #[error("Invalid key prefix: the empty prefix has no range end")]
    InvalidKeyPrefix,

    #[error("Key cannot be empty")]
    EmptyKey,

    #[error("Lease TTL {ttl} is below the minimum of {min}")]
    LeaseTtlTooLow { ttl: u64, min: u64 },

    /// The producer of a pending result went away without fulfilling it
    #[error("Session aborted before producing a result")]
    SessionAborted,
}

impl Error {
    /// Create an invalid configuration error
    pub fn invalid_configuration<S: Into<String>>(msg: S) -> Self {
        Error::InvalidConfiguration { message: msg.into() }
    }

    /// Create a resolve error
    pub fn resolve<S: Into<String>>(msg: S) -> Self {
        Error::Resolve { message: msg.into() }
    }

    /// Create a connect error
    pub fn connect<S: Into<String>>(msg: S) -> Self {
        Error::Connect { message: msg.into() }
    }

    /// Create a write error
    pub fn write<S: Into<String>>(msg: S) -> Self {
        Error::Write { message: msg.into() }
    }

    /// Create a read error
    pub fn read<S: Into<String>>(msg: S) -> Self {
        Error::Read { message: msg.into() }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Error::Timeout { message: msg.into() }
    }

    /// Create a frame error
    pub fn frame<S: Into<String>>(msg: S) -> Self {
        Error::Frame { message: msg.into() }
    }

    /// Create a parse error
    pub fn parse<S: Into<String>>(msg: S) -> Self {
        Error::Parse { message: msg.into() }
    }

    /// Create an upstream error carrying the gateway's own code
    pub fn upstream<S: Into<String>>(code: i64, msg: S) -> Self {
        Error::Upstream { code, message: msg.into() }
    }

    pub fn missing_header_field<S: Into<String>>(field: S) -> Self {
        Error::MissingHeaderField { field: field.into() }
    }

    pub fn missing_kv_field<S: Into<String>>(field: S) -> Self {
        Error::MissingKvField { field: field.into() }
    }

    pub fn malformed_field<F: Into<String>, S: Into<String>>(field: F, msg: S) -> Self {
        Error::MalformedField {
            field: field.into(),
            message: msg.into(),
        }
    }

    /// Transport-layer failures, one per session stage
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Resolve { .. }
                | Error::Connect { .. }
                | Error::Write { .. }
                | Error::Read { .. }
                | Error::Timeout { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::parse(err.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::invalid_configuration(err.to_string())
    }
}
