//! Error types for the session layer.
//!
//! This module provides a unified error type with explicit variants for
//! transport, authentication, protocol, storage, and input validation errors.

use std::fmt;
use thiserror::Error;

/// The unified error type for sessionkit operations.
///
/// Authentication failures that the layer can recover from (an expired or
/// unreadable access token) never surface here; callers only observe
/// [`AuthError::SessionExpired`] once a refresh has been attempted and lost.
#[derive(Debug, Error)]
pub enum Error {
    /// Network transport errors (connection, timeout, websocket).
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Authentication errors (invalid credentials, lost session).
    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Protocol errors (non-2xx responses, unexpected bodies).
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Input validation errors (bad URLs, header values, JSON).
    #[error("invalid input: {0}")]
    InvalidInput(#[from] InvalidInputError),

    /// Credential storage errors.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Transport-level errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Network connection failed.
    #[error("connection failed: {message}")]
    Connection { message: String },

    /// Request timed out.
    #[error("request timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Generic HTTP error.
    #[error("HTTP error: {message}")]
    Http { message: String },

    /// WebSocket handshake or framing error.
    #[error("websocket error: {message}")]
    WebSocket { message: String },
}

/// Authentication-related errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Login rejected by the service.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Access token is past its expiry buffer.
    #[error("access token expired")]
    ExpiredToken,

    /// Access token could not be decoded.
    #[error("malformed token: {reason}")]
    MalformedToken { reason: String },

    /// The refresh round-trip failed or returned no token.
    #[error("token refresh failed")]
    RefreshFailed,

    /// The session could not be recovered; credentials were cleared and the
    /// user was sent to the login page.
    #[error("session expired")]
    SessionExpired,
}

/// Protocol-level errors from service responses.
#[derive(Debug)]
pub struct ProtocolError {
    /// HTTP status code.
    pub status: u16,
    /// Service error code (if present).
    pub error: Option<String>,
    /// Error message from the server.
    pub message: Option<String>,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP {}", self.status)?;
        if let Some(ref error) = self.error {
            write!(f, " [{}]", error)?;
        }
        if let Some(ref message) = self.message {
            write!(f, ": {}", message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ProtocolError {}

impl ProtocolError {
    /// Create a new protocol error.
    pub fn new(status: u16, error: Option<String>, message: Option<String>) -> Self {
        Self {
            status,
            error,
            message,
        }
    }

    /// Check if this is an authorization failure.
    pub fn is_auth_error(&self) -> bool {
        self.status == 401
    }
}

/// Input validation errors.
#[derive(Debug, Error)]
pub enum InvalidInputError {
    /// Invalid service URL format.
    #[error("invalid service URL '{value}': {reason}")]
    ServiceUrl { value: String, reason: String },

    /// A header value could not be encoded.
    #[error("invalid header '{name}': {reason}")]
    Header { name: String, reason: String },

    /// A request or response body was not valid JSON for the expected type.
    #[error("invalid JSON: {message}")]
    Json { message: String },

    /// Generic invalid input.
    #[error("invalid input: {message}")]
    Other { message: String },
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidInput(InvalidInputError::Json {
            message: err.to_string(),
        })
    }
}

/// Credential storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backing store refused access.
    #[error("storage unavailable: {message}")]
    Unavailable { message: String },

    /// Reading or writing the backing store failed.
    #[error("storage I/O failed: {message}")]
    Io { message: String },

    /// The backing store held data that could not be parsed.
    #[error("storage corrupt: {message}")]
    Corrupt { message: String },
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io {
            message: err.to_string(),
        }
    }
}
