//! sessionkit-core - Core session types and capability traits.

pub mod config;
pub mod credentials;
pub mod error;
pub mod message;
pub mod tokens;
pub mod traits;
pub mod types;

pub use config::{ClientConfig, ReconnectPolicy};
pub use credentials::Credentials;
pub use error::Error;
pub use message::{Envelope, MessageKind};
pub use tokens::{AccessToken, RefreshToken, TokenPair};
pub use traits::{
    Clock, HostEnvironment, HttpMethod, HttpRequest, HttpResponse, HttpTransport, Location,
    Navigator, SocketConnector, SocketEvent, Storage, WebSocket,
};
pub use types::ServiceUrl;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;
