//! sessionkit - Session & connectivity layer for the subscription service client.
//!
//! This library owns everything between page code and the network that has to
//! do with authentication: the short-lived credential pair, single-flight token
//! refresh, the authenticated request pipeline, and the long-lived real-time
//! notification channel. All authenticated traffic flows through a [`Session`].
//!
//! Browser globals are replaced by capability traits from `sessionkit-core`
//! ([`Clock`](sessionkit_core::Clock), [`Storage`](sessionkit_core::Storage),
//! [`HttpTransport`](sessionkit_core::HttpTransport),
//! [`SocketConnector`](sessionkit_core::SocketConnector),
//! [`Navigator`](sessionkit_core::Navigator)); network-backed implementations
//! live in `sessionkit-net`.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sessionkit::{Session, SessionCapabilities};
//! use sessionkit_core::{ClientConfig, Credentials, ServiceUrl};
//!
//! # async fn example(caps: SessionCapabilities) -> Result<(), sessionkit_core::Error> {
//! let config = ClientConfig::new(ServiceUrl::new("https://subs.example.com")?);
//! let session = Session::new(config, caps);
//! session.login(Credentials::new("alice@example.com", "hunter2")).await?;
//!
//! let plans: serde_json::Value = session.api().get_json("/api/subscriptions").await?;
//! println!("{plans}");
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod clock;
pub mod http;
pub mod realtime;
pub mod session;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_support;

pub use auth::{CredentialStore, RedirectGuard, RefreshCoordinator, TokenGuard};
pub use clock::{ManualClock, SystemClock};
pub use http::ApiClient;
pub use realtime::{ChannelEvents, ChannelState, Connectivity, RealtimeChannel};
pub use session::{Session, SessionCapabilities};
pub use storage::{FileStorage, MemoryStorage};

pub use sessionkit_core::{Error, Result};
