//! sessionkit-net - Network transports for sessionkit.
//!
//! [`ReqwestTransport`] implements [`HttpTransport`](sessionkit_core::HttpTransport)
//! on `reqwest`; [`TungsteniteConnector`] implements
//! [`SocketConnector`](sessionkit_core::SocketConnector) on
//! `tokio-tungstenite`. Both speak TLS through rustls.

mod http;
mod socket;

pub use http::ReqwestTransport;
pub use socket::{TungsteniteConnector, TungsteniteSocket};
