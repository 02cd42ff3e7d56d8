//! Capability traits injected into the session layer.
//!
//! Each trait stands in for something a browser would otherwise provide as an
//! ambient global: wall-clock time, tab-scoped storage, an HTTP client, a
//! WebSocket constructor, and page navigation.

mod clock;
mod navigator;
mod socket;
mod storage;
mod transport;

pub use clock::Clock;
pub use navigator::{HostEnvironment, Location, Navigator};
pub use socket::{SocketConnector, SocketEvent, WebSocket};
pub use storage::Storage;
pub use transport::{HttpMethod, HttpRequest, HttpResponse, HttpTransport};
