//! The real-time notification channel.
//!
//! One WebSocket per session, authenticated with the current access token.
//! The connection is driven by a worker task through an explicit
//! [`ChannelState`] machine:
//!
//! ```text
//! Idle -> Connecting -> Open -> (Reconnecting <-> Connecting) -> Closed
//! ```

mod channel;
mod state;

pub use channel::{ChannelEvents, NORMAL_CLOSURE, RealtimeChannel};
pub use state::{ChannelState, Connectivity};
