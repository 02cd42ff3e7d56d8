//! Channel states and reconnect backoff.

use std::fmt;
use std::time::Duration;

use sessionkit_core::ReconnectPolicy;

/// Where the channel is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Waiting for the session to become authenticated. The channel
    /// returns here after a logout.
    Idle,
    /// Handshake in progress. `attempt` is the number of reconnects already
    /// scheduled since the last successful open.
    Connecting { attempt: u32 },
    Open,
    /// Waiting `delay` before reconnect number `attempt`.
    Reconnecting { attempt: u32, delay: Duration },
    /// Terminal. Reached on teardown, a normal close from the server, or
    /// after giving up on reconnecting.
    Closed,
}

impl ChannelState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ChannelState::Closed)
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelState::Idle => f.write_str("idle"),
            ChannelState::Connecting { attempt } => write!(f, "connecting (attempt {})", attempt),
            ChannelState::Open => f.write_str("open"),
            ChannelState::Reconnecting { attempt, delay } => {
                write!(f, "reconnecting in {}ms (attempt {})", delay.as_millis(), attempt)
            }
            ChannelState::Closed => f.write_str("closed"),
        }
    }
}

/// Coarse connectivity for callers that only need to know whether pushed
/// updates are flowing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Online,
    Offline,
    /// The reconnect budget is spent. Callers should fall back to polling.
    GaveUp,
}

/// Exponential backoff over consecutive abnormal closes.
#[derive(Debug)]
pub(crate) struct Backoff {
    policy: ReconnectPolicy,
    attempt: u32,
}

impl Backoff {
    pub(crate) fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    pub(crate) fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Called on every successful open.
    pub(crate) fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Delay before the next reconnect, or `None` once `max_attempts`
    /// reconnects have been scheduled without an open in between.
    pub(crate) fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.policy.max_attempts {
            return None;
        }
        let delay = self.policy.delay_for_attempt(self.attempt);
        self.attempt += 1;
        Some(delay)
    }
}
