//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::ServiceUrl;

/// Default route of the login page.
pub const DEFAULT_LOGIN_PATH: &str = "/login";
/// Default login endpoint.
pub const DEFAULT_LOGIN_ENDPOINT: &str = "/api/auth/login";
/// Default refresh endpoint.
pub const DEFAULT_REFRESH_ENDPOINT: &str = "/api/auth/refresh";
/// Default real-time endpoint.
pub const DEFAULT_REALTIME_ENDPOINT: &str = "/api/ws";
/// Seconds before `exp` at which a token is already treated as expired.
pub const DEFAULT_EXPIRY_BUFFER_SECS: i64 = 30;

/// Configuration shared by every component of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the service.
    pub base_url: ServiceUrl,

    #[serde(default = "default_login_endpoint")]
    pub login_endpoint: String,

    #[serde(default = "default_refresh_endpoint")]
    pub refresh_endpoint: String,

    #[serde(default = "default_realtime_endpoint")]
    pub realtime_endpoint: String,

    /// Relative route the user is sent to when the session is lost.
    #[serde(default = "default_login_path")]
    pub login_path: String,

    #[serde(default = "default_expiry_buffer_secs")]
    pub expiry_buffer_secs: i64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub reconnect: ReconnectPolicy,
}

impl ClientConfig {
    /// Configuration with every default applied.
    pub fn new(base_url: ServiceUrl) -> Self {
        Self {
            base_url,
            login_endpoint: default_login_endpoint(),
            refresh_endpoint: default_refresh_endpoint(),
            realtime_endpoint: default_realtime_endpoint(),
            login_path: default_login_path(),
            expiry_buffer_secs: default_expiry_buffer_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            reconnect: ReconnectPolicy::default(),
        }
    }

    pub fn login_url(&self) -> String {
        self.base_url.endpoint(&self.login_endpoint)
    }

    pub fn refresh_url(&self) -> String {
        self.base_url.endpoint(&self.refresh_endpoint)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_login_endpoint() -> String {
    DEFAULT_LOGIN_ENDPOINT.to_string()
}

fn default_refresh_endpoint() -> String {
    DEFAULT_REFRESH_ENDPOINT.to_string()
}

fn default_realtime_endpoint() -> String {
    DEFAULT_REALTIME_ENDPOINT.to_string()
}

fn default_login_path() -> String {
    DEFAULT_LOGIN_PATH.to_string()
}

fn default_expiry_buffer_secs() -> i64 {
    DEFAULT_EXPIRY_BUFFER_SECS
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// Reconnect and keepalive settings for the real-time channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect.
    pub base_delay_ms: u64,
    /// Upper bound for exponential delay growth.
    pub max_delay_ms: u64,
    /// Reconnects attempted after consecutive abnormal closes before giving up.
    pub max_attempts: u32,
    /// Interval between client keepalive pings while open.
    pub keepalive_interval_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_attempts: 5,
            keepalive_interval_ms: 25_000,
        }
    }
}

impl ReconnectPolicy {
    /// Delay to wait after an abnormal close when `attempt` consecutive
    /// reconnects have already been scheduled.
    ///
    /// `min(base * 2^attempt, max)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let delay = self.base_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }
}
