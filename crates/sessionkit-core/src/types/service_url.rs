//! Base URL of the subscription service.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use url::Url;

use crate::error::{Error, InvalidInputError};

/// Where the service lives. REST endpoints and the real-time channel hang
/// off the same base.
///
/// Plain HTTP is accepted only for loopback hosts.
///
/// ```
/// use sessionkit_core::ServiceUrl;
///
/// let service = ServiceUrl::new("https://subs.example.com").unwrap();
/// assert_eq!(service.endpoint("/api/auth/refresh"),
///            "https://subs.example.com/api/auth/refresh");
/// assert_eq!(service.origin(), "https://subs.example.com");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ServiceUrl(Url);

impl ServiceUrl {
    pub fn new(s: impl AsRef<str>) -> Result<Self, Error> {
        let s = s.as_ref();
        let rejected = |reason: String| InvalidInputError::ServiceUrl {
            value: s.to_string(),
            reason,
        };

        let url = Url::parse(s).map_err(|e| rejected(e.to_string()))?;
        let loopback = matches!(
            url.host_str(),
            Some("localhost" | "127.0.0.1" | "[::1]")
        );
        match url.scheme() {
            _ if url.host_str().is_none() => Err(rejected("no host".into())),
            "https" => Ok(()),
            "http" if loopback => Ok(()),
            "http" => Err(rejected("plain HTTP is only allowed on loopback".into())),
            other => Err(rejected(format!("unsupported scheme {}", other))),
        }?;

        Ok(Self(url))
    }

    /// Absolute URL of `path`, keeping any path prefix of the base.
    pub fn endpoint(&self, path: &str) -> String {
        let base = self.0.as_str().trim_end_matches('/');
        match path.strip_prefix('/') {
            Some(rest) => format!("{}/{}", base, rest),
            None => format!("{}/{}", base, path),
        }
    }

    /// The `ws`/`wss` URL of the channel endpoint `path`, authenticated by
    /// `token` in the query string.
    pub fn realtime_url(&self, path: &str, token: &str) -> Result<Url, Error> {
        let endpoint = self.endpoint(path);
        let invalid = |reason: String| InvalidInputError::ServiceUrl {
            value: endpoint.clone(),
            reason,
        };

        let mut url = Url::parse(&endpoint).map_err(|e| invalid(e.to_string()))?;
        let scheme = match self.0.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|_| invalid(format!("cannot switch scheme to {}", scheme)))?;
        url.query_pairs_mut().append_pair("token", token);

        Ok(url)
    }

    /// `scheme://host[:port]`, for same-origin checks.
    pub fn origin(&self) -> String {
        self.0.origin().ascii_serialization()
    }
}

impl fmt::Display for ServiceUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl Serialize for ServiceUrl {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.0.as_str())
    }
}

impl<'de> Deserialize<'de> for ServiceUrl {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ServiceUrl::new(s).map_err(serde::de::Error::custom)
    }
}
