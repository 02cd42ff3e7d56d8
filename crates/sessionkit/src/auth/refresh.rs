//! Single-flight access token refresh.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Deserialize;
use serde_json::json;
use sessionkit_core::{AccessToken, HttpRequest, HttpTransport, RefreshToken};
use tokio::sync::oneshot;
use tracing::{debug, info, instrument, warn};

use super::store::CredentialStore;

/// Ensures at most one refresh round-trip is in flight at a time.
///
/// Every caller that asks for a refresh while one is running joins it and
/// receives that cycle's result, `None` included. The round-trip runs on its
/// own task: dropping the futures that wait on it does not cancel it.
///
/// The coordinator talks to the refresh endpoint through its own transport,
/// never through [`ApiClient`](crate::http::ApiClient), so a rejected
/// refresh cannot recurse into another refresh.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    store: CredentialStore,
    transport: Arc<dyn HttpTransport>,
    refresh_url: String,
    state: Mutex<RefreshState>,
}

#[derive(Default)]
struct RefreshState {
    in_flight: bool,
    subscribers: Vec<oneshot::Sender<Option<AccessToken>>>,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// A pending or already-known refresh result.
#[derive(Debug)]
pub enum RefreshSubscription {
    /// No cycle was in flight; this is the stored token.
    Ready(Option<AccessToken>),
    /// Resolves when the in-flight cycle finishes.
    Pending(oneshot::Receiver<Option<AccessToken>>),
}

impl RefreshSubscription {
    pub async fn wait(self) -> Option<AccessToken> {
        match self {
            RefreshSubscription::Ready(token) => token,
            // Sender dropped without a result: the runtime is shutting down.
            RefreshSubscription::Pending(rx) => rx.await.unwrap_or(None),
        }
    }
}

impl RefreshCoordinator {
    pub fn new(
        store: CredentialStore,
        transport: Arc<dyn HttpTransport>,
        refresh_url: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                transport,
                refresh_url: refresh_url.into(),
                state: Mutex::new(RefreshState::default()),
            }),
        }
    }

    /// Exchange the stored refresh token for a new access token.
    ///
    /// Joins the in-flight cycle if there is one. Resolves `None` when there
    /// is no refresh token or the exchange fails for any reason; failures are
    /// logged, never returned.
    pub async fn refresh_access_token(&self) -> Option<AccessToken> {
        self.begin(None).wait().await
    }

    /// Like [`refresh_access_token`](Self::refresh_access_token), but skips
    /// the round-trip when the store already holds a token other than
    /// `observed`: a cycle that finished after the caller read its token
    /// already produced what it needs.
    pub(crate) async fn refresh_stale(&self, observed: Option<&AccessToken>) -> Option<AccessToken> {
        self.begin(Some(observed)).wait().await
    }

    /// Register for the current cycle's result. Resolves immediately with
    /// the stored token when nothing is in flight.
    pub fn subscribe(&self) -> RefreshSubscription {
        let mut state = self.inner.lock();
        if state.in_flight {
            let (tx, rx) = oneshot::channel();
            state.subscribers.push(tx);
            RefreshSubscription::Pending(rx)
        } else {
            RefreshSubscription::Ready(self.inner.store.access_token())
        }
    }

    /// Wait for the in-flight cycle, if any, without starting one.
    pub async fn wait_for_refresh(&self) -> Option<AccessToken> {
        self.subscribe().wait().await
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.lock().in_flight
    }

    // The check-then-set of `in_flight` happens under one lock acquisition
    // that is released before anything awaits.
    fn begin(&self, observed: Option<Option<&AccessToken>>) -> RefreshSubscription {
        let mut state = self.inner.lock();

        if state.in_flight {
            debug!("Joining in-flight refresh");
            let (tx, rx) = oneshot::channel();
            state.subscribers.push(tx);
            return RefreshSubscription::Pending(rx);
        }

        if let Some(observed) = observed
            && let Some(current) = self.inner.store.access_token()
            && Some(&current) != observed
        {
            debug!("Access token already replaced; skipping refresh");
            return RefreshSubscription::Ready(Some(current));
        }

        let Some(refresh) = self.inner.store.refresh_token() else {
            debug!("No refresh token; nothing to refresh");
            return RefreshSubscription::Ready(None);
        };

        let (tx, rx) = oneshot::channel();
        state.in_flight = true;
        state.subscribers.push(tx);
        drop(state);

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let token = inner.exchange(refresh).await;
            let subscribers = {
                let mut state = inner.lock();
                state.in_flight = false;
                std::mem::take(&mut state.subscribers)
            };
            debug!(subscribers = subscribers.len(), "Refresh cycle finished");
            for subscriber in subscribers {
                let _ = subscriber.send(token.clone());
            }
        });

        RefreshSubscription::Pending(rx)
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[instrument(skip_all, fields(url = %self.refresh_url))]
    async fn exchange(&self, refresh: RefreshToken) -> Option<AccessToken> {
        info!("Refreshing access token");

        let request = HttpRequest::post(self.refresh_url.as_str())
            .json(json!({ "refresh_token": refresh.as_str() }));

        let response = match self.transport.execute(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Refresh request failed");
                return None;
            }
        };

        if !response.is_success() {
            warn!(status = response.status, "Refresh rejected");
            return None;
        }

        let body: RefreshResponse = match response.json() {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "Unreadable refresh response");
                return None;
            }
        };

        let Some(access) = body
            .access_token
            .filter(|t| !t.is_empty())
            .map(AccessToken::new)
        else {
            warn!("Refresh response carried no access token");
            return None;
        };
        let rotated = body
            .refresh_token
            .filter(|t| !t.is_empty())
            .map(RefreshToken::new);

        match self.store.rotate(&refresh, &access, rotated.as_ref()) {
            Ok(true) => {
                info!(rotated = rotated.is_some(), "Access token refreshed");
                Some(access)
            }
            Ok(false) => self.store.access_token(),
            Err(e) => {
                warn!(error = %e, "Failed to store refreshed token");
                Some(access)
            }
        }
    }
}

impl fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("refresh_url", &self.inner.refresh_url)
            .field("in_flight", &self.is_refreshing())
            .finish()
    }
}
