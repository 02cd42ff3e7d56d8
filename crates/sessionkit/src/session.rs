//! The session façade wiring the layer's services together.

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use sessionkit_core::error::{AuthError, ProtocolError};
use sessionkit_core::{
    AccessToken, ClientConfig, Clock, Credentials, Error, HostEnvironment, HttpRequest,
    HttpTransport, Navigator, RefreshToken, Result, SocketConnector, Storage,
};
use tokio::sync::watch;
use tracing::{debug, info, instrument};

use crate::auth::{CredentialStore, RedirectGuard, RefreshCoordinator, TokenGuard};
use crate::http::ApiClient;
use crate::realtime::RealtimeChannel;

/// Everything the session needs from its environment.
#[derive(Clone)]
pub struct SessionCapabilities {
    pub clock: Arc<dyn Clock>,
    /// Session-scoped storage for the credential pair and return-to target.
    pub storage: Arc<dyn Storage>,
    /// Transport for API requests and login.
    pub transport: Arc<dyn HttpTransport>,
    /// Transport for the refresh endpoint.
    pub refresh_transport: Arc<dyn HttpTransport>,
    pub navigator: Arc<dyn Navigator>,
    pub host: Option<Arc<dyn HostEnvironment>>,
}

impl SessionCapabilities {
    /// Capabilities sharing one transport for API and refresh traffic.
    pub fn new(
        clock: Arc<dyn Clock>,
        storage: Arc<dyn Storage>,
        transport: Arc<dyn HttpTransport>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            clock,
            storage,
            refresh_transport: transport.clone(),
            transport,
            navigator,
            host: None,
        }
    }

    pub fn with_host(mut self, host: Arc<dyn HostEnvironment>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn with_refresh_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.refresh_transport = transport;
        self
    }
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// An authenticated (or not yet authenticated) client session.
///
/// Owns the credential store and every service that reads or writes it.
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: ClientConfig,
    transport: Arc<dyn HttpTransport>,
    store: CredentialStore,
    guard: TokenGuard,
    coordinator: RefreshCoordinator,
    redirect: RedirectGuard,
    api: ApiClient,
}

impl Session {
    pub fn new(config: ClientConfig, capabilities: SessionCapabilities) -> Self {
        let SessionCapabilities {
            clock,
            storage,
            transport,
            refresh_transport,
            navigator,
            host,
        } = capabilities;

        let store = CredentialStore::new(storage.clone());
        let guard = TokenGuard::new(clock, config.expiry_buffer_secs);
        let coordinator =
            RefreshCoordinator::new(store.clone(), refresh_transport, config.refresh_url());
        let redirect = RedirectGuard::new(navigator, storage, config.login_path.clone());

        let mut api = ApiClient::new(
            config.base_url.clone(),
            transport.clone(),
            store.clone(),
            guard.clone(),
            coordinator.clone(),
            redirect.clone(),
        );
        if let Some(host) = host {
            api = api.with_host(host);
        }

        Self {
            inner: Arc::new(SessionInner {
                config,
                transport,
                store,
                guard,
                coordinator,
                redirect,
                api,
            }),
        }
    }

    /// Exchange `credentials` for a token pair.
    ///
    /// Returns the page the user was on when the previous session was lost,
    /// if one was recorded and is still a safe target.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidCredentials`] if the service rejects the login.
    #[instrument(skip(self, credentials), fields(username = %credentials.username()))]
    pub async fn login(&self, credentials: Credentials) -> Result<Option<String>> {
        info!("Logging in");

        let request = HttpRequest::post(self.inner.config.login_url()).json(json!({
            "username": credentials.username(),
            "password": credentials.password(),
        }));
        let response = self.inner.transport.execute(request).await?;

        match response.status {
            200..=299 => {}
            400 | 401 => return Err(AuthError::InvalidCredentials.into()),
            _ => return Err(Error::Protocol(response.protocol_error())),
        }

        let body: LoginResponse = response.json()?;
        let (Some(access), Some(refresh)) = (
            body.access_token.filter(|t| !t.is_empty()),
            body.refresh_token.filter(|t| !t.is_empty()),
        ) else {
            return Err(ProtocolError::new(
                response.status,
                Some("InvalidResponse".into()),
                Some("login response is missing a token".into()),
            )
            .into());
        };

        self.inner
            .store
            .set(AccessToken::new(access), RefreshToken::new(refresh))?;
        debug!("Session established");

        Ok(self.inner.redirect.take_return_to())
    }

    /// Drop the credential pair. Open real-time channels close.
    pub fn logout(&self) -> Result<()> {
        self.inner.store.clear()?;
        info!("Logged out");
        Ok(())
    }

    /// Import a pair left in `durable` storage by an older client.
    pub fn restore_legacy(&self, durable: &dyn Storage) -> Result<bool> {
        let imported = self.inner.store.migrate_from(durable)?;
        if imported {
            self.inner.redirect.rearm();
        }
        Ok(imported)
    }

    /// Start the real-time channel. It connects once the session is
    /// authenticated.
    pub fn realtime(&self, connector: Arc<dyn SocketConnector>) -> RealtimeChannel {
        RealtimeChannel::spawn(
            &self.inner.config,
            connector,
            &self.inner.store,
            self.inner.coordinator.clone(),
        )
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.store.is_authenticated()
    }

    pub fn subscribe_auth(&self) -> watch::Receiver<bool> {
        self.inner.store.subscribe_auth()
    }

    pub fn api(&self) -> &ApiClient {
        &self.inner.api
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.inner.store
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.inner.coordinator
    }

    pub fn redirect(&self) -> &RedirectGuard {
        &self.inner.redirect
    }

    pub fn guard(&self) -> &TokenGuard {
        &self.inner.guard
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("base_url", &self.inner.config.base_url)
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}
