//! The request pipeline.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use sessionkit_core::error::AuthError;
use sessionkit_core::{
    AccessToken, Error, HostEnvironment, HttpMethod, HttpRequest, HttpResponse, HttpTransport,
    Result, ServiceUrl,
};
use tracing::{debug, instrument, trace, warn};
use url::Url;

use crate::auth::{CredentialStore, RedirectGuard, RefreshCoordinator, TokenGuard};

/// Header carrying the embedding host's signed initialization data.
pub const INIT_DATA_HEADER: &str = "X-Init-Data";

const AUTHORIZATION: &str = "Authorization";

/// Sends requests on behalf of page code, keeping them authenticated.
///
/// Before sending, an access token that is expired (or about to be) is
/// refreshed through the [`RefreshCoordinator`]. A `401` response triggers
/// one refresh and exactly one retry. When the session cannot be recovered
/// the credentials are cleared, the user is sent to the login page, and the
/// request fails with [`AuthError::SessionExpired`].
#[derive(Clone)]
pub struct ApiClient {
    base_url: ServiceUrl,
    transport: Arc<dyn HttpTransport>,
    store: CredentialStore,
    guard: TokenGuard,
    coordinator: RefreshCoordinator,
    redirect: RedirectGuard,
    host: Option<Arc<dyn HostEnvironment>>,
}

impl ApiClient {
    pub fn new(
        base_url: ServiceUrl,
        transport: Arc<dyn HttpTransport>,
        store: CredentialStore,
        guard: TokenGuard,
        coordinator: RefreshCoordinator,
        redirect: RedirectGuard,
    ) -> Self {
        Self {
            base_url,
            transport,
            store,
            guard,
            coordinator,
            redirect,
            host: None,
        }
    }

    /// Forward initialization data from `host` on every request.
    pub fn with_host(mut self, host: Arc<dyn HostEnvironment>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn base_url(&self) -> &ServiceUrl {
        &self.base_url
    }

    /// Resolves `path` against the service base URL. Absolute URLs pass
    /// through unchanged; those on another origin are sent without
    /// credentials.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("https://") || path.starts_with("http://") {
            path.to_string()
        } else {
            self.base_url.endpoint(path)
        }
    }

    /// Send `request` through the pipeline and return the raw response.
    ///
    /// Non-2xx statuses are not errors here, with one exception: a session
    /// that cannot be refreshed fails with [`AuthError::SessionExpired`].
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    pub async fn send(&self, mut request: HttpRequest) -> Result<HttpResponse> {
        if !self.is_service_url(&request.url) {
            debug!("Foreign origin; sending without credentials");
            return Ok(self.transport.execute(request).await?);
        }

        let sent_with = self.authorize(&mut request).await?;

        let response = self.transport.execute(request.clone()).await?;
        trace!(status = response.status, "Response");
        if response.status != 401 {
            return Ok(response);
        }

        debug!("Unauthorized; refreshing and retrying once");
        let Some(token) = self.coordinator.refresh_stale(sent_with.as_ref()).await else {
            self.session_lost();
            return Err(AuthError::SessionExpired.into());
        };
        request.set_header(AUTHORIZATION, bearer(&token));

        let retried = self.transport.execute(request).await?;
        if retried.status == 401 {
            warn!("Still unauthorized after refresh");
        }
        Ok(retried)
    }

    /// Build and send a request for `path` with an optional JSON body.
    pub async fn request(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<HttpResponse> {
        let mut request = HttpRequest::new(method, self.url(path));
        request.body = body;
        self.send(request).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.request(HttpMethod::Get, path, None).await?;
        success(response)?.json()
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = serde_json::to_value(body)?;
        let response = self.request(HttpMethod::Post, path, Some(body)).await?;
        success(response)?.json()
    }

    pub async fn put_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = serde_json::to_value(body)?;
        let response = self.request(HttpMethod::Put, path, Some(body)).await?;
        success(response)?.json()
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        let response = self.request(HttpMethod::Delete, path, None).await?;
        success(response).map(|_| ())
    }

    // Attaches headers and returns the access token the request carries.
    async fn authorize(&self, request: &mut HttpRequest) -> Result<Option<AccessToken>> {
        if let Some(data) = self.init_data() {
            request.set_header(INIT_DATA_HEADER, data);
        }

        let Some(token) = self.store.access_token() else {
            debug!("No access token; sending unauthenticated");
            return Ok(None);
        };

        let token = if self.guard.is_expired(&token) {
            debug!("Access token expired; refreshing before send");
            match self.coordinator.refresh_stale(Some(&token)).await {
                Some(fresh) => fresh,
                None => {
                    self.session_lost();
                    return Err(AuthError::SessionExpired.into());
                }
            }
        } else {
            token
        };

        request.set_header(AUTHORIZATION, bearer(&token));
        Ok(Some(token))
    }

    // Credentials only travel to the service's own origin.
    fn is_service_url(&self, url: &str) -> bool {
        Url::parse(url).is_ok_and(|url| url.origin().ascii_serialization() == self.base_url.origin())
    }

    fn init_data(&self) -> Option<String> {
        if let Some(data) = self.store.init_data() {
            return Some(data);
        }
        let data = self.host.as_ref()?.init_data().filter(|d| !d.is_empty())?;
        if let Err(e) = self.store.set_init_data(&data) {
            warn!(error = %e, "Failed to cache init data");
        }
        Some(data)
    }

    fn session_lost(&self) {
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to clear credentials");
        }
        self.redirect.redirect_to_login();
    }
}

fn bearer(token: &AccessToken) -> String {
    format!("Bearer {}", token.as_str())
}

fn success(response: HttpResponse) -> Result<HttpResponse> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(Error::Protocol(response.protocol_error()))
    }
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("has_host", &self.host.is_some())
            .finish()
    }
}
