//! Login redirects and return-to validation.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use sessionkit_core::config::DEFAULT_LOGIN_PATH;
use sessionkit_core::{Navigator, Storage};
use tracing::{debug, info, warn};
use url::Url;

/// Tab-scoped storage key of the page to return to after login.
pub const RETURN_TO_KEY: &str = "return_to";

/// `true` if `target` is safe to navigate to from a page on `current_origin`.
///
/// Accepted: a relative path starting with a single `/`, or an absolute
/// `http(s)` URL on exactly `current_origin`. Everything else is rejected,
/// including protocol-relative `//host` and `/\host` forms, non-web schemes,
/// and anything containing control characters.
pub fn is_valid_redirect_target(target: &str, current_origin: &str) -> bool {
    if target.is_empty() || target.chars().any(|c| c.is_ascii_control()) {
        return false;
    }

    if target.starts_with('/') {
        return is_local_path(target);
    }

    match Url::parse(target) {
        Ok(url) => {
            matches!(url.scheme(), "http" | "https")
                && url.origin().ascii_serialization() == current_origin
        }
        Err(_) => false,
    }
}

fn is_local_path(path: &str) -> bool {
    path.starts_with('/')
        && !path.starts_with("//")
        && !path.starts_with("/\\")
        && !path.chars().any(|c| c.is_ascii_control())
}

fn route(path: &str) -> &str {
    path.split(['?', '#']).next().unwrap_or(path)
}

/// Sends the user to the login page when the session cannot be recovered.
///
/// Redirects are de-duplicated: once one has been issued, further calls are
/// no-ops until the guard is re-armed by a successful login. Many requests
/// failing together therefore navigate exactly once.
#[derive(Clone)]
pub struct RedirectGuard {
    inner: Arc<Inner>,
}

struct Inner {
    navigator: Arc<dyn Navigator>,
    storage: Arc<dyn Storage>,
    login_path: String,
    redirecting: AtomicBool,
}

impl RedirectGuard {
    /// `storage` holds the return-to target and should be tab-scoped.
    /// A `login_path` that is not a local path falls back to `/login`.
    pub fn new(
        navigator: Arc<dyn Navigator>,
        storage: Arc<dyn Storage>,
        login_path: impl Into<String>,
    ) -> Self {
        let login_path = login_path.into();
        let login_path = if is_local_path(&login_path) {
            login_path
        } else {
            warn!(login_path = %login_path, "Login path is not a local path; using default");
            DEFAULT_LOGIN_PATH.to_string()
        };

        Self {
            inner: Arc::new(Inner {
                navigator,
                storage,
                login_path,
                redirecting: AtomicBool::new(false),
            }),
        }
    }

    /// Remember where the user was and navigate to the login page.
    ///
    /// Returns `false` if a redirect was already pending.
    pub fn redirect_to_login(&self) -> bool {
        if self.inner.redirecting.swap(true, Ordering::AcqRel) {
            debug!("Login redirect already pending");
            return false;
        }

        let location = self.inner.navigator.location();
        let on_login_page = route(&location.path) == route(&self.inner.login_path);

        if !on_login_page && is_valid_redirect_target(&location.path, &location.origin) {
            if let Err(e) = self.inner.storage.set(RETURN_TO_KEY, &location.path) {
                warn!(error = %e, "Failed to remember return-to path");
            }
        }

        info!(login_path = %self.inner.login_path, "Session lost; redirecting to login");
        self.inner.navigator.navigate(&self.inner.login_path);
        true
    }

    /// Consume the stored return-to target and re-arm the guard.
    ///
    /// The target is validated again on the way out, since storage is
    /// writable by anything on the page.
    pub fn take_return_to(&self) -> Option<String> {
        let stored = match self.inner.storage.get(RETURN_TO_KEY) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "Failed to read return-to path");
                None
            }
        };
        if stored.is_some()
            && let Err(e) = self.inner.storage.remove(RETURN_TO_KEY)
        {
            warn!(error = %e, "Failed to delete return-to path");
        }
        self.rearm();

        let origin = self.inner.navigator.location().origin;
        stored.filter(|target| {
            let valid = is_valid_redirect_target(target, &origin);
            if !valid {
                warn!("Discarding unsafe return-to path");
            }
            valid
        })
    }

    /// Allow the next session loss to redirect again.
    pub fn rearm(&self) {
        self.inner.redirecting.store(false, Ordering::Release);
    }

    pub fn is_redirecting(&self) -> bool {
        self.inner.redirecting.load(Ordering::Acquire)
    }

    pub fn login_path(&self) -> &str {
        &self.inner.login_path
    }
}

impl fmt::Debug for RedirectGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedirectGuard")
            .field("login_path", &self.inner.login_path)
            .field("redirecting", &self.is_redirecting())
            .finish()
    }
}
