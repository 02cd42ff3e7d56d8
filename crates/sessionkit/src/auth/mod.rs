//! Credential handling.
//!
//! - [`CredentialStore`]: the single source of truth for the token pair.
//! - [`guard`]: claim decoding and expiry classification.
//! - [`RefreshCoordinator`]: single-flight token refresh.
//! - [`RedirectGuard`]: safe "session lost, go to login" navigation.

pub mod guard;
mod redirect;
mod refresh;
mod store;

pub use guard::{Claims, MalformedToken, TokenGuard, decode, is_expired};
pub use redirect::{RETURN_TO_KEY, RedirectGuard, is_valid_redirect_target};
pub use refresh::{RefreshCoordinator, RefreshSubscription};
pub use store::{ACCESS_TOKEN_KEY, CredentialStore, INIT_DATA_KEY, REFRESH_TOKEN_KEY};
