//! Credential store.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sessionkit_core::error::StorageError;
use sessionkit_core::{AccessToken, RefreshToken, Storage, TokenPair};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::storage::MemoryStorage;

/// Storage key of the access token.
pub const ACCESS_TOKEN_KEY: &str = "access_token";
/// Storage key of the refresh token.
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
/// Storage key of the cached host initialization data.
pub const INIT_DATA_KEY: &str = "init_data";

/// Holds the current token pair.
///
/// Cheap to clone; clones share the same underlying storage. Every read and
/// write of the pair happens under one lock, so no caller can see an access
/// token from one pair next to the refresh token of another.
///
/// Reads never fail: a storage error is logged and reported as an absent
/// value.
#[derive(Clone)]
pub struct CredentialStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    storage: Arc<dyn Storage>,
    lock: Mutex<()>,
    authenticated: watch::Sender<bool>,
}

impl CredentialStore {
    /// Create a store over `storage`.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        let present = read_soft(&*storage, ACCESS_TOKEN_KEY).is_some()
            && read_soft(&*storage, REFRESH_TOKEN_KEY).is_some();
        let (authenticated, _) = watch::channel(present);

        Self {
            inner: Arc::new(StoreInner {
                storage,
                lock: Mutex::new(()),
                authenticated,
            }),
        }
    }

    /// Create a store over fresh in-memory storage.
    pub fn ephemeral() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }

    /// Returns the current pair, if both halves are present.
    pub fn get(&self) -> Option<TokenPair> {
        let _guard = self.lock();
        self.read_pair()
    }

    pub fn access_token(&self) -> Option<AccessToken> {
        let _guard = self.lock();
        self.read(ACCESS_TOKEN_KEY).map(AccessToken::new)
    }

    pub fn refresh_token(&self) -> Option<RefreshToken> {
        let _guard = self.lock();
        self.read(REFRESH_TOKEN_KEY).map(RefreshToken::new)
    }

    pub fn is_authenticated(&self) -> bool {
        *self.inner.authenticated.borrow()
    }

    /// Watch the session flag. The value flips whenever a pair is stored or
    /// cleared.
    pub fn subscribe_auth(&self) -> watch::Receiver<bool> {
        self.inner.authenticated.subscribe()
    }

    /// Replace the whole pair.
    pub fn set(&self, access: AccessToken, refresh: RefreshToken) -> Result<(), StorageError> {
        let _guard = self.lock();
        self.write_pair(&access, Some(&refresh))?;
        self.publish();
        debug!("Stored credential pair");
        Ok(())
    }

    /// Replace only the access token, keeping the refresh token.
    pub fn set_access_only(&self, access: AccessToken) -> Result<(), StorageError> {
        let _guard = self.lock();
        self.write_pair(&access, None)?;
        self.publish();
        Ok(())
    }

    /// Store the result of a refresh made with `expected`, unless the pair
    /// was cleared or replaced while the refresh was in flight.
    ///
    /// Returns `false` (and writes nothing) in that case.
    pub(crate) fn rotate(
        &self,
        expected: &RefreshToken,
        access: &AccessToken,
        refresh: Option<&RefreshToken>,
    ) -> Result<bool, StorageError> {
        let _guard = self.lock();
        let current = self.read(REFRESH_TOKEN_KEY);
        if current.as_deref() != Some(expected.as_str()) {
            debug!("Credential pair changed during refresh; discarding result");
            return Ok(false);
        }
        self.write_pair(access, refresh)?;
        self.publish();
        Ok(true)
    }

    /// Remove the pair.
    pub fn clear(&self) -> Result<(), StorageError> {
        let _guard = self.lock();
        let access = self.inner.storage.remove(ACCESS_TOKEN_KEY);
        let refresh = self.inner.storage.remove(REFRESH_TOKEN_KEY);
        self.publish();
        access.and(refresh)?;
        debug!("Cleared credential pair");
        Ok(())
    }

    /// Cached host initialization data.
    pub fn init_data(&self) -> Option<String> {
        self.read(INIT_DATA_KEY)
    }

    pub fn set_init_data(&self, data: &str) -> Result<(), StorageError> {
        self.inner.storage.set(INIT_DATA_KEY, data)
    }

    /// Move a pair left in `durable` storage by an older client into this
    /// store, then delete the durable copy.
    ///
    /// Returns `true` if a pair was imported. A durable store holding only one
    /// half of a pair, or one shadowed by a pair already in this store, is
    /// discarded without importing.
    pub fn migrate_from(&self, durable: &dyn Storage) -> Result<bool, StorageError> {
        let access = read_soft(durable, ACCESS_TOKEN_KEY);
        let refresh = read_soft(durable, REFRESH_TOKEN_KEY);

        if access.is_none() && refresh.is_none() {
            return Ok(false);
        }

        let imported = match (access, refresh) {
            (Some(access), Some(refresh)) if self.get().is_none() => {
                self.set(AccessToken::new(access), RefreshToken::new(refresh))?;
                info!("Migrated credentials from durable storage");
                true
            }
            (Some(_), Some(_)) => {
                debug!("Session already holds credentials; dropping durable copy");
                false
            }
            _ => {
                warn!("Durable storage held half a credential pair; discarding");
                false
            }
        };

        for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY] {
            if let Err(e) = durable.remove(key) {
                warn!(key, error = %e, "Failed to delete durable credential");
            }
        }

        Ok(imported)
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.inner.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read(&self, key: &str) -> Option<String> {
        read_soft(&*self.inner.storage, key)
    }

    fn read_pair(&self) -> Option<TokenPair> {
        let access = self.read(ACCESS_TOKEN_KEY)?;
        let refresh = self.read(REFRESH_TOKEN_KEY)?;
        Some(TokenPair::new(access, refresh))
    }

    // Callers hold the lock. On a failed write the previous values are put
    // back so readers never see half of a new pair.
    fn write_pair(
        &self,
        access: &AccessToken,
        refresh: Option<&RefreshToken>,
    ) -> Result<(), StorageError> {
        let storage = &self.inner.storage;
        let previous_access = self.read(ACCESS_TOKEN_KEY);

        storage.set(ACCESS_TOKEN_KEY, access.as_str())?;

        if let Some(refresh) = refresh
            && let Err(e) = storage.set(REFRESH_TOKEN_KEY, refresh.as_str())
        {
            let restored = match previous_access {
                Some(previous) => storage.set(ACCESS_TOKEN_KEY, &previous),
                None => storage.remove(ACCESS_TOKEN_KEY),
            };
            if let Err(restore_err) = restored {
                warn!(error = %restore_err, "Failed to roll back access token");
            }
            return Err(e);
        }

        Ok(())
    }

    fn publish(&self) {
        let present = self.read_pair().is_some();
        self.inner.authenticated.send_if_modified(|current| {
            let changed = *current != present;
            *current = present;
            changed
        });
    }
}

fn read_soft(storage: &dyn Storage, key: &str) -> Option<String> {
    match storage.get(key) {
        Ok(value) => value.filter(|v| !v.is_empty()),
        Err(e) => {
            warn!(key, error = %e, "Credential storage read failed");
            None
        }
    }
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore")
            .field("authenticated", &self.is_authenticated())
            .field("tokens", &"[REDACTED]")
            .finish()
    }
}
