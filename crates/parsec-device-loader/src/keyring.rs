//! System keyring abstraction
//!
//! The engine only needs to store and fetch small secrets keyed by
//! `(service, user)`. The default store lives in process memory; platform
//! integrations install their own with [`set_keyring_store`].

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyringError {
    #[error("Keyring is not available")]
    Unavailable,
    #[error("Keyring backend error: {0}")]
    Backend(String),
}

pub trait KeyringStore: Send + Sync {
    fn is_available(&self) -> bool {
        true
    }

    fn set_secret(&self, service: &str, user: &str, secret: &[u8]) -> Result<(), KeyringError>;

    fn get_secret(&self, service: &str, user: &str) -> Result<Option<Vec<u8>>, KeyringError>;

    fn delete_secret(&self, service: &str, user: &str) -> Result<(), KeyringError>;
}

/// Keyring kept in process memory, secrets do not survive a restart
#[derive(Debug, Default)]
pub struct InMemoryKeyring {
    entries: RwLock<HashMap<(String, String), Vec<u8>>>,
}

impl InMemoryKeyring {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyringStore for InMemoryKeyring {
    fn set_secret(&self, service: &str, user: &str, secret: &[u8]) -> Result<(), KeyringError> {
        self.entries
            .write()
            .insert((service.to_owned(), user.to_owned()), secret.to_vec());
        Ok(())
    }

    fn get_secret(&self, service: &str, user: &str) -> Result<Option<Vec<u8>>, KeyringError> {
        Ok(self
            .entries
            .read()
            .get(&(service.to_owned(), user.to_owned()))
            .cloned())
    }

    fn delete_secret(&self, service: &str, user: &str) -> Result<(), KeyringError> {
        self.entries
            .write()
            .remove(&(service.to_owned(), user.to_owned()));
        Ok(())
    }
}

static KEYRING_STORE: Lazy<RwLock<Arc<dyn KeyringStore>>> =
    Lazy::new(|| RwLock::new(Arc::new(InMemoryKeyring::new())));

/// Replace the process-wide keyring
pub fn set_keyring_store(store: Arc<dyn KeyringStore>) {
    *KEYRING_STORE.write() = store;
}

pub fn keyring_store() -> Arc<dyn KeyringStore> {
    KEYRING_STORE.read().clone()
}

pub fn is_keyring_available() -> bool {
    keyring_store().is_available()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_keyring() {
        let keyring = InMemoryKeyring::new();
        assert_eq!(keyring.get_secret("parsec", "alice").unwrap(), None);

        keyring.set_secret("parsec", "alice", b"secret").unwrap();
        assert_eq!(
            keyring.get_secret("parsec", "alice").unwrap(),
            Some(b"secret".to_vec())
        );
        assert_eq!(keyring.get_secret("other", "alice").unwrap(), None);

        keyring.delete_secret("parsec", "alice").unwrap();
        assert_eq!(keyring.get_secret("parsec", "alice").unwrap(), None);
    }
}
