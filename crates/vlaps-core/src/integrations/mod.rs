pub mod oauth;
pub mod sheets;
pub mod traits;

pub use sheets::{GoogleSheetsStore, SheetHandle};
pub use traits::RemoteStore;

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::AuthError;

/// Where tokens, the spreadsheet id and OAuth client credentials live.
pub trait CredentialStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, AuthError>;
    fn set(&self, key: &str, value: &str) -> Result<(), AuthError>;
    /// Removing a missing key is not an error.
    fn delete(&self, key: &str) -> Result<(), AuthError>;
}

/// Credentials kept in the OS keyring.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyringCredentials;

impl CredentialStore for KeyringCredentials {
    fn get(&self, key: &str) -> Result<Option<String>, AuthError> {
        keyring_store::get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), AuthError> {
        keyring_store::set(key, value)
    }

    fn delete(&self, key: &str) -> Result<(), AuthError> {
        keyring_store::delete(key)
    }
}

/// Process-local credentials, for tests and throwaway runs.
#[derive(Debug, Default)]
pub struct MemoryCredentials {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CredentialStore for MemoryCredentials {
    fn get(&self, key: &str) -> Result<Option<String>, AuthError> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), AuthError> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), AuthError> {
        self.entries().remove(key);
        Ok(())
    }
}

/// Thin wrapper around the OS keyring for credential storage.
pub mod keyring_store {
    use crate::error::AuthError;

    const SERVICE: &str = "vlaps";

    fn entry(key: &str) -> Result<keyring::Entry, AuthError> {
        keyring::Entry::new(SERVICE, key).map_err(|e| AuthError::Keyring(e.to_string()))
    }

    pub fn get(key: &str) -> Result<Option<String>, AuthError> {
        match entry(key)?.get_password() {
            Ok(pw) => Ok(Some(pw)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(AuthError::Keyring(e.to_string())),
        }
    }

    pub fn set(key: &str, value: &str) -> Result<(), AuthError> {
        entry(key)?
            .set_password(value)
            .map_err(|e| AuthError::Keyring(e.to_string()))
    }

    pub fn delete(key: &str) -> Result<(), AuthError> {
        match entry(key)?.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(AuthError::Keyring(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_credentials_roundtrip() {
        let store = MemoryCredentials::new();
        assert_eq!(store.get("k").unwrap(), None);
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
        store.delete("k").unwrap();
        store.delete("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }
}
