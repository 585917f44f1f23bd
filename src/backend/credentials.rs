//! Per-backend API keys

use dashmap::DashMap;
use std::fmt;

use crate::backend::traits::BackendId;

/// An API key and whether it was accepted without a validation round-trip
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub api_key: String,
    pub trusted: bool,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("api_key", &"<redacted>")
            .field("trusted", &self.trusted)
            .finish()
    }
}

/// Credentials keyed by backend, shared by every adapter
#[derive(Debug, Default)]
pub struct CredentialStore {
    keys: DashMap<BackendId, Credential>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a key. Blank keys remove the entry instead.
    pub fn set(&self, backend: BackendId, api_key: impl Into<String>, trusted: bool) {
        let api_key = api_key.into().trim().to_string();
        if api_key.is_empty() {
            self.keys.remove(&backend);
            return;
        }
        self.keys.insert(backend, Credential { api_key, trusted });
    }

    pub fn remove(&self, backend: BackendId) -> Option<Credential> {
        self.keys.remove(&backend).map(|(_, c)| c)
    }

    pub fn get(&self, backend: BackendId) -> Option<Credential> {
        self.keys.get(&backend).map(|c| c.clone())
    }

    pub fn api_key(&self, backend: BackendId) -> Option<String> {
        self.keys.get(&backend).map(|c| c.api_key.clone())
    }

    pub fn contains(&self, backend: BackendId) -> bool {
        self.keys.contains_key(&backend)
    }
}
