// Backend credential resolution
//
// The API key is looked up from, in order:
// 1. Explicit configuration (settings file or --api-key)
// 2. Environment variable (OPENAI_API_KEY by default)
// 3. System keychain (when built with the `keychain` feature)
//
// Providers are evaluated lazily; the first non-empty value wins.

use std::env;
use std::fmt;

use crate::settings::BackendSettings;

/// Source of an API key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    Explicit,
    Environment,
    Keychain,
}

impl KeySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeySource::Explicit => "explicit",
            KeySource::Environment => "environment",
            KeySource::Keychain => "keychain",
        }
    }
}

/// A resolved secret and where it came from. Debug output never shows the key.
#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedKey {
    pub key: String,
    pub source: KeySource,
}

impl fmt::Debug for ResolvedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedKey")
            .field("key", &"<redacted>")
            .field("source", &self.source)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// No provider produced a key. Lists what was consulted.
    Missing { tried: Vec<String> },
    /// The keychain itself failed (locked, unavailable), not merely empty.
    Keychain(String),
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing { tried } => write!(f, "no API key found (tried {})", tried.join(", ")),
            Self::Keychain(msg) => write!(f, "keychain error: {msg}"),
        }
    }
}

impl std::error::Error for CredentialError {}

type Lookup = Box<dyn Fn() -> Result<Option<String>, CredentialError> + Send + Sync>;

struct Provider {
    source: KeySource,
    label: String,
    lookup: Lookup,
}

/// Ordered list of credential providers.
pub struct CredentialChain {
    providers: Vec<Provider>,
}

impl fmt::Debug for CredentialChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.providers.iter().map(|p| &p.label))
            .finish()
    }
}

impl CredentialChain {
    pub fn empty() -> Self {
        Self { providers: Vec::new() }
    }

    /// Explicit key, then environment variable, then keychain.
    pub fn from_settings(settings: &BackendSettings) -> Self {
        let mut chain = Self::empty()
            .explicit(settings.api_key.clone())
            .environment(&settings.api_key_env);
        if keychain_available() {
            chain = chain.keychain(&settings.keychain_service, &settings.keychain_account);
        }
        chain
    }

    /// Append a provider. Later providers are only consulted when earlier ones yield nothing.
    pub fn with_provider<F>(mut self, source: KeySource, label: impl Into<String>, lookup: F) -> Self
    where
        F: Fn() -> Result<Option<String>, CredentialError> + Send + Sync + 'static,
    {
        self.providers.push(Provider {
            source,
            label: label.into(),
            lookup: Box::new(lookup),
        });
        self
    }

    pub fn explicit(self, key: Option<String>) -> Self {
        self.with_provider(KeySource::Explicit, "explicit config", move || Ok(key.clone()))
    }

    pub fn environment(self, var: &str) -> Self {
        let var = var.to_string();
        let label = format!("${var}");
        self.with_provider(KeySource::Environment, label, move || Ok(env::var(&var).ok()))
    }

    pub fn keychain(self, service: &str, account: &str) -> Self {
        let (service, account) = (service.to_string(), account.to_string());
        let label = format!("keychain {service}/{account}");
        self.with_provider(KeySource::Keychain, label, move || get_keychain_secret(&service, &account))
    }

    /// Labels of the providers in evaluation order.
    pub fn describe(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.label.as_str()).collect()
    }

    /// Evaluate providers in order and return the first non-empty key.
    pub fn resolve(&self) -> Result<ResolvedKey, CredentialError> {
        for provider in &self.providers {
            match (provider.lookup)()? {
                Some(key) if !key.trim().is_empty() => {
                    log::debug!("API key resolved from {}", provider.label);
                    return Ok(ResolvedKey {
                        key: key.trim().to_string(),
                        source: provider.source,
                    });
                }
                _ => continue,
            }
        }
        Err(CredentialError::Missing {
            tried: self.providers.iter().map(|p| p.label.clone()).collect(),
        })
    }
}

/// Read a secret from the system keychain. `Ok(None)` when no entry exists.
#[cfg(feature = "keychain")]
pub fn get_keychain_secret(service: &str, account: &str) -> Result<Option<String>, CredentialError> {
    let entry = keyring::Entry::new(service, account)
        .map_err(|e| CredentialError::Keychain(format!("cannot open entry: {e}")))?;
    match entry.get_password() {
        Ok(secret) => Ok(Some(secret)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(e) => Err(CredentialError::Keychain(e.to_string())),
    }
}

#[cfg(not(feature = "keychain"))]
pub fn get_keychain_secret(_service: &str, _account: &str) -> Result<Option<String>, CredentialError> {
    Ok(None)
}

/// Store an API key in the system keychain
#[cfg(feature = "keychain")]
pub fn set_api_key(service: &str, account: &str, key: &str) -> Result<(), String> {
    let entry = keyring::Entry::new(service, account)
        .map_err(|e| format!("Failed to create keychain entry: {}", e))?;

    entry
        .set_password(key)
        .map_err(|e| format!("Failed to store key in keychain: {}", e))
}

#[cfg(not(feature = "keychain"))]
pub fn set_api_key(_service: &str, _account: &str, _key: &str) -> Result<(), String> {
    Err("Keychain support not enabled. Set the API key environment variable instead.".to_string())
}

/// Delete an API key from the system keychain
#[cfg(feature = "keychain")]
pub fn delete_api_key(service: &str, account: &str) -> Result<(), String> {
    let entry = keyring::Entry::new(service, account)
        .map_err(|e| format!("Failed to access keychain entry: {}", e))?;

    entry
        .delete_credential()
        .map_err(|e| format!("Failed to delete key from keychain: {}", e))
}

#[cfg(not(feature = "keychain"))]
pub fn delete_api_key(_service: &str, _account: &str) -> Result<(), String> {
    Err("Keychain support not enabled.".to_string())
}

/// Whether this build can consult the system keychain
pub fn keychain_available() -> bool {
    cfg!(feature = "keychain")
}
