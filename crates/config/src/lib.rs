//! Settings file and credential resolution for restops.

pub mod credentials;
pub mod settings;

pub use credentials::{CredentialChain, CredentialError, KeySource, ResolvedKey};
pub use settings::{
    BackendSettings, DataSettings, OnExisting, RetrySettings, SessionSettings, Settings, SettingsError,
};
