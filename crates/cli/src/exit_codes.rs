//! CLI Exit Code Registry
//!
//! This is the single source of truth for all `restops` exit codes.
//! Scripts rely on them, so never renumber an existing code.
//!
//! # Exit Code Ranges
//!
//! | Range   | Domain     | Description                                 |
//! |---------|------------|---------------------------------------------|
//! | 0       | Universal  | Success                                     |
//! | 1       | Universal  | General error (unspecified)                 |
//! | 2       | Universal  | CLI usage error (bad args, unknown module)  |
//! | 10-19   | config     | Credential and keychain codes               |
//! | 20-29   | session    | Analysis session codes                      |
//! | 30-39   | data       | Module load and export codes                |

use restops_session::SessionError;

// =============================================================================
// Universal (0-2)
// =============================================================================

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
/// Avoid using this; prefer a specific error code.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, unknown module name.
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// Config (10-19)
// =============================================================================

/// No usable analysis backend credential (explicit, env or keychain).
pub const EXIT_CONFIG_MISSING_KEY: u8 = 10;

/// Keychain error (cannot read/write credentials), or a bad settings file.
pub const EXIT_CONFIG_KEYCHAIN_ERR: u8 = 11;

// =============================================================================
// Session (20-29)
// =============================================================================

/// Session could not be created (backend refused or unreachable).
pub const EXIT_SESSION_CREATE: u8 = 20;

/// Query against a session that has no uploaded data, or is closed.
pub const EXIT_SESSION_NOT_READY: u8 = 21;

/// Query failed after retries (timeout, rate limit, 5xx). Safe to retry.
pub const EXIT_SESSION_TRANSIENT: u8 = 22;

/// The backend no longer recognizes the session.
pub const EXIT_SESSION_FATAL: u8 = 23;

/// Query cancelled by `--deadline-secs`.
pub const EXIT_SESSION_CANCELLED: u8 = 24;

// =============================================================================
// Data (30-39)
// =============================================================================

/// Requested module failed to load (missing or malformed file).
pub const EXIT_DATA_LOAD: u8 = 30;

/// Writing CSV output failed.
pub const EXIT_DATA_EXPORT: u8 = 31;

/// Map a SessionError to its exit code.
pub fn session_exit_code(err: &SessionError) -> u8 {
    match err {
        SessionError::Configuration(restops_config::CredentialError::Missing { .. }) => {
            EXIT_CONFIG_MISSING_KEY
        }
        SessionError::Configuration(_) => EXIT_CONFIG_KEYCHAIN_ERR,
        SessionError::Creation(_) | SessionError::AlreadyOpen(_) => EXIT_SESSION_CREATE,
        SessionError::NotFound(_) | SessionError::Unusable { .. } | SessionError::NotReady { .. } => {
            EXIT_SESSION_NOT_READY
        }
        SessionError::EmptyQuery => EXIT_USAGE,
        SessionError::Transient(_) => EXIT_SESSION_TRANSIENT,
        SessionError::FatalSession { .. } | SessionError::UploadAborted { .. } => EXIT_SESSION_FATAL,
        SessionError::Cancelled => EXIT_SESSION_CANCELLED,
        SessionError::Query(_) => EXIT_ERROR,
    }
}
