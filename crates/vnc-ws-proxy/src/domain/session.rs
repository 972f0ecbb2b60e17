//! Session identity.

use std::fmt;
use std::time::Instant;

use uuid::Uuid;

/// Opaque key identifying one bridged connection.
///
/// The key is the registry's map key and appears as the `session` field in
/// every log line emitted while the connection is alive, which is how log
/// lines from one browser session are correlated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey(Uuid);

impl SessionKey {
    /// Generates a fresh random key.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionKey {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A snapshot of one registered session, returned by registry enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub key: SessionKey,
    /// Label of the browser-facing endpoint (usually its socket address).
    pub client: String,
    /// Backend address the session was dialed to.
    pub backend: String,
    /// `true` when the backend leg was upgraded to TLS.
    pub backend_tls: bool,
    /// When the session was registered.
    pub registered_at: Instant,
}
