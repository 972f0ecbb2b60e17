//! Backend address resolution.
//!
//! Every inbound connection asks an [`AddressResolver`] exactly once which VNC
//! server it should be bridged to.  The resolver is supplied by whoever embeds
//! the proxy; two ready-made implementations are provided:
//!
//! - [`StaticResolver`]: every connection goes to one fixed address.
//! - [`TokenResolver`]: `?token=<name>` selects an address from a table.
//!
//! # Contract
//!
//! Resolvers report failure through `Err(ResolveError)`.  Because resolvers
//! are external code, [`resolve_guarded`] additionally contains a panic inside
//! `resolve` and turns it into [`ResolveError::Aborted`] for that connection
//! only, so one misbehaving lookup never takes the proxy down.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::application::error::ResolveError;
use crate::domain::ConnectionRequest;

/// Maps an inbound request to a backend `host:port` address.
#[cfg_attr(test, mockall::automock)]
pub trait AddressResolver: Send + Sync {
    /// Returns the backend address for `request`.
    ///
    /// # Errors
    ///
    /// Returns a [`ResolveError`] when no backend can be chosen.
    fn resolve(&self, request: &ConnectionRequest) -> Result<String, ResolveError>;
}

/// Calls `resolver`, converting a panic into [`ResolveError::Aborted`].
pub fn resolve_guarded(
    resolver: &dyn AddressResolver,
    request: &ConnectionRequest,
) -> Result<String, ResolveError> {
    match catch_unwind(AssertUnwindSafe(|| resolver.resolve(request))) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic with non-string payload".to_string());
            Err(ResolveError::Aborted(message))
        }
    }
}

// ── StaticResolver ────────────────────────────────────────────────────────────

/// Resolves every request to the same address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticResolver {
    addr: String,
}

impl StaticResolver {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

impl AddressResolver for StaticResolver {
    fn resolve(&self, _request: &ConnectionRequest) -> Result<String, ResolveError> {
        Ok(self.addr.clone())
    }
}

// ── TokenResolver ─────────────────────────────────────────────────────────────

/// Resolves the `token` query parameter through a fixed table.
///
/// ```rust
/// use vnc_ws_proxy::application::resolver::{AddressResolver, TokenResolver};
/// use vnc_ws_proxy::domain::ConnectionRequest;
///
/// let resolver = TokenResolver::new([("desk-1".to_string(), "10.0.0.5:5900".to_string())]);
/// let req = ConnectionRequest::from_uri(None, "/ws?token=desk-1");
/// assert_eq!(resolver.resolve(&req).unwrap(), "10.0.0.5:5900");
/// ```
#[derive(Debug, Clone, Default)]
pub struct TokenResolver {
    table: BTreeMap<String, String>,
    fallback: Option<String>,
}

impl TokenResolver {
    /// Query parameter carrying the token.
    pub const PARAM: &'static str = "token";

    pub fn new(table: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            table: table.into_iter().collect(),
            fallback: None,
        }
    }

    /// Address used when the request carries no token at all.
    ///
    /// An *unknown* token still fails; the fallback only covers its absence.
    pub fn with_fallback(mut self, addr: impl Into<String>) -> Self {
        self.fallback = Some(addr.into());
        self
    }
}

impl AddressResolver for TokenResolver {
    fn resolve(&self, request: &ConnectionRequest) -> Result<String, ResolveError> {
        match request.query_param(Self::PARAM) {
            Some(token) => self
                .table
                .get(&token)
                .cloned()
                .ok_or(ResolveError::UnknownToken(token)),
            None => self.fallback.clone().ok_or(ResolveError::MissingToken),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
