//! Security-type and VeNCrypt sub-type codes.
//!
//! RFB 3.8 lets the server offer a list of one-byte *security types*.  Type
//! 19 (VeNCrypt) opens a second negotiation in which the server offers
//! four-byte *sub-types* that describe how the connection is upgraded to TLS
//! and how the client authenticates afterwards.

/// The two-byte security list meaning "one type offered: None".
pub const NONE_ONLY_OFFER: [u8; 2] = [1, SecurityType::NONE];

/// The only VeNCrypt version the proxy speaks, as `(major, minor)`.
pub const VENCRYPT_VERSION: (u8, u8) = (0, 2);

/// A top-level RFB security type.
///
/// Unknown codes are preserved in [`SecurityType::Other`] so they can be
/// logged and forwarded without loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecurityType {
    /// `0`: used by servers to signal a failed handshake.
    Invalid,
    /// `1`: no authentication.
    None,
    /// `2`: classic VNC challenge/response.
    VncAuthentication,
    /// `19`: VeNCrypt TLS upgrade.
    VeNCrypt,
    /// Any other code.
    Other(u8),
}

impl SecurityType {
    pub const INVALID: u8 = 0;
    pub const NONE: u8 = 1;
    pub const VNC_AUTHENTICATION: u8 = 2;
    pub const VENCRYPT: u8 = 19;

    /// Returns the wire code for this type.
    pub fn code(self) -> u8 {
        u8::from(self)
    }
}

impl From<u8> for SecurityType {
    fn from(code: u8) -> Self {
        match code {
            Self::INVALID => SecurityType::Invalid,
            Self::NONE => SecurityType::None,
            Self::VNC_AUTHENTICATION => SecurityType::VncAuthentication,
            Self::VENCRYPT => SecurityType::VeNCrypt,
            other => SecurityType::Other(other),
        }
    }
}

impl From<SecurityType> for u8 {
    fn from(t: SecurityType) -> Self {
        match t {
            SecurityType::Invalid => SecurityType::INVALID,
            SecurityType::None => SecurityType::NONE,
            SecurityType::VncAuthentication => SecurityType::VNC_AUTHENTICATION,
            SecurityType::VeNCrypt => SecurityType::VENCRYPT,
            SecurityType::Other(code) => code,
        }
    }
}

/// Returns `true` if the *first* offered type is VeNCrypt.
///
/// Only the first entry matters: the proxy treats the server's preferred type
/// as the one it will negotiate.  An empty list is never VeNCrypt.
pub fn prefers_vencrypt(offered: &[u8]) -> bool {
    offered.first().copied().map(SecurityType::from) == Some(SecurityType::VeNCrypt)
}

/// A VeNCrypt sub-type, sent as a big-endian `u32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VeNCryptSubType {
    Plain,
    TlsNone,
    TlsVnc,
    TlsPlain,
    /// `260`: TLS with X.509 certificates and no further authentication.
    X509None,
    X509Vnc,
    X509Plain,
    Other(u32),
}

impl VeNCryptSubType {
    pub const PLAIN: u32 = 256;
    pub const TLS_NONE: u32 = 257;
    pub const TLS_VNC: u32 = 258;
    pub const TLS_PLAIN: u32 = 259;
    pub const X509_NONE: u32 = 260;
    pub const X509_VNC: u32 = 261;
    pub const X509_PLAIN: u32 = 262;

    /// Returns the wire code for this sub-type.
    pub fn code(self) -> u32 {
        u32::from(self)
    }
}

impl From<u32> for VeNCryptSubType {
    fn from(code: u32) -> Self {
        match code {
            Self::PLAIN => VeNCryptSubType::Plain,
            Self::TLS_NONE => VeNCryptSubType::TlsNone,
            Self::TLS_VNC => VeNCryptSubType::TlsVnc,
            Self::TLS_PLAIN => VeNCryptSubType::TlsPlain,
            Self::X509_NONE => VeNCryptSubType::X509None,
            Self::X509_VNC => VeNCryptSubType::X509Vnc,
            Self::X509_PLAIN => VeNCryptSubType::X509Plain,
            other => VeNCryptSubType::Other(other),
        }
    }
}

impl From<VeNCryptSubType> for u32 {
    fn from(t: VeNCryptSubType) -> Self {
        match t {
            VeNCryptSubType::Plain => VeNCryptSubType::PLAIN,
            VeNCryptSubType::TlsNone => VeNCryptSubType::TLS_NONE,
            VeNCryptSubType::TlsVnc => VeNCryptSubType::TLS_VNC,
            VeNCryptSubType::TlsPlain => VeNCryptSubType::TLS_PLAIN,
            VeNCryptSubType::X509None => VeNCryptSubType::X509_NONE,
            VeNCryptSubType::X509Vnc => VeNCryptSubType::X509_VNC,
            VeNCryptSubType::X509Plain => VeNCryptSubType::X509_PLAIN,
            VeNCryptSubType::Other(code) => code,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
