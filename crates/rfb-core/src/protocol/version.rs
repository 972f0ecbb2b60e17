//! RFB protocol version banner.
//!
//! Both peers open an RFB session by sending exactly 12 ASCII bytes:
//!
//! ```text
//! "RFB 003.008\n"
//!  ^^^^ ^^^ ^^^^
//!  |    |   |  └ line feed
//!  |    |   └ minor version, three zero-padded digits
//!  |    └ major version, three zero-padded digits
//!  └ literal "RFB "
//! ```
//!
//! The proxy only supports 3.8, but the parser accepts any well-formed
//! banner so that callers can report *which* version the peer asked for.

use std::fmt;

use thiserror::Error;

/// Length of an RFB version banner in bytes.
pub const BANNER_LEN: usize = 12;

/// Errors produced while parsing a version banner.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VersionError {
    /// The banner was not exactly [`BANNER_LEN`] bytes long.
    #[error("version banner must be {BANNER_LEN} bytes, got {0}")]
    WrongLength(usize),

    /// The banner did not match the `"RFB xxx.yyy\n"` layout.
    #[error("malformed version banner {0:?}")]
    Malformed(String),
}

/// A parsed RFB protocol version, e.g. `3.8`.
///
/// # Examples
///
/// ```rust
/// use rfb_core::ProtocolVersion;
///
/// let v = ProtocolVersion::parse(b"RFB 003.008\n").unwrap();
/// assert_eq!(v, ProtocolVersion::V3_8);
/// assert_eq!(&v.to_banner(), b"RFB 003.008\n");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
}

impl ProtocolVersion {
    /// RFB 3.8, the only version the security proxy speaks.
    pub const V3_8: ProtocolVersion = ProtocolVersion { major: 3, minor: 8 };

    /// Creates a version from its numeric parts.
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// Parses a 12-byte version banner.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError::WrongLength`] if `banner` is not 12 bytes, and
    /// [`VersionError::Malformed`] if the prefix, separator, terminator, or
    /// digits do not match the RFB layout.
    pub fn parse(banner: &[u8]) -> Result<Self, VersionError> {
        if banner.len() != BANNER_LEN {
            return Err(VersionError::WrongLength(banner.len()));
        }

        let malformed = || VersionError::Malformed(String::from_utf8_lossy(banner).into_owned());

        if &banner[0..4] != b"RFB " || banner[7] != b'.' || banner[11] != b'\n' {
            return Err(malformed());
        }

        let major = parse_three_digits(&banner[4..7]).ok_or_else(malformed)?;
        let minor = parse_three_digits(&banner[8..11]).ok_or_else(malformed)?;
        Ok(Self { major, minor })
    }

    /// Formats the version as the 12-byte banner sent on the wire.
    ///
    /// Components above 999 cannot be represented and are clamped.
    pub fn to_banner(self) -> [u8; BANNER_LEN] {
        let text = format!("RFB {:03}.{:03}\n", self.major.min(999), self.minor.min(999));
        let mut out = [0u8; BANNER_LEN];
        out.copy_from_slice(text.as_bytes());
        out
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

fn parse_three_digits(digits: &[u8]) -> Option<u16> {
    digits.iter().try_fold(0u16, |acc, &b| {
        b.is_ascii_digit().then(|| acc * 10 + u16::from(b - b'0'))
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
