//! Protocol module containing RFB handshake types and the wire helpers.

pub mod security;
pub mod version;
pub mod wire;

pub use security::{SecurityType, VeNCryptSubType};
pub use version::{ProtocolVersion, VersionError, BANNER_LEN};
pub use wire::WireError;
