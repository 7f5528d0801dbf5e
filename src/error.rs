use crate::{IdentityKey, ProtocolAddress};

/// Errors that can occur during session and ratchet operations.
#[derive(thiserror::Error, Debug, Clone, Eq, PartialEq)]
pub enum Error {
    /// A cryptographic operation failed.
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),

    /// A protocol rule was violated.
    #[error("Protocol Violation: {0}")]
    Protocol(String),

    /// The message could not be decrypted or authenticated.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// A message with this counter was already decrypted.
    #[error("Received message with old counter: {0}")]
    DuplicateMessage(u32),

    /// The message was produced by an unsupported protocol version.
    #[error("Unsupported message version: {0}")]
    LegacyMessage(u8),

    /// No usable session exists for the address.
    #[error("No session for {0}")]
    NoSession(ProtocolAddress),

    /// A referenced pre-key or signed pre-key does not exist.
    #[error("No such key id: {0}")]
    InvalidKeyId(u32),

    /// Key material was malformed or failed verification.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// The remote identity does not match the trusted one.
    #[error("Untrusted identity key for {address}")]
    UntrustedIdentity {
        /// The address whose identity changed.
        address: ProtocolAddress,
        /// The offending identity key.
        identity: IdentityKey,
    },

    /// Pre-key operation failed.
    #[error("Pre-key error: {0}")]
    PreKey(String),

    /// Random number generation failed.
    #[error("Random number generation failed")]
    Random,

    /// Serialization or deserialization failed.
    #[error("Serialization/deserialization failed: {0}")]
    Serde(String),

    /// The backing store failed.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<aes_gcm_siv::Error> for Error {
    fn from(value: aes_gcm_siv::Error) -> Self {
        Self::Crypto(value.to_string())
    }
}

impl From<prost::DecodeError> for Error {
    fn from(value: prost::DecodeError) -> Self {
        Self::Serde(value.to_string())
    }
}
