mod chain;
mod message;

pub use crate::ratchet::chain::{ChainKey, MessageKeys};
pub use crate::ratchet::message::{
    CURRENT_VERSION, CiphertextMessage, CiphertextType, PreKeyWhisperMessage, WhisperMessage,
};
use crate::{Error, X25519PublicKey, X25519Secret};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

const RATCHET_INFO: &[u8] = b"Herald-Ratchet";

/// The root of the Double Ratchet key hierarchy.
///
/// Every DH ratchet step mixes a fresh agreement into the root key and splits
/// off a new chain key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RootKey {
    key: Box<[u8; 32]>,
}

impl RootKey {
    pub(crate) fn new(key: [u8; 32]) -> Self {
        Self { key: Box::new(key) }
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }

    /// Performs one root ratchet step.
    ///
    /// Returns the next root key and the chain key for the ratchet pair
    /// `(their_ratchet_key, our_ratchet_key)`.
    pub(crate) fn create_chain(
        &self,
        their_ratchet_key: &X25519PublicKey,
        our_ratchet_key: &X25519Secret,
    ) -> Result<(RootKey, ChainKey), Error> {
        let shared_secret = our_ratchet_key.dh(their_ratchet_key);
        let hkdf = Hkdf::<Sha256>::new(Some(self.key.as_slice()), shared_secret.as_bytes());

        let mut derived = [0u8; 64];
        hkdf.expand(RATCHET_INFO, &mut derived)
            .map_err(|_| Error::Crypto("HKDF expansion failed for root key".to_string()))?;

        let mut root = [0u8; 32];
        let mut chain = [0u8; 32];
        root.copy_from_slice(&derived[0..32]);
        chain.copy_from_slice(&derived[32..64]);
        derived.zeroize();

        Ok((RootKey::new(root), ChainKey::new(chain, 0)))
    }
}

impl TryFrom<&[u8]> for RootKey {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::Serde(format!("bad root key length {}", bytes.len())))?;
        Ok(Self::new(key))
    }
}
