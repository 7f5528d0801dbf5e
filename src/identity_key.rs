use crate::{Error, X25519PublicKey, X25519Secret};
use ed25519_dalek::ed25519::SignatureBytes;
use ed25519_dalek::{SecretKey, Signature, Signer, SigningKey, VerifyingKey};
use rand::TryRngCore;
use rand::rngs::OsRng;
use x25519_dalek::SharedSecret;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Generates a cryptographically secure random 32-byte seed.
pub(crate) fn generate_random_seed() -> Result<Box<[u8; 32]>, Error> {
    let mut seed = Box::new([0u8; 32]);
    OsRng
        .try_fill_bytes(seed.as_mut_slice())
        .map_err(|_| Error::Random)?;
    Ok(seed)
}

/// The public half of a long-term identity.
///
/// Carries the X25519 key used in agreement and the Ed25519 key that signs
/// the identity's signed pre-keys. Serialized as `dh (32) || signing (32)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IdentityKey {
    dh_key: X25519PublicKey,
    signing_key: VerifyingKey,
}

impl IdentityKey {
    pub const SERIALIZED_LEN: usize = 64;

    pub fn dh_key(&self) -> &X25519PublicKey {
        &self.dh_key
    }

    pub fn signing_key(&self) -> &VerifyingKey {
        &self.signing_key
    }

    /// Verifies a signature made by the matching [`IdentityKeyPair`].
    pub fn verify_signature(&self, message: &[u8], signature: &[u8]) -> Result<(), Error> {
        let signature: [u8; 64] = signature
            .try_into()
            .map_err(|_| Error::InvalidKey("bad signature length".to_string()))?;
        let signature = Signature::from_bytes(&SignatureBytes::from(signature));
        self.signing_key
            .verify_strict(message, &signature)
            .map_err(|err| Error::InvalidKey(err.to_string()))
    }

    pub fn serialize(&self) -> [u8; 64] {
        let mut bytes = [0u8; 64];
        bytes[0..32].copy_from_slice(self.dh_key.as_bytes());
        bytes[32..64].copy_from_slice(self.signing_key.as_bytes());
        bytes
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != Self::SERIALIZED_LEN {
            return Err(Error::InvalidKey(format!(
                "bad identity key length {}",
                bytes.len()
            )));
        }

        let dh_key = X25519PublicKey::try_from(&bytes[0..32])?;
        let mut signing_bytes = [0u8; 32];
        signing_bytes.copy_from_slice(&bytes[32..64]);
        let signing_key = VerifyingKey::from_bytes(&signing_bytes)
            .map_err(|err| Error::InvalidKey(err.to_string()))?;

        Ok(Self {
            dh_key,
            signing_key,
        })
    }
}

/// Long-term identity key pair that combines signing and key agreement capabilities.
///
/// Both the Ed25519 signing key and the X25519 agreement key are derived from
/// the same 32-byte seed.
#[derive(Clone)]
pub struct IdentityKeyPair {
    signing_key: Box<SigningKey>,
    dh_key: X25519Secret,
}

impl IdentityKeyPair {
    /// Creates a new identity with randomly generated components.
    pub fn generate() -> Result<Self, Error> {
        let seed = generate_random_seed()?;
        let signing_key = Box::new(SigningKey::from(SecretKey::from(*seed)));
        let dh_key = X25519Secret::from(seed);

        Ok(Self {
            signing_key,
            dh_key,
        })
    }

    pub fn identity_key(&self) -> IdentityKey {
        IdentityKey {
            dh_key: self.dh_key.public_key(),
            signing_key: self.signing_key.verifying_key(),
        }
    }

    /// Signs a message using the Ed25519 signing key.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }

    /// Performs Diffie-Hellman key agreement with another party's public key.
    pub(crate) fn dh(&self, public_key: &X25519PublicKey) -> SharedSecret {
        self.dh_key.dh(public_key)
    }

    /// Serializes the private halves: Ed25519 secret (32) then X25519 secret (32).
    pub fn serialize(&self) -> [u8; 64] {
        let mut bytes = [0u8; 64];
        bytes[0..32].copy_from_slice(self.signing_key.as_bytes().as_slice());
        bytes[32..64].copy_from_slice(self.dh_key.as_bytes());
        bytes
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != 64 {
            return Err(Error::InvalidKey(format!(
                "bad identity key pair length {}",
                bytes.len()
            )));
        }

        let mut signing_bytes = Box::new([0u8; 32]);
        signing_bytes.copy_from_slice(&bytes[0..32]);
        let signing_key = Box::new(SigningKey::from_bytes(&signing_bytes));
        signing_bytes.zeroize();

        let dh_key = X25519Secret::try_from(&bytes[32..64])?;

        Ok(Self {
            signing_key,
            dh_key,
        })
    }
}

impl Zeroize for IdentityKeyPair {
    fn zeroize(&mut self) {
        self.dh_key.zeroize();
    }
}

impl ZeroizeOnDrop for IdentityKeyPair {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signing_and_verification() {
        let identity = IdentityKeyPair::generate().unwrap();
        let message = b"This is a test message";

        let signature = identity.sign(message);
        assert!(
            identity
                .identity_key()
                .verify_signature(message, &signature)
                .is_ok()
        );

        let modified_message = b"This is a modified message";
        assert!(
            identity
                .identity_key()
                .verify_signature(modified_message, &signature)
                .is_err()
        );
    }

    #[test]
    fn test_key_pair_serialization() {
        let original = IdentityKeyPair::generate().unwrap();
        let restored = IdentityKeyPair::deserialize(&original.serialize()).unwrap();

        assert_eq!(original.identity_key(), restored.identity_key());
        assert_eq!(original.serialize(), restored.serialize());
    }

    #[test]
    fn test_public_identity_serialization() {
        let identity = IdentityKeyPair::generate().unwrap().identity_key();
        let bytes = identity.serialize();

        assert_eq!(IdentityKey::deserialize(&bytes).unwrap(), identity);
        assert!(IdentityKey::deserialize(&bytes[..63]).is_err());
    }

    #[test]
    fn test_distinct_identities_differ() {
        let a = IdentityKeyPair::generate().unwrap().identity_key();
        let b = IdentityKeyPair::generate().unwrap().identity_key();
        assert_ne!(a, b);
    }
}
