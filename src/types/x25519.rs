use crate::Error;
use x25519_dalek::{PublicKey, SharedSecret, StaticSecret};
use zeroize::Zeroize;

/// A Curve25519 public key used for agreement and as a ratchet key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct X25519PublicKey(PublicKey);

impl X25519PublicKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }
}

impl From<[u8; 32]> for X25519PublicKey {
    fn from(bytes: [u8; 32]) -> Self {
        Self(PublicKey::from(bytes))
    }
}

impl TryFrom<&[u8]> for X25519PublicKey {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::InvalidKey(format!("bad public key length {}", bytes.len())))?;
        Ok(Self::from(bytes))
    }
}

impl AsRef<PublicKey> for X25519PublicKey {
    fn as_ref(&self) -> &PublicKey {
        &self.0
    }
}

/// A Curve25519 private key; its public half is derived on demand.
#[derive(Clone)]
pub struct X25519Secret(StaticSecret);

impl X25519Secret {
    /// Generates a fresh key pair from the OS RNG.
    pub fn generate() -> Result<Self, Error> {
        let seed = crate::identity_key::generate_random_seed()?;
        Ok(Self::from(seed))
    }

    pub(crate) fn dh(&self, public_key: &X25519PublicKey) -> SharedSecret {
        self.0.diffie_hellman(public_key.as_ref())
    }

    pub fn public_key(&self) -> X25519PublicKey {
        X25519PublicKey(PublicKey::from(&self.0))
    }

    pub(crate) fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}

impl From<[u8; 32]> for X25519Secret {
    fn from(bytes: [u8; 32]) -> Self {
        Self(StaticSecret::from(bytes))
    }
}

impl From<Box<[u8; 32]>> for X25519Secret {
    fn from(mut bytes: Box<[u8; 32]>) -> Self {
        let secret = StaticSecret::from(*bytes);
        bytes.zeroize();
        Self(secret)
    }
}

impl TryFrom<&[u8]> for X25519Secret {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let mut key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::InvalidKey(format!("bad private key length {}", bytes.len())))?;
        let secret = Self::from(key);
        key.zeroize();
        Ok(secret)
    }
}

impl Zeroize for X25519Secret {
    fn zeroize(&mut self) {
        self.0.zeroize()
    }
}
