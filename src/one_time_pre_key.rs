use crate::proto::PreKeyRecordStructure;
use crate::{Error, X25519PublicKey, X25519Secret};
use prost::Message;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Pre-key ids live in a 24-bit space on the wire.
pub const PRE_KEY_MEDIUM_MAX_VALUE: u32 = 0xFF_FFFF;

/// A one-time pre-key as defined in Signal's X3DH protocol.
///
/// One-time pre-keys provide additional forward secrecy for the first message
/// of a session. Each key is consumed at most once and then removed from the
/// store.
#[derive(Clone)]
pub struct PreKeyRecord {
    id: u32,
    key_pair: X25519Secret,
}

impl PreKeyRecord {
    /// Creates a new one-time pre-key with the given ID.
    pub fn generate(id: u32) -> Result<Self, Error> {
        Ok(Self {
            id,
            key_pair: X25519Secret::generate()?,
        })
    }

    /// Returns the unique identifier for this pre-key.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Returns the public component of this pre-key.
    pub fn public_key(&self) -> X25519PublicKey {
        self.key_pair.public_key()
    }

    pub(crate) fn key_pair(&self) -> &X25519Secret {
        &self.key_pair
    }

    pub fn serialize(&self) -> Vec<u8> {
        PreKeyRecordStructure {
            id: self.id,
            public_key: self.public_key().to_bytes().to_vec(),
            private_key: self.key_pair.as_bytes().to_vec(),
        }
        .encode_to_vec()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        let mut proto = PreKeyRecordStructure::decode(bytes)?;
        let key_pair = X25519Secret::try_from(proto.private_key.as_slice())?;
        proto.private_key.zeroize();

        Ok(Self {
            id: proto.id,
            key_pair,
        })
    }
}

impl Zeroize for PreKeyRecord {
    fn zeroize(&mut self) {
        self.key_pair.zeroize();
        self.id = 0;
    }
}

impl ZeroizeOnDrop for PreKeyRecord {}
