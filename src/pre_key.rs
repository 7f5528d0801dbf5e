use crate::proto::SignedPreKeyRecordStructure;
use crate::{Error, IdentityKeyPair, X25519PublicKey, X25519Secret};
use prost::Message;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A medium-term signed pre-key as defined in Signal's X3DH protocol.
///
/// Signed pre-keys are signed with the owner's identity key so that an
/// initiator can authenticate them. They are rotated periodically.
#[derive(Clone)]
pub struct SignedPreKeyRecord {
    id: u32,
    timestamp: u64,
    key_pair: X25519Secret,
    signature: Vec<u8>,
}

impl SignedPreKeyRecord {
    /// Creates a new signed pre-key, signed by `identity`.
    pub fn generate(id: u32, timestamp: u64, identity: &IdentityKeyPair) -> Result<Self, Error> {
        let key_pair = X25519Secret::generate()?;
        let signature = identity.sign(key_pair.public_key().as_bytes()).to_vec();

        Ok(Self {
            id,
            timestamp,
            key_pair,
            signature,
        })
    }

    /// Returns the unique identifier for this signed pre-key.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Milliseconds since the epoch at which the key was generated.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Returns the public component of this signed pre-key.
    pub fn public_key(&self) -> X25519PublicKey {
        self.key_pair.public_key()
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub(crate) fn key_pair(&self) -> &X25519Secret {
        &self.key_pair
    }

    pub fn serialize(&self) -> Vec<u8> {
        SignedPreKeyRecordStructure {
            id: self.id,
            public_key: self.public_key().to_bytes().to_vec(),
            private_key: self.key_pair.as_bytes().to_vec(),
            signature: self.signature.clone(),
            timestamp: self.timestamp,
        }
        .encode_to_vec()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        let mut proto = SignedPreKeyRecordStructure::decode(bytes)?;
        let key_pair = X25519Secret::try_from(proto.private_key.as_slice())?;
        proto.private_key.zeroize();

        if proto.signature.len() != 64 {
            return Err(Error::Serde("Invalid signed pre-key signature length".to_string()));
        }

        Ok(Self {
            id: proto.id,
            timestamp: proto.timestamp,
            key_pair,
            signature: proto.signature,
        })
    }
}

impl Zeroize for SignedPreKeyRecord {
    fn zeroize(&mut self) {
        self.key_pair.zeroize();
        self.id = 0;
    }
}

impl ZeroizeOnDrop for SignedPreKeyRecord {}
