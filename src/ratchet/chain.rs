use crate::Error;
use crate::proto::{ChainKeyStructure, MessageKeyStructure};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha256 = Hmac<Sha256>;

const MESSAGE_KEY_SEED: u8 = 0x01;
const CHAIN_KEY_SEED: u8 = 0x02;
const MESSAGE_KEYS_INFO: &[u8] = b"Herald-MessageKeys";

/// A symmetric ratchet chain key together with its position in the chain.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ChainKey {
    key: Box<[u8; 32]>,
    index: u32,
}

impl ChainKey {
    pub(crate) fn new(key: [u8; 32], index: u32) -> Self {
        Self {
            key: Box::new(key),
            index,
        }
    }

    pub fn key(&self) -> &[u8; 32] {
        &self.key
    }

    /// Counter of the next message key this chain will produce.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Advances the chain by one step.
    pub fn next(&self) -> Result<ChainKey, Error> {
        let next = self.derive(CHAIN_KEY_SEED)?;
        Ok(ChainKey::new(next, self.index.wrapping_add(1)))
    }

    /// Derives the message keys for the current index without advancing.
    pub fn message_keys(&self) -> Result<MessageKeys, Error> {
        let mut seed = self.derive(MESSAGE_KEY_SEED)?;
        let hkdf = Hkdf::<Sha256>::new(None, &seed);
        seed.zeroize();

        let mut material = [0u8; 76];
        hkdf.expand(MESSAGE_KEYS_INFO, &mut material)
            .map_err(|_| Error::Crypto("HKDF expansion failed for message keys".to_string()))?;

        let mut keys = MessageKeys {
            cipher_key: [0u8; 32],
            mac_key: [0u8; 32],
            nonce: [0u8; 12],
            counter: self.index,
        };
        keys.cipher_key.copy_from_slice(&material[0..32]);
        keys.mac_key.copy_from_slice(&material[32..64]);
        keys.nonce.copy_from_slice(&material[64..76]);
        material.zeroize();

        Ok(keys)
    }

    fn derive(&self, seed: u8) -> Result<[u8; 32], Error> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(self.key.as_slice())
            .map_err(|_| Error::Crypto("HMAC initialization failed".to_string()))?;
        mac.update(&[seed]);

        let mut output = [0u8; 32];
        output.copy_from_slice(&mac.finalize().into_bytes());
        Ok(output)
    }

    pub(crate) fn to_proto(&self) -> ChainKeyStructure {
        ChainKeyStructure {
            index: self.index,
            key: self.key.to_vec(),
        }
    }

    pub(crate) fn from_proto(proto: &ChainKeyStructure) -> Result<Self, Error> {
        let key: [u8; 32] = proto
            .key
            .as_slice()
            .try_into()
            .map_err(|_| Error::Serde("bad chain key length".to_string()))?;
        Ok(Self::new(key, proto.index))
    }
}

/// Per-message key material: AEAD key, MAC key and nonce for one counter.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MessageKeys {
    cipher_key: [u8; 32],
    mac_key: [u8; 32],
    nonce: [u8; 12],
    counter: u32,
}

impl MessageKeys {
    pub fn cipher_key(&self) -> &[u8; 32] {
        &self.cipher_key
    }

    pub fn mac_key(&self) -> &[u8; 32] {
        &self.mac_key
    }

    pub fn nonce(&self) -> &[u8; 12] {
        &self.nonce
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub(crate) fn to_proto(&self) -> MessageKeyStructure {
        MessageKeyStructure {
            index: self.counter,
            cipher_key: self.cipher_key.to_vec(),
            mac_key: self.mac_key.to_vec(),
            nonce: self.nonce.to_vec(),
        }
    }

    pub(crate) fn from_proto(proto: &MessageKeyStructure) -> Result<Self, Error> {
        let bad_length = |_| Error::Serde("bad message key length".to_string());

        Ok(Self {
            cipher_key: proto.cipher_key.as_slice().try_into().map_err(bad_length)?,
            mac_key: proto.mac_key.as_slice().try_into().map_err(bad_length)?,
            nonce: proto.nonce.as_slice().try_into().map_err(bad_length)?,
            counter: proto.index,
        })
    }
}
