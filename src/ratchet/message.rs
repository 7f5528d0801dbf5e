use crate::proto::{PreKeyWhisperMessageStructure, WhisperMessageStructure};
use crate::{Error, IdentityKey, X25519PublicKey};
use hmac::{Hmac, Mac};
use prost::Message;
use sha2::Sha256;

pub const CURRENT_VERSION: u8 = 3;

const MAC_LENGTH: usize = 8;

type HmacSha256 = Hmac<Sha256>;

fn version_byte(version: u8) -> u8 {
    (version << 4) | CURRENT_VERSION
}

fn check_version(byte: u8) -> Result<u8, Error> {
    let version = byte >> 4;
    if version < CURRENT_VERSION {
        return Err(Error::LegacyMessage(version));
    }
    if version > CURRENT_VERSION {
        return Err(Error::InvalidMessage(format!("Unknown version: {version}")));
    }
    Ok(version)
}

/// Wire type tag carried next to each per-device ciphertext.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CiphertextType {
    Whisper = 1,
    PreKey = 3,
}

impl From<CiphertextType> for u32 {
    fn from(value: CiphertextType) -> Self {
        value as u32
    }
}

/// A ratcheted message: `version || protobuf || mac[8]`.
#[derive(Clone, Debug)]
pub struct WhisperMessage {
    message_version: u8,
    sender_ratchet_key: X25519PublicKey,
    counter: u32,
    previous_counter: u32,
    ciphertext: Vec<u8>,
    serialized: Vec<u8>,
}

impl WhisperMessage {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        message_version: u8,
        mac_key: &[u8; 32],
        sender_ratchet_key: X25519PublicKey,
        counter: u32,
        previous_counter: u32,
        ciphertext: Vec<u8>,
        sender_identity: &IdentityKey,
        receiver_identity: &IdentityKey,
    ) -> Result<Self, Error> {
        let message = WhisperMessageStructure {
            ratchet_key: sender_ratchet_key.to_bytes().to_vec(),
            counter,
            previous_counter,
            ciphertext: ciphertext.clone(),
        }
        .encode_to_vec();

        let mut serialized = Vec::with_capacity(1 + message.len() + MAC_LENGTH);
        serialized.push(version_byte(message_version));
        serialized.extend_from_slice(&message);

        let mac = Self::compute_mac(sender_identity, receiver_identity, mac_key, &serialized)?;
        serialized.extend_from_slice(&mac);

        Ok(Self {
            message_version,
            sender_ratchet_key,
            counter,
            previous_counter,
            ciphertext,
            serialized,
        })
    }

    pub fn message_version(&self) -> u8 {
        self.message_version
    }

    pub fn sender_ratchet_key(&self) -> &X25519PublicKey {
        &self.sender_ratchet_key
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn previous_counter(&self) -> u32 {
        self.previous_counter
    }

    pub fn body(&self) -> &[u8] {
        &self.ciphertext
    }

    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }

    /// Checks the truncated MAC in constant time.
    pub(crate) fn verify_mac(
        &self,
        sender_identity: &IdentityKey,
        receiver_identity: &IdentityKey,
        mac_key: &[u8; 32],
    ) -> Result<(), Error> {
        let split = self.serialized.len() - MAC_LENGTH;
        let (content, their_mac) = self.serialized.split_at(split);

        let mut mac = <HmacSha256 as Mac>::new_from_slice(mac_key)
            .map_err(|_| Error::Crypto("HMAC initialization failed".to_string()))?;
        mac.update(&sender_identity.serialize());
        mac.update(&receiver_identity.serialize());
        mac.update(content);

        mac.verify_truncated_left(their_mac)
            .map_err(|_| Error::InvalidMessage("Bad Mac!".to_string()))
    }

    fn compute_mac(
        sender_identity: &IdentityKey,
        receiver_identity: &IdentityKey,
        mac_key: &[u8; 32],
        content: &[u8],
    ) -> Result<[u8; MAC_LENGTH], Error> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(mac_key)
            .map_err(|_| Error::Crypto("HMAC initialization failed".to_string()))?;
        mac.update(&sender_identity.serialize());
        mac.update(&receiver_identity.serialize());
        mac.update(content);

        let mut truncated = [0u8; MAC_LENGTH];
        truncated.copy_from_slice(&mac.finalize().into_bytes()[..MAC_LENGTH]);
        Ok(truncated)
    }
}

impl TryFrom<&[u8]> for WhisperMessage {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() <= MAC_LENGTH {
            return Err(Error::InvalidMessage("Message too short".to_string()));
        }

        let message_version = check_version(bytes[0])?;
        let proto = WhisperMessageStructure::decode(&bytes[1..bytes.len() - MAC_LENGTH])
            .map_err(|err| Error::InvalidMessage(err.to_string()))?;

        if proto.ciphertext.is_empty() {
            return Err(Error::InvalidMessage("Incomplete message".to_string()));
        }

        let sender_ratchet_key = X25519PublicKey::try_from(proto.ratchet_key.as_slice())
            .map_err(|err| Error::InvalidMessage(err.to_string()))?;

        Ok(Self {
            message_version,
            sender_ratchet_key,
            counter: proto.counter,
            previous_counter: proto.previous_counter,
            ciphertext: proto.ciphertext,
            serialized: bytes.to_vec(),
        })
    }
}

/// The first message(s) of a session, carrying the X3DH handshake values
/// the responder needs to build its side of the session.
#[derive(Clone, Debug)]
pub struct PreKeyWhisperMessage {
    message_version: u8,
    registration_id: u32,
    pre_key_id: Option<u32>,
    signed_pre_key_id: u32,
    base_key: X25519PublicKey,
    identity_key: IdentityKey,
    message: WhisperMessage,
    serialized: Vec<u8>,
}

impl PreKeyWhisperMessage {
    pub(crate) fn new(
        message_version: u8,
        registration_id: u32,
        pre_key_id: Option<u32>,
        signed_pre_key_id: u32,
        base_key: X25519PublicKey,
        identity_key: IdentityKey,
        message: WhisperMessage,
    ) -> Self {
        let proto = PreKeyWhisperMessageStructure {
            pre_key_id,
            base_key: base_key.to_bytes().to_vec(),
            identity_key: identity_key.serialize().to_vec(),
            message: message.serialized().to_vec(),
            registration_id,
            signed_pre_key_id,
        }
        .encode_to_vec();

        let mut serialized = Vec::with_capacity(1 + proto.len());
        serialized.push(version_byte(message_version));
        serialized.extend_from_slice(&proto);

        Self {
            message_version,
            registration_id,
            pre_key_id,
            signed_pre_key_id,
            base_key,
            identity_key,
            message,
            serialized,
        }
    }

    pub fn message_version(&self) -> u8 {
        self.message_version
    }

    pub fn registration_id(&self) -> u32 {
        self.registration_id
    }

    pub fn pre_key_id(&self) -> Option<u32> {
        self.pre_key_id
    }

    pub fn signed_pre_key_id(&self) -> u32 {
        self.signed_pre_key_id
    }

    pub fn base_key(&self) -> &X25519PublicKey {
        &self.base_key
    }

    pub fn identity_key(&self) -> &IdentityKey {
        &self.identity_key
    }

    pub fn message(&self) -> &WhisperMessage {
        &self.message
    }

    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }
}

impl TryFrom<&[u8]> for PreKeyWhisperMessage {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let Some((&version, body)) = bytes.split_first() else {
            return Err(Error::InvalidMessage("Empty message".to_string()));
        };

        let message_version = check_version(version)?;
        let proto = PreKeyWhisperMessageStructure::decode(body)
            .map_err(|err| Error::InvalidMessage(err.to_string()))?;

        let base_key = X25519PublicKey::try_from(proto.base_key.as_slice())
            .map_err(|err| Error::InvalidMessage(err.to_string()))?;
        let identity_key = IdentityKey::deserialize(&proto.identity_key)
            .map_err(|err| Error::InvalidMessage(err.to_string()))?;
        let message = WhisperMessage::try_from(proto.message.as_slice())?;

        Ok(Self {
            message_version,
            registration_id: proto.registration_id,
            pre_key_id: proto.pre_key_id,
            signed_pre_key_id: proto.signed_pre_key_id,
            base_key,
            identity_key,
            message,
            serialized: bytes.to_vec(),
        })
    }
}

/// Output of a session encryption.
#[derive(Clone, Debug)]
pub enum CiphertextMessage {
    Whisper(WhisperMessage),
    PreKey(PreKeyWhisperMessage),
}

impl CiphertextMessage {
    pub fn message_type(&self) -> CiphertextType {
        match self {
            CiphertextMessage::Whisper(_) => CiphertextType::Whisper,
            CiphertextMessage::PreKey(_) => CiphertextType::PreKey,
        }
    }

    pub fn serialize(&self) -> &[u8] {
        match self {
            CiphertextMessage::Whisper(message) => message.serialized(),
            CiphertextMessage::PreKey(message) => message.serialized(),
        }
    }
}
