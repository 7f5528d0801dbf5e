//! JSON entities exchanged with the message server, and the transport
//! capabilities the dispatcher and receiver are written against.

mod error;
mod transport;

pub use error::PushError;
pub use transport::{KeyTransport, MessagePipe, MessageTransport, ProgressListener, ReceiveTransport};

use crate::{
    Error, IdentityKey, PreKeyBundle, PreKeyRecord, ServiceAddress, SignedPreKeyRecord,
    X25519PublicKey,
};
use serde::{Deserialize, Serialize};

/// Standard base64 for byte fields.
mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }

    pub(super) mod option {
        use super::STANDARD;
        use base64::Engine;
        use serde::{Deserialize, Deserializer, Serializer};

        pub(crate) fn serialize<S: Serializer>(
            bytes: &Option<Vec<u8>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match bytes {
                Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
                None => serializer.serialize_none(),
            }
        }

        pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Vec<u8>>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|encoded| STANDARD.decode(encoded.as_bytes()))
                .transpose()
                .map_err(serde::de::Error::custom)
        }
    }
}

/// Ciphertext for one device of the destination.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingPushMessage {
    /// [`CiphertextType`](crate::CiphertextType) wire value.
    #[serde(rename = "type")]
    pub message_type: u32,
    pub destination_device_id: u32,
    pub destination_registration_id: u32,
    #[serde(with = "base64_bytes")]
    pub body: Vec<u8>,
}

/// Every per-device ciphertext of one send to one account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingPushMessageList {
    pub destination: String,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay: Option<String>,
    pub messages: Vec<OutgoingPushMessage>,
}

impl OutgoingPushMessageList {
    pub fn device_ids(&self) -> Vec<u32> {
        self.messages
            .iter()
            .map(|message| message.destination_device_id)
            .collect()
    }
}

/// Body of a 409: our device list for the destination is out of date.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MismatchedDevices {
    pub missing_devices: Vec<u32>,
    pub extra_devices: Vec<u32>,
}

/// Body of a 410: sessions with these devices were re-registered.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StaleDevices {
    pub stale_devices: Vec<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SendMessageResponse {
    /// The sender has other devices that should see a transcript of this send.
    pub needs_sync: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreKeyEntity {
    pub key_id: u32,
    #[serde(with = "base64_bytes")]
    pub public_key: Vec<u8>,
}

impl From<&PreKeyRecord> for PreKeyEntity {
    fn from(record: &PreKeyRecord) -> Self {
        Self {
            key_id: record.id(),
            public_key: record.public_key().to_bytes().to_vec(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedPreKeyEntity {
    pub key_id: u32,
    #[serde(with = "base64_bytes")]
    pub public_key: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub signature: Vec<u8>,
}

impl From<&SignedPreKeyRecord> for SignedPreKeyEntity {
    fn from(record: &SignedPreKeyRecord) -> Self {
        Self {
            key_id: record.id(),
            public_key: record.public_key().to_bytes().to_vec(),
            signature: record.signature().to_vec(),
        }
    }
}

/// Local key material published to the server in one registration call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreKeyState {
    #[serde(with = "base64_bytes")]
    pub identity_key: Vec<u8>,
    pub last_resort_key: PreKeyEntity,
    pub signed_pre_key: SignedPreKeyEntity,
    pub pre_keys: Vec<PreKeyEntity>,
}

impl PreKeyState {
    pub fn new(
        identity_key: &IdentityKey,
        last_resort_key: &PreKeyRecord,
        signed_pre_key: &SignedPreKeyRecord,
        pre_keys: &[PreKeyRecord],
    ) -> Self {
        Self {
            identity_key: identity_key.serialize().to_vec(),
            last_resort_key: last_resort_key.into(),
            signed_pre_key: signed_pre_key.into(),
            pre_keys: pre_keys.iter().map(PreKeyEntity::from).collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreKeyResponseItem {
    pub device_id: u32,
    pub registration_id: u32,
    #[serde(default)]
    pub signed_pre_key: Option<SignedPreKeyEntity>,
    #[serde(default)]
    pub pre_key: Option<PreKeyEntity>,
}

/// The server's answer to a key fetch: one identity, one entry per device.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreKeyResponse {
    #[serde(with = "base64_bytes")]
    pub identity_key: Vec<u8>,
    pub devices: Vec<PreKeyResponseItem>,
}

impl PreKeyResponse {
    /// Converts the response into one bundle per device.
    pub fn into_bundles(self) -> Result<Vec<PreKeyBundle>, Error> {
        let identity_key = IdentityKey::deserialize(&self.identity_key)?;

        self.devices
            .into_iter()
            .map(|device| -> Result<PreKeyBundle, Error> {
                let signed_pre_key = device.signed_pre_key.ok_or_else(|| {
                    Error::InvalidKey(format!("No signed pre-key for device {}", device.device_id))
                })?;
                let pre_key = device
                    .pre_key
                    .map(|pre_key| {
                        X25519PublicKey::try_from(pre_key.public_key.as_slice())
                            .map(|public_key| (pre_key.key_id, public_key))
                    })
                    .transpose()?;

                Ok(PreKeyBundle::new(
                    device.registration_id,
                    device.device_id,
                    pre_key,
                    (
                        signed_pre_key.key_id,
                        X25519PublicKey::try_from(signed_pre_key.public_key.as_slice())?,
                    ),
                    signed_pre_key.signature,
                    identity_key,
                ))
            })
            .collect()
    }
}

/// Kind of a server-delivered envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum EnvelopeType {
    Unknown,
    Ciphertext,
    KeyExchange,
    PreKeyBundle,
    Receipt,
}

impl TryFrom<u32> for EnvelopeType {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(EnvelopeType::Unknown),
            1 => Ok(EnvelopeType::Ciphertext),
            2 => Ok(EnvelopeType::KeyExchange),
            3 => Ok(EnvelopeType::PreKeyBundle),
            5 => Ok(EnvelopeType::Receipt),
            other => Err(format!("unknown envelope type {other}")),
        }
    }
}

impl From<EnvelopeType> for u32 {
    fn from(value: EnvelopeType) -> Self {
        match value {
            EnvelopeType::Unknown => 0,
            EnvelopeType::Ciphertext => 1,
            EnvelopeType::KeyExchange => 2,
            EnvelopeType::PreKeyBundle => 3,
            EnvelopeType::Receipt => 5,
        }
    }
}

/// One message as delivered by the server, pulled and acknowledged on its own.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub envelope_type: EnvelopeType,
    pub source: String,
    pub source_device: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay: Option<String>,
    pub timestamp: u64,
    #[serde(default, with = "base64_bytes::option", skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<u8>>,
}

impl Envelope {
    pub fn source_address(&self) -> ServiceAddress {
        match &self.relay {
            Some(relay) => ServiceAddress::with_relay(self.source.clone(), relay.clone()),
            None => ServiceAddress::new(self.source.clone()),
        }
    }

    pub fn is_receipt(&self) -> bool {
        self.envelope_type == EnvelopeType::Receipt
    }

    pub fn is_pre_key_bundle(&self) -> bool {
        self.envelope_type == EnvelopeType::PreKeyBundle
    }
}
