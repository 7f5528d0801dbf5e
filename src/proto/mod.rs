//! Protocol Buffers schemas for persisted records and wire messages.
//!
//! Tags are part of the storage format: never renumber a field.

use prost::Message;

#[derive(Clone, PartialEq, Message)]
pub struct ChainKeyStructure {
    #[prost(uint32, tag = "1")]
    pub index: u32,
    #[prost(bytes = "vec", tag = "2")]
    pub key: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct MessageKeyStructure {
    #[prost(uint32, tag = "1")]
    pub index: u32,
    #[prost(bytes = "vec", tag = "2")]
    pub cipher_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub mac_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub nonce: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ChainStructure {
    #[prost(bytes = "vec", tag = "1")]
    pub sender_ratchet_key: Vec<u8>,
    /// Only present on the sending chain.
    #[prost(bytes = "vec", tag = "2")]
    pub sender_ratchet_key_private: Vec<u8>,
    #[prost(message, optional, tag = "3")]
    pub chain_key: Option<ChainKeyStructure>,
    #[prost(message, repeated, tag = "4")]
    pub message_keys: Vec<MessageKeyStructure>,
}

#[derive(Clone, PartialEq, Message)]
pub struct PendingPreKeyStructure {
    #[prost(uint32, optional, tag = "1")]
    pub pre_key_id: Option<u32>,
    #[prost(bytes = "vec", tag = "2")]
    pub base_key: Vec<u8>,
    #[prost(uint32, tag = "3")]
    pub signed_pre_key_id: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct SessionStructure {
    #[prost(uint32, tag = "1")]
    pub session_version: u32,
    #[prost(bytes = "vec", tag = "2")]
    pub local_identity_public: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub remote_identity_public: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub root_key: Vec<u8>,
    #[prost(uint32, tag = "5")]
    pub previous_counter: u32,
    #[prost(message, optional, tag = "6")]
    pub sender_chain: Option<ChainStructure>,
    #[prost(message, repeated, tag = "7")]
    pub receiver_chains: Vec<ChainStructure>,
    #[prost(message, optional, tag = "9")]
    pub pending_pre_key: Option<PendingPreKeyStructure>,
    #[prost(uint32, tag = "10")]
    pub remote_registration_id: u32,
    #[prost(uint32, tag = "11")]
    pub local_registration_id: u32,
    #[prost(bytes = "vec", tag = "13")]
    pub alice_base_key: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct RecordStructure {
    #[prost(message, optional, tag = "1")]
    pub current_session: Option<SessionStructure>,
    #[prost(message, repeated, tag = "2")]
    pub previous_sessions: Vec<SessionStructure>,
}

#[derive(Clone, PartialEq, Message)]
pub struct PreKeyRecordStructure {
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(bytes = "vec", tag = "2")]
    pub public_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub private_key: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SignedPreKeyRecordStructure {
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(bytes = "vec", tag = "2")]
    pub public_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub private_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub signature: Vec<u8>,
    #[prost(fixed64, tag = "5")]
    pub timestamp: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct IdentityKeyPairStructure {
    #[prost(bytes = "vec", tag = "1")]
    pub public_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub private_key: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct WhisperMessageStructure {
    #[prost(bytes = "vec", tag = "1")]
    pub ratchet_key: Vec<u8>,
    #[prost(uint32, tag = "2")]
    pub counter: u32,
    #[prost(uint32, tag = "3")]
    pub previous_counter: u32,
    #[prost(bytes = "vec", tag = "4")]
    pub ciphertext: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct PreKeyWhisperMessageStructure {
    #[prost(uint32, optional, tag = "1")]
    pub pre_key_id: Option<u32>,
    #[prost(bytes = "vec", tag = "2")]
    pub base_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub identity_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub message: Vec<u8>,
    #[prost(uint32, tag = "5")]
    pub registration_id: u32,
    #[prost(uint32, tag = "6")]
    pub signed_pre_key_id: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct AttachmentPointerStructure {
    #[prost(fixed64, tag = "1")]
    pub id: u64,
    #[prost(string, tag = "2")]
    pub content_type: String,
    #[prost(bytes = "vec", tag = "3")]
    pub key: Vec<u8>,
    #[prost(uint32, optional, tag = "4")]
    pub size: Option<u32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct DataMessageStructure {
    #[prost(string, optional, tag = "1")]
    pub body: Option<String>,
    #[prost(message, repeated, tag = "2")]
    pub attachments: Vec<AttachmentPointerStructure>,
    #[prost(uint32, optional, tag = "4")]
    pub flags: Option<u32>,
    #[prost(uint64, optional, tag = "7")]
    pub timestamp: Option<u64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SentStructure {
    #[prost(string, optional, tag = "1")]
    pub destination: Option<String>,
    #[prost(uint64, optional, tag = "2")]
    pub timestamp: Option<u64>,
    #[prost(message, optional, tag = "3")]
    pub message: Option<DataMessageStructure>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SyncMessageStructure {
    #[prost(message, optional, tag = "1")]
    pub sent: Option<SentStructure>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ContentStructure {
    #[prost(message, optional, tag = "1")]
    pub data_message: Option<DataMessageStructure>,
    #[prost(message, optional, tag = "2")]
    pub sync_message: Option<SyncMessageStructure>,
}

