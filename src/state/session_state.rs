use crate::proto::{ChainStructure, PendingPreKeyStructure, SessionStructure};
use crate::ratchet::{ChainKey, MessageKeys, RootKey};
use crate::{Error, IdentityKey, X25519PublicKey, X25519Secret};
use prost::Message;
use std::collections::VecDeque;
use zeroize::Zeroize;

/// Receiver chains kept per session; the oldest is evicted first.
pub const MAX_RECEIVER_CHAINS: usize = 5;

/// Skipped message keys cached per receiver chain; the oldest is evicted first.
pub const MAX_MESSAGE_KEYS: usize = 2000;

#[derive(Clone)]
struct SenderChain {
    ratchet_key: X25519Secret,
    chain_key: ChainKey,
}

#[derive(Clone)]
struct ReceiverChain {
    sender_ratchet_key: X25519PublicKey,
    chain_key: ChainKey,
    message_keys: VecDeque<MessageKeys>,
}

/// Handshake values an initiator repeats in every outgoing message until the
/// responder has answered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingPreKey {
    pre_key_id: Option<u32>,
    signed_pre_key_id: u32,
    base_key: X25519PublicKey,
}

impl PendingPreKey {
    pub fn pre_key_id(&self) -> Option<u32> {
        self.pre_key_id
    }

    pub fn signed_pre_key_id(&self) -> u32 {
        self.signed_pre_key_id
    }

    pub fn base_key(&self) -> &X25519PublicKey {
        &self.base_key
    }
}

/// Ratchet state of one session with one remote device.
///
/// Holds the root key, the sending chain, a bounded list of receiving chains
/// (looked up by the remote ratchet key) and, per receiving chain, a bounded
/// cache of skipped message keys for late arrivals.
#[derive(Clone)]
pub struct SessionState {
    session_version: u32,
    local_identity: IdentityKey,
    remote_identity: IdentityKey,
    root_key: RootKey,
    previous_counter: u32,
    sender_chain: Option<SenderChain>,
    receiver_chains: VecDeque<ReceiverChain>,
    pending_pre_key: Option<PendingPreKey>,
    remote_registration_id: u32,
    local_registration_id: u32,
    alice_base_key: X25519PublicKey,
}

impl SessionState {
    pub(crate) fn new(
        session_version: u32,
        local_identity: IdentityKey,
        remote_identity: IdentityKey,
        root_key: RootKey,
        alice_base_key: X25519PublicKey,
    ) -> Self {
        Self {
            session_version,
            local_identity,
            remote_identity,
            root_key,
            previous_counter: 0,
            sender_chain: None,
            receiver_chains: VecDeque::new(),
            pending_pre_key: None,
            remote_registration_id: 0,
            local_registration_id: 0,
            alice_base_key,
        }
    }

    pub fn session_version(&self) -> u32 {
        self.session_version
    }

    pub fn local_identity_key(&self) -> &IdentityKey {
        &self.local_identity
    }

    pub fn remote_identity_key(&self) -> &IdentityKey {
        &self.remote_identity
    }

    pub fn alice_base_key(&self) -> &X25519PublicKey {
        &self.alice_base_key
    }

    pub(crate) fn root_key(&self) -> &RootKey {
        &self.root_key
    }

    pub(crate) fn set_root_key(&mut self, root_key: RootKey) {
        self.root_key = root_key;
    }

    pub fn previous_counter(&self) -> u32 {
        self.previous_counter
    }

    pub(crate) fn set_previous_counter(&mut self, previous_counter: u32) {
        self.previous_counter = previous_counter;
    }

    pub fn remote_registration_id(&self) -> u32 {
        self.remote_registration_id
    }

    pub(crate) fn set_remote_registration_id(&mut self, id: u32) {
        self.remote_registration_id = id;
    }

    pub fn local_registration_id(&self) -> u32 {
        self.local_registration_id
    }

    pub(crate) fn set_local_registration_id(&mut self, id: u32) {
        self.local_registration_id = id;
    }

    pub fn has_sender_chain(&self) -> bool {
        self.sender_chain.is_some()
    }

    pub fn sender_ratchet_key(&self) -> Result<X25519PublicKey, Error> {
        Ok(self.sender()?.ratchet_key.public_key())
    }

    pub(crate) fn sender_ratchet_key_pair(&self) -> Result<&X25519Secret, Error> {
        Ok(&self.sender()?.ratchet_key)
    }

    pub(crate) fn sender_chain_key(&self) -> Result<&ChainKey, Error> {
        Ok(&self.sender()?.chain_key)
    }

    pub(crate) fn set_sender_chain(&mut self, ratchet_key: X25519Secret, chain_key: ChainKey) {
        self.sender_chain = Some(SenderChain {
            ratchet_key,
            chain_key,
        });
    }

    pub(crate) fn set_sender_chain_key(&mut self, chain_key: ChainKey) -> Result<(), Error> {
        let sender = self
            .sender_chain
            .as_mut()
            .ok_or_else(|| Error::Protocol("Session has no sender chain".to_string()))?;
        sender.chain_key = chain_key;
        Ok(())
    }

    fn sender(&self) -> Result<&SenderChain, Error> {
        self.sender_chain
            .as_ref()
            .ok_or_else(|| Error::Protocol("Session has no sender chain".to_string()))
    }

    fn receiver_chain(&self, sender_key: &X25519PublicKey) -> Option<&ReceiverChain> {
        self.receiver_chains
            .iter()
            .find(|chain| &chain.sender_ratchet_key == sender_key)
    }

    fn receiver_chain_mut(&mut self, sender_key: &X25519PublicKey) -> Option<&mut ReceiverChain> {
        self.receiver_chains
            .iter_mut()
            .find(|chain| &chain.sender_ratchet_key == sender_key)
    }

    pub fn has_receiver_chain(&self, sender_key: &X25519PublicKey) -> bool {
        self.receiver_chain(sender_key).is_some()
    }

    pub fn receiver_chain_key(&self, sender_key: &X25519PublicKey) -> Option<ChainKey> {
        self.receiver_chain(sender_key)
            .map(|chain| chain.chain_key.clone())
    }

    pub fn receiver_chain_count(&self) -> usize {
        self.receiver_chains.len()
    }

    /// Appends a receiving chain, evicting the oldest past [`MAX_RECEIVER_CHAINS`].
    ///
    /// Messages still in flight on an evicted chain can no longer be decrypted.
    pub fn add_receiver_chain(&mut self, sender_key: X25519PublicKey, chain_key: ChainKey) {
        self.receiver_chains
            .retain(|chain| chain.sender_ratchet_key != sender_key);
        self.receiver_chains.push_back(ReceiverChain {
            sender_ratchet_key: sender_key,
            chain_key,
            message_keys: VecDeque::new(),
        });

        while self.receiver_chains.len() > MAX_RECEIVER_CHAINS {
            self.receiver_chains.pop_front();
        }
    }

    pub(crate) fn set_receiver_chain_key(
        &mut self,
        sender_key: &X25519PublicKey,
        chain_key: ChainKey,
    ) -> Result<(), Error> {
        let chain = self
            .receiver_chain_mut(sender_key)
            .ok_or_else(|| Error::Protocol("No receiver chain for ratchet key".to_string()))?;
        chain.chain_key = chain_key;
        Ok(())
    }

    /// Caches a skipped message key, evicting the oldest past [`MAX_MESSAGE_KEYS`].
    ///
    /// Keys for a sender key without a receiver chain are dropped.
    pub fn set_message_keys(&mut self, sender_key: &X25519PublicKey, message_keys: MessageKeys) {
        if let Some(chain) = self.receiver_chain_mut(sender_key) {
            chain.message_keys.push_back(message_keys);
            while chain.message_keys.len() > MAX_MESSAGE_KEYS {
                chain.message_keys.pop_front();
            }
        }
    }

    pub fn has_message_keys(&self, sender_key: &X25519PublicKey, counter: u32) -> bool {
        self.receiver_chain(sender_key).is_some_and(|chain| {
            chain
                .message_keys
                .iter()
                .any(|keys| keys.counter() == counter)
        })
    }

    /// Takes the cached key for `counter`, if the message was skipped earlier.
    pub fn remove_message_keys(
        &mut self,
        sender_key: &X25519PublicKey,
        counter: u32,
    ) -> Option<MessageKeys> {
        let chain = self.receiver_chain_mut(sender_key)?;
        let position = chain
            .message_keys
            .iter()
            .position(|keys| keys.counter() == counter)?;
        chain.message_keys.remove(position)
    }

    pub fn message_keys_count(&self, sender_key: &X25519PublicKey) -> usize {
        self.receiver_chain(sender_key)
            .map_or(0, |chain| chain.message_keys.len())
    }

    pub(crate) fn set_unacknowledged_pre_key_message(
        &mut self,
        pre_key_id: Option<u32>,
        signed_pre_key_id: u32,
        base_key: X25519PublicKey,
    ) {
        self.pending_pre_key = Some(PendingPreKey {
            pre_key_id,
            signed_pre_key_id,
            base_key,
        });
    }

    pub fn unacknowledged_pre_key_message(&self) -> Option<&PendingPreKey> {
        self.pending_pre_key.as_ref()
    }

    pub(crate) fn clear_unacknowledged_pre_key_message(&mut self) {
        self.pending_pre_key = None;
    }

    pub(crate) fn to_proto(&self) -> SessionStructure {
        let sender_chain = self.sender_chain.as_ref().map(|sender| ChainStructure {
            sender_ratchet_key: sender.ratchet_key.public_key().to_bytes().to_vec(),
            sender_ratchet_key_private: sender.ratchet_key.as_bytes().to_vec(),
            chain_key: Some(sender.chain_key.to_proto()),
            message_keys: Vec::new(),
        });

        let receiver_chains = self
            .receiver_chains
            .iter()
            .map(|chain| ChainStructure {
                sender_ratchet_key: chain.sender_ratchet_key.to_bytes().to_vec(),
                sender_ratchet_key_private: Vec::new(),
                chain_key: Some(chain.chain_key.to_proto()),
                message_keys: chain.message_keys.iter().map(MessageKeys::to_proto).collect(),
            })
            .collect();

        let pending_pre_key = self.pending_pre_key.map(|pending| PendingPreKeyStructure {
            pre_key_id: pending.pre_key_id,
            base_key: pending.base_key.to_bytes().to_vec(),
            signed_pre_key_id: pending.signed_pre_key_id,
        });

        SessionStructure {
            session_version: self.session_version,
            local_identity_public: self.local_identity.serialize().to_vec(),
            remote_identity_public: self.remote_identity.serialize().to_vec(),
            root_key: self.root_key.as_bytes().to_vec(),
            previous_counter: self.previous_counter,
            sender_chain,
            receiver_chains,
            pending_pre_key,
            remote_registration_id: self.remote_registration_id,
            local_registration_id: self.local_registration_id,
            alice_base_key: self.alice_base_key.to_bytes().to_vec(),
        }
    }

    pub(crate) fn from_proto(proto: SessionStructure) -> Result<Self, Error> {
        let missing_chain_key = || Error::Serde("Chain without chain key".to_string());

        let sender_chain = match proto.sender_chain {
            Some(mut chain) => {
                let ratchet_key = X25519Secret::try_from(chain.sender_ratchet_key_private.as_slice())?;
                chain.sender_ratchet_key_private.zeroize();
                let chain_key = chain.chain_key.as_ref().ok_or_else(missing_chain_key)?;
                Some(SenderChain {
                    ratchet_key,
                    chain_key: ChainKey::from_proto(chain_key)?,
                })
            }
            None => None,
        };

        let receiver_chains = proto
            .receiver_chains
            .iter()
            .map(|chain| -> Result<ReceiverChain, Error> {
                let chain_key = chain.chain_key.as_ref().ok_or_else(missing_chain_key)?;
                Ok(ReceiverChain {
                    sender_ratchet_key: X25519PublicKey::try_from(chain.sender_ratchet_key.as_slice())?,
                    chain_key: ChainKey::from_proto(chain_key)?,
                    message_keys: chain
                        .message_keys
                        .iter()
                        .map(MessageKeys::from_proto)
                        .collect::<Result<_, Error>>()?,
                })
            })
            .collect::<Result<_, Error>>()?;

        let pending_pre_key = match proto.pending_pre_key {
            Some(pending) => Some(PendingPreKey {
                pre_key_id: pending.pre_key_id,
                signed_pre_key_id: pending.signed_pre_key_id,
                base_key: X25519PublicKey::try_from(pending.base_key.as_slice())?,
            }),
            None => None,
        };

        Ok(Self {
            session_version: proto.session_version,
            local_identity: IdentityKey::deserialize(&proto.local_identity_public)?,
            remote_identity: IdentityKey::deserialize(&proto.remote_identity_public)?,
            root_key: RootKey::try_from(proto.root_key.as_slice())?,
            previous_counter: proto.previous_counter,
            sender_chain,
            receiver_chains,
            pending_pre_key,
            remote_registration_id: proto.remote_registration_id,
            local_registration_id: proto.local_registration_id,
            alice_base_key: X25519PublicKey::try_from(proto.alice_base_key.as_slice())?,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        self.to_proto().encode_to_vec()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        Self::from_proto(SessionStructure::decode(bytes)?)
    }
}
