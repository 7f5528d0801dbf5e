use crate::ratchet::{
    ChainKey, CiphertextMessage, MessageKeys, PreKeyWhisperMessage, WhisperMessage,
};
use crate::session::SessionBuilder;
use crate::store::{Direction, ProtocolStore};
use crate::{
    Error, ProtocolAddress, ProtocolConfig, SessionLocks, SessionRecord, SessionState,
    X25519PublicKey, X25519Secret,
};
use aes_gcm_siv::aead::Aead;
use aes_gcm_siv::{Aes256GcmSiv, Key, KeyInit, Nonce};
use tracing::debug;

/// Encrypts to and decrypts from one remote device, advancing the stored
/// session one ratchet step per message.
///
/// Every operation is a load-modify-store of the session record under the
/// per-address session lock.
pub struct SessionCipher<'a, S> {
    store: &'a S,
    locks: &'a SessionLocks,
    remote_address: ProtocolAddress,
    config: &'a ProtocolConfig,
}

impl<'a, S: ProtocolStore> SessionCipher<'a, S> {
    pub fn new(
        store: &'a S,
        locks: &'a SessionLocks,
        remote_address: ProtocolAddress,
        config: &'a ProtocolConfig,
    ) -> Self {
        Self {
            store,
            locks,
            remote_address,
            config,
        }
    }

    /// Encrypts `plaintext` with the current session.
    ///
    /// While the remote side has not answered yet, the result is a
    /// [`CiphertextMessage::PreKey`] repeating the handshake.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<CiphertextMessage, Error> {
        let _guard = self.locks.lock_session(&self.remote_address);
        let mut record = self.store.load_session(&self.remote_address)?;
        let state = record
            .session_state_mut()
            .ok_or_else(|| Error::NoSession(self.remote_address.clone()))?;

        let remote_identity = *state.remote_identity_key();
        if !self
            .store
            .is_trusted_identity(&self.remote_address, &remote_identity, Direction::Sending)?
        {
            return Err(Error::UntrustedIdentity {
                address: self.remote_address.clone(),
                identity: remote_identity,
            });
        }

        let chain_key = state.sender_chain_key()?.clone();
        let message_keys = chain_key.message_keys()?;
        let ciphertext = seal(&message_keys, plaintext)?;
        let version = state.session_version() as u8;

        let whisper = WhisperMessage::new(
            version,
            message_keys.mac_key(),
            state.sender_ratchet_key()?,
            chain_key.index(),
            state.previous_counter(),
            ciphertext,
            state.local_identity_key(),
            &remote_identity,
        )?;

        let message = match state.unacknowledged_pre_key_message() {
            Some(pending) => CiphertextMessage::PreKey(PreKeyWhisperMessage::new(
                version,
                state.local_registration_id(),
                pending.pre_key_id(),
                pending.signed_pre_key_id(),
                *pending.base_key(),
                *state.local_identity_key(),
                whisper,
            )),
            None => CiphertextMessage::Whisper(whisper),
        };

        state.set_sender_chain_key(chain_key.next()?)?;

        self.store.save_identity(&self.remote_address, &remote_identity)?;
        self.store.store_session(&self.remote_address, &record)?;

        Ok(message)
    }

    /// Decrypts the first message(s) of a session initiated by the remote side.
    ///
    /// Builds the responder state if needed. The one-time pre-key it used is
    /// removed only once the message has decrypted.
    pub fn decrypt_pre_key_message(&self, message: &PreKeyWhisperMessage) -> Result<Vec<u8>, Error> {
        let _guard = self.locks.lock_session(&self.remote_address);
        let _pre_key_guard = message.pre_key_id().map(|id| self.locks.lock_pre_key(id));

        let mut record = self.store.load_session(&self.remote_address)?;
        let builder = SessionBuilder::new(
            self.store,
            self.locks,
            self.remote_address.clone(),
            self.config,
        );
        let unsigned_pre_key_id = builder.process_pre_key_message(&mut record, message)?;
        let plaintext = self.decrypt_with_record(&mut record, message.message())?;

        self.store
            .save_identity(&self.remote_address, message.identity_key())?;
        self.store.store_session(&self.remote_address, &record)?;

        if let Some(pre_key_id) = unsigned_pre_key_id {
            debug!("Consumed one-time pre-key {pre_key_id}");
            self.store.remove_pre_key(pre_key_id)?;
        }

        Ok(plaintext)
    }

    /// Decrypts a message of an established session.
    pub fn decrypt_message(&self, message: &WhisperMessage) -> Result<Vec<u8>, Error> {
        let _guard = self.locks.lock_session(&self.remote_address);
        let mut record = self.store.load_session(&self.remote_address)?;
        let plaintext = self.decrypt_with_record(&mut record, message)?;

        let remote_identity = record
            .session_state()
            .map(|state| *state.remote_identity_key())
            .ok_or_else(|| Error::NoSession(self.remote_address.clone()))?;
        if !self
            .store
            .is_trusted_identity(&self.remote_address, &remote_identity, Direction::Receiving)?
        {
            return Err(Error::UntrustedIdentity {
                address: self.remote_address.clone(),
                identity: remote_identity,
            });
        }

        self.store.save_identity(&self.remote_address, &remote_identity)?;
        self.store.store_session(&self.remote_address, &record)?;

        Ok(plaintext)
    }

    /// Registration id of the remote device, as learned during the handshake.
    pub fn remote_registration_id(&self) -> Result<u32, Error> {
        let _guard = self.locks.lock_session(&self.remote_address);
        self.store
            .load_session(&self.remote_address)?
            .session_state()
            .map(SessionState::remote_registration_id)
            .ok_or_else(|| Error::NoSession(self.remote_address.clone()))
    }

    pub fn session_version(&self) -> Result<u32, Error> {
        let _guard = self.locks.lock_session(&self.remote_address);
        self.store
            .load_session(&self.remote_address)?
            .session_state()
            .map(SessionState::session_version)
            .ok_or_else(|| Error::NoSession(self.remote_address.clone()))
    }

    /// Tries the current state, then every archived one.
    ///
    /// Each attempt works on a copy, so a failed attempt leaves the record
    /// untouched. An archived state that succeeds becomes current again.
    fn decrypt_with_record(
        &self,
        record: &mut SessionRecord,
        message: &WhisperMessage,
    ) -> Result<Vec<u8>, Error> {
        if record.session_state().is_none() && record.previous_session_count() == 0 {
            return Err(Error::NoSession(self.remote_address.clone()));
        }

        let mut errors = Vec::new();

        if let Some(current) = record.session_state() {
            let mut state = current.clone();
            match self.decrypt_with_state(&mut state, message) {
                Ok(plaintext) => {
                    record.set_session_state(state);
                    return Ok(plaintext);
                }
                Err(err @ Error::DuplicateMessage(_)) => return Err(err),
                Err(err) => errors.push(err),
            }
        }

        let mut promoted = None;
        for (index, previous) in record.previous_session_states().enumerate() {
            let mut state = previous.clone();
            match self.decrypt_with_state(&mut state, message) {
                Ok(plaintext) => {
                    promoted = Some((index, state, plaintext));
                    break;
                }
                Err(err @ Error::DuplicateMessage(_)) => return Err(err),
                Err(err) => errors.push(err),
            }
        }

        if let Some((index, state, plaintext)) = promoted {
            debug!("Promoting archived session {index} for {}", self.remote_address);
            record.promote_old_session(index, state);
            return Ok(plaintext);
        }

        let reasons = errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        Err(Error::InvalidMessage(format!("No valid sessions: {reasons}")))
    }

    fn decrypt_with_state(
        &self,
        state: &mut SessionState,
        message: &WhisperMessage,
    ) -> Result<Vec<u8>, Error> {
        if !state.has_sender_chain() {
            return Err(Error::InvalidMessage("Uninitialized session".to_string()));
        }

        if u32::from(message.message_version()) != state.session_version() {
            return Err(Error::InvalidMessage(format!(
                "Message version {}, but session version {}",
                message.message_version(),
                state.session_version()
            )));
        }

        let their_ephemeral = message.sender_ratchet_key();
        let chain_key = self.get_or_create_chain_key(state, their_ephemeral)?;
        let message_keys =
            self.get_or_create_message_keys(state, their_ephemeral, &chain_key, message.counter())?;

        message.verify_mac(
            state.remote_identity_key(),
            state.local_identity_key(),
            message_keys.mac_key(),
        )?;

        let plaintext = open(&message_keys, message.body())?;
        state.clear_unacknowledged_pre_key_message();

        Ok(plaintext)
    }

    fn get_or_create_chain_key(
        &self,
        state: &mut SessionState,
        their_ephemeral: &X25519PublicKey,
    ) -> Result<ChainKey, Error> {
        if let Some(chain_key) = state.receiver_chain_key(their_ephemeral) {
            return Ok(chain_key);
        }

        let (receiver_root, receiver_chain) = state
            .root_key()
            .create_chain(their_ephemeral, state.sender_ratchet_key_pair()?)?;

        let our_new_ephemeral = X25519Secret::generate()?;
        let (sender_root, sender_chain) =
            receiver_root.create_chain(their_ephemeral, &our_new_ephemeral)?;

        let previous_counter = state.sender_chain_key()?.index().saturating_sub(1);

        state.set_root_key(sender_root);
        state.add_receiver_chain(*their_ephemeral, receiver_chain.clone());
        state.set_previous_counter(previous_counter);
        state.set_sender_chain(our_new_ephemeral, sender_chain);

        debug!("DH ratchet step for {}", self.remote_address);

        Ok(receiver_chain)
    }

    fn get_or_create_message_keys(
        &self,
        state: &mut SessionState,
        their_ephemeral: &X25519PublicKey,
        chain_key: &ChainKey,
        counter: u32,
    ) -> Result<MessageKeys, Error> {
        if chain_key.index() > counter {
            return state
                .remove_message_keys(their_ephemeral, counter)
                .ok_or(Error::DuplicateMessage(counter));
        }

        if counter - chain_key.index() > self.config.max_skipped_messages {
            return Err(Error::InvalidMessage(format!(
                "Over {} messages into the future",
                self.config.max_skipped_messages
            )));
        }

        let mut chain_key = chain_key.clone();
        while chain_key.index() < counter {
            state.set_message_keys(their_ephemeral, chain_key.message_keys()?);
            chain_key = chain_key.next()?;
        }

        state.set_receiver_chain_key(their_ephemeral, chain_key.next()?)?;
        chain_key.message_keys()
    }
}

fn seal(keys: &MessageKeys, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
    let cipher = Aes256GcmSiv::new(Key::<Aes256GcmSiv>::from_slice(keys.cipher_key()));
    Ok(cipher.encrypt(Nonce::from_slice(keys.nonce()), plaintext)?)
}

fn open(keys: &MessageKeys, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
    let cipher = Aes256GcmSiv::new(Key::<Aes256GcmSiv>::from_slice(keys.cipher_key()));
    cipher
        .decrypt(Nonce::from_slice(keys.nonce()), ciphertext)
        .map_err(|_| Error::InvalidMessage("Message decryption failed".to_string()))
}
