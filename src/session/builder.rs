use crate::ratchet::{CURRENT_VERSION, PreKeyWhisperMessage};
use crate::store::{Direction, ProtocolStore};
use crate::x3dh::{AliceParameters, BobParameters, X3DH};
use crate::{
    Error, PRE_KEY_MEDIUM_MAX_VALUE, PreKeyBundle, ProtocolAddress, ProtocolConfig, SessionLocks,
    SessionRecord, SessionState, X25519Secret,
};
use tracing::debug;

/// Establishes sessions with one remote device.
///
/// As initiator it consumes a [`PreKeyBundle`]; as responder it consumes the
/// handshake carried by an incoming [`PreKeyWhisperMessage`].
pub struct SessionBuilder<'a, S> {
    store: &'a S,
    locks: &'a SessionLocks,
    remote_address: ProtocolAddress,
    config: &'a ProtocolConfig,
}

impl<'a, S: ProtocolStore> SessionBuilder<'a, S> {
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

    pub fn remote_address(&self) -> &ProtocolAddress {
        &self.remote_address
    }

    /// Builds an initiating session from a remote bundle and stores it.
    ///
    /// An existing session is archived, not discarded. Returns whether the
    /// bundle's identity replaced a different, previously stored one.
    pub fn process_pre_key_bundle(&self, bundle: &PreKeyBundle) -> Result<bool, Error> {
        let their_identity = bundle.identity_key();
        if !self
            .store
            .is_trusted_identity(&self.remote_address, their_identity, Direction::Sending)?
        {
            return Err(Error::UntrustedIdentity {
                address: self.remote_address.clone(),
                identity: *their_identity,
            });
        }

        bundle.verify()?;

        let our_identity = self.store.get_identity_key_pair()?;
        let our_base_key = X25519Secret::generate()?;
        let their_signed_pre_key = bundle.signed_pre_key_public();
        let their_one_time_pre_key = bundle.pre_key_public();

        let (root_key, chain_key) =
            X3DH::new(&self.config.protocol_info).agree_as_alice(&AliceParameters {
                our_identity: &our_identity,
                our_base_key: &our_base_key,
                their_identity: their_identity.dh_key(),
                their_signed_pre_key: &their_signed_pre_key,
                their_one_time_pre_key: their_one_time_pre_key.as_ref(),
            })?;

        let mut state = SessionState::new(
            u32::from(CURRENT_VERSION),
            our_identity.identity_key(),
            *their_identity,
            root_key.clone(),
            our_base_key.public_key(),
        );

        // Until the responder ratchets, anything it sends comes from its
        // signed pre-key.
        let sending_ratchet_key = X25519Secret::generate()?;
        let (root_key, sending_chain) =
            root_key.create_chain(&their_signed_pre_key, &sending_ratchet_key)?;
        state.add_receiver_chain(their_signed_pre_key, chain_key);
        state.set_sender_chain(sending_ratchet_key, sending_chain);
        state.set_root_key(root_key);

        state.set_unacknowledged_pre_key_message(
            bundle.pre_key_id(),
            bundle.signed_pre_key_id(),
            our_base_key.public_key(),
        );
        state.set_local_registration_id(self.store.get_local_registration_id()?);
        state.set_remote_registration_id(bundle.registration_id());

        {
            let _guard = self.locks.lock_session(&self.remote_address);
            let mut record = self.store.load_session(&self.remote_address)?;
            record.promote_state(state);
            self.store.store_session(&self.remote_address, &record)?;
        }

        debug!(
            "Initialized session with {} (one-time pre-key: {:?})",
            self.remote_address,
            bundle.pre_key_id()
        );

        self.store.save_identity(&self.remote_address, their_identity)
    }

    /// Builds the responder side of a session into `record`.
    ///
    /// The caller holds the session lock and persists `record` once the
    /// carried message decrypts. Returns the one-time pre-key id to consume
    /// afterwards, if any. A handshake already present in the record is a
    /// no-op.
    pub(crate) fn process_pre_key_message(
        &self,
        record: &mut SessionRecord,
        message: &PreKeyWhisperMessage,
    ) -> Result<Option<u32>, Error> {
        let their_identity = message.identity_key();
        if !self
            .store
            .is_trusted_identity(&self.remote_address, their_identity, Direction::Receiving)?
        {
            return Err(Error::UntrustedIdentity {
                address: self.remote_address.clone(),
                identity: *their_identity,
            });
        }

        let version = u32::from(message.message_version());
        if record.has_session_state(version, message.base_key()) {
            debug!("Repeated handshake from {}", self.remote_address);
            return Ok(None);
        }

        let our_signed_pre_key = self
            .store
            .load_signed_pre_key(message.signed_pre_key_id())?;
        let our_one_time_pre_key = message
            .pre_key_id()
            .map(|id| self.store.load_pre_key(id))
            .transpose()?;
        let our_identity = self.store.get_identity_key_pair()?;

        let (root_key, chain_key) =
            X3DH::new(&self.config.protocol_info).agree_as_bob(&BobParameters {
                our_identity: &our_identity,
                our_signed_pre_key: our_signed_pre_key.key_pair(),
                our_one_time_pre_key: our_one_time_pre_key.as_ref().map(|key| key.key_pair()),
                their_identity: their_identity.dh_key(),
                their_base_key: message.base_key(),
            })?;

        let mut state = SessionState::new(
            version,
            our_identity.identity_key(),
            *their_identity,
            root_key,
            *message.base_key(),
        );
        state.set_sender_chain(our_signed_pre_key.key_pair().clone(), chain_key);
        state.set_local_registration_id(self.store.get_local_registration_id()?);
        state.set_remote_registration_id(message.registration_id());

        record.promote_state(state);

        debug!("Accepted new session from {}", self.remote_address);

        // The last-resort key is shared by every initiator and never consumed.
        Ok(message
            .pre_key_id()
            .filter(|&id| id != PRE_KEY_MEDIUM_MAX_VALUE))
    }
}
