use crate::push::{
    KeyTransport, MessageTransport, MismatchedDevices, OutgoingPushMessage,
    OutgoingPushMessageList, PushError, SendMessageResponse, StaleDevices,
};
use crate::store::ProtocolStore;
use crate::{
    Content, DEFAULT_DEVICE_ID, DataMessage, Error, IdentityKey, PreKeyBundle, ProtocolConfig,
    SentTranscript, ServiceAddress, SessionBuilder, SessionCipher, SessionLocks,
};
use futures::future::join_all;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Notified when the security of a conversation changed.
pub trait EventListener: Send + Sync {
    /// Sessions with `address` were reset, or its identity key changed.
    fn on_security_event(&self, address: &ServiceAddress);
}

/// Why a send to one recipient failed.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("Untrusted identity key for {address}")]
    UntrustedIdentity {
        address: ServiceAddress,
        identity: IdentityKey,
    },

    #[error("{0} is not a registered user")]
    UnregisteredUser(ServiceAddress),

    #[error("Network failure sending to {address}: {reason}")]
    NetworkFailure {
        address: ServiceAddress,
        reason: String,
    },

    /// The device list still disagreed with the server after every attempt.
    #[error("Exceeded maximum retry attempts ({attempts})")]
    RetriesExhausted { attempts: u32 },

    #[error(transparent)]
    Push(PushError),

    #[error(transparent)]
    Protocol(#[from] Error),

    #[error("Group send failed: {0}")]
    PartialFailure(GroupSendFailures),
}

impl SendError {
    fn from_protocol(recipient: &ServiceAddress, err: Error) -> Self {
        match err {
            Error::UntrustedIdentity { identity, .. } => SendError::UntrustedIdentity {
                address: recipient.clone(),
                identity,
            },
            other => SendError::Protocol(other),
        }
    }

    fn from_push(recipient: &ServiceAddress, err: PushError) -> Self {
        match err {
            PushError::NotFound => SendError::UnregisteredUser(recipient.clone()),
            PushError::Network(reason) => SendError::NetworkFailure {
                address: recipient.clone(),
                reason,
            },
            other => SendError::Push(other),
        }
    }
}

/// Per-recipient failures of a group send, sorted by kind.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupSendFailures {
    pub untrusted_identities: Vec<(ServiceAddress, IdentityKey)>,
    pub unregistered_users: Vec<ServiceAddress>,
    /// Everything else, with the error that stopped the send.
    pub network_failures: Vec<(ServiceAddress, SendError)>,
}

impl GroupSendFailures {
    fn record(&mut self, recipient: &ServiceAddress, err: SendError) {
        match err {
            SendError::UntrustedIdentity { address, identity } => {
                self.untrusted_identities.push((address, identity))
            }
            SendError::UnregisteredUser(address) => self.unregistered_users.push(address),
            other => self.network_failures.push((recipient.clone(), other)),
        }
    }

    pub fn len(&self) -> usize {
        self.untrusted_identities.len() + self.unregistered_users.len() + self.network_failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for GroupSendFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} untrusted, {} unregistered, {} failed",
            self.untrusted_identities.len(),
            self.unregistered_users.len(),
            self.network_failures.len()
        )
    }
}

/// Encrypts outgoing content for every device of a recipient and submits it,
/// repairing the local device list when the server disagrees with it.
pub struct MessageDispatcher<S, T> {
    store: Arc<S>,
    transport: Arc<T>,
    locks: Arc<SessionLocks>,
    local_address: ServiceAddress,
    local_device_id: u32,
    config: ProtocolConfig,
    listener: Option<Arc<dyn EventListener>>,
}

impl<S, T> MessageDispatcher<S, T>
where
    S: ProtocolStore,
    T: MessageTransport + KeyTransport,
{
    pub fn new(
        store: Arc<S>,
        transport: Arc<T>,
        locks: Arc<SessionLocks>,
        local_address: ServiceAddress,
        local_device_id: u32,
        config: Option<ProtocolConfig>,
    ) -> Self {
        Self {
            store,
            transport,
            locks,
            local_address,
            local_device_id,
            config: config.unwrap_or_default(),
            listener: None,
        }
    }

    pub fn with_event_listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub async fn send_receipt(
        &self,
        recipient: &ServiceAddress,
        message_id: u64,
    ) -> Result<(), SendError> {
        self.transport
            .send_receipt(recipient.name(), message_id, recipient.relay())
            .await
            .map_err(|err| SendError::from_push(recipient, err))
    }

    /// Sends `message` to every device of `recipient`.
    ///
    /// An end-session message drops all local sessions with the recipient once
    /// it has been delivered.
    pub async fn send_message(
        &self,
        recipient: &ServiceAddress,
        message: &DataMessage,
    ) -> Result<SendMessageResponse, SendError> {
        let content = Content::Data(message.clone()).serialize();
        let response = self.send_content(recipient, message.timestamp, &content).await?;

        if response.needs_sync {
            self.send_sync_transcript(Some(recipient), message).await?;
        }

        if message.end_session {
            info!("Ending all sessions with {recipient}");
            self.locks.delete_all_sessions(&*self.store, recipient.name())?;
            self.notify_security_event(recipient);
        }

        Ok(response)
    }

    /// Sends `message` to every recipient concurrently.
    ///
    /// A failure for one recipient does not stop delivery to the others; all
    /// failures are reported together as [`SendError::PartialFailure`].
    pub async fn send_group_message(
        &self,
        recipients: &[ServiceAddress],
        message: &DataMessage,
    ) -> Result<(), SendError> {
        let content = Content::Data(message.clone()).serialize();

        let results = join_all(
            recipients
                .iter()
                .map(|recipient| self.send_content(recipient, message.timestamp, &content)),
        )
        .await;

        let mut failures = GroupSendFailures::default();
        let mut needs_sync = false;
        for (recipient, result) in recipients.iter().zip(results) {
            match result {
                Ok(response) => needs_sync |= response.needs_sync,
                Err(err) => {
                    warn!("Group send to {recipient} failed: {err}");
                    failures.record(recipient, err);
                }
            }
        }

        if !failures.is_empty() {
            return Err(SendError::PartialFailure(failures));
        }

        if needs_sync {
            self.send_sync_transcript(None, message).await?;
        }

        Ok(())
    }

    async fn send_sync_transcript(
        &self,
        destination: Option<&ServiceAddress>,
        message: &DataMessage,
    ) -> Result<(), SendError> {
        let transcript = Content::Sync(SentTranscript {
            destination: destination.map(|address| address.name().to_string()),
            timestamp: message.timestamp,
            message: message.clone(),
        });

        self.send_content(&self.local_address, message.timestamp, &transcript.serialize())
            .await?;
        Ok(())
    }

    async fn send_content(
        &self,
        recipient: &ServiceAddress,
        timestamp: u64,
        content: &[u8],
    ) -> Result<SendMessageResponse, SendError> {
        let attempts = self.config.max_send_attempts;

        for attempt in 1..=attempts {
            let messages = self.build_messages(recipient, timestamp, content).await?;

            match self.transport.send_messages(&messages).await {
                Ok(response) => return Ok(response),
                Err(PushError::MismatchedDevices(mismatched)) => {
                    warn!("Mismatched devices for {recipient} (attempt {attempt}/{attempts})");
                    self.handle_mismatched_devices(recipient, &mismatched).await?;
                }
                Err(PushError::StaleDevices(stale)) => {
                    warn!("Stale devices for {recipient} (attempt {attempt}/{attempts})");
                    self.handle_stale_devices(recipient, &stale)?;
                }
                Err(err) => return Err(SendError::from_push(recipient, err)),
            }
        }

        Err(SendError::RetriesExhausted { attempts })
    }

    async fn build_messages(
        &self,
        recipient: &ServiceAddress,
        timestamp: u64,
        content: &[u8],
    ) -> Result<OutgoingPushMessageList, SendError> {
        let mut device_ids = vec![DEFAULT_DEVICE_ID];
        device_ids.extend(self.store.get_sub_device_sessions(recipient.name())?);

        if recipient.name() == self.local_address.name() {
            device_ids.retain(|device_id| *device_id != self.local_device_id);
        }

        let mut messages = Vec::with_capacity(device_ids.len());
        for device_id in device_ids {
            if device_id == DEFAULT_DEVICE_ID
                || self.store.contains_session(&recipient.device(device_id))?
            {
                messages.push(self.encrypt_for_device(recipient, device_id, content).await?);
            }
        }

        Ok(OutgoingPushMessageList {
            destination: recipient.name().to_string(),
            timestamp,
            relay: recipient.relay().map(str::to_string),
            messages,
        })
    }

    async fn encrypt_for_device(
        &self,
        recipient: &ServiceAddress,
        device_id: u32,
        content: &[u8],
    ) -> Result<OutgoingPushMessage, SendError> {
        let address = recipient.device(device_id);

        if !self.store.contains_session(&address)? {
            let bundles = self
                .transport
                .get_pre_keys(recipient, device_id)
                .await
                .map_err(|err| SendError::from_push(recipient, err))?;

            for bundle in &bundles {
                self.process_bundle(recipient, bundle.device_id(), bundle)?;
            }
        }

        let cipher = SessionCipher::new(&*self.store, &self.locks, address, &self.config);
        let message = cipher
            .encrypt(content)
            .map_err(|err| SendError::from_protocol(recipient, err))?;

        Ok(OutgoingPushMessage {
            message_type: message.message_type().into(),
            destination_device_id: device_id,
            destination_registration_id: cipher.remote_registration_id()?,
            body: message.serialize().to_vec(),
        })
    }

    fn process_bundle(
        &self,
        recipient: &ServiceAddress,
        device_id: u32,
        bundle: &PreKeyBundle,
    ) -> Result<(), SendError> {
        let address = recipient.device(device_id);
        debug!("Establishing session with {address}");

        let builder = SessionBuilder::new(&*self.store, &self.locks, address, &self.config);
        let identity_changed = builder
            .process_pre_key_bundle(bundle)
            .map_err(|err| SendError::from_protocol(recipient, err))?;

        if identity_changed {
            warn!("Identity key of {recipient} changed");
            self.notify_security_event(recipient);
        }
        Ok(())
    }

    async fn handle_mismatched_devices(
        &self,
        recipient: &ServiceAddress,
        mismatched: &MismatchedDevices,
    ) -> Result<(), SendError> {
        for &device_id in &mismatched.extra_devices {
            info!("Removing session with extra device {}", recipient.device(device_id));
            self.delete_session(recipient, device_id)?;
        }

        for &device_id in &mismatched.missing_devices {
            info!("Adding session with missing device {}", recipient.device(device_id));
            let bundle = self
                .transport
                .get_pre_key(recipient, device_id)
                .await
                .map_err(|err| SendError::from_push(recipient, err))?;
            self.process_bundle(recipient, device_id, &bundle)?;
        }

        Ok(())
    }

    fn handle_stale_devices(
        &self,
        recipient: &ServiceAddress,
        stale: &StaleDevices,
    ) -> Result<(), SendError> {
        for &device_id in &stale.stale_devices {
            info!("Removing stale session with {}", recipient.device(device_id));
            self.delete_session(recipient, device_id)?;
        }
        Ok(())
    }

    fn delete_session(&self, recipient: &ServiceAddress, device_id: u32) -> Result<(), Error> {
        let address = recipient.device(device_id);
        let _guard = self.locks.lock_session(&address);
        self.store.delete_session(&address)
    }

    fn notify_security_event(&self, address: &ServiceAddress) {
        if let Some(listener) = &self.listener {
            listener.on_security_event(address);
        }
    }
}
