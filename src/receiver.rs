use crate::push::{
    Envelope, EnvelopeType, MessagePipe, ProgressListener, PushError, ReceiveTransport,
};
use crate::store::ProtocolStore;
use crate::{
    AttachmentPointer, AttachmentReader, Content, Error, PreKeyWhisperMessage, ProtocolAddress,
    ProtocolConfig, SessionCipher, SessionLocks, WhisperMessage,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(thiserror::Error, Debug)]
pub enum ReceiveError {
    #[error(transparent)]
    Push(#[from] PushError),

    #[error(transparent)]
    Protocol(#[from] Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Handed every envelope pulled from the server, before it is acknowledged.
pub trait MessageCallback: Send {
    fn on_message(&mut self, envelope: &Envelope);
}

impl<F> MessageCallback for F
where
    F: FnMut(&Envelope) + Send,
{
    fn on_message(&mut self, envelope: &Envelope) {
        self(envelope)
    }
}

/// Pulls envelopes and attachments from the server and decrypts them.
pub struct MessageReceiver<S, T> {
    store: Arc<S>,
    transport: Arc<T>,
    locks: Arc<SessionLocks>,
    config: ProtocolConfig,
}

impl<S, T> MessageReceiver<S, T>
where
    S: ProtocolStore,
    T: ReceiveTransport,
{
    pub fn new(
        store: Arc<S>,
        transport: Arc<T>,
        locks: Arc<SessionLocks>,
        config: Option<ProtocolConfig>,
    ) -> Self {
        Self {
            store,
            transport,
            locks,
            config: config.unwrap_or_default(),
        }
    }

    /// Fetches every queued envelope, passing each to `callback` and then
    /// acknowledging it on its own.
    ///
    /// An acknowledgment that fails is logged and skipped; the server will
    /// offer that envelope again on the next fetch.
    pub async fn retrieve_messages<C: MessageCallback>(
        &self,
        callback: &mut C,
    ) -> Result<Vec<Envelope>, ReceiveError> {
        let envelopes = self.transport.get_messages().await?;
        debug!("Retrieved {} envelopes", envelopes.len());

        for envelope in &envelopes {
            callback.on_message(envelope);

            if let Err(err) = self
                .transport
                .acknowledge_message(&envelope.source, envelope.timestamp)
                .await
            {
                warn!(
                    "Failed to acknowledge message {} from {}: {err}",
                    envelope.timestamp, envelope.source
                );
            }
        }

        Ok(envelopes)
    }

    /// Downloads the attachment blob to `destination` and opens it for reading.
    ///
    /// The whole blob is read back and its MAC verified before any of it is
    /// decrypted, so the returned reader holds the complete plaintext in
    /// memory. The file is read on tokio's blocking pool.
    pub async fn retrieve_attachment(
        &self,
        pointer: &AttachmentPointer,
        destination: &Path,
        listener: Option<&dyn ProgressListener>,
    ) -> Result<AttachmentReader, ReceiveError> {
        self.transport
            .retrieve_attachment(pointer.relay.as_deref(), pointer.id, destination, listener)
            .await?;

        let blob = tokio::fs::read(destination).await?;
        Ok(AttachmentReader::new(&pointer.key, &blob)?)
    }

    pub async fn create_message_pipe(&self) -> Result<Box<dyn MessagePipe>, ReceiveError> {
        Ok(self.transport.open_message_pipe().await?)
    }

    /// Decrypts an envelope's content with the session of its source device.
    ///
    /// Content marked as ending the session removes every session with the
    /// sender once it has been decrypted.
    pub fn decrypt(&self, envelope: &Envelope) -> Result<Content, ReceiveError> {
        let ciphertext = envelope
            .content
            .as_deref()
            .ok_or_else(|| Error::InvalidMessage("Envelope has no content".to_string()))?;

        let address = ProtocolAddress::new(envelope.source.clone(), envelope.source_device);
        let cipher = SessionCipher::new(&*self.store, &self.locks, address, &self.config);

        let plaintext = match envelope.envelope_type {
            EnvelopeType::PreKeyBundle => {
                cipher.decrypt_pre_key_message(&PreKeyWhisperMessage::try_from(ciphertext)?)?
            }
            EnvelopeType::Ciphertext => {
                cipher.decrypt_message(&WhisperMessage::try_from(ciphertext)?)?
            }
            other => {
                return Err(Error::InvalidMessage(format!(
                    "Cannot decrypt envelope of type {other:?}"
                ))
                .into());
            }
        };

        let mut content = Content::deserialize(&plaintext)?;

        match &mut content {
            Content::Data(message) => {
                for attachment in &mut message.attachments {
                    attachment.relay = envelope.relay.clone();
                }

                if message.end_session {
                    info!("{} ended the session, removing all sessions", envelope.source);
                    self.locks.delete_all_sessions(&*self.store, &envelope.source)?;
                }
            }
            Content::Sync(transcript) => {
                for attachment in &mut transcript.message.attachments {
                    attachment.relay = envelope.relay.clone();
                }
            }
        }

        Ok(content)
    }
}
