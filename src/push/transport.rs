use crate::push::{
    Envelope, OutgoingPushMessageList, PreKeyState, PushError, SendMessageResponse,
    SignedPreKeyEntity,
};
use crate::{PreKeyBundle, ServiceAddress};
use async_trait::async_trait;
use std::path::Path;

/// Submits ciphertext to the server.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Fails with [`PushError::MismatchedDevices`] or [`PushError::StaleDevices`]
    /// when the per-device list does not match the destination's devices.
    async fn send_messages(
        &self,
        messages: &OutgoingPushMessageList,
    ) -> Result<SendMessageResponse, PushError>;

    async fn send_receipt(
        &self,
        destination: &str,
        message_id: u64,
        relay: Option<&str>,
    ) -> Result<(), PushError>;
}

/// Fetches remote key bundles and manages the local account's published keys.
#[async_trait]
pub trait KeyTransport: Send + Sync {
    /// Bundles for `device_id`; for the primary device, bundles for every
    /// device of the destination.
    async fn get_pre_keys(
        &self,
        destination: &ServiceAddress,
        device_id: u32,
    ) -> Result<Vec<PreKeyBundle>, PushError>;

    async fn get_pre_key(
        &self,
        destination: &ServiceAddress,
        device_id: u32,
    ) -> Result<PreKeyBundle, PushError>;

    async fn register_pre_keys(&self, state: &PreKeyState) -> Result<(), PushError>;

    /// One-time pre-keys the server still holds for us.
    async fn get_available_pre_keys(&self) -> Result<u32, PushError>;

    async fn get_current_signed_pre_key(&self) -> Result<Option<SignedPreKeyEntity>, PushError>;

    async fn set_current_signed_pre_key(&self, key: &SignedPreKeyEntity) -> Result<(), PushError>;
}

/// Notified while an attachment downloads.
pub trait ProgressListener: Send + Sync {
    fn on_attachment_progress(&self, total: u64, progress: u64);
}

/// Pulls queued envelopes and attachment blobs from the server.
#[async_trait]
pub trait ReceiveTransport: Send + Sync {
    async fn get_messages(&self) -> Result<Vec<Envelope>, PushError>;

    async fn acknowledge_message(&self, source: &str, timestamp: u64) -> Result<(), PushError>;

    /// Writes the encrypted attachment blob to `destination`.
    async fn retrieve_attachment(
        &self,
        relay: Option<&str>,
        attachment_id: u64,
        destination: &Path,
        listener: Option<&dyn ProgressListener>,
    ) -> Result<(), PushError>;

    async fn open_message_pipe(&self) -> Result<Box<dyn MessagePipe>, PushError>;
}

/// A persistent connection the server pushes envelopes through.
#[async_trait]
pub trait MessagePipe: Send {
    /// The next envelope, or `None` once the connection has closed.
    async fn read(&mut self) -> Result<Option<Envelope>, PushError>;
}
