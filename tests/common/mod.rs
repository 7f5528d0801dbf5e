#![allow(dead_code)]

use async_trait::async_trait;
use herald::{
    CiphertextType, Content, DataMessage, Envelope, EnvelopeType, EventListener, IdentityKey,
    IdentityKeyPair, InMemoryProtocolStore, KeyTransport, MessageDispatcher, MessagePipe,
    MessageReceiver, MessageTransport, MismatchedDevices, OutgoingPushMessageList, PreKeyBundle,
    PreKeyInventory, PreKeyResponse, PreKeyResponseItem, PreKeyState, ProgressListener,
    ProtocolAddress, ProtocolConfig, PushError, ReceiveTransport, SendMessageResponse,
    ServiceAddress, SessionLocks, SignedPreKeyEntity, StaleDevices,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;

struct DeviceRecord {
    registration_id: u32,
    keys: Option<PreKeyState>,
}

/// An in-memory stand-in for the message server: it keeps the registered
/// devices of every account, validates device lists the way the real server
/// does and queues delivered envelopes per device.
#[derive(Default)]
pub struct MockServer {
    accounts: Mutex<HashMap<String, BTreeMap<u32, DeviceRecord>>>,
    mailboxes: Mutex<HashMap<(String, u32), Vec<Envelope>>>,
    attachments: Mutex<HashMap<u64, Vec<u8>>>,
    scripted: Mutex<VecDeque<PushError>>,
    offline: Mutex<HashSet<String>>,
    failing_acks: Mutex<bool>,
    submitted: Mutex<Vec<OutgoingPushMessageList>>,
    acknowledged: Mutex<Vec<(String, u64)>>,
    receipts: Mutex<Vec<(String, u64)>>,
}

impl MockServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_device(&self, name: &str, device_id: u32, registration_id: u32) {
        self.accounts
            .lock()
            .entry(name.to_string())
            .or_default()
            .insert(
                device_id,
                DeviceRecord {
                    registration_id,
                    keys: None,
                },
            );
    }

    pub fn remove_device(&self, name: &str, device_id: u32) {
        if let Some(devices) = self.accounts.lock().get_mut(name) {
            devices.remove(&device_id);
        }
    }

    /// Makes the next sends fail with `errors`, in order, before any checks.
    pub fn script(&self, errors: impl IntoIterator<Item = PushError>) {
        self.scripted.lock().extend(errors);
    }

    pub fn set_offline(&self, name: &str) {
        self.offline.lock().insert(name.to_string());
    }

    pub fn fail_acknowledgments(&self, fail: bool) {
        *self.failing_acks.lock() = fail;
    }

    pub fn store_attachment(&self, id: u64, blob: Vec<u8>) {
        self.attachments.lock().insert(id, blob);
    }

    /// Every message list submitted, accepted or not.
    pub fn submitted(&self) -> Vec<OutgoingPushMessageList> {
        self.submitted.lock().clone()
    }

    pub fn clear_submitted(&self) {
        self.submitted.lock().clear();
    }

    pub fn mailbox(&self, name: &str, device_id: u32) -> Vec<Envelope> {
        self.mailboxes
            .lock()
            .get(&(name.to_string(), device_id))
            .cloned()
            .unwrap_or_default()
    }

    pub fn acknowledged(&self) -> Vec<(String, u64)> {
        self.acknowledged.lock().clone()
    }

    pub fn receipts(&self) -> Vec<(String, u64)> {
        self.receipts.lock().clone()
    }

    pub fn available_pre_keys(&self, name: &str, device_id: u32) -> usize {
        self.accounts
            .lock()
            .get(name)
            .and_then(|devices| devices.get(&device_id))
            .and_then(|device| device.keys.as_ref())
            .map_or(0, |keys| keys.pre_keys.len())
    }

    fn bundle_response(
        &self,
        name: &str,
        device_ids: &[u32],
    ) -> Result<Vec<PreKeyBundle>, PushError> {
        let mut accounts = self.accounts.lock();
        let devices = accounts.get_mut(name).ok_or(PushError::NotFound)?;

        let mut identity_key = None;
        let mut items = Vec::new();
        for device_id in device_ids {
            let device = devices.get_mut(device_id).ok_or(PushError::NotFound)?;
            let keys = device.keys.as_mut().ok_or(PushError::NotFound)?;
            let pre_key = if keys.pre_keys.is_empty() {
                keys.last_resort_key.clone()
            } else {
                keys.pre_keys.remove(0)
            };

            identity_key = Some(keys.identity_key.clone());
            items.push(PreKeyResponseItem {
                device_id: *device_id,
                registration_id: device.registration_id,
                signed_pre_key: Some(keys.signed_pre_key.clone()),
                pre_key: Some(pre_key),
            });
        }

        let response = PreKeyResponse {
            identity_key: identity_key.ok_or(PushError::NotFound)?,
            devices: items,
        };

        let json = serde_json::to_vec(&response)?;
        let response: PreKeyResponse = serde_json::from_slice(&json)?;
        response
            .into_bundles()
            .map_err(|err| PushError::MalformedResponse(err.to_string()))
    }

    fn with_device<R>(
        &self,
        name: &str,
        device_id: u32,
        f: impl FnOnce(&mut DeviceRecord) -> R,
    ) -> Result<R, PushError> {
        let mut accounts = self.accounts.lock();
        let device = accounts
            .get_mut(name)
            .and_then(|devices| devices.get_mut(&device_id))
            .ok_or(PushError::NotFound)?;
        Ok(f(device))
    }
}

/// One device's authenticated connection to the [`MockServer`].
pub struct MockTransport {
    server: Arc<MockServer>,
    name: String,
    device_id: u32,
}

#[async_trait]
impl MessageTransport for MockTransport {
    async fn send_messages(
        &self,
        list: &OutgoingPushMessageList,
    ) -> Result<SendMessageResponse, PushError> {
        let server = &self.server;
        server.submitted.lock().push(list.clone());

        if let Some(err) = server.scripted.lock().pop_front() {
            return Err(err);
        }
        if server.offline.lock().contains(&list.destination) {
            return Err(PushError::Network("connection reset".to_string()));
        }

        let accounts = server.accounts.lock();
        let devices = accounts.get(&list.destination).ok_or(PushError::NotFound)?;

        let mut expected: BTreeSet<u32> = devices.keys().copied().collect();
        if list.destination == self.name {
            expected.remove(&self.device_id);
        }
        let sent: BTreeSet<u32> = list.device_ids().into_iter().collect();

        let missing_devices: Vec<u32> = expected.difference(&sent).copied().collect();
        let extra_devices: Vec<u32> = sent.difference(&expected).copied().collect();
        if !missing_devices.is_empty() || !extra_devices.is_empty() {
            return Err(PushError::MismatchedDevices(MismatchedDevices {
                missing_devices,
                extra_devices,
            }));
        }

        let stale_devices: Vec<u32> = list
            .messages
            .iter()
            .filter(|message| {
                devices[&message.destination_device_id].registration_id
                    != message.destination_registration_id
            })
            .map(|message| message.destination_device_id)
            .collect();
        if !stale_devices.is_empty() {
            return Err(PushError::StaleDevices(StaleDevices { stale_devices }));
        }

        let needs_sync = accounts
            .get(&self.name)
            .is_some_and(|own| own.keys().any(|id| *id != self.device_id));
        drop(accounts);

        let mut mailboxes = server.mailboxes.lock();
        for message in &list.messages {
            let envelope_type = if message.message_type == u32::from(CiphertextType::PreKey) {
                EnvelopeType::PreKeyBundle
            } else {
                EnvelopeType::Ciphertext
            };

            mailboxes
                .entry((list.destination.clone(), message.destination_device_id))
                .or_default()
                .push(Envelope {
                    envelope_type,
                    source: self.name.clone(),
                    source_device: self.device_id,
                    relay: None,
                    timestamp: list.timestamp,
                    content: Some(message.body.clone()),
                });
        }

        Ok(SendMessageResponse { needs_sync })
    }

    async fn send_receipt(
        &self,
        destination: &str,
        message_id: u64,
        _relay: Option<&str>,
    ) -> Result<(), PushError> {
        if !self.server.accounts.lock().contains_key(destination) {
            return Err(PushError::NotFound);
        }
        self.server
            .receipts
            .lock()
            .push((destination.to_string(), message_id));
        Ok(())
    }
}

#[async_trait]
impl KeyTransport for MockTransport {
    async fn get_pre_keys(
        &self,
        destination: &ServiceAddress,
        device_id: u32,
    ) -> Result<Vec<PreKeyBundle>, PushError> {
        let device_ids: Vec<u32> = if device_id == herald::DEFAULT_DEVICE_ID {
            let accounts = self.server.accounts.lock();
            let devices = accounts.get(destination.name()).ok_or(PushError::NotFound)?;
            devices
                .keys()
                .copied()
                .filter(|id| destination.name() != self.name || *id != self.device_id)
                .collect()
        } else {
            vec![device_id]
        };

        self.server.bundle_response(destination.name(), &device_ids)
    }

    async fn get_pre_key(
        &self,
        destination: &ServiceAddress,
        device_id: u32,
    ) -> Result<PreKeyBundle, PushError> {
        self.server
            .bundle_response(destination.name(), &[device_id])?
            .pop()
            .ok_or(PushError::NotFound)
    }

    async fn register_pre_keys(&self, state: &PreKeyState) -> Result<(), PushError> {
        self.server.with_device(&self.name, self.device_id, |device| {
            device.keys = Some(state.clone());
        })
    }

    async fn get_available_pre_keys(&self) -> Result<u32, PushError> {
        self.server.with_device(&self.name, self.device_id, |device| {
            device
                .keys
                .as_ref()
                .map_or(0, |keys| keys.pre_keys.len() as u32)
        })
    }

    async fn get_current_signed_pre_key(&self) -> Result<Option<SignedPreKeyEntity>, PushError> {
        self.server.with_device(&self.name, self.device_id, |device| {
            device.keys.as_ref().map(|keys| keys.signed_pre_key.clone())
        })
    }

    async fn set_current_signed_pre_key(&self, key: &SignedPreKeyEntity) -> Result<(), PushError> {
        self.server.with_device(&self.name, self.device_id, |device| {
            if let Some(keys) = device.keys.as_mut() {
                keys.signed_pre_key = key.clone();
            }
        })
    }
}

#[async_trait]
impl ReceiveTransport for MockTransport {
    async fn get_messages(&self) -> Result<Vec<Envelope>, PushError> {
        Ok(self.server.mailbox(&self.name, self.device_id))
    }

    async fn acknowledge_message(&self, source: &str, timestamp: u64) -> Result<(), PushError> {
        if *self.server.failing_acks.lock() {
            return Err(PushError::Network("acknowledgment timed out".to_string()));
        }

        if let Some(mailbox) = self
            .server
            .mailboxes
            .lock()
            .get_mut(&(self.name.clone(), self.device_id))
        {
            if let Some(index) = mailbox
                .iter()
                .position(|envelope| envelope.source == source && envelope.timestamp == timestamp)
            {
                mailbox.remove(index);
            }
        }
        self.server
            .acknowledged
            .lock()
            .push((source.to_string(), timestamp));
        Ok(())
    }

    async fn retrieve_attachment(
        &self,
        _relay: Option<&str>,
        attachment_id: u64,
        destination: &Path,
        listener: Option<&dyn ProgressListener>,
    ) -> Result<(), PushError> {
        let blob = self
            .server
            .attachments
            .lock()
            .get(&attachment_id)
            .cloned()
            .ok_or(PushError::NotFound)?;

        std::fs::write(destination, &blob).map_err(|err| PushError::Network(err.to_string()))?;
        if let Some(listener) = listener {
            listener.on_attachment_progress(blob.len() as u64, blob.len() as u64);
        }
        Ok(())
    }

    async fn open_message_pipe(&self) -> Result<Box<dyn MessagePipe>, PushError> {
        let envelopes = self
            .server
            .mailboxes
            .lock()
            .remove(&(self.name.clone(), self.device_id))
            .unwrap_or_default();

        Ok(Box::new(MockPipe {
            envelopes: envelopes.into(),
        }))
    }
}

struct MockPipe {
    envelopes: VecDeque<Envelope>,
}

#[async_trait]
impl MessagePipe for MockPipe {
    async fn read(&mut self) -> Result<Option<Envelope>, PushError> {
        Ok(self.envelopes.pop_front())
    }
}

/// Records every security event it is told about.
#[derive(Default)]
pub struct RecordingListener {
    pub events: Mutex<Vec<ServiceAddress>>,
}

impl EventListener for RecordingListener {
    fn on_security_event(&self, address: &ServiceAddress) {
        self.events.lock().push(address.clone());
    }
}

pub fn test_config() -> ProtocolConfig {
    ProtocolConfig {
        max_one_time_pre_keys: 5,
        min_one_time_pre_keys: 2,
        ..ProtocolConfig::default()
    }
}

/// A registered device with its own store, keys and connection.
pub struct Client {
    pub address: ServiceAddress,
    pub device_id: u32,
    pub identity: IdentityKeyPair,
    pub store: Arc<InMemoryProtocolStore>,
    pub locks: Arc<SessionLocks>,
    pub transport: Arc<MockTransport>,
    pub listener: Arc<RecordingListener>,
    pub dispatcher: MessageDispatcher<InMemoryProtocolStore, MockTransport>,
    pub receiver: MessageReceiver<InMemoryProtocolStore, MockTransport>,
    pub inventory: PreKeyInventory<InMemoryProtocolStore, MockTransport>,
}

impl Client {
    /// Registers the primary device of a new account.
    pub async fn register(server: &Arc<MockServer>, name: &str, registration_id: u32) -> Self {
        let identity = IdentityKeyPair::generate().unwrap();
        Self::register_device(server, name, 1, registration_id, identity).await
    }

    /// Adds a device to this client's account, sharing its identity.
    pub async fn link(&self, server: &Arc<MockServer>, device_id: u32, registration_id: u32) -> Self {
        Self::register_device(
            server,
            self.address.name(),
            device_id,
            registration_id,
            self.identity.clone(),
        )
        .await
    }

    pub async fn register_device(
        server: &Arc<MockServer>,
        name: &str,
        device_id: u32,
        registration_id: u32,
        identity: IdentityKeyPair,
    ) -> Self {
        server.add_device(name, device_id, registration_id);

        let store = Arc::new(InMemoryProtocolStore::new(&identity, registration_id));
        let transport = Arc::new(MockTransport {
            server: Arc::clone(server),
            name: name.to_string(),
            device_id,
        });
        let locks = Arc::new(SessionLocks::new());
        let listener = Arc::new(RecordingListener::default());
        let address = ServiceAddress::new(name);

        let dispatcher = MessageDispatcher::new(
            Arc::clone(&store),
            Arc::clone(&transport),
            Arc::clone(&locks),
            address.clone(),
            device_id,
            Some(test_config()),
        )
        .with_event_listener(listener.clone());
        let receiver = MessageReceiver::new(
            Arc::clone(&store),
            Arc::clone(&transport),
            Arc::clone(&locks),
            Some(test_config()),
        );
        let inventory =
            PreKeyInventory::new(Arc::clone(&store), Arc::clone(&transport), Some(test_config()))
                .unwrap();
        inventory.register_keys().await.unwrap();

        Self {
            address,
            device_id,
            identity,
            store,
            locks,
            transport,
            listener,
            dispatcher,
            receiver,
            inventory,
        }
    }

    pub fn identity_key(&self) -> IdentityKey {
        self.identity.identity_key()
    }

    pub fn protocol_address(&self) -> ProtocolAddress {
        self.address.device(self.device_id)
    }

    /// Pulls, acknowledges and decrypts everything queued for this device.
    pub async fn receive(&self) -> Vec<Content> {
        let mut envelopes = Vec::new();
        self.receiver
            .retrieve_messages(&mut |envelope: &Envelope| envelopes.push(envelope.clone()))
            .await
            .unwrap();

        envelopes
            .iter()
            .map(|envelope| self.receiver.decrypt(envelope).unwrap())
            .collect()
    }

    /// Bodies of the data messages among `contents`.
    pub fn bodies(contents: &[Content]) -> Vec<String> {
        contents
            .iter()
            .filter_map(|content| match content {
                Content::Data(DataMessage { body, .. }) => body.clone(),
                Content::Sync(_) => None,
            })
            .collect()
    }
}
