use crate::push::{KeyTransport, PreKeyState, PushError, SignedPreKeyEntity};
use crate::store::{IdentityKeyStore, PreKeyStore, SignedPreKeyStore};
use crate::{
    Error, IdentityKey, PRE_KEY_MEDIUM_MAX_VALUE, PreKeyRecord, ProtocolConfig, SignedPreKeyRecord,
};
use parking_lot::Mutex;
use rand::TryRngCore;
use rand::rngs::OsRng;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// Failures while maintaining the local key inventory.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum InventoryError {
    #[error(transparent)]
    Protocol(#[from] Error),

    #[error(transparent)]
    Push(#[from] PushError),
}

/// The local account's one-time pre-keys, last-resort key and signed pre-keys,
/// and their publication to the server.
///
/// Private halves live in the store; the server only ever sees public keys.
pub struct PreKeyInventory<S, T> {
    store: Arc<S>,
    transport: Arc<T>,
    next_pre_key_id: Mutex<u32>,
    next_signed_pre_key_id: Mutex<u32>,
    config: ProtocolConfig,
}

impl<S, T> PreKeyInventory<S, T>
where
    S: IdentityKeyStore + PreKeyStore + SignedPreKeyStore,
    T: KeyTransport,
{
    /// Id counters start at a random offset so that a reinstalled client does
    /// not reuse the ids of keys still cached by peers.
    pub fn new(store: Arc<S>, transport: Arc<T>, config: Option<ProtocolConfig>) -> Result<Self, Error> {
        let mut rng = OsRng;
        let pre_key_offset = rng.try_next_u32().map_err(|_| Error::Random)? % PRE_KEY_MEDIUM_MAX_VALUE;
        let signed_offset = rng.try_next_u32().map_err(|_| Error::Random)? % PRE_KEY_MEDIUM_MAX_VALUE;

        Ok(Self {
            store,
            transport,
            next_pre_key_id: Mutex::new(pre_key_offset),
            next_signed_pre_key_id: Mutex::new(signed_offset),
            config: config.unwrap_or_default(),
        })
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Generates and stores `count` one-time pre-keys.
    ///
    /// Ids wrap within `1..PRE_KEY_MEDIUM_MAX_VALUE`, never reaching the
    /// last-resort id, so at most `PRE_KEY_MEDIUM_MAX_VALUE - 1` keys can be
    /// generated in one batch.
    pub fn generate_pre_keys(&self, count: u32) -> Result<Vec<PreKeyRecord>, Error> {
        if count >= PRE_KEY_MEDIUM_MAX_VALUE {
            return Err(Error::PreKey(format!(
                "Cannot generate {count} one-time pre-keys with distinct ids"
            )));
        }

        let mut next_id = self.next_pre_key_id.lock();
        let mut records = Vec::with_capacity(count as usize);

        for _ in 0..count {
            let id = *next_id % (PRE_KEY_MEDIUM_MAX_VALUE - 1) + 1;
            let record = PreKeyRecord::generate(id)?;
            self.store.store_pre_key(id, &record)?;
            records.push(record);
            *next_id = id;
        }

        debug!("Generated {count} one-time pre-keys");
        Ok(records)
    }

    /// The last-resort key, generated on first use. It is shared by every
    /// session that arrives once the one-time keys have run out.
    pub fn generate_last_resort_key(&self) -> Result<PreKeyRecord, Error> {
        if self.store.contains_pre_key(PRE_KEY_MEDIUM_MAX_VALUE)? {
            return self.store.load_pre_key(PRE_KEY_MEDIUM_MAX_VALUE);
        }

        let record = PreKeyRecord::generate(PRE_KEY_MEDIUM_MAX_VALUE)?;
        self.store.store_pre_key(PRE_KEY_MEDIUM_MAX_VALUE, &record)?;
        Ok(record)
    }

    /// Generates, signs and stores a new signed pre-key.
    pub fn generate_signed_pre_key(&self) -> Result<SignedPreKeyRecord, Error> {
        let identity = self.store.get_identity_key_pair()?;

        let mut next_id = self.next_signed_pre_key_id.lock();
        let id = *next_id;
        let record = SignedPreKeyRecord::generate(id, now_millis(), &identity)?;
        self.store.store_signed_pre_key(id, &record)?;
        *next_id = (id + 1) % PRE_KEY_MEDIUM_MAX_VALUE;

        debug!("Generated signed pre-key {id}");
        Ok(record)
    }

    /// Publishes the full set of local key material.
    pub async fn set_pre_keys(
        &self,
        identity_key: &IdentityKey,
        last_resort_key: &PreKeyRecord,
        signed_pre_key: &SignedPreKeyRecord,
        one_time_pre_keys: &[PreKeyRecord],
    ) -> Result<(), InventoryError> {
        let state = PreKeyState::new(identity_key, last_resort_key, signed_pre_key, one_time_pre_keys);
        self.transport.register_pre_keys(&state).await?;
        Ok(())
    }

    /// One-time pre-keys the server still has on offer for us.
    pub async fn get_pre_keys_count(&self) -> Result<u32, InventoryError> {
        Ok(self.transport.get_available_pre_keys().await?)
    }

    pub async fn set_signed_pre_key(&self, record: &SignedPreKeyRecord) -> Result<(), InventoryError> {
        self.transport
            .set_current_signed_pre_key(&SignedPreKeyEntity::from(record))
            .await?;
        Ok(())
    }

    pub async fn get_signed_pre_key(&self) -> Result<Option<SignedPreKeyEntity>, InventoryError> {
        Ok(self.transport.get_current_signed_pre_key().await?)
    }

    /// Generates and publishes a complete key set: a full batch of one-time
    /// pre-keys, the last-resort key and a new signed pre-key.
    pub async fn register_keys(&self) -> Result<(), InventoryError> {
        let identity_key = self.store.get_identity_key_pair()?.identity_key();
        let one_time_pre_keys = self.generate_pre_keys(self.config.max_one_time_pre_keys)?;
        let last_resort_key = self.generate_last_resort_key()?;
        let signed_pre_key = self.generate_signed_pre_key()?;

        self.set_pre_keys(&identity_key, &last_resort_key, &signed_pre_key, &one_time_pre_keys)
            .await
    }

    /// Publishes a new key set when the server's one-time pre-key count has
    /// dropped below the configured minimum. Returns whether it did.
    pub async fn refresh_pre_keys(&self) -> Result<bool, InventoryError> {
        let available = self.get_pre_keys_count().await?;
        if available >= self.config.min_one_time_pre_keys {
            return Ok(false);
        }

        info!(
            "Only {available} one-time pre-keys left on the server, publishing {}",
            self.config.max_one_time_pre_keys
        );
        self.register_keys().await?;
        Ok(true)
    }

    /// Replaces the signed pre-key once the newest one is older than the
    /// rotation interval.
    ///
    /// Older signed pre-keys stay in the store so messages already in flight
    /// to them still decrypt.
    pub async fn rotate_signed_pre_key(&self) -> Result<Option<SignedPreKeyRecord>, InventoryError> {
        let newest = self
            .store
            .load_signed_pre_keys()?
            .iter()
            .map(SignedPreKeyRecord::timestamp)
            .max();

        let interval = self.config.signed_pre_key_rotation_interval;
        if let Some(timestamp) = newest {
            let age = Duration::from_millis(now_millis().saturating_sub(timestamp));
            if age < interval {
                return Ok(None);
            }
        }

        let record = self.generate_signed_pre_key()?;
        self.set_signed_pre_key(&record).await?;
        info!("Rotated signed pre-key to {}", record.id());

        Ok(Some(record))
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
