use crate::store::SessionStore;
use crate::{DEFAULT_DEVICE_ID, Error, ProtocolAddress};
use parking_lot::{Mutex, MutexGuard};
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};

const DEFAULT_SHARDS: usize = 64;

struct Shards {
    mutexes: Box<[Mutex<()>]>,
    hasher: RandomState,
}

impl Shards {
    fn new(count: usize) -> Self {
        Self {
            mutexes: (0..count.max(1)).map(|_| Mutex::new(())).collect(),
            hasher: RandomState::new(),
        }
    }

    fn index_of<K: Hash + ?Sized>(&self, key: &K) -> usize {
        (self.hasher.hash_one(key) % self.mutexes.len() as u64) as usize
    }

    fn lock<K: Hash + ?Sized>(&self, key: &K) -> MutexGuard<'_, ()> {
        self.mutexes[self.index_of(key)].lock()
    }
}

/// Sharded lock tables serializing read-modify-write access to one session
/// (per [`ProtocolAddress`]) and consumption of one one-time pre-key (per id).
///
/// Unrelated keys usually land in different shards and proceed concurrently;
/// colliding keys share a shard. When both are needed the session lock is
/// taken first. Guards are synchronous and never held across an `.await`.
pub struct SessionLocks {
    sessions: Shards,
    pre_keys: Shards,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    pub fn with_shards(shards: usize) -> Self {
        Self {
            sessions: Shards::new(shards),
            pre_keys: Shards::new(shards),
        }
    }

    pub fn lock_session(&self, address: &ProtocolAddress) -> MutexGuard<'_, ()> {
        self.sessions.lock(address)
    }

    pub fn lock_pre_key(&self, pre_key_id: u32) -> MutexGuard<'_, ()> {
        self.pre_keys.lock(&pre_key_id)
    }

    /// Deletes the session with every device of `name`, taking each device's
    /// session lock in turn so that no in-flight ratchet step writes a
    /// deleted record back.
    pub fn delete_all_sessions<S>(&self, store: &S, name: &str) -> Result<(), Error>
    where
        S: SessionStore + ?Sized,
    {
        let mut device_ids = vec![DEFAULT_DEVICE_ID];
        device_ids.extend(store.get_sub_device_sessions(name)?);

        for device_id in device_ids {
            let address = ProtocolAddress::new(name, device_id);
            let _guard = self.lock_session(&address);
            store.delete_session(&address)?;
        }
        Ok(())
    }
}

impl Default for SessionLocks {
    fn default() -> Self {
        Self::new()
    }
}
