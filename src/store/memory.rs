use crate::store::{
    Direction, IdentityKeyStore, PreKeyStore, SessionStore, SignedPreKeyStore,
};
use crate::{
    DEFAULT_DEVICE_ID, Error, IdentityKey, IdentityKeyPair, PreKeyRecord, ProtocolAddress,
    SessionRecord, SignedPreKeyRecord,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use tracing::warn;
use zeroize::Zeroizing;

/// A [`ProtocolStore`](crate::ProtocolStore) kept entirely in memory.
///
/// Records are held in their serialized form, so every load hands out an
/// independent copy and a round trip through the storage encoding is
/// exercised on every access.
pub struct InMemoryProtocolStore {
    identity_key_pair: Zeroizing<[u8; 64]>,
    registration_id: u32,
    identities: RwLock<HashMap<ProtocolAddress, IdentityKey>>,
    pre_keys: RwLock<HashMap<u32, Zeroizing<Vec<u8>>>>,
    signed_pre_keys: RwLock<BTreeMap<u32, Zeroizing<Vec<u8>>>>,
    sessions: RwLock<HashMap<ProtocolAddress, Vec<u8>>>,
}

impl InMemoryProtocolStore {
    pub fn new(identity_key_pair: &IdentityKeyPair, registration_id: u32) -> Self {
        Self {
            identity_key_pair: Zeroizing::new(identity_key_pair.serialize()),
            registration_id,
            identities: RwLock::new(HashMap::new()),
            pre_keys: RwLock::new(HashMap::new()),
            signed_pre_keys: RwLock::new(BTreeMap::new()),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Number of one-time pre-keys still unused.
    pub fn pre_key_count(&self) -> usize {
        self.pre_keys.read().len()
    }
}

impl IdentityKeyStore for InMemoryProtocolStore {
    fn get_identity_key_pair(&self) -> Result<IdentityKeyPair, Error> {
        IdentityKeyPair::deserialize(self.identity_key_pair.as_slice())
    }

    fn get_local_registration_id(&self) -> Result<u32, Error> {
        Ok(self.registration_id)
    }

    fn save_identity(
        &self,
        address: &ProtocolAddress,
        identity: &IdentityKey,
    ) -> Result<bool, Error> {
        let replaced = match self.identities.write().insert(address.clone(), *identity) {
            Some(previous) => previous != *identity,
            None => false,
        };

        if replaced {
            warn!("Identity key changed for {address}");
        }

        Ok(replaced)
    }

    fn is_trusted_identity(
        &self,
        address: &ProtocolAddress,
        identity: &IdentityKey,
        _direction: Direction,
    ) -> Result<bool, Error> {
        Ok(match self.identities.read().get(address) {
            Some(trusted) => trusted == identity,
            None => true,
        })
    }

    fn get_identity(&self, address: &ProtocolAddress) -> Result<Option<IdentityKey>, Error> {
        Ok(self.identities.read().get(address).copied())
    }
}

impl PreKeyStore for InMemoryProtocolStore {
    fn load_pre_key(&self, id: u32) -> Result<PreKeyRecord, Error> {
        let pre_keys = self.pre_keys.read();
        let bytes = pre_keys.get(&id).ok_or(Error::InvalidKeyId(id))?;
        PreKeyRecord::deserialize(bytes)
    }

    fn store_pre_key(&self, id: u32, record: &PreKeyRecord) -> Result<(), Error> {
        self.pre_keys
            .write()
            .insert(id, Zeroizing::new(record.serialize()));
        Ok(())
    }

    fn contains_pre_key(&self, id: u32) -> Result<bool, Error> {
        Ok(self.pre_keys.read().contains_key(&id))
    }

    fn remove_pre_key(&self, id: u32) -> Result<(), Error> {
        self.pre_keys.write().remove(&id);
        Ok(())
    }
}

impl SignedPreKeyStore for InMemoryProtocolStore {
    fn load_signed_pre_key(&self, id: u32) -> Result<SignedPreKeyRecord, Error> {
        let signed_pre_keys = self.signed_pre_keys.read();
        let bytes = signed_pre_keys.get(&id).ok_or(Error::InvalidKeyId(id))?;
        SignedPreKeyRecord::deserialize(bytes)
    }

    fn load_signed_pre_keys(&self) -> Result<Vec<SignedPreKeyRecord>, Error> {
        self.signed_pre_keys
            .read()
            .values()
            .map(|bytes| SignedPreKeyRecord::deserialize(bytes))
            .collect()
    }

    fn store_signed_pre_key(&self, id: u32, record: &SignedPreKeyRecord) -> Result<(), Error> {
        self.signed_pre_keys
            .write()
            .insert(id, Zeroizing::new(record.serialize()));
        Ok(())
    }

    fn contains_signed_pre_key(&self, id: u32) -> Result<bool, Error> {
        Ok(self.signed_pre_keys.read().contains_key(&id))
    }

    fn remove_signed_pre_key(&self, id: u32) -> Result<(), Error> {
        self.signed_pre_keys.write().remove(&id);
        Ok(())
    }
}

impl SessionStore for InMemoryProtocolStore {
    fn load_session(&self, address: &ProtocolAddress) -> Result<SessionRecord, Error> {
        match self.sessions.read().get(address) {
            Some(bytes) => SessionRecord::deserialize(bytes),
            None => Ok(SessionRecord::new_fresh()),
        }
    }

    fn get_sub_device_sessions(&self, name: &str) -> Result<Vec<u32>, Error> {
        let mut devices: Vec<u32> = self
            .sessions
            .read()
            .keys()
            .filter(|address| address.name() == name && address.device_id() != DEFAULT_DEVICE_ID)
            .map(ProtocolAddress::device_id)
            .collect();
        devices.sort_unstable();
        Ok(devices)
    }

    fn store_session(&self, address: &ProtocolAddress, record: &SessionRecord) -> Result<(), Error> {
        self.sessions
            .write()
            .insert(address.clone(), record.serialize());
        Ok(())
    }

    fn contains_session(&self, address: &ProtocolAddress) -> Result<bool, Error> {
        let Some(bytes) = self.sessions.read().get(address).cloned() else {
            return Ok(false);
        };

        let record = SessionRecord::deserialize(&bytes)?;
        Ok(record
            .session_state()
            .is_some_and(|state| state.has_sender_chain()))
    }

    fn delete_session(&self, address: &ProtocolAddress) -> Result<(), Error> {
        self.sessions.write().remove(address);
        Ok(())
    }

    fn delete_all_sessions(&self, name: &str) -> Result<(), Error> {
        self.sessions
            .write()
            .retain(|address, _| address.name() != name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> InMemoryProtocolStore {
        InMemoryProtocolStore::new(&IdentityKeyPair::generate().unwrap(), 1234)
    }

    fn identity() -> IdentityKey {
        IdentityKeyPair::generate().unwrap().identity_key()
    }

    #[test]
    fn test_local_identity() {
        let identity_key_pair = IdentityKeyPair::generate().unwrap();
        let store = InMemoryProtocolStore::new(&identity_key_pair, 99);

        assert_eq!(
            store.get_identity_key_pair().unwrap().identity_key(),
            identity_key_pair.identity_key()
        );
        assert_eq!(store.get_local_registration_id().unwrap(), 99);
    }

    #[test]
    fn test_trust_on_first_use() {
        let store = store();
        let address = ProtocolAddress::new("+14151111111", 1);
        let (first, second) = (identity(), identity());

        // Unknown address: trusted in both directions.
        assert!(store.is_trusted_identity(&address, &first, Direction::Receiving).unwrap());
        assert!(store.is_trusted_identity(&address, &first, Direction::Sending).unwrap());

        store.save_identity(&address, &second).unwrap();
        assert!(!store.is_trusted_identity(&address, &first, Direction::Receiving).unwrap());

        store.save_identity(&address, &first).unwrap();
        assert!(store.is_trusted_identity(&address, &first, Direction::Receiving).unwrap());
    }

    #[test]
    fn test_save_identity_reports_replacement() {
        let store = store();
        let address = ProtocolAddress::new("+14152222222", 1);
        let (first, second) = (identity(), identity());

        assert!(!store.save_identity(&address, &first).unwrap());
        assert_eq!(store.get_identity(&address).unwrap(), Some(first));
        assert!(!store.save_identity(&address, &first).unwrap());
        assert!(store.save_identity(&address, &second).unwrap());
        assert_eq!(store.get_identity(&address).unwrap(), Some(second));
    }

    #[test]
    fn test_pre_key_storage() {
        let store = store();
        let record = PreKeyRecord::generate(5).unwrap();

        assert!(matches!(store.load_pre_key(5), Err(Error::InvalidKeyId(5))));
        store.store_pre_key(5, &record).unwrap();
        assert!(store.contains_pre_key(5).unwrap());
        assert_eq!(store.load_pre_key(5).unwrap().public_key(), record.public_key());
        assert_eq!(store.pre_key_count(), 1);

        store.remove_pre_key(5).unwrap();
        assert!(!store.contains_pre_key(5).unwrap());
    }

    #[test]
    fn test_session_listing_and_deletion() {
        let store = store();
        let record = SessionRecord::new_fresh();
        for device in [1, 3, 2] {
            store
                .store_session(&ProtocolAddress::new("+1", device), &record)
                .unwrap();
        }
        store
            .store_session(&ProtocolAddress::new("+2", 4), &record)
            .unwrap();

        assert_eq!(store.get_sub_device_sessions("+1").unwrap(), vec![2, 3]);
        // A record without a sender chain is not a usable session.
        assert!(!store.contains_session(&ProtocolAddress::new("+1", 1)).unwrap());

        store.delete_session(&ProtocolAddress::new("+1", 3)).unwrap();
        assert_eq!(store.get_sub_device_sessions("+1").unwrap(), vec![2]);

        store.delete_all_sessions("+1").unwrap();
        assert!(store.get_sub_device_sessions("+1").unwrap().is_empty());
        assert_eq!(store.get_sub_device_sessions("+2").unwrap(), vec![4]);
    }

    #[test]
    fn test_missing_session_loads_fresh() {
        let store = store();
        let record = store.load_session(&ProtocolAddress::new("+3", 1)).unwrap();
        assert!(record.is_fresh());
    }
}
