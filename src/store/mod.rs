//! Narrow storage capabilities consumed by sessions, the dispatcher and the
//! receiver. One adapter usually implements all of them; anything that does
//! is a [`ProtocolStore`].

mod memory;

pub use memory::InMemoryProtocolStore;

use crate::{
    Error, IdentityKey, IdentityKeyPair, PreKeyRecord, ProtocolAddress, SessionRecord,
    SignedPreKeyRecord,
};

/// Which way a message is travelling when identity trust is checked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Sending,
    Receiving,
}

/// The local long-term identity and the remote identities trusted so far.
pub trait IdentityKeyStore: Send + Sync {
    fn get_identity_key_pair(&self) -> Result<IdentityKeyPair, Error>;

    fn get_local_registration_id(&self) -> Result<u32, Error>;

    /// Stores `identity` as trusted for `address`.
    ///
    /// Returns true only when a *different* key was stored before.
    fn save_identity(&self, address: &ProtocolAddress, identity: &IdentityKey)
    -> Result<bool, Error>;

    /// Trust on first use: true when nothing is stored or the stored key equals
    /// `identity`.
    fn is_trusted_identity(
        &self,
        address: &ProtocolAddress,
        identity: &IdentityKey,
        direction: Direction,
    ) -> Result<bool, Error>;

    fn get_identity(&self, address: &ProtocolAddress) -> Result<Option<IdentityKey>, Error>;
}

pub trait PreKeyStore: Send + Sync {
    fn load_pre_key(&self, id: u32) -> Result<PreKeyRecord, Error>;

    fn store_pre_key(&self, id: u32, record: &PreKeyRecord) -> Result<(), Error>;

    fn contains_pre_key(&self, id: u32) -> Result<bool, Error>;

    fn remove_pre_key(&self, id: u32) -> Result<(), Error>;
}

pub trait SignedPreKeyStore: Send + Sync {
    fn load_signed_pre_key(&self, id: u32) -> Result<SignedPreKeyRecord, Error>;

    fn load_signed_pre_keys(&self) -> Result<Vec<SignedPreKeyRecord>, Error>;

    fn store_signed_pre_key(&self, id: u32, record: &SignedPreKeyRecord) -> Result<(), Error>;

    fn contains_signed_pre_key(&self, id: u32) -> Result<bool, Error>;

    fn remove_signed_pre_key(&self, id: u32) -> Result<(), Error>;
}

pub trait SessionStore: Send + Sync {
    /// Returns the stored record, or a fresh one when none exists.
    fn load_session(&self, address: &ProtocolAddress) -> Result<SessionRecord, Error>;

    /// Device ids other than [`DEFAULT_DEVICE_ID`](crate::DEFAULT_DEVICE_ID)
    /// that have a session under `name`.
    fn get_sub_device_sessions(&self, name: &str) -> Result<Vec<u32>, Error>;

    fn store_session(&self, address: &ProtocolAddress, record: &SessionRecord) -> Result<(), Error>;

    fn contains_session(&self, address: &ProtocolAddress) -> Result<bool, Error>;

    fn delete_session(&self, address: &ProtocolAddress) -> Result<(), Error>;

    fn delete_all_sessions(&self, name: &str) -> Result<(), Error>;
}

/// Every store capability at once.
pub trait ProtocolStore: IdentityKeyStore + PreKeyStore + SignedPreKeyStore + SessionStore {}

impl<T> ProtocolStore for T where T: IdentityKeyStore + PreKeyStore + SignedPreKeyStore + SessionStore {}
