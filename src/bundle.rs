use crate::{Error, IdentityKey, X25519PublicKey};

/// Everything an initiator needs to open a session with one offline device.
///
/// A bundle is ephemeral: it is consumed once to build a session state and is
/// never persisted as-is.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreKeyBundle {
    registration_id: u32,
    device_id: u32,
    pre_key: Option<(u32, X25519PublicKey)>,
    signed_pre_key_id: u32,
    signed_pre_key_public: X25519PublicKey,
    signed_pre_key_signature: Vec<u8>,
    identity_key: IdentityKey,
}

impl PreKeyBundle {
    pub fn new(
        registration_id: u32,
        device_id: u32,
        pre_key: Option<(u32, X25519PublicKey)>,
        signed_pre_key: (u32, X25519PublicKey),
        signed_pre_key_signature: Vec<u8>,
        identity_key: IdentityKey,
    ) -> Self {
        Self {
            registration_id,
            device_id,
            pre_key,
            signed_pre_key_id: signed_pre_key.0,
            signed_pre_key_public: signed_pre_key.1,
            signed_pre_key_signature,
            identity_key,
        }
    }

    pub fn registration_id(&self) -> u32 {
        self.registration_id
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    pub fn pre_key_id(&self) -> Option<u32> {
        self.pre_key.map(|(id, _)| id)
    }

    pub fn pre_key_public(&self) -> Option<X25519PublicKey> {
        self.pre_key.map(|(_, key)| key)
    }

    pub fn signed_pre_key_id(&self) -> u32 {
        self.signed_pre_key_id
    }

    pub fn signed_pre_key_public(&self) -> X25519PublicKey {
        self.signed_pre_key_public
    }

    pub fn signed_pre_key_signature(&self) -> &[u8] {
        &self.signed_pre_key_signature
    }

    pub fn identity_key(&self) -> &IdentityKey {
        &self.identity_key
    }

    /// Verifies that the signed pre-key was signed by the bundle's identity.
    pub fn verify(&self) -> Result<(), Error> {
        self.identity_key
            .verify_signature(
                self.signed_pre_key_public.as_bytes(),
                &self.signed_pre_key_signature,
            )
            .map_err(|_| Error::InvalidKey("Invalid signature on device key".to_string()))
    }
}
