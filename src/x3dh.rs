use crate::ratchet::{ChainKey, RootKey};
use crate::{Error, IdentityKeyPair, X25519PublicKey, X25519Secret};
use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::SharedSecret;
use zeroize::Zeroize;

/// Leading 0xFF block of the agreement input, so that it can never collide
/// with a plain Curve25519 encoding.
const DISCONTINUITY: [u8; 32] = [0xFF; 32];

/// The initiator's (Alice's) view of a key agreement.
pub(crate) struct AliceParameters<'a> {
    pub(crate) our_identity: &'a IdentityKeyPair,
    pub(crate) our_base_key: &'a X25519Secret,
    pub(crate) their_identity: &'a X25519PublicKey,
    pub(crate) their_signed_pre_key: &'a X25519PublicKey,
    pub(crate) their_one_time_pre_key: Option<&'a X25519PublicKey>,
}

/// The responder's (Bob's) view of a key agreement.
pub(crate) struct BobParameters<'a> {
    pub(crate) our_identity: &'a IdentityKeyPair,
    pub(crate) our_signed_pre_key: &'a X25519Secret,
    pub(crate) our_one_time_pre_key: Option<&'a X25519Secret>,
    pub(crate) their_identity: &'a X25519PublicKey,
    pub(crate) their_base_key: &'a X25519PublicKey,
}

/// Implementation of the X3DH (Extended Triple Diffie-Hellman) key agreement.
///
/// Produces the initial root key and chain key both sides seed their
/// ratchet with.
pub(crate) struct X3DH {
    info: Vec<u8>,
}

impl X3DH {
    /// The info parameter is used as HKDF context so that keys derived for
    /// different applications never coincide.
    pub(crate) fn new(info: &[u8]) -> Self {
        Self {
            info: info.to_vec(),
        }
    }

    pub(crate) fn agree_as_alice(
        &self,
        params: &AliceParameters<'_>,
    ) -> Result<(RootKey, ChainKey), Error> {
        // DH1 = DH(IKa, SPKb)
        let dh1 = params.our_identity.dh(params.their_signed_pre_key);
        // DH2 = DH(EKa, IKb)
        let dh2 = params.our_base_key.dh(params.their_identity);
        // DH3 = DH(EKa, SPKb)
        let dh3 = params.our_base_key.dh(params.their_signed_pre_key);
        // DH4 = DH(EKa, OPKb)
        let dh4 = params
            .their_one_time_pre_key
            .map(|otpk| params.our_base_key.dh(otpk));

        self.derive(dh1, dh2, dh3, dh4)
    }

    pub(crate) fn agree_as_bob(
        &self,
        params: &BobParameters<'_>,
    ) -> Result<(RootKey, ChainKey), Error> {
        // DH1 = DH(SPKb, IKa)
        let dh1 = params.our_signed_pre_key.dh(params.their_identity);
        // DH2 = DH(IKb, EKa)
        let dh2 = params.our_identity.dh(params.their_base_key);
        // DH3 = DH(SPKb, EKa)
        let dh3 = params.our_signed_pre_key.dh(params.their_base_key);
        // DH4 = DH(OPKb, EKa)
        let dh4 = params
            .our_one_time_pre_key
            .map(|otpk| otpk.dh(params.their_base_key));

        self.derive(dh1, dh2, dh3, dh4)
    }

    fn derive(
        &self,
        dh1: SharedSecret,
        dh2: SharedSecret,
        dh3: SharedSecret,
        dh4: Option<SharedSecret>,
    ) -> Result<(RootKey, ChainKey), Error> {
        // IKM = 0xFF * 32 || DH1 || DH2 || DH3 || DH4 (if available)
        let mut key_material = Vec::with_capacity(160);
        key_material.extend_from_slice(&DISCONTINUITY);
        key_material.extend_from_slice(dh1.as_bytes());
        key_material.extend_from_slice(dh2.as_bytes());
        key_material.extend_from_slice(dh3.as_bytes());
        if let Some(dh4) = &dh4 {
            key_material.extend_from_slice(dh4.as_bytes());
        }

        let hkdf = Hkdf::<Sha256>::new(Some(&[0u8; 32]), &key_material);
        key_material.zeroize();

        let mut derived = [0u8; 64];
        hkdf.expand(&self.info, &mut derived)
            .map_err(|_| Error::Crypto("HKDF expansion failed".to_string()))?;

        let mut root = [0u8; 32];
        let mut chain = [0u8; 32];
        root.copy_from_slice(&derived[0..32]);
        chain.copy_from_slice(&derived[32..64]);
        derived.zeroize();

        Ok((RootKey::new(root), ChainKey::new(chain, 0)))
    }
}
