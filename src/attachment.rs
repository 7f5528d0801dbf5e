use crate::proto::AttachmentPointerStructure;
use crate::Error;
use aes_gcm_siv::aead::Aead;
use aes_gcm_siv::{Aes256GcmSiv, Key, KeyInit, Nonce};
use hmac::{Hmac, Mac};
use rand::TryRngCore;
use rand::rngs::OsRng;
use sha2::Sha256;
use std::io::{self, Cursor, Read};
use zeroize::Zeroizing;

/// AES-256 key followed by an HMAC-SHA256 key.
pub const ATTACHMENT_KEY_LENGTH: usize = 64;

const NONCE_LENGTH: usize = 12;
const MAC_LENGTH: usize = 32;

type HmacSha256 = Hmac<Sha256>;

/// Reference to an encrypted attachment blob held by the server.
///
/// The key travels inside the (end-to-end encrypted) message, so attachment
/// confidentiality does not depend on any session state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttachmentPointer {
    pub id: u64,
    pub content_type: String,
    pub key: Vec<u8>,
    pub size: Option<u32>,
    /// Server the blob lives on, when it is not ours.
    pub relay: Option<String>,
}

impl AttachmentPointer {
    pub(crate) fn to_proto(&self) -> AttachmentPointerStructure {
        AttachmentPointerStructure {
            id: self.id,
            content_type: self.content_type.clone(),
            key: self.key.clone(),
            size: self.size,
        }
    }

    pub(crate) fn from_proto(proto: AttachmentPointerStructure) -> Self {
        Self {
            id: proto.id,
            content_type: proto.content_type,
            key: proto.key,
            size: proto.size,
            relay: None,
        }
    }
}

pub fn generate_attachment_key() -> Result<Zeroizing<[u8; ATTACHMENT_KEY_LENGTH]>, Error> {
    let mut key = Zeroizing::new([0u8; ATTACHMENT_KEY_LENGTH]);
    OsRng
        .try_fill_bytes(key.as_mut_slice())
        .map_err(|_| Error::Random)?;
    Ok(key)
}

/// Encrypts an attachment into `nonce || ciphertext || mac`.
pub fn encrypt_attachment(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, Error> {
    let (cipher_key, mac_key) = split_key(key)?;

    let mut nonce = [0u8; NONCE_LENGTH];
    OsRng
        .try_fill_bytes(&mut nonce)
        .map_err(|_| Error::Random)?;

    let cipher = Aes256GcmSiv::new(Key::<Aes256GcmSiv>::from_slice(cipher_key));
    let ciphertext = cipher.encrypt(Nonce::from_slice(&nonce), plaintext)?;

    let mut blob = Vec::with_capacity(NONCE_LENGTH + ciphertext.len() + MAC_LENGTH);
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);

    let mut mac = hmac(mac_key)?;
    mac.update(&blob);
    blob.extend_from_slice(&mac.finalize().into_bytes());

    Ok(blob)
}

/// Verifies the MAC, then decrypts a blob produced by [`encrypt_attachment`].
pub fn decrypt_attachment(key: &[u8], blob: &[u8]) -> Result<Vec<u8>, Error> {
    let (cipher_key, mac_key) = split_key(key)?;

    if blob.len() < NONCE_LENGTH + MAC_LENGTH {
        return Err(Error::InvalidMessage("Attachment too short".to_string()));
    }

    let (authenticated, their_mac) = blob.split_at(blob.len() - MAC_LENGTH);
    let mut mac = hmac(mac_key)?;
    mac.update(authenticated);
    mac.verify_slice(their_mac)
        .map_err(|_| Error::InvalidMessage("Attachment MAC mismatch".to_string()))?;

    let (nonce, ciphertext) = authenticated.split_at(NONCE_LENGTH);
    let cipher = Aes256GcmSiv::new(Key::<Aes256GcmSiv>::from_slice(cipher_key));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| Error::InvalidMessage("Attachment decryption failed".to_string()))
}

fn split_key(key: &[u8]) -> Result<(&[u8], &[u8]), Error> {
    if key.len() != ATTACHMENT_KEY_LENGTH {
        return Err(Error::InvalidKey(format!(
            "attachment key must be {ATTACHMENT_KEY_LENGTH} bytes, got {}",
            key.len()
        )));
    }
    Ok(key.split_at(32))
}

fn hmac(key: &[u8]) -> Result<HmacSha256, Error> {
    <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|_| Error::Crypto("HMAC initialization failed".to_string()))
}

/// Plaintext of a downloaded attachment.
///
/// The whole blob is authenticated before the first byte is handed out.
pub struct AttachmentReader {
    plaintext: Cursor<Zeroizing<Vec<u8>>>,
}

impl AttachmentReader {
    pub fn new(key: &[u8], blob: &[u8]) -> Result<Self, Error> {
        Ok(Self {
            plaintext: Cursor::new(Zeroizing::new(decrypt_attachment(key, blob)?)),
        })
    }

    pub fn len(&self) -> usize {
        self.plaintext.get_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Read for AttachmentReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.plaintext.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attachment_cipher() {
        let key = generate_attachment_key().unwrap();
        let plaintext = vec![0x5a; 10 * 1024];

        let blob = encrypt_attachment(key.as_slice(), &plaintext).unwrap();
        assert_eq!(blob.len(), NONCE_LENGTH + plaintext.len() + 16 + MAC_LENGTH);

        let mut reader = AttachmentReader::new(key.as_slice(), &blob).unwrap();
        let mut restored = Vec::new();
        reader.read_to_end(&mut restored).unwrap();
        assert_eq!(restored, plaintext);
    }

    #[test]
    fn test_tampered_attachment_is_rejected() {
        let key = generate_attachment_key().unwrap();
        let mut blob = encrypt_attachment(key.as_slice(), b"secret picture").unwrap();
        blob[NONCE_LENGTH] ^= 0x80;

        assert!(matches!(
            decrypt_attachment(key.as_slice(), &blob),
            Err(Error::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_wrong_key_and_short_blob() {
        let key = generate_attachment_key().unwrap();
        let other = generate_attachment_key().unwrap();
        let blob = encrypt_attachment(key.as_slice(), b"data").unwrap();

        assert!(matches!(
            decrypt_attachment(other.as_slice(), &blob),
            Err(Error::InvalidMessage(_))
        ));
        assert!(matches!(
            decrypt_attachment(key.as_slice(), &blob[..20]),
            Err(Error::InvalidMessage(_))
        ));
        assert!(matches!(
            decrypt_attachment(&key[..32], &blob),
            Err(Error::InvalidKey(_))
        ));
    }
}
