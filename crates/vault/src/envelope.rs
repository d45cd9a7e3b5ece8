//! Password-derived encryption envelope for signing secrets.
//!
//! Binary layout: `salt(32) ‖ nonce(12) ‖ auth_tag(16) ‖ ciphertext(N)`.
//! Textual form: the four fields base64-encoded and joined with `:`.
//!
//! The key is derived from the password with Argon2id over the random salt;
//! the secret is sealed with AES-256-GCM. The plaintext is a 32-byte seed or
//! a 64-byte expanded keypair, nothing else.

use crate::VaultError;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use zeroize::Zeroizing;

pub const SALT_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Argon2id memory cost in KiB. Sized so derivation takes well over 30ms on
/// commodity hardware.
const ARGON2_MEMORY_KIB: u32 = 65_536;
const ARGON2_ITERATIONS: u32 = 3;
const ARGON2_PARALLELISM: u32 = 4;

/// The two accepted plaintext lengths: Ed25519 seed and expanded keypair.
pub const ACCEPTED_SECRET_LENGTHS: [usize; 2] = [32, 64];

/// Reject a password before any key derivation happens: length 8..=128 with
/// at least one letter and one digit.
pub fn validate_password(password: &str) -> Result<(), VaultError> {
    let len = password.chars().count();
    if !(8..=128).contains(&len) {
        return Err(VaultError::InvalidPassword);
    }
    if !password.chars().any(|c| c.is_alphabetic()) {
        return Err(VaultError::InvalidPassword);
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(VaultError::InvalidPassword);
    }
    Ok(())
}

/// Derive a 32-byte encryption key from a password and salt with Argon2id.
pub fn derive_key(password: &str, salt: &[u8]) -> Result<Zeroizing<[u8; 32]>, VaultError> {
    let params = Params::new(ARGON2_MEMORY_KIB, ARGON2_ITERATIONS, ARGON2_PARALLELISM, Some(32))
        .map_err(|_| VaultError::EncryptionFailed)?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(password.as_bytes(), salt, key.as_mut())
        .map_err(|_| VaultError::EncryptionFailed)?;
    Ok(key)
}

/// An encryption envelope at rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEnvelope {
    pub salt: [u8; SALT_LEN],
    pub nonce: [u8; NONCE_LEN],
    pub auth_tag: [u8; TAG_LEN],
    pub ciphertext: Vec<u8>,
}

impl KeyEnvelope {
    /// Encrypt a signing secret under a password.
    ///
    /// The password must already satisfy the policy; the secret must be one
    /// of the two accepted lengths (anything else is a caller bug).
    pub fn seal(secret: &[u8], password: &str) -> Result<Self, VaultError> {
        assert!(
            ACCEPTED_SECRET_LENGTHS.contains(&secret.len()),
            "signing secret must be 32 or 64 bytes, got {}",
            secret.len()
        );
        validate_password(password)?;

        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut salt);
        rand::rng().fill_bytes(&mut nonce);

        let key = derive_key(password, &salt)?;
        let cipher =
            Aes256Gcm::new_from_slice(key.as_ref()).map_err(|_| VaultError::EncryptionFailed)?;

        // The aead API appends the 16-byte tag; split it back off for the
        // four-field envelope layout.
        let mut sealed = cipher
            .encrypt(Nonce::from_slice(&nonce), Payload::from(secret))
            .map_err(|_| VaultError::EncryptionFailed)?;
        let tag_start = sealed.len() - TAG_LEN;
        let mut auth_tag = [0u8; TAG_LEN];
        auth_tag.copy_from_slice(&sealed[tag_start..]);
        sealed.truncate(tag_start);

        Ok(Self {
            salt,
            nonce,
            auth_tag,
            ciphertext: sealed,
        })
    }

    /// Decrypt with strict authentication. Wrong passwords and tampered
    /// fields both surface as `InvalidPassword`.
    pub fn open(&self, password: &str) -> Result<Zeroizing<Vec<u8>>, VaultError> {
        let key = derive_key(password, &self.salt)?;
        let cipher =
            Aes256Gcm::new_from_slice(key.as_ref()).map_err(|_| VaultError::EncryptionFailed)?;

        let mut sealed = Vec::with_capacity(self.ciphertext.len() + TAG_LEN);
        sealed.extend_from_slice(&self.ciphertext);
        sealed.extend_from_slice(&self.auth_tag);

        let plaintext = cipher
            .decrypt(Nonce::from_slice(&self.nonce), sealed.as_slice())
            .map_err(|_| VaultError::InvalidPassword)?;

        Ok(Zeroizing::new(plaintext))
    }

    /// Serialize as `salt ‖ nonce ‖ auth_tag ‖ ciphertext`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SALT_LEN + NONCE_LEN + TAG_LEN + self.ciphertext.len());
        out.extend_from_slice(&self.salt);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.auth_tag);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Rebuild an envelope from the four stored columns.
    pub fn from_record(key: &sniper_core::types::EncryptedKey) -> Result<Self, VaultError> {
        let salt: [u8; SALT_LEN] = key
            .salt
            .as_slice()
            .try_into()
            .map_err(|_| VaultError::InvalidPassword)?;
        let nonce: [u8; NONCE_LEN] = key
            .nonce
            .as_slice()
            .try_into()
            .map_err(|_| VaultError::InvalidPassword)?;
        let auth_tag: [u8; TAG_LEN] = key
            .auth_tag
            .as_slice()
            .try_into()
            .map_err(|_| VaultError::InvalidPassword)?;
        Ok(Self {
            salt,
            nonce,
            auth_tag,
            ciphertext: key.ciphertext.clone(),
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, VaultError> {
        if bytes.len() <= SALT_LEN + NONCE_LEN + TAG_LEN {
            return Err(VaultError::InvalidPassword);
        }
        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        let mut auth_tag = [0u8; TAG_LEN];
        salt.copy_from_slice(&bytes[..SALT_LEN]);
        nonce.copy_from_slice(&bytes[SALT_LEN..SALT_LEN + NONCE_LEN]);
        auth_tag.copy_from_slice(&bytes[SALT_LEN + NONCE_LEN..SALT_LEN + NONCE_LEN + TAG_LEN]);
        Ok(Self {
            salt,
            nonce,
            auth_tag,
            ciphertext: bytes[SALT_LEN + NONCE_LEN + TAG_LEN..].to_vec(),
        })
    }

    /// Textual form: four base64 segments joined with `:`.
    pub fn to_text(&self) -> String {
        [
            BASE64.encode(self.salt),
            BASE64.encode(self.nonce),
            BASE64.encode(self.auth_tag),
            BASE64.encode(&self.ciphertext),
        ]
        .join(":")
    }

    pub fn from_text(text: &str) -> Result<Self, VaultError> {
        let segments: Vec<&str> = text.split(':').collect();
        if segments.len() != 4 {
            return Err(VaultError::InvalidPassword);
        }
        let decode = |s: &str| BASE64.decode(s).map_err(|_| VaultError::InvalidPassword);

        let salt_vec = decode(segments[0])?;
        let nonce_vec = decode(segments[1])?;
        let tag_vec = decode(segments[2])?;
        let ciphertext = decode(segments[3])?;

        let salt: [u8; SALT_LEN] =
            salt_vec.try_into().map_err(|_| VaultError::InvalidPassword)?;
        let nonce: [u8; NONCE_LEN] =
            nonce_vec.try_into().map_err(|_| VaultError::InvalidPassword)?;
        let auth_tag: [u8; TAG_LEN] =
            tag_vec.try_into().map_err(|_| VaultError::InvalidPassword)?;

        Ok(Self {
            salt,
            nonce,
            auth_tag,
            ciphertext,
        })
    }
}

/// Seal a plaintext under an already-derived 32-byte key. Output layout is
/// `nonce ‖ auth_tag ‖ ciphertext`; used for session re-encryption where the
/// key comes from the session token, not a password.
pub fn seal_with_key(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>, VaultError> {
    let mut nonce = [0u8; NONCE_LEN];
    rand::rng().fill_bytes(&mut nonce);

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| VaultError::EncryptionFailed)?;
    let mut sealed = cipher
        .encrypt(Nonce::from_slice(&nonce), Payload::from(plaintext))
        .map_err(|_| VaultError::EncryptionFailed)?;

    let tag_start = sealed.len() - TAG_LEN;
    let mut out = Vec::with_capacity(NONCE_LEN + TAG_LEN + tag_start);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed[tag_start..]);
    sealed.truncate(tag_start);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Open a blob produced by [`seal_with_key`].
pub fn open_with_key(key: &[u8; 32], blob: &[u8]) -> Result<Zeroizing<Vec<u8>>, VaultError> {
    if blob.len() <= NONCE_LEN + TAG_LEN {
        return Err(VaultError::InvalidPassword);
    }
    let (nonce, rest) = blob.split_at(NONCE_LEN);
    let (auth_tag, ciphertext) = rest.split_at(TAG_LEN);

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| VaultError::EncryptionFailed)?;
    let mut sealed = Vec::with_capacity(ciphertext.len() + TAG_LEN);
    sealed.extend_from_slice(ciphertext);
    sealed.extend_from_slice(auth_tag);

    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), sealed.as_slice())
        .map_err(|_| VaultError::InvalidPassword)?;

    Ok(Zeroizing::new(plaintext))
}
