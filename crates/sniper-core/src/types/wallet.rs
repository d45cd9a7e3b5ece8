//! Persistent wallet key records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An encrypted signing key at rest.
///
/// The signing secret is sealed with AES-256-GCM under a password-derived
/// key; the four envelope fields are stored as separate columns. Plaintext
/// length is 32 (seed) or 64 (expanded keypair) bytes, nothing else.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EncryptedKey {
    pub id: Uuid,
    pub user_ref: String,
    pub wallet_id: Uuid,
    /// Base58-encoded public key.
    pub address: String,
    pub ciphertext: Vec<u8>,
    /// 32-byte key-derivation salt.
    pub salt: Vec<u8>,
    /// 12-byte AES-GCM nonce.
    pub nonce: Vec<u8>,
    /// 16-byte authentication tag.
    pub auth_tag: Vec<u8>,
    pub label: Option<String>,
    pub is_primary: bool,
    pub is_active: bool,
    pub times_used: i64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
