//! Session engine: unlock, scoped signing, extend, destroy.
//!
//! A session token is 32 random bytes, hex-encoded. The session key is
//! re-derived from the raw token bytes with HKDF-SHA256 on every use and is
//! never persisted; the shared store only ever holds the re-encrypted
//! signing secret.

use crate::envelope::{self, KeyEnvelope};
use crate::VaultError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use ed25519_dalek::{Signer, SigningKey};
use hkdf::Hkdf;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use sniper_core::db::WalletDirectory;
use sniper_core::store::{keys, SharedStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Fixed HKDF domain separator for session keys.
const SESSION_KDF_SALT: &[u8] = b"sniper-bot::session-kdf-v1";
const SESSION_KDF_INFO: &[u8] = b"wallet-session-v1";
/// Separate label for the password-vault key so the two keys derived from
/// one token never coincide.
const PASSWORD_KDF_INFO: &[u8] = b"password-vault-v1";

/// Default session lifetime.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(15 * 60);

/// The session record as stored, JSON-encoded, under
/// `wallet:session:{token}`. Contains only the re-encrypted secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_token: String,
    pub user_ref: String,
    pub wallet_ref: uuid::Uuid,
    /// Base64 of `nonce ‖ auth_tag ‖ ciphertext` under the session key.
    pub session_ciphertext: String,
    pub expires_at: DateTime<Utc>,
}

/// A scoped handle over a decrypted signing key.
///
/// The raw secret is never exposed; callers sign through the handle and the
/// key material is zeroed when the handle drops.
pub struct SigningHandle {
    key: SigningKey,
}

impl SigningHandle {
    fn from_secret(secret: &[u8]) -> Result<Self, VaultError> {
        let key = match secret.len() {
            32 => {
                let seed: [u8; 32] = secret.try_into().expect("length checked");
                SigningKey::from_bytes(&seed)
            }
            64 => {
                let bytes: [u8; 64] = secret.try_into().expect("length checked");
                SigningKey::from_keypair_bytes(&bytes)
                    .map_err(|_| VaultError::InvalidPassword)?
            }
            other => panic!("signing secret must be 32 or 64 bytes, got {other}"),
        };
        Ok(Self { key })
    }

    /// Base58 public key.
    pub fn address(&self) -> String {
        bs58::encode(self.key.verifying_key().as_bytes()).into_string()
    }

    /// Sign an arbitrary message.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.key.sign(message).to_bytes()
    }

    /// Fill the first signature slot of a serialized unsigned transaction.
    ///
    /// Layout: a compact signature count (single byte for < 128 signatures),
    /// the 64-byte signature slots, then the signed message bytes.
    pub fn sign_transaction_base64(&self, unsigned_tx: &str) -> Result<String, VaultError> {
        let mut tx = BASE64
            .decode(unsigned_tx)
            .map_err(|_| VaultError::EncryptionFailed)?;

        let sig_count = *tx.first().ok_or(VaultError::EncryptionFailed)? as usize;
        if sig_count == 0 || sig_count >= 128 {
            return Err(VaultError::EncryptionFailed);
        }
        let message_start = 1 + sig_count * 64;
        if tx.len() <= message_start {
            return Err(VaultError::EncryptionFailed);
        }

        let signature = self.sign(&tx[message_start..]);
        tx[1..65].copy_from_slice(&signature);
        Ok(BASE64.encode(tx))
    }
}

impl std::fmt::Debug for SigningHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.debug_struct("SigningHandle")
            .field("address", &self.address())
            .finish()
    }
}

/// Session engine over the shared store.
pub struct SessionEngine {
    store: Arc<dyn SharedStore>,
    wallets: Arc<dyn WalletDirectory>,
    ttl: Duration,
}

impl SessionEngine {
    pub fn new(store: Arc<dyn SharedStore>, wallets: Arc<dyn WalletDirectory>) -> Self {
        Self::with_ttl(store, wallets, DEFAULT_SESSION_TTL)
    }

    pub fn with_ttl(
        store: Arc<dyn SharedStore>,
        wallets: Arc<dyn WalletDirectory>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            wallets,
            ttl,
        }
    }

    /// Unlock a user's primary wallet, creating a session.
    ///
    /// The password-derived decryption and the re-encryption under the
    /// session key happen back to back; the plaintext secret lives only on
    /// this stack frame and is zeroed when it leaves scope.
    pub async fn unlock(
        &self,
        user_ref: &str,
        password: &str,
        remember_password: bool,
    ) -> Result<String, VaultError> {
        envelope::validate_password(password)?;

        let key_record = self
            .wallets
            .primary_for_user(user_ref)
            .await?
            .ok_or(VaultError::NoPrimaryWallet)?;

        let sealed = KeyEnvelope::from_record(&key_record)?;

        // Argon2id is CPU-bound; keep it off the reactor.
        let password_owned = password.to_string();
        let secret = tokio::task::spawn_blocking(move || sealed.open(&password_owned))
            .await
            .map_err(|_| VaultError::EncryptionFailed)??;

        let (token_hex, token_bytes) = generate_token();
        let session_key = derive_session_key(&token_bytes, SESSION_KDF_INFO);
        let session_ciphertext = envelope::seal_with_key(&session_key, &secret)?;

        let record = SessionRecord {
            session_token: token_hex.clone(),
            user_ref: user_ref.to_string(),
            wallet_ref: key_record.wallet_id,
            session_ciphertext: BASE64.encode(session_ciphertext),
            expires_at: Utc::now() + ChronoDuration::from_std(self.ttl).expect("ttl fits"),
        };

        self.store
            .set(
                &keys::session(&token_hex),
                &serde_json::to_string(&record).map_err(sniper_core::Error::from)?,
                Some(self.ttl),
            )
            .await?;

        if remember_password {
            let password_key = derive_session_key(&token_bytes, PASSWORD_KDF_INFO);
            let sealed_password = envelope::seal_with_key(&password_key, password.as_bytes())?;
            self.store
                .set(
                    &keys::session_password(&token_hex),
                    &BASE64.encode(sealed_password),
                    Some(self.ttl),
                )
                .await?;
        }

        self.index_session(user_ref, &token_hex).await;

        info!(user_ref = %user_ref, wallet_ref = %key_record.wallet_id, "Session created");
        Ok(token_hex)
    }

    /// Produce a scoped signing handle for a live session.
    pub async fn signing_handle(&self, session_token: &str) -> Result<SigningHandle, VaultError> {
        let record = self.fetch_live(session_token).await?;

        let token_bytes = decode_token(session_token)?;
        let session_key = derive_session_key(&token_bytes, SESSION_KDF_INFO);

        let blob = BASE64
            .decode(&record.session_ciphertext)
            .map_err(|_| VaultError::SessionNotFound)?;
        let secret = envelope::open_with_key(&session_key, &blob)?;

        SigningHandle::from_secret(&secret)
    }

    /// The stored password for a session, if one was remembered at unlock.
    pub async fn remembered_password(
        &self,
        session_token: &str,
    ) -> Result<Option<Zeroizing<String>>, VaultError> {
        let raw = match self
            .store
            .get(&keys::session_password(session_token))
            .await?
        {
            Some(raw) => raw,
            None => return Ok(None),
        };

        let token_bytes = decode_token(session_token)?;
        let password_key = derive_session_key(&token_bytes, PASSWORD_KDF_INFO);
        let blob = BASE64
            .decode(&raw)
            .map_err(|_| VaultError::SessionNotFound)?;
        let plaintext = envelope::open_with_key(&password_key, &blob)?;

        let password =
            String::from_utf8(plaintext.to_vec()).map_err(|_| VaultError::InvalidPassword)?;
        Ok(Some(Zeroizing::new(password)))
    }

    /// Push a session's expiry out by `additional`.
    pub async fn extend(
        &self,
        session_token: &str,
        additional: Duration,
    ) -> Result<DateTime<Utc>, VaultError> {
        let mut record = self.fetch_live(session_token).await?;
        record.expires_at += ChronoDuration::from_std(additional).expect("ttl fits");

        let remaining = (record.expires_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        self.store
            .set(
                &keys::session(session_token),
                &serde_json::to_string(&record).map_err(sniper_core::Error::from)?,
                Some(remaining),
            )
            .await?;
        self.store
            .expire(&keys::session_password(session_token), remaining)
            .await?;

        debug!(expires_at = %record.expires_at, "Session extended");
        Ok(record.expires_at)
    }

    /// Destroy a session and its paired password entry. Idempotent.
    pub async fn destroy(&self, session_token: &str) -> Result<bool, VaultError> {
        let existed = self.store.delete(&keys::session(session_token)).await?;
        self.store
            .delete(&keys::session_password(session_token))
            .await?;
        if existed {
            debug!("Session destroyed");
        }
        Ok(existed)
    }

    /// Destroy every session belonging to a user.
    pub async fn destroy_all_for_user(&self, user_ref: &str) -> Result<u32, VaultError> {
        let index_key = session_index_key(user_ref);
        let tokens: Vec<String> = match self.store.get(&index_key).await? {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            None => Vec::new(),
        };

        let mut destroyed = 0;
        for token in &tokens {
            if self.destroy(token).await? {
                destroyed += 1;
            }
        }
        self.store.delete(&index_key).await?;

        info!(user_ref = %user_ref, destroyed, "Destroyed all sessions for user");
        Ok(destroyed)
    }

    // Private methods

    async fn fetch_live(&self, session_token: &str) -> Result<SessionRecord, VaultError> {
        let raw = self
            .store
            .get(&keys::session(session_token))
            .await?
            .ok_or(VaultError::SessionNotFound)?;

        let record: SessionRecord =
            serde_json::from_str(&raw).map_err(|_| VaultError::SessionNotFound)?;

        // The store TTL usually handles expiry; the explicit check covers
        // stores without eager eviction.
        if record.expires_at <= Utc::now() {
            self.destroy(session_token).await?;
            return Err(VaultError::SessionExpired);
        }

        Ok(record)
    }

    /// Best-effort per-user token index for `destroy_all_for_user`. A racing
    /// unlock can leave a stale token behind; it expires by TTL regardless.
    async fn index_session(&self, user_ref: &str, token: &str) {
        let index_key = session_index_key(user_ref);
        let mut tokens: Vec<String> = match self.store.get(&index_key).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_default(),
            _ => Vec::new(),
        };
        tokens.push(token.to_string());

        if let Ok(raw) = serde_json::to_string(&tokens) {
            if let Err(e) = self.store.set(&index_key, &raw, Some(self.ttl)).await {
                warn!(error = %e, "Failed to update session index");
            }
        }
    }
}

fn session_index_key(user_ref: &str) -> String {
    format!("wallet:sessions:{user_ref}")
}

fn generate_token() -> (String, Zeroizing<[u8; 32]>) {
    let mut bytes = Zeroizing::new([0u8; 32]);
    rand::rng().fill_bytes(bytes.as_mut());
    (hex::encode(bytes.as_ref()), bytes)
}

fn decode_token(token_hex: &str) -> Result<Zeroizing<[u8; 32]>, VaultError> {
    let raw = hex::decode(token_hex).map_err(|_| VaultError::SessionNotFound)?;
    let bytes: [u8; 32] = raw.try_into().map_err(|_| VaultError::SessionNotFound)?;
    Ok(Zeroizing::new(bytes))
}

/// HKDF-SHA256 over the raw token bytes. The session key never leaves the
/// process and is never stored.
fn derive_session_key(token_bytes: &[u8; 32], info: &[u8]) -> [u8; 32] {
    let hkdf = Hkdf::<Sha256>::new(Some(SESSION_KDF_SALT), token_bytes);
    let mut key = [0u8; 32];
    hkdf.expand(info, &mut key)
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    key
}
