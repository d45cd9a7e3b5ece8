//! Persistent encrypted key store.

use crate::envelope::{self, KeyEnvelope, ACCEPTED_SECRET_LENGTHS};
use crate::VaultError;
use chrono::Utc;
use ed25519_dalek::SigningKey;
use rand::RngCore;
use sniper_core::db::WalletDirectory;
use sniper_core::types::EncryptedKey;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

/// Wallet vault: creates, imports, and decrypts encrypted signing keys.
pub struct WalletVault {
    wallets: Arc<dyn WalletDirectory>,
}

impl WalletVault {
    pub fn new(wallets: Arc<dyn WalletDirectory>) -> Self {
        Self { wallets }
    }

    /// Generate a fresh Ed25519 wallet encrypted under `password`.
    ///
    /// The first wallet a user creates becomes their primary.
    pub async fn create_wallet(
        &self,
        user_ref: &str,
        password: &str,
        label: Option<String>,
    ) -> Result<EncryptedKey, VaultError> {
        envelope::validate_password(password)?;

        let mut seed = Zeroizing::new([0u8; 32]);
        rand::rng().fill_bytes(seed.as_mut());
        let address = address_for_seed(&seed);

        self.store_key(user_ref, password, seed.as_ref(), address, label)
            .await
    }

    /// Import an existing signing secret (32-byte seed or 64-byte expanded
    /// keypair).
    pub async fn import_wallet(
        &self,
        user_ref: &str,
        password: &str,
        secret: &[u8],
        label: Option<String>,
    ) -> Result<EncryptedKey, VaultError> {
        envelope::validate_password(password)?;

        if !ACCEPTED_SECRET_LENGTHS.contains(&secret.len()) {
            warn!(len = secret.len(), "Rejected import with unsupported secret length");
            return Err(VaultError::EncryptionFailed);
        }

        let address = match secret.len() {
            32 => {
                let seed: [u8; 32] = secret.try_into().expect("length checked");
                address_for_seed(&seed)
            }
            _ => {
                let bytes: [u8; 64] = secret.try_into().expect("length checked");
                let key = SigningKey::from_keypair_bytes(&bytes)
                    .map_err(|_| VaultError::EncryptionFailed)?;
                bs58::encode(key.verifying_key().as_bytes()).into_string()
            }
        };

        self.store_key(user_ref, password, secret, address, label)
            .await
    }

    /// Decrypt a stored key for session creation. The caller re-encrypts the
    /// returned secret under a session key immediately; the buffer zeroes
    /// itself when dropped.
    pub async fn decrypt_for_session(
        &self,
        key: &EncryptedKey,
        password: &str,
    ) -> Result<Zeroizing<Vec<u8>>, VaultError> {
        let sealed = KeyEnvelope::from_record(key)?;
        let password = password.to_string();
        tokio::task::spawn_blocking(move || sealed.open(&password))
            .await
            .map_err(|_| VaultError::EncryptionFailed)?
    }

    /// Promote a wallet to primary, demoting the previous one.
    pub async fn rotate_primary(&self, user_ref: &str, wallet_id: Uuid) -> Result<(), VaultError> {
        let key = self
            .wallets
            .get(user_ref, wallet_id)
            .await?
            .ok_or(VaultError::WalletNotFound)?;
        if !key.is_active {
            return Err(VaultError::WalletNotFound);
        }

        self.wallets.rotate_primary(user_ref, wallet_id).await?;
        info!(user_ref = %user_ref, wallet_id = %wallet_id, "Primary wallet rotated");
        Ok(())
    }

    pub async fn list_wallets(&self, user_ref: &str) -> Result<Vec<EncryptedKey>, VaultError> {
        Ok(self.wallets.list_active(user_ref).await?)
    }

    pub async fn delete_wallet(&self, user_ref: &str, wallet_id: Uuid) -> Result<bool, VaultError> {
        let deleted = self.wallets.delete(user_ref, wallet_id).await?;
        if deleted {
            info!(user_ref = %user_ref, wallet_id = %wallet_id, "Wallet deleted");
        }
        Ok(deleted)
    }

    /// Delete every wallet a user owns (user deletion cascades to keys).
    pub async fn delete_all_wallets(&self, user_ref: &str) -> Result<u64, VaultError> {
        Ok(self.wallets.delete_all_for_user(user_ref).await?)
    }

    // Private methods

    async fn store_key(
        &self,
        user_ref: &str,
        password: &str,
        secret: &[u8],
        address: String,
        label: Option<String>,
    ) -> Result<EncryptedKey, VaultError> {
        // Argon2id is CPU-bound; run the seal off the reactor.
        let password_owned = password.to_string();
        let secret_owned = Zeroizing::new(secret.to_vec());
        let sealed = tokio::task::spawn_blocking(move || {
            KeyEnvelope::seal(&secret_owned, &password_owned)
        })
        .await
        .map_err(|_| VaultError::EncryptionFailed)??;

        let is_primary = self.wallets.primary_for_user(user_ref).await?.is_none();

        let key = EncryptedKey {
            id: Uuid::new_v4(),
            user_ref: user_ref.to_string(),
            wallet_id: Uuid::new_v4(),
            address: address.clone(),
            ciphertext: sealed.ciphertext.clone(),
            salt: sealed.salt.to_vec(),
            nonce: sealed.nonce.to_vec(),
            auth_tag: sealed.auth_tag.to_vec(),
            label,
            is_primary,
            is_active: true,
            times_used: 0,
            last_used_at: None,
            created_at: Utc::now(),
        };

        self.wallets.insert(&key).await?;
        info!(
            user_ref = %user_ref,
            address = %address,
            is_primary = is_primary,
            "Wallet created"
        );
        Ok(key)
    }
}

fn address_for_seed(seed: &[u8; 32]) -> String {
    let key = SigningKey::from_bytes(seed);
    bs58::encode(key.verifying_key().as_bytes()).into_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sniper_core::db::InMemoryWalletDirectory;

    const PASSWORD: &str = "letmein123";

    fn vault() -> (WalletVault, Arc<InMemoryWalletDirectory>) {
        let dir = Arc::new(InMemoryWalletDirectory::new());
        (WalletVault::new(dir.clone()), dir)
    }

    #[tokio::test]
    async fn test_create_wallet_round_trip() {
        let (vault, _) = vault();
        let key = vault.create_wallet("user", PASSWORD, None).await.unwrap();

        assert!(key.is_primary);
        assert_eq!(key.salt.len(), 32);
        assert_eq!(key.nonce.len(), 12);
        assert_eq!(key.auth_tag.len(), 16);
        assert_eq!(key.ciphertext.len(), 32);

        let secret = vault.decrypt_for_session(&key, PASSWORD).await.unwrap();
        assert_eq!(secret.len(), 32);
        assert_eq!(address_for_seed(&secret.as_slice().try_into().unwrap()), key.address);
    }

    #[tokio::test]
    async fn test_only_first_wallet_is_primary() {
        let (vault, _) = vault();
        let first = vault.create_wallet("user", PASSWORD, None).await.unwrap();
        let second = vault
            .create_wallet("user", PASSWORD, Some("spare".to_string()))
            .await
            .unwrap();
        assert!(first.is_primary);
        assert!(!second.is_primary);
    }

    #[tokio::test]
    async fn test_policy_violation_is_rejected() {
        let (vault, _) = vault();
        let err = vault.create_wallet("user", "short", None).await.unwrap_err();
        assert!(matches!(err, VaultError::InvalidPassword));
        assert_eq!(err.code(), "INVALID_PASSWORD");
    }

    #[tokio::test]
    async fn test_import_expanded_keypair() {
        let (vault, _) = vault();
        let seed = [11u8; 32];
        let keypair = SigningKey::from_bytes(&seed).to_keypair_bytes();

        let key = vault
            .import_wallet("user", PASSWORD, &keypair, None)
            .await
            .unwrap();
        assert_eq!(key.ciphertext.len(), 64);

        let secret = vault.decrypt_for_session(&key, PASSWORD).await.unwrap();
        assert_eq!(secret.as_slice(), keypair.as_slice());
    }

    #[tokio::test]
    async fn test_import_rejects_odd_length() {
        let (vault, _) = vault();
        let err = vault
            .import_wallet("user", PASSWORD, &[0u8; 48], None)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::EncryptionFailed));
    }

    #[tokio::test]
    async fn test_wrong_password_decrypt() {
        let (vault, _) = vault();
        let key = vault.create_wallet("user", PASSWORD, None).await.unwrap();
        let err = vault
            .decrypt_for_session(&key, "wrong12345")
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::InvalidPassword));
    }

    #[tokio::test]
    async fn test_rotate_primary_requires_active_wallet() {
        let (vault, dir) = vault();
        vault.create_wallet("user", PASSWORD, None).await.unwrap();
        let second = vault.create_wallet("user", PASSWORD, None).await.unwrap();

        dir.set_active("user", second.wallet_id, false).await.unwrap();
        let err = vault
            .rotate_primary("user", second.wallet_id)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::WalletNotFound));
    }
}
