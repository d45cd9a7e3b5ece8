//! Vault error taxonomy.

use thiserror::Error;

/// Typed custody errors. The machine-readable code is separate from the
/// display string; wrong passwords and tampered ciphertexts intentionally
/// map to the same code so callers cannot distinguish them.
#[derive(Debug, Error)]
pub enum VaultError {
    /// Password policy violation, wrong password, or authentication-tag
    /// mismatch. One code for all three.
    #[error("invalid password")]
    InvalidPassword,

    #[error("key derivation or encryption failed")]
    EncryptionFailed,

    #[error("session not found")]
    SessionNotFound,

    #[error("session expired")]
    SessionExpired,

    #[error("wallet not found")]
    WalletNotFound,

    #[error("no primary wallet configured")]
    NoPrimaryWallet,

    #[error("no active wallets")]
    NoActiveWallets,

    #[error(transparent)]
    Store(#[from] sniper_core::Error),
}

impl VaultError {
    pub fn code(&self) -> &'static str {
        match self {
            VaultError::InvalidPassword => "INVALID_PASSWORD",
            VaultError::EncryptionFailed => "ENCRYPTION_FAILED",
            VaultError::SessionNotFound => "SESSION_NOT_FOUND",
            VaultError::SessionExpired => "SESSION_EXPIRED",
            VaultError::WalletNotFound => "WALLET_NOT_FOUND",
            VaultError::NoPrimaryWallet => "NO_PRIMARY_WALLET",
            VaultError::NoActiveWallets => "NO_ACTIVE_WALLETS",
            VaultError::Store(_) => "STORE_ERROR",
        }
    }
}
