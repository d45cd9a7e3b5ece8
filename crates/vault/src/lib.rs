//! Wallet custody: password-derived key encryption, session engine, and
//! multi-wallet rotation.
//!
//! The plaintext signing secret exists only inside [`session::SigningHandle`],
//! whose buffer is zeroed on drop. Nothing in this crate logs or serializes
//! passwords, derived keys, or secrets.

pub mod envelope;
pub mod error;
pub mod rotator;
pub mod session;
pub mod vault;

pub use error::VaultError;
pub use rotator::{RotationStrategy, WalletRotator};
pub use session::{SessionEngine, SessionRecord, SigningHandle};
pub use vault::WalletVault;
