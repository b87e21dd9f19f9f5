pub mod cipher;
pub mod keywrap;

pub use cipher::{SessionCipher, SessionKey};
pub use keywrap::{KeyPair, wrap_key};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),
    #[error("key generation failure: {0}")]
    KeyGeneration(String),
    #[error("encryption failure")]
    Encrypt,
    #[error("decryption failure")]
    Decrypt,
}

pub type Result<T> = std::result::Result<T, CryptoError>;
