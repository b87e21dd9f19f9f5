use std::fmt;

use aes::Aes256;
use cfb_mode::{
    BufDecryptor, BufEncryptor,
    cipher::{InvalidLength, KeyIvInit},
};
use rand::{RngCore, rngs::OsRng};

use crate::{CryptoError, Result};

pub const KEY_SIZE: usize = 32;
pub const IV_SIZE: usize = 16;
pub const KEY_MATERIAL_SIZE: usize = KEY_SIZE + IV_SIZE;

/// AES-256 key and CFB initialization vector for one connection.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey {
    key: [u8; KEY_SIZE],
    iv: [u8; IV_SIZE],
}

impl SessionKey {
    pub fn generate() -> Self {
        let mut key = [0_u8; KEY_SIZE];
        let mut iv = [0_u8; IV_SIZE];
        OsRng.fill_bytes(&mut key);
        OsRng.fill_bytes(&mut iv);
        Self { key, iv }
    }

    /// Splits a `key || iv` blob as produced by [`SessionKey::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_MATERIAL_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_MATERIAL_SIZE,
                actual: bytes.len(),
            });
        }

        let mut key = [0_u8; KEY_SIZE];
        let mut iv = [0_u8; IV_SIZE];
        key.copy_from_slice(&bytes[..KEY_SIZE]);
        iv.copy_from_slice(&bytes[KEY_SIZE..]);
        Ok(Self { key, iv })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(KEY_MATERIAL_SIZE);
        out.extend_from_slice(&self.key);
        out.extend_from_slice(&self.iv);
        out
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKey").finish_non_exhaustive()
    }
}

/// Stateful AES-256-CFB stream for both directions of a connection.
///
/// Each direction is an independent CFB stream seeded with the same key and
/// IV, so a peer holding the same [`SessionKey`] mirrors it by encrypting with
/// its own encryptor what this side decrypts, and vice versa. Inputs of any
/// length are accepted; no padding is ever added.
pub struct SessionCipher {
    encryptor: BufEncryptor<Aes256>,
    decryptor: BufDecryptor<Aes256>,
}

impl SessionCipher {
    pub fn new(key: &SessionKey) -> Result<Self> {
        let invalid = |_: InvalidLength| CryptoError::InvalidKeyLength {
            expected: KEY_MATERIAL_SIZE,
            actual: key.key.len() + key.iv.len(),
        };
        Ok(Self {
            encryptor: BufEncryptor::<Aes256>::new_from_slices(&key.key, &key.iv)
                .map_err(invalid)?,
            decryptor: BufDecryptor::<Aes256>::new_from_slices(&key.key, &key.iv)
                .map_err(invalid)?,
        })
    }

    pub fn encrypt(&mut self, data: &mut [u8]) {
        self.encryptor.encrypt(data);
    }

    pub fn decrypt(&mut self, data: &mut [u8]) {
        self.decryptor.decrypt(data);
    }
}

impl fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCipher").finish_non_exhaustive()
    }
}
