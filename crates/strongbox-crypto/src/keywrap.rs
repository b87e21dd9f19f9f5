use rand::rngs::OsRng;
use rsa::{
    Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey,
    pkcs1::DecodeRsaPublicKey,
    pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding},
};

use crate::{CryptoError, Result};

/// Encrypts `material` for the holder of `public_key_pem` with PKCS#1 v1.5
/// padding. Both SubjectPublicKeyInfo (`BEGIN PUBLIC KEY`) and PKCS#1
/// (`BEGIN RSA PUBLIC KEY`) encodings are accepted.
pub fn wrap_key(public_key_pem: &[u8], material: &[u8]) -> Result<Vec<u8>> {
    let pem = std::str::from_utf8(public_key_pem)
        .map_err(|err| CryptoError::InvalidPublicKey(err.to_string()))?
        .trim();

    let public_key = RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|err| CryptoError::InvalidPublicKey(err.to_string()))?;

    public_key
        .encrypt(&mut OsRng, Pkcs1v15Encrypt, material)
        .map_err(|_| CryptoError::Encrypt)
}

/// The client half of the handshake: owns the private key that unwraps the
/// session key material returned by the server.
#[derive(Debug, Clone)]
pub struct KeyPair {
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
}

impl KeyPair {
    pub fn generate(bits: usize) -> Result<Self> {
        let private_key = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|err| CryptoError::KeyGeneration(err.to_string()))?;
        let public_key = RsaPublicKey::from(&private_key);
        Ok(Self {
            private_key,
            public_key,
        })
    }

    pub fn public_key_pem(&self) -> Result<String> {
        self.public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|err| CryptoError::InvalidPublicKey(err.to_string()))
    }

    pub fn unwrap_key(&self, wrapped: &[u8]) -> Result<Vec<u8>> {
        self.private_key
            .decrypt(Pkcs1v15Encrypt, wrapped)
            .map_err(|_| CryptoError::Decrypt)
    }
}
