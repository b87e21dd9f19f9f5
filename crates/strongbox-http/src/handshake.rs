use strongbox_crypto::{SessionKey, wrap_key};

/// Content type of the wrapped key returned for `ENCRYPT`.
pub const KEY_CONTENT_TYPE: &str = "encryption/aes-key";

/// Server half of the cipher upgrade: a fresh session key wrapped for the
/// client's RSA public key. The key must only be installed after the wrapped
/// form has been sent in the clear.
#[derive(Debug)]
pub struct KeyOffer {
    pub wrapped: Vec<u8>,
    pub key: SessionKey,
}

pub fn offer_session_key(public_key_pem: &[u8]) -> strongbox_crypto::Result<KeyOffer> {
    let key = SessionKey::generate();
    let wrapped = wrap_key(public_key_pem, &key.to_bytes())?;
    Ok(KeyOffer { wrapped, key })
}
