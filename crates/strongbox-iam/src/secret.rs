use rand::{RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};

const SALT_SIZE: usize = 16;

pub fn generate_salt() -> String {
    let mut salt = [0_u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    hex::encode(salt)
}

pub fn hash_secret(salt: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn verify_secret(salt: &str, secret: &str, expected_hash: &str) -> bool {
    constant_time_eq(hash_secret(salt, secret).as_bytes(), expected_hash.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let mut diff = a.len() ^ b.len();
    let max_len = a.len().max(b.len());

    for i in 0..max_len {
        let left = *a.get(i).unwrap_or(&0);
        let right = *b.get(i).unwrap_or(&0);
        diff |= usize::from(left ^ right);
    }

    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_secret_verifies_other_does_not() {
        let salt = generate_salt();
        let hash = hash_secret(&salt, "123");
        assert!(verify_secret(&salt, "123", &hash));
        assert!(!verify_secret(&salt, "1234", &hash));
        assert!(!verify_secret(&generate_salt(), "123", &hash));
    }
}
