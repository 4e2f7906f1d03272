//! Credential hashing.
//!
//! Stored form: `blake3$<salt>$<hex digest>`, where the digest covers the
//! salt followed by the password.

const SCHEME: &str = "blake3";

fn digest(salt: &str, password: &str) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hasher.finalize()
}

/// Hash a password with a fresh random salt.
pub fn hash_password(password: &str) -> String {
    let salt = uuid::Uuid::new_v4().simple().to_string();
    format!("{SCHEME}${salt}${}", digest(&salt, password).to_hex())
}

/// Check a password against a stored hash.
///
/// A malformed stored hash never verifies.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let mut parts = stored.splitn(3, '$');
    let (Some(SCHEME), Some(salt), Some(hex)) = (parts.next(), parts.next(), parts.next()) else {
        log::warn!("Stored credential has an unknown format");
        return false;
    };
    match blake3::Hash::from_hex(hex) {
        // blake3::Hash compares in constant time
        Ok(expected) => digest(salt, password) == expected,
        Err(_) => {
            log::warn!("Stored credential has a malformed digest");
            false
        }
    }
}
