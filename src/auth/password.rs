//! Password hashing with Argon2id.
//!
//! Encoded form: `{salt}${base64(key)}`. The salt is 12 random bytes rendered as
//! padded RFC 4648 base32 and fed to the KDF as-is (the string, not the raw
//! bytes), so the stored value is all a verifier needs. The cost parameters are
//! fixed: changing them would invalidate every stored hash.

use anyhow::{anyhow, Context, Result};
use argon2::{Algorithm, Argon2, Params, Version};
use base64ct::{Base64, Encoding};
use rand::{rngs::OsRng, RngCore};
use subtle::ConstantTimeEq;

const SALT_BYTES: usize = 12;
const TIME_COST: u32 = 2;
const MEMORY_COST_KIB: u32 = 19 * 1024;
const PARALLELISM: u32 = 1;
const KEY_LEN: usize = 32;
const SEPARATOR: char = '$';

fn kdf() -> Result<Argon2<'static>> {
    let params = Params::new(MEMORY_COST_KIB, TIME_COST, PARALLELISM, Some(KEY_LEN))
        .map_err(|err| anyhow!("invalid argon2 parameters: {err}"))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

fn derive_key(password: &str, salt: &str) -> Result<String> {
    let mut key = [0u8; KEY_LEN];
    kdf()?
        .hash_password_into(password.as_bytes(), salt.as_bytes(), &mut key)
        .map_err(|err| anyhow!("argon2 key derivation failed: {err}"))?;
    Ok(Base64::encode_string(&key))
}

fn generate_salt() -> Result<String> {
    let mut bytes = [0u8; SALT_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate password salt")?;
    Ok(base32::encode(
        base32::Alphabet::Rfc4648 { padding: true },
        &bytes,
    ))
}

/// Hash a password with a fresh salt.
///
/// # Errors
/// Returns an error if the OS RNG or the KDF fails.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = generate_salt()?;
    let key = derive_key(password, &salt)?;
    Ok(format!("{salt}{SEPARATOR}{key}"))
}

/// Check `password` against an encoded hash. Malformed encodings never verify.
#[must_use]
pub fn verify_password(encoded: &str, password: &str) -> bool {
    let mut parts = encoded.split(SEPARATOR);
    let (Some(salt), Some(expected), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };

    let Ok(computed) = derive_key(password, salt) else {
        return false;
    };

    expected.as_bytes().ct_eq(computed.as_bytes()).into()
}
