//! PBKDF2 password hashes stored as `pbkdf2_sha256$<iterations>$<salt>$<hash>`.

use std::num::NonZeroU32;

use anyhow::{Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use ring::pbkdf2;

const SCHEME: &str = "pbkdf2_sha256";
const ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;

static ALGORITHM: pbkdf2::Algorithm = pbkdf2::PBKDF2_HMAC_SHA256;

/// Well-formed hash no password derives to, at the production cost.
const UNKNOWN_ACCOUNT_HASH: &str = concat!(
    "pbkdf2_sha256$100000$",
    "AAAAAAAAAAAAAAAAAAAAAA$",
    "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"
);

pub fn hash_password(password: &str) -> Result<String> {
    let iterations = NonZeroU32::new(ITERATIONS).ok_or_else(|| anyhow!("zero iterations"))?;
    let salt: [u8; SALT_LEN] = rand::random();
    let mut hash = [0u8; HASH_LEN];
    pbkdf2::derive(ALGORITHM, iterations, &salt, password.as_bytes(), &mut hash);

    Ok(format!(
        "{SCHEME}${ITERATIONS}${}${}",
        STANDARD_NO_PAD.encode(salt),
        STANDARD_NO_PAD.encode(hash)
    ))
}

/// Constant-time check of `password` against a stored hash. Malformed
/// hashes never verify.
pub fn verify_password(stored: &str, password: &str) -> bool {
    let mut parts = stored.split('$');
    let (Some(SCHEME), Some(iterations), Some(salt), Some(hash), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return false;
    };

    let Some(iterations) = iterations.parse().ok().and_then(NonZeroU32::new) else {
        return false;
    };
    let (Ok(salt), Ok(hash)) = (STANDARD_NO_PAD.decode(salt), STANDARD_NO_PAD.decode(hash)) else {
        return false;
    };

    pbkdf2::verify(ALGORITHM, iterations, &salt, password.as_bytes(), &hash).is_ok()
}

/// Spends one full derivation for a sign-in against a missing account, so
/// unknown names take as long to reject as wrong passwords.
pub fn verify_unknown_account(password: &str) -> bool {
    verify_password(UNKNOWN_ACCOUNT_HASH, password)
}
