//! Credential Hashing
//!
//! Argon2id digests stored as `base64(salt)$base64(digest)`. The cost
//! parameters are fixed for this record format; changing them requires a new
//! format, otherwise existing records stop verifying.

use crate::error::AuthError;

use argon2::{Algorithm, Argon2, Params, Version};
use base64ct::{Base64, Encoding};
use rand::{rngs::OsRng, RngCore};

/// Salt bytes drawn per hash
pub const SALT_LEN: usize = 16;
/// Digest bytes produced per hash
pub const DIGEST_LEN: usize = 32;
/// Argon2 memory cost in KiB (64 MiB)
pub const MEMORY_COST_KIB: u32 = 64 * 1024;
/// Argon2 passes over memory
pub const TIME_COST: u32 = 1;
/// Argon2 lanes
pub const PARALLELISM: u32 = 4;

const MIN_SALT_LEN: usize = 8;

/// One-way hashing and verification of secrets
#[derive(Debug, Clone, Copy, Default)]
pub struct CredentialHasher;

impl CredentialHasher {
    pub fn new() -> Self {
        Self
    }

    /// Hash a secret with a freshly drawn salt
    pub fn hash(&self, secret: &str) -> Result<String, AuthError> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.try_fill_bytes(&mut salt).map_err(|err| {
            tracing::error!("Secure random source failed: {}", err);
            AuthError::Entropy
        })?;

        let mut digest = [0u8; DIGEST_LEN];
        argon2()?.hash_password_into(secret.as_bytes(), &salt, &mut digest)?;

        Ok(format!(
            "{}${}",
            Base64::encode_string(&salt),
            Base64::encode_string(&digest)
        ))
    }

    /// Verify a secret against a stored record
    ///
    /// A wrong secret is `Ok(false)`; a record that does not parse is
    /// `Err(AuthError::MalformedHash)`.
    pub fn verify(&self, secret: &str, record: &str) -> Result<bool, AuthError> {
        let (salt, expected) = parse_record(record)?;

        let mut actual = [0u8; DIGEST_LEN];
        argon2()?.hash_password_into(secret.as_bytes(), &salt, &mut actual)?;

        Ok(constant_time_eq(&actual, &expected))
    }

    /// [`hash`](Self::hash) on the blocking pool
    pub async fn hash_blocking(&self, secret: String) -> Result<String, AuthError> {
        let hasher = *self;
        tokio::task::spawn_blocking(move || hasher.hash(&secret))
            .await
            .map_err(|err| {
                tracing::error!("Hashing task failed: {}", err);
                AuthError::Internal
            })?
    }

    /// [`verify`](Self::verify) on the blocking pool
    pub async fn verify_blocking(&self, secret: String, record: String) -> Result<bool, AuthError> {
        let hasher = *self;
        tokio::task::spawn_blocking(move || hasher.verify(&secret, &record))
            .await
            .map_err(|err| {
                tracing::error!("Verification task failed: {}", err);
                AuthError::Internal
            })?
    }
}

fn argon2() -> Result<Argon2<'static>, AuthError> {
    let params = Params::new(MEMORY_COST_KIB, TIME_COST, PARALLELISM, Some(DIGEST_LEN))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

fn parse_record(record: &str) -> Result<(Vec<u8>, Vec<u8>), AuthError> {
    let mut parts = record.split('$');
    let (Some(salt), Some(digest), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(AuthError::MalformedHash);
    };

    let salt = Base64::decode_vec(salt).map_err(|_| AuthError::MalformedHash)?;
    let digest = Base64::decode_vec(digest).map_err(|_| AuthError::MalformedHash)?;

    if salt.len() < MIN_SALT_LEN || digest.len() != DIGEST_LEN {
        return Err(AuthError::MalformedHash);
    }

    Ok((salt, digest))
}

/// Compare two byte slices without an early exit on the first difference
#[inline(never)]
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hasher = CredentialHasher::new();
        let record = hasher.hash("Passw0rd!").unwrap();

        assert!(hasher.verify("Passw0rd!", &record).unwrap());
        assert!(!hasher.verify("Passw0rd?", &record).unwrap());
        assert!(!hasher.verify("", &record).unwrap());
    }

    #[test]
    fn test_salts_are_fresh() {
        let hasher = CredentialHasher::new();
        let first = hasher.hash("same secret").unwrap();
        let second = hasher.hash("same secret").unwrap();

        assert_ne!(first, second);
        assert!(hasher.verify("same secret", &first).unwrap());
        assert!(hasher.verify("same secret", &second).unwrap());
    }

    #[test]
    fn test_record_layout() {
        let record = CredentialHasher::new().hash("layout").unwrap();
        let (salt, digest) = record.split_once('$').unwrap();

        assert_eq!(Base64::decode_vec(salt).unwrap().len(), SALT_LEN);
        assert_eq!(Base64::decode_vec(digest).unwrap().len(), DIGEST_LEN);
    }

    #[test]
    fn test_malformed_records() {
        let hasher = CredentialHasher::new();
        let record = hasher.hash("secret").unwrap();
        let trailing = format!("{record}$extra");
        let short_digest = format!(
            "{}${}",
            Base64::encode_string(&[7u8; 16]),
            Base64::encode_string(&[0u8; 4])
        );
        let long_digest = format!(
            "{}${}",
            Base64::encode_string(&[7u8; 16]),
            Base64::encode_string(&[0u8; DIGEST_LEN + 1])
        );

        for bad in [
            "",
            "no-delimiter",
            "a$b$c",
            "!!!$AAAA",
            trailing.as_str(),
            short_digest.as_str(),
            long_digest.as_str(),
            "AAAA$AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=",
        ] {
            assert_eq!(
                hasher.verify("secret", bad),
                Err(AuthError::MalformedHash),
                "record {bad:?}"
            );
        }
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"123456", b"123456"));
        assert!(!constant_time_eq(b"123456", b"123457"));
        assert!(!constant_time_eq(b"123456", b"12345"));
        assert!(constant_time_eq(b"", b""));
    }

    #[tokio::test]
    async fn test_blocking_variants() {
        let hasher = CredentialHasher::new();
        let record = hasher.hash_blocking("Passw0rd!".into()).await.unwrap();

        assert!(hasher
            .verify_blocking("Passw0rd!".into(), record.clone())
            .await
            .unwrap());
        assert!(!hasher
            .verify_blocking("wrong".into(), record)
            .await
            .unwrap());
    }
}
