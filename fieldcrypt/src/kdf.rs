//! Key derivation.
//!
//! - HKDF-SHA256 derives a fresh block cipher key per message from the
//!   configured secret and a random salt.
//! - Argon2id derives the key protecting a private key file from its
//!   passphrase.

use crate::error::Error;
use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::aead::{rand_core::RngCore, OsRng};
use hkdf::Hkdf;
use secrecy::{ExposeSecret, SecretString, SecretVec};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

/// Derived key size in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

/// Salt size in bytes.
pub const SALT_SIZE: usize = 16;

const BLOCK_CIPHER_INFO: &[u8] = b"fieldcrypt/block-cipher/v1";

/// Argon2id cost parameters, stored alongside the protected key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    /// Number of passes.
    pub iterations: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self { memory_kib: 19 * 1024, iterations: 2, parallelism: 1 }
    }
}

/// Derives a per-message block cipher key from the configured secret.
///
/// # Errors
///
/// Returns `Error::KeyDerivation` if HKDF expansion fails.
pub fn derive_subkey(
    secret: &SecretVec<u8>,
    salt: &[u8],
) -> Result<Zeroizing<[u8; KEY_SIZE]>, Error> {
    let hkdf = Hkdf::<Sha256>::new(Some(salt), secret.expose_secret());
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    hkdf.expand(BLOCK_CIPHER_INFO, &mut key[..])
        .map_err(|e| Error::KeyDerivation(format!("HKDF expand failed: {e}")))?;
    Ok(key)
}

/// Derives the key protecting a private key file from its passphrase.
///
/// # Errors
///
/// Returns `Error::KeyDerivation` if the parameters are rejected by Argon2.
pub fn derive_passphrase_key(
    passphrase: &SecretString,
    salt: &[u8],
    params: &KdfParams,
) -> Result<Zeroizing<[u8; KEY_SIZE]>, Error> {
    let argon_params =
        Params::new(params.memory_kib, params.iterations, params.parallelism, Some(KEY_SIZE))
            .map_err(|e| Error::KeyDerivation(format!("invalid Argon2 parameters: {e}")))?;
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    argon
        .hash_password_into(passphrase.expose_secret().as_bytes(), salt, &mut key[..])
        .map_err(|e| Error::KeyDerivation(format!("Argon2 failed: {e}")))?;
    Ok(key)
}

/// Fills a fixed-size array from the operating system RNG.
#[must_use]
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn light_params() -> KdfParams {
        KdfParams { memory_kib: 1024, iterations: 1, parallelism: 1 }
    }

    #[test]
    fn test_derive_subkey_deterministic() {
        let secret = SecretVec::new(b"configured secret".to_vec());
        let salt = [7u8; SALT_SIZE];

        let key1 = derive_subkey(&secret, &salt).expect("derivation failed");
        let key2 = derive_subkey(&secret, &salt).expect("derivation failed");

        assert_eq!(*key1, *key2);
    }

    #[test]
    fn test_derive_subkey_depends_on_salt_and_secret() {
        let secret = SecretVec::new(b"configured secret".to_vec());
        let other = SecretVec::new(b"another secret".to_vec());

        let key1 = derive_subkey(&secret, &[1u8; SALT_SIZE]).unwrap();
        let key2 = derive_subkey(&secret, &[2u8; SALT_SIZE]).unwrap();
        let key3 = derive_subkey(&other, &[1u8; SALT_SIZE]).unwrap();

        assert_ne!(*key1, *key2);
        assert_ne!(*key1, *key3);
    }

    #[test]
    fn test_passphrase_key_depends_on_passphrase() {
        let salt = [3u8; SALT_SIZE];
        let derive = |passphrase: &str| {
            derive_passphrase_key(&SecretString::new(passphrase.into()), &salt, &light_params())
                .unwrap()
        };
        let key1 = derive("one");
        let key2 = derive("one");
        let key3 = derive("two");

        assert_eq!(*key1, *key2);
        assert_ne!(*key1, *key3);
    }

    #[test]
    fn test_passphrase_key_rejects_bad_params() {
        let params = KdfParams { memory_kib: 1, iterations: 0, parallelism: 0 };
        let result =
            derive_passphrase_key(&SecretString::new("x".into()), &[0; SALT_SIZE], &params);
        assert!(matches!(result, Err(Error::KeyDerivation(_))));
    }

    #[test]
    fn test_random_bytes_differ() {
        let a: [u8; SALT_SIZE] = random_bytes();
        let b: [u8; SALT_SIZE] = random_bytes();
        assert_ne!(a, b);
    }

    // RFC 5869 Test Vector (using HKDF-SHA256)
    // https://tools.ietf.org/html/rfc5869#appendix-A.1
    #[test]
    fn test_hkdf_rfc5869_test_case_1() {
        const IKM_HEX: &str = "0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b";
        const SALT_HEX: &str = "000102030405060708090a0b0c";
        const INFO_HEX: &str = "f0f1f2f3f4f5f6f7f8f9";
        const EXPECTED_OKM_HEX: &str =
            "3cb25f25faacd57a90434f64d0362f2a2d2d0a90cf1a5a4c5db02d56ecc4c5bf34007208d5b887185865";

        let ikm = hex::decode(IKM_HEX).unwrap();
        let salt = hex::decode(SALT_HEX).unwrap();
        let info = hex::decode(INFO_HEX).unwrap();
        let expected_okm = hex::decode(EXPECTED_OKM_HEX).unwrap();

        let hkdf = Hkdf::<Sha256>::new(Some(&salt), &ikm);
        let mut okm = vec![0u8; 42];
        hkdf.expand(&info, &mut okm).expect("HKDF expand failed");

        assert_eq!(okm, expected_okm);
    }
}
