//! Public/private key pair scheme.
//!
//! Values are sealed to an X25519 public key with an ephemeral sender key
//! (XSalsa20-Poly1305), so encryption needs only the public key file.
//! Decryption needs the private key file, which is itself encrypted with a
//! passphrase (Argon2id -> ChaCha20-Poly1305).
//!
//! Key files:
//!
//! ```text
//! public.key   base64 of the 32-byte public key
//! private.key  JSON: { version, kdf, salt, nonce, ciphertext }
//! ```
//!
//! Key files are read when the cipher is built; their contents are parsed
//! on use, and the unlocked private key is cached for the cipher's lifetime.

use crate::envelope::{self, EnvelopeHeader, SchemeTag};
use crate::error::Error;
use crate::kdf::{derive_passphrase_key, random_bytes, KdfParams, SALT_SIZE};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::ChaCha20Poly1305;
use crypto_box::aead::OsRng;
use crypto_box::{PublicKey, SalsaBox, SecretKey};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;
use zeroize::Zeroizing;

/// X25519 key size in bytes.
pub const KEY_PAIR_KEY_SIZE: usize = 32;

const PRIVATE_KEY_VERSION: u8 = 1;
const BOX_NONCE_SIZE: usize = 24;
const WRAP_NONCE_SIZE: usize = 12;

/// Private key encrypted with a passphrase, as stored in the private key file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtectedPrivateKey {
    /// File format version.
    pub version: u8,
    /// Argon2id parameters used to derive the wrapping key.
    pub kdf: KdfParams,
    /// Argon2id salt (base64).
    pub salt: String,
    /// ChaCha20-Poly1305 nonce (base64).
    pub nonce: String,
    /// Encrypted private key bytes (base64).
    pub ciphertext: String,
}

impl ProtectedPrivateKey {
    /// Encrypts `secret` under `passphrase`.
    ///
    /// # Errors
    ///
    /// Returns error if key derivation or encryption fails.
    pub fn protect(
        secret: &SecretKey,
        passphrase: &SecretString,
        kdf: KdfParams,
    ) -> Result<Self, Error> {
        let salt: [u8; SALT_SIZE] = random_bytes();
        let nonce: [u8; WRAP_NONCE_SIZE] = random_bytes();
        let key = derive_passphrase_key(passphrase, &salt, &kdf)?;

        let cipher = ChaCha20Poly1305::new_from_slice(&key[..])
            .map_err(|e| Error::EncryptionFailed(format!("invalid wrapping key: {e}")))?;
        let secret_bytes = Zeroizing::new(secret.to_bytes());
        let ciphertext = cipher
            .encrypt(&chacha20poly1305::Nonce::from(nonce), secret_bytes.as_slice())
            .map_err(|e| Error::EncryptionFailed(format!("private key wrap failed: {e}")))?;

        Ok(Self {
            version: PRIVATE_KEY_VERSION,
            kdf,
            salt: STANDARD.encode(salt),
            nonce: STANDARD.encode(nonce),
            ciphertext: STANDARD.encode(ciphertext),
        })
    }

    /// Decrypts the private key with `passphrase`.
    ///
    /// # Errors
    ///
    /// Returns error if the file is malformed or the passphrase is wrong.
    pub fn unlock(&self, passphrase: &SecretString) -> Result<SecretKey, Error> {
        if self.version != PRIVATE_KEY_VERSION {
            return Err(Error::UnsupportedVersion {
                version: self.version,
                supported: PRIVATE_KEY_VERSION.to_string(),
            });
        }
        let salt = decode_field(&self.salt, "salt")?;
        let nonce: [u8; WRAP_NONCE_SIZE] = decode_field(&self.nonce, "nonce")?
            .try_into()
            .map_err(|_| Error::InvalidKey("private key nonce has the wrong size".to_string()))?;
        let ciphertext = decode_field(&self.ciphertext, "ciphertext")?;

        let key = derive_passphrase_key(passphrase, &salt, &self.kdf)?;
        let cipher = ChaCha20Poly1305::new_from_slice(&key[..])
            .map_err(|e| Error::DecryptionFailed(format!("invalid wrapping key: {e}")))?;
        let plaintext = Zeroizing::new(
            cipher
                .decrypt(&chacha20poly1305::Nonce::from(nonce), ciphertext.as_slice())
                .map_err(|_| Error::AuthenticationFailed)?,
        );

        let bytes: [u8; KEY_PAIR_KEY_SIZE] = plaintext.as_slice().try_into().map_err(|_| {
            Error::InvalidKey(format!(
                "private key has {} bytes, expected {KEY_PAIR_KEY_SIZE}",
                plaintext.len()
            ))
        })?;
        Ok(SecretKey::from(bytes))
    }
}

fn decode_field(value: &str, field: &str) -> Result<Vec<u8>, Error> {
    STANDARD
        .decode(value)
        .map_err(|e| Error::InvalidKey(format!("private key {field} is not base64: {e}")))
}

/// Parses the contents of a public key file.
///
/// # Errors
///
/// Returns `Error::InvalidKey` if the content is not a base64 32-byte key.
pub fn parse_public_key(content: &str) -> Result<PublicKey, Error> {
    let bytes = STANDARD
        .decode(content.trim())
        .map_err(|e| Error::InvalidKey(format!("public key is not base64: {e}")))?;
    let bytes: [u8; KEY_PAIR_KEY_SIZE] = bytes.try_into().map_err(|bytes: Vec<u8>| {
        Error::InvalidKey(format!(
            "public key has {} bytes, expected {KEY_PAIR_KEY_SIZE}",
            bytes.len()
        ))
    })?;
    Ok(PublicKey::from(bytes))
}

/// Parses the contents of a private key file.
///
/// # Errors
///
/// Returns `Error::InvalidKey` if the content is not a protected key document.
pub fn parse_private_key(content: &str) -> Result<ProtectedPrivateKey, Error> {
    serde_json::from_str(content)
        .map_err(|e| Error::InvalidKey(format!("private key file is malformed: {e}")))
}

/// Generates a key pair and writes the public and protected private key files.
///
/// Existing files are overwritten. On Unix both files get `0600` permissions.
///
/// # Errors
///
/// Returns error if key protection or file I/O fails.
pub fn generate_key_files(
    public_path: &Path,
    private_path: &Path,
    passphrase: &SecretString,
    kdf: KdfParams,
) -> Result<(), Error> {
    let secret = SecretKey::generate(&mut OsRng);
    let protected = ProtectedPrivateKey::protect(&secret, passphrase, kdf)?;
    let private_json = serde_json::to_string_pretty(&protected)
        .map_err(|e| Error::EncryptionFailed(format!("cannot serialize private key: {e}")))?;

    write_key_file(public_path, &format!("{}\n", STANDARD.encode(secret.public_key().as_bytes())))?;
    write_key_file(private_path, &format!("{private_json}\n"))?;
    Ok(())
}

fn write_key_file(path: &Path, content: &str) -> Result<(), Error> {
    use std::io::Write;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}

fn read_key_file(path: &Path) -> Result<String, Error> {
    std::fs::read_to_string(path)
        .map_err(|source| Error::KeyFile { path: path.to_path_buf(), source })
}

/// Cipher sealing values to a public key.
pub struct KeyPairCipher {
    public_key: String,
    private_key: String,
    passphrase: SecretString,
    unlocked: OnceLock<Option<SecretKey>>,
}

impl KeyPairCipher {
    /// Reads both key files.
    ///
    /// # Errors
    ///
    /// Returns `Error::KeyFile` if either file cannot be read.
    pub fn from_files(
        public_path: &Path,
        private_path: &Path,
        passphrase: SecretString,
    ) -> Result<Self, Error> {
        Ok(Self::from_key_material(
            read_key_file(public_path)?,
            read_key_file(private_path)?,
            passphrase,
        ))
    }

    /// Builds a cipher from key file contents already in memory.
    #[must_use]
    pub fn from_key_material(
        public_key: impl Into<String>,
        private_key: impl Into<String>,
        passphrase: SecretString,
    ) -> Self {
        Self {
            public_key: public_key.into(),
            private_key: private_key.into(),
            passphrase,
            unlocked: OnceLock::new(),
        }
    }

    /// Seals `plaintext` to the public key.
    ///
    /// # Errors
    ///
    /// Returns error if the public key is invalid or encryption fails.
    pub fn seal(&self, plaintext: &str) -> Result<String, Error> {
        let recipient = parse_public_key(&self.public_key)?;
        let ephemeral = SecretKey::generate(&mut OsRng);
        let nonce: [u8; BOX_NONCE_SIZE] = random_bytes();

        let salsa_box = SalsaBox::new(&recipient, &ephemeral);
        let ciphertext = salsa_box
            .encrypt(crypto_box::Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|e| Error::EncryptionFailed(format!("sealed box failed: {e}")))?;

        let header = EnvelopeHeader::new(
            SchemeTag::KeyPair,
            ephemeral.public_key().as_bytes().to_vec(),
            nonce.to_vec(),
        );
        Ok(envelope::encode(&header.to_bytes()?, &ciphertext))
    }

    /// Opens a value sealed by [`seal`](Self::seal).
    ///
    /// # Errors
    ///
    /// Returns error if the envelope is malformed, the private key cannot be
    /// unlocked, or authentication fails.
    pub fn open(&self, value: &str) -> Result<String, Error> {
        let decoded = envelope::decode(value, SchemeTag::KeyPair)?;
        let ephemeral: [u8; KEY_PAIR_KEY_SIZE] = decoded
            .header
            .material()
            .try_into()
            .map_err(|_| Error::InvalidHeader("invalid ephemeral key size".to_string()))?;
        if decoded.header.nonce().len() != BOX_NONCE_SIZE {
            return Err(Error::InvalidHeader("invalid nonce size".to_string()));
        }

        let secret = self.secret_key()?;
        let salsa_box = SalsaBox::new(&PublicKey::from(ephemeral), secret);
        let nonce = crypto_box::Nonce::from_slice(decoded.header.nonce());
        let plaintext = salsa_box
            .decrypt(nonce, decoded.payload.as_slice())
            .map_err(|_| Error::AuthenticationFailed)?;

        String::from_utf8(plaintext)
            .map_err(|e| Error::DecryptionFailed(format!("plaintext is not UTF-8: {e}")))
    }

    fn secret_key(&self) -> Result<&SecretKey, Error> {
        self.unlocked
            .get_or_init(|| {
                parse_private_key(&self.private_key)
                    .and_then(|protected| protected.unlock(&self.passphrase))
                    .map_err(|e| tracing::warn!(error = %e, "cannot unlock private key"))
                    .ok()
            })
            .as_ref()
            .ok_or_else(|| Error::InvalidKey("private key cannot be unlocked".to_string()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    pub(crate) fn light_kdf() -> KdfParams {
        KdfParams { memory_kib: 1024, iterations: 1, parallelism: 1 }
    }

    pub(crate) fn test_cipher(passphrase: &str) -> KeyPairCipher {
        let secret = SecretKey::generate(&mut OsRng);
        let protected = ProtectedPrivateKey::protect(
            &secret,
            &SecretString::new(passphrase.to_string()),
            light_kdf(),
        )
        .unwrap();
        KeyPairCipher::from_key_material(
            STANDARD.encode(secret.public_key().as_bytes()),
            serde_json::to_string(&protected).unwrap(),
            SecretString::new(passphrase.to_string()),
        )
    }

    #[test]
    fn test_round_trip() {
        let cipher = test_cipher("passphrase");
        let sealed = cipher.seal("alice@example.com").unwrap();
        assert_eq!(cipher.open(&sealed).unwrap(), "alice@example.com");
    }

    #[test]
    fn test_wrong_passphrase_cannot_open() {
        let cipher = test_cipher("passphrase");
        let sealed = cipher.seal("secret").unwrap();

        let wrong = KeyPairCipher::from_key_material(
            cipher.public_key.clone(),
            cipher.private_key.clone(),
            SecretString::new("guess".to_string()),
        );
        assert!(matches!(wrong.open(&sealed), Err(Error::InvalidKey(_))));
    }

    #[test]
    fn test_corrupt_public_key_cannot_seal() {
        let cipher = KeyPairCipher::from_key_material(
            "not a key",
            "{}",
            SecretString::new("passphrase".to_string()),
        );
        assert!(matches!(cipher.seal("secret"), Err(Error::InvalidKey(_))));
    }

    #[test]
    fn test_protect_unlock_round_trip() {
        let secret = SecretKey::generate(&mut OsRng);
        let passphrase = SecretString::new("passphrase".to_string());
        let protected = ProtectedPrivateKey::protect(&secret, &passphrase, light_kdf()).unwrap();

        let unlocked = protected.unlock(&passphrase).unwrap();
        assert_eq!(unlocked.to_bytes(), secret.to_bytes());
        assert!(matches!(
            protected.unlock(&SecretString::new("nope".to_string())),
            Err(Error::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_generate_key_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let public = dir.path().join("keys/public.key");
        let private = dir.path().join("keys/private.key");
        let passphrase = SecretString::new("passphrase".to_string());

        generate_key_files(&public, &private, &passphrase, light_kdf()).unwrap();

        let cipher = KeyPairCipher::from_files(
            &public,
            &private,
            SecretString::new(passphrase.expose_secret().clone()),
        )
        .unwrap();
        let sealed = cipher.seal("123-45-6789").unwrap();
        assert_eq!(cipher.open(&sealed).unwrap(), "123-45-6789");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&private).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_missing_key_file_is_key_file_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = KeyPairCipher::from_files(
            &dir.path().join("absent.pub"),
            &dir.path().join("absent.key"),
            SecretString::new("passphrase".to_string()),
        );
        assert!(matches!(result, Err(Error::KeyFile { .. })));
    }

    #[test]
    fn test_block_cipher_envelope_rejected() {
        let cipher = test_cipher("passphrase");
        let other = crate::block_cipher::BlockCipher::new(&SecretString::new("k".to_string()))
            .unwrap()
            .seal("secret")
            .unwrap();
        assert!(matches!(cipher.open(&other), Err(Error::InvalidHeader(_))));
    }
}
