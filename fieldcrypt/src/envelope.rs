//! Self-describing ciphertext format.
//!
//! Every ciphertext produced by a cipher scheme is a base64 string over:
//!
//! ```text
//! [version:1][scheme:1][material_len:1][material:N][nonce_len:1][nonce:L][ciphertext+tag]
//! ```
//!
//! `material` carries whatever the scheme needs besides its key: the HKDF
//! salt for the block cipher, the ephemeral public key for the key pair.

use crate::error::Error;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Envelope format version.
pub const ENVELOPE_VERSION: u8 = 1;

/// Identifies the scheme that produced an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemeTag {
    /// AES-256-GCM with a per-message HKDF subkey.
    BlockCipher,
    /// X25519 + XSalsa20-Poly1305 sealed to a public key.
    KeyPair,
}

impl SchemeTag {
    const fn as_u8(self) -> u8 {
        match self {
            Self::BlockCipher => 1,
            Self::KeyPair => 2,
        }
    }

    fn from_u8(value: u8) -> Result<Self, Error> {
        match value {
            1 => Ok(Self::BlockCipher),
            2 => Ok(Self::KeyPair),
            other => Err(Error::InvalidHeader(format!("unknown scheme tag {other}"))),
        }
    }
}

/// Envelope header preceding the encrypted payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeHeader {
    version: u8,
    scheme: SchemeTag,
    material: Vec<u8>,
    nonce: Vec<u8>,
}

impl EnvelopeHeader {
    /// Creates a header for the current envelope version.
    #[must_use]
    pub const fn new(scheme: SchemeTag, material: Vec<u8>, nonce: Vec<u8>) -> Self {
        Self { version: ENVELOPE_VERSION, scheme, material, nonce }
    }

    /// Returns the envelope version.
    #[must_use]
    pub const fn version(&self) -> u8 {
        self.version
    }

    /// Returns the scheme tag.
    #[must_use]
    pub const fn scheme(&self) -> SchemeTag {
        self.scheme
    }

    /// Returns the scheme-specific material.
    #[must_use]
    pub fn material(&self) -> &[u8] {
        &self.material
    }

    /// Returns the nonce.
    #[must_use]
    pub fn nonce(&self) -> &[u8] {
        &self.nonce
    }

    /// Serializes the header to bytes.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidHeader` if the material or nonce exceed 255 bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let material_len = u8::try_from(self.material.len()).map_err(|_| {
            Error::InvalidHeader(format!(
                "material too long: {} bytes (max: 255)",
                self.material.len()
            ))
        })?;
        let nonce_len = u8::try_from(self.nonce.len()).map_err(|_| {
            Error::InvalidHeader(format!("nonce too long: {} bytes (max: 255)", self.nonce.len()))
        })?;

        let mut bytes = Vec::with_capacity(4 + self.material.len() + self.nonce.len());
        bytes.push(self.version);
        bytes.push(self.scheme.as_u8());
        bytes.push(material_len);
        bytes.extend_from_slice(&self.material);
        bytes.push(nonce_len);
        bytes.extend_from_slice(&self.nonce);
        Ok(bytes)
    }

    /// Deserializes a header, returning it with the number of bytes consumed.
    ///
    /// # Errors
    ///
    /// Returns error if the data is truncated, the version is unsupported or
    /// the scheme tag is unknown.
    pub fn from_bytes(data: &[u8]) -> Result<(Self, usize), Error> {
        let (&version, rest) =
            data.split_first().ok_or_else(|| Error::InvalidHeader("empty envelope".to_string()))?;
        if version != ENVELOPE_VERSION {
            return Err(Error::UnsupportedVersion {
                version,
                supported: ENVELOPE_VERSION.to_string(),
            });
        }

        let (&tag, rest) =
            rest.split_first().ok_or_else(|| Error::InvalidHeader("missing scheme".to_string()))?;
        let scheme = SchemeTag::from_u8(tag)?;

        let (material, rest) = read_prefixed(rest, "material")?;
        let (nonce, rest) = read_prefixed(rest, "nonce")?;

        let consumed = data.len() - rest.len();
        let header = Self { version, scheme, material: material.to_vec(), nonce: nonce.to_vec() };
        Ok((header, consumed))
    }
}

fn read_prefixed<'a>(data: &'a [u8], what: &str) -> Result<(&'a [u8], &'a [u8]), Error> {
    let (&len, rest) = data
        .split_first()
        .ok_or_else(|| Error::InvalidHeader(format!("missing {what} length")))?;
    let len = usize::from(len);
    if rest.len() < len {
        return Err(Error::InvalidHeader(format!("{what} truncated")));
    }
    Ok(rest.split_at(len))
}

/// Joins a serialized header and payload into the base64 envelope string.
#[must_use]
pub fn encode(header_bytes: &[u8], payload: &[u8]) -> String {
    let mut bytes = Vec::with_capacity(header_bytes.len() + payload.len());
    bytes.extend_from_slice(header_bytes);
    bytes.extend_from_slice(payload);
    STANDARD.encode(bytes)
}

/// A decoded envelope: the header, its raw bytes and the payload.
#[derive(Debug)]
pub struct Decoded {
    /// Parsed header.
    pub header: EnvelopeHeader,
    /// Raw serialized header, used as associated data by some schemes.
    pub header_bytes: Vec<u8>,
    /// Encrypted payload including the authentication tag.
    pub payload: Vec<u8>,
}

/// Decodes an envelope string and checks it was produced by `expected`.
///
/// # Errors
///
/// Returns error if the string is not base64, the header is malformed, or
/// the envelope belongs to another scheme.
pub fn decode(value: &str, expected: SchemeTag) -> Result<Decoded, Error> {
    let mut bytes = STANDARD
        .decode(value.trim())
        .map_err(|e| Error::InvalidHeader(format!("not an envelope: {e}")))?;
    let (header, consumed) = EnvelopeHeader::from_bytes(&bytes)?;
    if header.scheme() != expected {
        return Err(Error::InvalidHeader(format!(
            "envelope was produced by {:?}, expected {expected:?}",
            header.scheme()
        )));
    }
    let payload = bytes.split_off(consumed);
    Ok(Decoded { header, header_bytes: bytes, payload })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_serialization() {
        let header = EnvelopeHeader::new(SchemeTag::BlockCipher, vec![1; 16], vec![2; 12]);

        let bytes = header.to_bytes().expect("Failed to serialize header");
        let (parsed, pos) = EnvelopeHeader::from_bytes(&bytes).expect("Failed to parse header");

        assert_eq!(parsed, header);
        assert_eq!(pos, bytes.len());
        assert_eq!(parsed.version(), ENVELOPE_VERSION);
    }

    #[test]
    fn test_header_unsupported_version() {
        let bytes = [99, 1, 0, 0];
        let result = EnvelopeHeader::from_bytes(&bytes);
        assert!(matches!(result, Err(Error::UnsupportedVersion { version: 99, .. })));
    }

    #[test]
    fn test_header_unknown_scheme() {
        let result = EnvelopeHeader::from_bytes(&[ENVELOPE_VERSION, 7, 0, 0]);
        assert!(matches!(result, Err(Error::InvalidHeader(_))));
    }

    #[test]
    fn test_header_truncated_data() {
        let result = EnvelopeHeader::from_bytes(&[ENVELOPE_VERSION, 1, 16, 0, 0]);
        assert!(matches!(result, Err(Error::InvalidHeader(_))));
    }

    #[test]
    fn test_header_empty_data() {
        assert!(matches!(EnvelopeHeader::from_bytes(&[]), Err(Error::InvalidHeader(_))));
    }

    #[test]
    fn test_material_too_long() {
        let header = EnvelopeHeader::new(SchemeTag::KeyPair, vec![0; 256], vec![0; 24]);
        assert!(matches!(header.to_bytes(), Err(Error::InvalidHeader(_))));
    }

    #[test]
    fn test_encode_decode_splits_payload() {
        let header = EnvelopeHeader::new(SchemeTag::KeyPair, vec![9; 32], vec![8; 24]);
        let header_bytes = header.to_bytes().unwrap();
        let encoded = encode(&header_bytes, b"payload");

        let decoded = decode(&encoded, SchemeTag::KeyPair).unwrap();
        assert_eq!(decoded.header, header);
        assert_eq!(decoded.header_bytes, header_bytes);
        assert_eq!(decoded.payload, b"payload");
    }

    #[test]
    fn test_decode_rejects_other_scheme_and_plaintext() {
        let header = EnvelopeHeader::new(SchemeTag::KeyPair, vec![9; 32], vec![8; 24]);
        let encoded = encode(&header.to_bytes().unwrap(), b"payload");

        assert!(decode(&encoded, SchemeTag::BlockCipher).is_err());
        assert!(decode("alice@example.com", SchemeTag::BlockCipher).is_err());
    }
}
