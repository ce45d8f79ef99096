//! HMAC-authenticated, optionally AES-GCM encrypted values.
//!
//! An encoded value is `base64url(timestamp "|" value "|" mac)` where:
//!
//! * `value` is `base64url(payload)`; when a block key is configured the
//!   payload is encrypted with AES-256-GCM (a random 96-bit nonce is prepended
//!   and the cookie name is used as associated data);
//! * `mac` is `HMAC-SHA256(hash_key, name "|" timestamp "|" value)`.

use std::time::Duration;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use derive_more::Debug;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use time::OffsetDateTime;

use crate::codec::{Codec, CodecError};
use crate::config::SecretKey;

type HmacSha256 = Hmac<Sha256>;

/// Default maximum age of an encoded value: 30 days.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(86400 * 30);
/// Default maximum length of an encoded value, in bytes.
pub const DEFAULT_MAX_LENGTH: usize = 4096;

const NONCE_LENGTH: usize = 12;
const BLOCK_KEY_LENGTH: usize = 32;

/// A [`Codec`] that signs values with HMAC-SHA256 and optionally encrypts
/// them with AES-256-GCM.
///
/// Every encoded value carries the time it was created at; values older than
/// the configured max age are rejected when decoding.
///
/// # Examples
///
/// ```
/// use sqlstore::codec::{Codec, SecureCookie};
///
/// let codec = SecureCookie::new(b"hash-key", None)?;
/// let encoded = codec.encode("session", b"42")?;
/// assert_eq!(codec.decode("session", &encoded)?, b"42");
/// # Ok::<(), sqlstore::codec::CodecError>(())
/// ```
#[derive(Debug, Clone)]
pub struct SecureCookie {
    hash_key: SecretKey,
    #[debug("{}", if cipher.is_some() { "Some(..)" } else { "None" })]
    cipher: Option<Aes256Gcm>,
    max_age: Option<Duration>,
    max_length: usize,
}

impl SecureCookie {
    /// Creates a new codec.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::HashKeyNotSet`] if `hash_key` is empty and
    /// [`CodecError::InvalidBlockKey`] if `block_key` is not 32 bytes long.
    pub fn new(hash_key: &[u8], block_key: Option<&[u8]>) -> Result<Self, CodecError> {
        if hash_key.is_empty() {
            return Err(CodecError::HashKeyNotSet);
        }

        let cipher = block_key
            .map(|key| {
                if key.len() != BLOCK_KEY_LENGTH {
                    return Err(CodecError::InvalidBlockKey(key.len()));
                }
                Aes256Gcm::new_from_slice(key).map_err(|_| CodecError::InvalidBlockKey(key.len()))
            })
            .transpose()?;

        Ok(Self {
            hash_key: SecretKey::new(hash_key),
            cipher,
            max_age: Some(DEFAULT_MAX_AGE),
            max_length: DEFAULT_MAX_LENGTH,
        })
    }

    /// Sets the maximum age of accepted values. `None` disables the check.
    #[must_use]
    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    /// Sets the maximum length of encoded values. Zero disables the check.
    #[must_use]
    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    fn encode_at(&self, name: &str, value: &[u8], timestamp: i64) -> Result<String, CodecError> {
        let payload = match &self.cipher {
            Some(cipher) => encrypt(cipher, name, value)?,
            None => value.to_vec(),
        };
        let value = URL_SAFE_NO_PAD.encode(payload);
        let timestamp = timestamp.to_string();
        let mac = self
            .mac(name, &timestamp, &value)?
            .finalize()
            .into_bytes();

        let mut token = Vec::with_capacity(timestamp.len() + value.len() + mac.len() + 2);
        token.extend_from_slice(timestamp.as_bytes());
        token.push(b'|');
        token.extend_from_slice(value.as_bytes());
        token.push(b'|');
        token.extend_from_slice(&mac);

        let encoded = URL_SAFE_NO_PAD.encode(token);
        if self.max_length > 0 && encoded.len() > self.max_length {
            return Err(CodecError::ValueTooLong {
                length: encoded.len(),
                max_length: self.max_length,
            });
        }
        Ok(encoded)
    }

    fn decode_at(&self, name: &str, value: &str, now: i64) -> Result<Vec<u8>, CodecError> {
        if self.max_length > 0 && value.len() > self.max_length {
            return Err(CodecError::ValueTooLong {
                length: value.len(),
                max_length: self.max_length,
            });
        }

        let token = URL_SAFE_NO_PAD.decode(value)?;
        // the MAC is raw bytes and may contain `|`, hence splitn
        let mut parts = token.splitn(3, |byte| *byte == b'|');
        let (Some(timestamp), Some(value), Some(mac)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(CodecError::InvalidFormat);
        };
        let timestamp = std::str::from_utf8(timestamp).map_err(|_| CodecError::InvalidFormat)?;
        let value = std::str::from_utf8(value).map_err(|_| CodecError::InvalidFormat)?;

        self.mac(name, timestamp, value)?
            .verify_slice(mac)
            .map_err(|_| CodecError::InvalidMac)?;

        let timestamp: i64 = timestamp.parse().map_err(|_| CodecError::InvalidFormat)?;
        if let Some(max_age) = self.max_age {
            let max_age = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
            if timestamp < now.saturating_sub(max_age) {
                return Err(CodecError::Expired);
            }
        }

        let payload = URL_SAFE_NO_PAD.decode(value)?;
        match &self.cipher {
            Some(cipher) => decrypt(cipher, name, &payload),
            None => Ok(payload),
        }
    }

    fn mac(&self, name: &str, timestamp: &str, value: &str) -> Result<HmacSha256, CodecError> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(self.hash_key.as_bytes())
            .map_err(|_| CodecError::HashKeyNotSet)?;
        mac.update(name.as_bytes());
        mac.update(b"|");
        mac.update(timestamp.as_bytes());
        mac.update(b"|");
        mac.update(value.as_bytes());
        Ok(mac)
    }
}

impl Codec for SecureCookie {
    fn encode(&self, name: &str, value: &[u8]) -> Result<String, CodecError> {
        self.encode_at(name, value, now())
    }

    fn decode(&self, name: &str, value: &str) -> Result<Vec<u8>, CodecError> {
        self.decode_at(name, value, now())
    }
}

fn now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

fn encrypt(cipher: &Aes256Gcm, name: &str, value: &[u8]) -> Result<Vec<u8>, CodecError> {
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: value,
                aad: name.as_bytes(),
            },
        )
        .map_err(|_| CodecError::Encrypt)?;

    let mut payload = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
    payload.extend_from_slice(&nonce);
    payload.extend_from_slice(&ciphertext);
    Ok(payload)
}

fn decrypt(cipher: &Aes256Gcm, name: &str, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    if payload.len() < NONCE_LENGTH {
        return Err(CodecError::Decrypt);
    }
    let (nonce, ciphertext) = payload.split_at(NONCE_LENGTH);

    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad: name.as_bytes(),
            },
        )
        .map_err(|_| CodecError::Decrypt)
}
