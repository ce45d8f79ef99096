//! Authenticated encoding of cookie values.
//!
//! Everything this crate hands to the client (the session identifier) and
//! everything it writes to the database (the session values) goes through a
//! [`Codec`]. A codec turns bytes into a string that cannot be modified without
//! detection, and back again.
//!
//! [`Codecs`] is an ordered chain of codecs that supports key rotation: new
//! values are always encoded with the first codec, and decoding tries every
//! codec in order until one of them accepts the value.
//!
//! # Examples
//!
//! ```
//! use sqlstore::codec::Codecs;
//! use sqlstore::config::KeyPair;
//!
//! let old = Codecs::from_key_pairs(&[KeyPair::new("old-key")])?;
//! let token = old.encode("session", "42")?;
//!
//! // the new key goes first, the old one stays for decoding
//! let rotated = Codecs::from_key_pairs(&[KeyPair::new("new-key"), KeyPair::new("old-key")])?;
//! let id: String = rotated.decode("session", &token)?;
//! assert_eq!(id, "42");
//! # Ok::<(), sqlstore::codec::CodecError>(())
//! ```

mod secure_cookie;

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
pub use secure_cookie::{DEFAULT_MAX_AGE, DEFAULT_MAX_LENGTH, SecureCookie};
use thiserror::Error;

use crate::config::KeyPair;

const ERROR_PREFIX: &str = "codec:";

/// Errors that can occur while encoding or decoding a value.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodecError {
    /// The hash key is empty.
    #[error("{ERROR_PREFIX} hash key is not set")]
    HashKeyNotSet,
    /// The block key has a length other than 32 bytes.
    #[error("{ERROR_PREFIX} block key must be 32 bytes long, got {0} bytes")]
    InvalidBlockKey(usize),
    /// The chain does not contain any codecs.
    #[error("{ERROR_PREFIX} no codecs configured")]
    NoCodecs,
    /// The value could not be serialized.
    #[error("{ERROR_PREFIX} JSON serialization error: {0}")]
    Serialize(#[source] serde_json::Error),
    /// The value could not be deserialized.
    #[error("{ERROR_PREFIX} JSON deserialization error: {0}")]
    Deserialize(#[source] serde_json::Error),
    /// The value could not be encrypted.
    #[error("{ERROR_PREFIX} the value could not be encrypted")]
    Encrypt,
    /// The value could not be decrypted.
    #[error("{ERROR_PREFIX} the value could not be decrypted")]
    Decrypt,
    /// The value is not valid base64.
    #[error("{ERROR_PREFIX} base64 decoding error: {0}")]
    Base64(#[from] base64::DecodeError),
    /// The encoded value is longer than allowed.
    #[error("{ERROR_PREFIX} the value is too long ({length} > {max_length} bytes)")]
    ValueTooLong {
        /// The length of the value.
        length: usize,
        /// The maximum allowed length.
        max_length: usize,
    },
    /// The value does not have the expected structure.
    #[error("{ERROR_PREFIX} the value is malformed")]
    InvalidFormat,
    /// The value was signed with a different key or was modified.
    #[error("{ERROR_PREFIX} the value is not valid (signature mismatch)")]
    InvalidMac,
    /// The timestamp embedded in the value is older than the maximum age.
    #[error("{ERROR_PREFIX} the value has expired")]
    Expired,
    /// None of the codecs in a chain could decode the value.
    #[error("{ERROR_PREFIX} none of the {} codecs could decode the value", .0.len())]
    AllFailed(Vec<CodecError>),
}

/// A transform between raw bytes and a tamper-evident string.
///
/// The `name` passed to both methods binds the encoded value to the cookie it
/// was issued for, so a value cannot be moved from one cookie to another.
pub trait Codec: Send + Sync + Debug {
    /// Encodes `value` for the cookie `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be encrypted or is too long once
    /// encoded.
    fn encode(&self, name: &str, value: &[u8]) -> Result<String, CodecError>;

    /// Decodes a value previously produced by [`Codec::encode`] for the same
    /// cookie `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is malformed, was modified, was produced
    /// with a different key, or has expired.
    fn decode(&self, name: &str, value: &str) -> Result<Vec<u8>, CodecError>;
}

/// An ordered chain of codecs.
///
/// Cloning is cheap; the codecs are shared.
#[derive(Debug, Clone)]
pub struct Codecs(Arc<[Box<dyn Codec>]>);

impl Codecs {
    /// Creates a chain from already constructed codecs. The first codec is
    /// used for encoding.
    #[must_use]
    pub fn new(codecs: Vec<Box<dyn Codec>>) -> Self {
        Self(codecs.into())
    }

    /// Creates a [`SecureCookie`] codec for each key pair, in order, using the
    /// default token max age.
    ///
    /// The same chain encodes the session values stored in the backend, so
    /// the codecs built here do not limit the length of encoded values; use
    /// [`Codecs::from_key_pairs_with_limits`] to set one.
    ///
    /// # Errors
    ///
    /// Returns an error if `key_pairs` is empty or one of the pairs is invalid.
    pub fn from_key_pairs(key_pairs: &[KeyPair]) -> Result<Self, CodecError> {
        Self::from_key_pairs_with_max_age(key_pairs, Some(DEFAULT_MAX_AGE))
    }

    /// Like [`Codecs::from_key_pairs`], with a custom token max age. `None`
    /// disables the expiry check.
    ///
    /// # Errors
    ///
    /// Returns an error if `key_pairs` is empty or one of the pairs is invalid.
    pub fn from_key_pairs_with_max_age(
        key_pairs: &[KeyPair],
        max_age: Option<Duration>,
    ) -> Result<Self, CodecError> {
        Self::from_key_pairs_with_limits(key_pairs, max_age, 0)
    }

    /// Like [`Codecs::from_key_pairs`], with a custom token max age and a
    /// maximum length of encoded values. A `max_length` of zero disables the
    /// length check.
    ///
    /// # Errors
    ///
    /// Returns an error if `key_pairs` is empty or one of the pairs is invalid.
    ///
    /// # Examples
    ///
    /// ```
    /// use sqlstore::codec::{CodecError, Codecs};
    /// use sqlstore::config::KeyPair;
    ///
    /// let codecs = Codecs::from_key_pairs_with_limits(&[KeyPair::new("hash-key")], None, 64)?;
    ///
    /// assert!(matches!(
    ///     codecs.encode("session", &"a".repeat(64)),
    ///     Err(CodecError::ValueTooLong { max_length: 64, .. })
    /// ));
    /// # Ok::<(), CodecError>(())
    /// ```
    pub fn from_key_pairs_with_limits(
        key_pairs: &[KeyPair],
        max_age: Option<Duration>,
        max_length: usize,
    ) -> Result<Self, CodecError> {
        if key_pairs.is_empty() {
            return Err(CodecError::NoCodecs);
        }

        let codecs = key_pairs
            .iter()
            .map(|pair| {
                let codec = SecureCookie::new(
                    pair.hash_key.as_bytes(),
                    pair.block_key.as_ref().map(crate::config::SecretKey::as_bytes),
                )?
                .with_max_age(max_age)
                .with_max_length(max_length);
                let codec: Box<dyn Codec> = Box::new(codec);
                Ok(codec)
            })
            .collect::<Result<Vec<_>, CodecError>>()?;

        Ok(Self::new(codecs))
    }

    /// Returns the number of codecs in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the chain contains no codecs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Serializes `value` as JSON and encodes it with the first codec.
    ///
    /// # Errors
    ///
    /// Returns an error if the chain is empty, the value cannot be serialized,
    /// or the codec fails.
    pub fn encode<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<String, CodecError> {
        let codec = self.0.first().ok_or(CodecError::NoCodecs)?;
        let bytes = serde_json::to_vec(value).map_err(CodecError::Serialize)?;
        codec.encode(name, &bytes)
    }

    /// Decodes `value` with each codec in turn and deserializes the first
    /// successful result.
    ///
    /// # Errors
    ///
    /// Returns the error of the only codec when the chain has a single codec,
    /// or [`CodecError::AllFailed`] with the error of each codec otherwise.
    pub fn decode<T: DeserializeOwned>(&self, name: &str, value: &str) -> Result<T, CodecError> {
        let mut errors = Vec::with_capacity(self.0.len());

        for codec in self.0.iter() {
            let decoded = codec.decode(name, value).and_then(|bytes| {
                serde_json::from_slice(&bytes).map_err(CodecError::Deserialize)
            });
            match decoded {
                Ok(decoded) => return Ok(decoded),
                Err(error) => errors.push(error),
            }
        }

        match errors.len() {
            0 => Err(CodecError::NoCodecs),
            1 => Err(errors.remove(0)),
            _ => Err(CodecError::AllFailed(errors)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;

    fn codecs(keys: &[&str]) -> Codecs {
        let pairs: Vec<_> = keys.iter().map(|key| KeyPair::new(*key)).collect();
        Codecs::from_key_pairs(&pairs).unwrap()
    }

    #[test]
    fn round_trip_values() {
        let codecs = codecs(&["hash-key"]);
        let mut values = HashMap::new();
        values.insert("user".to_owned(), json!({"id": 7, "roles": ["admin"]}));
        values.insert("theme".to_owned(), json!("dark"));

        let encoded = codecs.encode("session", &values).unwrap();
        let decoded: HashMap<String, serde_json::Value> =
            codecs.decode("session", &encoded).unwrap();

        assert_eq!(decoded, values);
    }

    #[test]
    fn round_trip_encrypted() {
        let codecs = Codecs::from_key_pairs(&[KeyPair::encrypted(
            "hash-key",
            "0123456789abcdef0123456789abcdef",
        )])
        .unwrap();

        let encoded = codecs.encode("session", "1234").unwrap();
        let decoded: String = codecs.decode("session", &encoded).unwrap();

        assert_eq!(decoded, "1234");
    }

    #[test]
    fn key_pair_codecs_have_no_length_limit() {
        let codecs = codecs(&["hash-key"]);
        let value = "a".repeat(2 * DEFAULT_MAX_LENGTH);

        let encoded = codecs.encode("session", &value).unwrap();
        let decoded: String = codecs.decode("session", &encoded).unwrap();

        assert_eq!(decoded, value);
    }

    #[test]
    fn length_limit() {
        let codecs =
            Codecs::from_key_pairs_with_limits(&[KeyPair::new("hash-key")], None, 128).unwrap();

        assert!(codecs.encode("session", "short").is_ok());
        assert!(matches!(
            codecs.encode("session", &"a".repeat(128)),
            Err(CodecError::ValueTooLong {
                max_length: 128,
                ..
            })
        ));
    }

    #[test]
    fn floats_round_trip_exactly() {
        let codecs = codecs(&["hash-key"]);
        let values = HashMap::from([
            ("f".to_owned(), json!(1.071_566_039_146_582_6e-75)),
            ("g".to_owned(), json!(0.1_f64 + 0.2)),
        ]);

        let encoded = codecs.encode("session", &values).unwrap();
        let decoded: HashMap<String, serde_json::Value> =
            codecs.decode("session", &encoded).unwrap();

        assert_eq!(decoded, values);
    }

    #[test]
    fn empty_key_pairs() {
        let result = Codecs::from_key_pairs(&[]);

        assert!(matches!(result, Err(CodecError::NoCodecs)));
    }

    #[test]
    fn rotation_decodes_old_values() {
        let old = codecs(&["old-key"]);
        let token = old.encode("session", "42").unwrap();

        let rotated = codecs(&["new-key", "old-key"]);
        let id: String = rotated.decode("session", &token).unwrap();

        assert_eq!(id, "42");
    }

    #[test]
    fn rotation_encodes_with_newest_key() {
        let rotated = codecs(&["new-key", "old-key"]);
        let token = rotated.encode("session", "42").unwrap();

        let new_only = codecs(&["new-key"]);
        let old_only = codecs(&["old-key"]);
        assert_eq!(new_only.decode::<String>("session", &token).unwrap(), "42");
        assert!(matches!(
            old_only.decode::<String>("session", &token),
            Err(CodecError::InvalidMac)
        ));
    }

    #[test]
    fn all_codecs_fail() {
        let token = codecs(&["unknown-key"]).encode("session", "42").unwrap();

        let result = codecs(&["new-key", "old-key"]).decode::<String>("session", &token);

        let Err(CodecError::AllFailed(errors)) = result else {
            panic!("expected AllFailed, got {result:?}");
        };
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| matches!(e, CodecError::InvalidMac)));
    }

    #[test]
    fn value_bound_to_cookie_name() {
        let codecs = codecs(&["hash-key"]);
        let token = codecs.encode("session", "42").unwrap();

        let result = codecs.decode::<String>("other", &token);

        assert!(matches!(result, Err(CodecError::InvalidMac)));
    }

    #[test]
    fn wrong_target_type() {
        let codecs = codecs(&["hash-key"]);
        let token = codecs.encode("session", "not a number").unwrap();

        let result = codecs.decode::<i64>("session", &token);

        assert!(matches!(result, Err(CodecError::Deserialize(_))));
    }

    #[test]
    fn empty_chain() {
        let codecs = Codecs::new(Vec::new());

        assert!(codecs.is_empty());
        assert!(matches!(
            codecs.encode("session", "42"),
            Err(CodecError::NoCodecs)
        ));
        assert!(matches!(
            codecs.decode::<String>("session", "abc"),
            Err(CodecError::NoCodecs)
        ));
    }
}
