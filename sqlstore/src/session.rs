//! The session entity.
//!
//! A [`Session`] is what application code reads and mutates during a request.
//! It is created by the [`Store`](crate::store::Store), either empty or
//! populated from the database, and handed back to the store to be saved.
//!
//! # Examples
//!
//! ```
//! use sqlstore::config::CookieOptions;
//! use sqlstore::session::Session;
//!
//! let mut session = Session::new("session", CookieOptions::default());
//! session.insert("user_name", "world")?;
//!
//! let name: Option<String> = session.get("user_name")?;
//! assert_eq!(name.as_deref(), Some("world"));
//! assert!(session.is_new());
//! # Ok::<(), sqlstore::session::SessionError>(())
//! ```

pub mod registry;

use std::collections::HashMap;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::config::CookieOptions;

/// Errors that can occur while accessing session values.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    /// A value could not be serialized.
    #[error("session value `{key}` could not be serialized: {source}")]
    Serialize {
        /// The key of the value.
        key: String,
        /// The underlying error.
        source: serde_json::Error,
    },
    /// A value could not be deserialized into the requested type.
    #[error("session value `{key}` could not be deserialized: {source}")]
    Deserialize {
        /// The key of the value.
        key: String,
        /// The underlying error.
        source: serde_json::Error,
    },
}

/// Per-client state, tracked under one cookie name.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    id: String,
    name: String,
    values: HashMap<String, Value>,
    options: CookieOptions,
    is_new: bool,
}

impl Session {
    /// Creates a new, empty session that has not been saved yet.
    #[must_use]
    pub fn new(name: impl Into<String>, options: CookieOptions) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            values: HashMap::new(),
            options,
            is_new: true,
        }
    }

    /// The identifier of the session's row, or an empty string if the session
    /// has never been saved.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The name of the cookie this session is tracked under.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` until the session's values have been loaded from the
    /// database.
    #[must_use]
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// The cookie attributes of this session.
    #[must_use]
    pub fn options(&self) -> &CookieOptions {
        &self.options
    }

    /// The cookie attributes of this session, mutably.
    ///
    /// Setting [`CookieOptions::max_age`] to zero or less deletes the session
    /// on the next save.
    pub fn options_mut(&mut self) -> &mut CookieOptions {
        &mut self.options
    }

    /// All values stored in the session.
    #[must_use]
    pub fn values(&self) -> &HashMap<String, Value> {
        &self.values
    }

    /// All values stored in the session, mutably.
    pub fn values_mut(&mut self) -> &mut HashMap<String, Value> {
        &mut self.values
    }

    /// Gets the value stored under `key`, deserialized into `T`.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored value cannot be deserialized into `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, SessionError> {
        self.values
            .get(key)
            .map(|value| {
                <T as serde::Deserialize>::deserialize(value).map_err(|source| {
                    SessionError::Deserialize {
                        key: key.to_owned(),
                        source,
                    }
                })
            })
            .transpose()
    }

    /// Stores `value` under `key`, returning the previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be serialized.
    pub fn insert<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        value: T,
    ) -> Result<Option<Value>, SessionError> {
        let key = key.into();
        let value = serde_json::to_value(value).map_err(|source| SessionError::Serialize {
            key: key.clone(),
            source,
        })?;
        Ok(self.values.insert(key, value))
    }

    /// Removes the value stored under `key`.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    /// Removes all values.
    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Marks the session for deletion: the next save removes its row and
    /// tells the client to drop the cookie.
    pub fn expire(&mut self) {
        self.options.max_age = -1;
    }

    pub(crate) fn set_id(&mut self, id: String) {
        self.id = id;
    }

    pub(crate) fn set_loaded(&mut self, values: HashMap<String, Value>) {
        self.values = values;
        self.is_new = false;
    }
}
