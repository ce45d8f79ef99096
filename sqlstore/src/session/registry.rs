//! Per-request session cache.
//!
//! The [`Registry`] lives in the request's extensions and holds every session
//! loaded during that request, keyed by cookie name. It is created lazily the
//! first time a session is requested and dropped together with the request.

use http::Request;
use indexmap::IndexMap;

use crate::session::Session;

/// Sessions loaded during one request, in the order they were first requested.
///
/// # Examples
///
/// ```
/// use sqlstore::session::registry::Registry;
///
/// let mut request = http::Request::new(());
/// assert!(Registry::from_request(&request).is_none());
///
/// let registry = Registry::from_request_mut(&mut request);
/// assert!(registry.is_empty());
/// ```
#[derive(Debug, Default, Clone)]
pub struct Registry {
    sessions: IndexMap<String, Session>,
}

impl Registry {
    /// Returns the registry of `request`, if one has been created.
    #[must_use]
    pub fn from_request<B>(request: &Request<B>) -> Option<&Self> {
        request.extensions().get::<Self>()
    }

    /// Returns the registry of `request`, creating an empty one if needed.
    pub fn from_request_mut<B>(request: &mut Request<B>) -> &mut Self {
        request.extensions_mut().get_or_insert_default::<Self>()
    }

    /// Returns the session cached under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Session> {
        self.sessions.get(name)
    }

    /// Returns the session cached under `name`, mutably.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Session> {
        self.sessions.get_mut(name)
    }

    /// Returns `true` if a session is cached under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.sessions.contains_key(name)
    }

    /// Returns the number of cached sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns `true` if no session has been cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Iterates over the cached sessions, mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Session> {
        self.sessions.values_mut()
    }

    /// Caches `session` under its name, replacing any previous session with the
    /// same name, and returns a reference to the cached session.
    pub fn insert(&mut self, session: Session) -> &mut Session {
        let (index, _) = self.sessions.insert_full(session.name().to_owned(), session);
        &mut self.sessions[index]
    }

    /// Returns the session cached under `name`, caching the result of
    /// `default` first if there is none.
    pub fn get_or_insert_with(
        &mut self,
        name: &str,
        default: impl FnOnce() -> Session,
    ) -> &mut Session {
        self.sessions.entry(name.to_owned()).or_insert_with(default)
    }
}
