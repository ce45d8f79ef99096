//! The session store.
//!
//! [`Store`] ties a [`SessionBackend`] and a chain of [`Codecs`] together and
//! implements the session lifecycle for one HTTP request:
//!
//! 1. [`Store::get`] returns the session for a cookie name, loading it from the
//!    backend the first time it is requested and caching it in the request's
//!    [`Registry`].
//! 2. The application reads and mutates the session.
//! 3. [`Store::save`] (or [`Store::save_all`]) writes the session back and sets
//!    the cookie on the response.
//!
//! The client only ever receives the encoded row identifier; the session
//! values stay in the backend.

use std::fmt::{Display, Formatter};
use std::sync::Arc;

use cookie::Cookie;
use derive_more::Debug;
use http::header::{InvalidHeaderValue, SET_COOKIE};
use http::{HeaderValue, Request, Response};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{Instrument, Level, debug, span, trace, warn};

use crate::backend::{BackendError, SessionBackend};
use crate::codec::{CodecError, Codecs};
use crate::config::CookieOptions;
#[cfg(feature = "db")]
use crate::config::StoreConfig;
use crate::session::Session;
use crate::session::registry::Registry;

pub(crate) const ERROR_PREFIX: &str = "session store:";

/// Errors that can occur while loading a session.
///
/// Loading errors are never fatal: they come wrapped in a [`LoadFailure`]
/// that still carries a usable, empty session.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LoadError {
    /// The session cookie could not be decoded.
    #[error("{ERROR_PREFIX} the session cookie could not be decoded: {0}")]
    DecodeId(#[source] CodecError),
    /// The decoded session identifier is not a row identifier.
    #[error("{ERROR_PREFIX} invalid session identifier `{0}`")]
    InvalidId(String),
    /// The session row could not be read.
    #[error("{ERROR_PREFIX} the session could not be loaded: {0}")]
    Select(#[source] BackendError),
    /// There is no row for the session identifier.
    #[error("{ERROR_PREFIX} session `{0}` not found")]
    NotFound(String),
    /// The session row could not be decoded.
    #[error("{ERROR_PREFIX} the session values could not be decoded: {0}")]
    DecodeValues(#[source] CodecError),
}

/// A failed load, together with the session to use instead.
///
/// The session is the same one a request without a cookie would get (plus the
/// decoded identifier, if decoding got that far), so callers that do not care
/// about the reason can carry on with it.
///
/// # Examples
///
/// ```
/// use sqlstore::backend::memory::MemoryBackend;
/// use sqlstore::codec::Codecs;
/// use sqlstore::config::KeyPair;
/// use sqlstore::store::{LoadError, Store};
/// use sqlstore::test::request_with_cookie;
///
/// # #[tokio::main]
/// # async fn main() -> sqlstore::Result<()> {
/// let store = Store::new(
///     MemoryBackend::new(),
///     Codecs::from_key_pairs(&[KeyPair::new("hash key")])?,
/// );
/// let mut request = request_with_cookie("session", "forged");
///
/// let failure = store.get(&mut request, "session").await.unwrap_err();
/// assert!(matches!(failure.error(), LoadError::DecodeId(_)));
///
/// let session = failure.into_session();
/// assert!(session.is_new());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct LoadFailure<S> {
    session: S,
    error: LoadError,
}

impl<S> LoadFailure<S> {
    /// Creates a new `LoadFailure`.
    #[must_use]
    pub fn new(session: S, error: LoadError) -> Self {
        Self { session, error }
    }

    /// The session to use instead of the one that failed to load.
    #[must_use]
    pub fn session(&self) -> &S {
        &self.session
    }

    /// The reason loading failed.
    #[must_use]
    pub fn error(&self) -> &LoadError {
        &self.error
    }

    /// Discards the error and returns the session.
    #[must_use]
    pub fn into_session(self) -> S {
        self.session
    }

    /// Returns the session and the error.
    #[must_use]
    pub fn into_parts(self) -> (S, LoadError) {
        (self.session, self.error)
    }
}

impl<S> Display for LoadFailure<S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.error, f)
    }
}

impl<S: std::fmt::Debug> std::error::Error for LoadFailure<S> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        std::error::Error::source(&self.error)
    }
}

impl<S> From<LoadFailure<S>> for crate::Error {
    fn from(failure: LoadFailure<S>) -> Self {
        crate::Error::Load(failure.error)
    }
}

/// Extension methods for the result of loading a session.
pub trait LoadResultExt<S> {
    /// Returns the session, whether it was loaded or is the fallback of a
    /// failed load.
    fn into_session(self) -> S;
}

impl<S> LoadResultExt<S> for Result<S, LoadFailure<S>> {
    fn into_session(self) -> S {
        match self {
            Ok(session) => session,
            Err(failure) => failure.into_session(),
        }
    }
}

/// Errors that can occur while saving a session.
///
/// When saving fails, no cookie is set on the response.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SaveError {
    /// The session values could not be encoded.
    #[error("{ERROR_PREFIX} the session values could not be encoded: {0}")]
    EncodeValues(#[source] CodecError),
    /// The session identifier could not be encoded.
    #[error("{ERROR_PREFIX} the session identifier could not be encoded: {0}")]
    EncodeId(#[source] CodecError),
    /// The session row could not be inserted.
    #[error("{ERROR_PREFIX} the session could not be inserted: {0}")]
    Insert(#[source] BackendError),
    /// The session row could not be updated.
    #[error("{ERROR_PREFIX} the session could not be updated: {0}")]
    Update(#[source] BackendError),
    /// The session row could not be deleted.
    #[error("{ERROR_PREFIX} the session could not be deleted: {0}")]
    Delete(#[source] BackendError),
    /// The session identifier is not a row identifier.
    #[error("{ERROR_PREFIX} invalid session identifier `{0}`")]
    InvalidId(String),
    /// The cookie could not be turned into a header value.
    #[error("{ERROR_PREFIX} the session cookie is not a valid header value: {0}")]
    InvalidHeader(#[from] InvalidHeaderValue),
}

/// A session store keeping session values in a [`SessionBackend`] and the
/// encoded row identifier in a cookie.
///
/// Cloning is cheap; clones share the backend, the codecs and the default
/// cookie options.
///
/// # Examples
///
/// ```
/// use sqlstore::backend::memory::MemoryBackend;
/// use sqlstore::codec::Codecs;
/// use sqlstore::config::{CookieOptions, KeyPair};
/// use sqlstore::store::Store;
///
/// # fn main() -> sqlstore::Result<()> {
/// let store = Store::new(
///     MemoryBackend::new(),
///     Codecs::from_key_pairs(&[KeyPair::new("hash key")])?,
/// )
/// .with_options(CookieOptions::builder().path("/app").build());
///
/// assert_eq!(store.options().path, "/app");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Store {
    #[debug("..")]
    backend: Arc<dyn SessionBackend>,
    codecs: Codecs,
    options: Arc<CookieOptions>,
}

impl Store {
    /// Creates a new store using the default [`CookieOptions`].
    #[must_use]
    pub fn new<B: SessionBackend + 'static>(backend: B, codecs: Codecs) -> Self {
        Self::with_backend(Arc::new(backend), codecs)
    }

    /// Creates a new store from an already shared backend.
    #[must_use]
    pub fn with_backend(backend: Arc<dyn SessionBackend>, codecs: Codecs) -> Self {
        Self {
            backend,
            codecs,
            options: Arc::new(CookieOptions::default()),
        }
    }

    /// Sets the cookie options copied into every new session.
    #[must_use]
    pub fn with_options(mut self, options: CookieOptions) -> Self {
        self.options = Arc::new(options);
        self
    }

    /// Creates a store from configuration, connecting to the configured
    /// database.
    ///
    /// The session table is created first if
    /// [`DatabaseConfig::create_table`](crate::config::DatabaseConfig::create_table)
    /// is set.
    ///
    /// # Errors
    ///
    /// Returns an error if no key pair or no database URL is configured, a key
    /// pair or a table name is invalid, or the database cannot be reached.
    ///
    /// # Examples
    ///
    /// ```
    /// use sqlstore::config::StoreConfig;
    /// use sqlstore::store::Store;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> sqlstore::Result<()> {
    /// let config = StoreConfig::from_toml(
    ///     r#"
    ///     [[key_pairs]]
    ///     hash_key = "hash key"
    ///
    ///     [database]
    ///     url = "sqlite::memory:"
    ///     create_table = true
    ///     "#,
    /// )?;
    ///
    /// let store = Store::from_config(&config).await?;
    /// # Ok(())
    /// # }
    /// ```
    #[cfg(feature = "db")]
    pub async fn from_config(config: &StoreConfig) -> crate::Result<Self> {
        use crate::backend::db::DbBackend;
        use crate::db::Database;

        let url = config
            .database
            .url
            .as_ref()
            .ok_or(crate::Error::MissingDatabaseUrl)?;
        config.table.validate()?;
        let codecs = Codecs::from_key_pairs_with_limits(
            &config.key_pairs,
            config.token_max_age,
            config.token_max_length,
        )?;

        let database = Arc::new(Database::new(url.as_str()).await?);
        if config.database.create_table {
            database.create_table(&config.table).await?;
        }
        let backend = DbBackend::new(database, config.table.clone())?;

        Ok(Self::new(backend, codecs).with_options(config.cookie.clone()))
    }

    /// The cookie options copied into every new session.
    #[must_use]
    pub fn options(&self) -> &CookieOptions {
        &self.options
    }

    /// The codecs used for cookies and session values.
    #[must_use]
    pub fn codecs(&self) -> &Codecs {
        &self.codecs
    }

    /// Returns the session named `name` for `request`.
    ///
    /// The first call for a given name loads the session (see
    /// [`Store::new_session`]) and caches it in the request's [`Registry`];
    /// later calls return the cached session, so a session is loaded at most
    /// once per request.
    ///
    /// # Errors
    ///
    /// Returns a [`LoadFailure`] if the session could not be loaded. The
    /// failure carries the fallback session, which is cached like a
    /// successfully loaded one; later calls return it without an error.
    pub async fn get<'r, B: Send>(
        &self,
        request: &'r mut Request<B>,
        name: &str,
    ) -> Result<&'r mut Session, LoadFailure<&'r mut Session>> {
        if Registry::from_request(request).is_some_and(|registry| registry.contains(name)) {
            let session = Registry::from_request_mut(request)
                .get_or_insert_with(name, || self.empty_session(name));
            return Ok(session);
        }

        let span = span!(Level::TRACE, "get", name);
        let cookie = request_cookie(request, name);
        let loaded = self.load(name, cookie).instrument(span).await;

        let registry = Registry::from_request_mut(request);
        match loaded {
            Ok(session) => Ok(registry.insert(session)),
            Err(failure) => {
                let (session, error) = failure.into_parts();
                Err(LoadFailure::new(registry.insert(session), error))
            }
        }
    }

    /// Loads the session named `name` for `request`, bypassing the request's
    /// [`Registry`].
    ///
    /// Without a cookie named `name`, this returns a new, empty session.
    /// Otherwise the cookie is decoded into a row identifier and the row's
    /// values are loaded into the session.
    ///
    /// # Errors
    ///
    /// Returns a [`LoadFailure`] if the cookie cannot be decoded, the row does
    /// not exist or cannot be read, or the row's values cannot be decoded.
    /// The failure carries a new, empty session.
    pub fn new_session<B>(
        &self,
        request: &Request<B>,
        name: &str,
    ) -> impl Future<Output = Result<Session, LoadFailure<Session>>> {
        let span = span!(Level::TRACE, "new_session", name);
        let cookie = request_cookie(request, name);

        self.load(name, cookie).instrument(span)
    }

    /// Saves `session` and sets its cookie on `response`.
    ///
    /// A session whose max-age is zero or negative is deleted instead, and the
    /// cookie set on the response tells the client to drop it.
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot be encoded or written to the
    /// backend. The response is left untouched in that case.
    pub async fn save<B: Send>(
        &self,
        response: &mut Response<B>,
        session: &mut Session,
    ) -> Result<(), SaveError> {
        let span = span!(Level::TRACE, "save", name = session.name(), id = session.id());

        let header = self.save_impl(session).instrument(span).await?;
        response.headers_mut().append(SET_COOKIE, header);
        Ok(())
    }

    /// Saves every session loaded for `request`, in the order they were first
    /// requested.
    ///
    /// # Errors
    ///
    /// Returns the first error; sessions after the failing one are not saved.
    pub async fn save_all<B: Send, R: Send>(
        &self,
        request: &mut Request<B>,
        response: &mut Response<R>,
    ) -> Result<(), SaveError> {
        for session in Registry::from_request_mut(request).iter_mut() {
            self.save(response, session).await?;
        }
        Ok(())
    }

    fn empty_session(&self, name: &str) -> Session {
        Session::new(name, CookieOptions::clone(&self.options))
    }

    async fn load(
        &self,
        name: &str,
        cookie: Option<String>,
    ) -> Result<Session, LoadFailure<Session>> {
        let mut session = self.empty_session(name);
        let Some(cookie) = cookie else {
            return Ok(session);
        };

        match self.load_into(&mut session, &cookie).await {
            Ok(()) => {
                trace!(id = session.id(), "Loaded session");
                Ok(session)
            }
            Err(error) => {
                debug!(%error, "Could not load session");
                Err(LoadFailure::new(session, error))
            }
        }
    }

    async fn load_into(&self, session: &mut Session, cookie: &str) -> Result<(), LoadError> {
        let id: String = self
            .codecs
            .decode(session.name(), cookie)
            .map_err(LoadError::DecodeId)?;
        session.set_id(id);

        let row_id = parse_row_id(session.id())
            .ok_or_else(|| LoadError::InvalidId(session.id().to_owned()))?;
        let data = self
            .backend
            .select(row_id)
            .await
            .map_err(LoadError::Select)?
            .ok_or_else(|| LoadError::NotFound(session.id().to_owned()))?;

        let values = self
            .codecs
            .decode(session.name(), &data)
            .map_err(LoadError::DecodeValues)?;
        session.set_loaded(values);
        Ok(())
    }

    async fn save_impl(&self, session: &mut Session) -> Result<HeaderValue, SaveError> {
        if session.options().max_age <= 0 {
            let mut cookie = build_cookie(session.name(), String::new(), session.options());
            cookie.make_removal();
            let header = HeaderValue::from_str(&cookie.to_string())?;

            if !session.id().is_empty() {
                let row_id = parse_row_id(session.id())
                    .ok_or_else(|| SaveError::InvalidId(session.id().to_owned()))?;
                self.backend
                    .delete(row_id)
                    .await
                    .map_err(SaveError::Delete)?;
            }
            session.set_id(String::new());

            trace!("Deleted session");
            return Ok(header);
        }

        let data = self
            .codecs
            .encode(session.name(), session.values())
            .map_err(SaveError::EncodeValues)?;

        let row_id = if session.id().is_empty() {
            self.backend.insert(&data).await.map_err(SaveError::Insert)?
        } else {
            let row_id = parse_row_id(session.id())
                .ok_or_else(|| SaveError::InvalidId(session.id().to_owned()))?;
            let updated = self
                .backend
                .update(row_id, &data)
                .await
                .map_err(SaveError::Update)?;

            if updated {
                row_id
            } else {
                warn!(row_id, "Session row has disappeared, inserting a new one");
                self.backend.insert(&data).await.map_err(SaveError::Insert)?
            }
        };

        let id = row_id.to_string();
        let token = self
            .codecs
            .encode(session.name(), id.as_str())
            .map_err(SaveError::EncodeId)?;
        session.set_id(id);

        let cookie = build_cookie(session.name(), token, session.options());
        let header = HeaderValue::from_str(&cookie.to_string())?;

        trace!(id = session.id(), "Saved session");
        Ok(header)
    }
}

fn parse_row_id(id: &str) -> Option<i64> {
    id.parse().ok()
}

fn request_cookie<B>(request: &Request<B>, name: &str) -> Option<String> {
    request
        .headers()
        .get_all(http::header::COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(Cookie::split_parse)
        .filter_map(Result::ok)
        .find(|cookie| cookie.name() == name)
        .map(|cookie| cookie.value().to_owned())
}

fn build_cookie(name: &str, value: String, options: &CookieOptions) -> Cookie<'static> {
    let max_age = time::Duration::seconds(options.max_age);

    let mut builder = Cookie::build((name.to_owned(), value))
        .path(options.path.clone())
        .secure(options.secure)
        .http_only(options.http_only)
        .same_site(options.same_site.into())
        .max_age(max_age);
    if let Some(domain) = &options.domain {
        builder = builder.domain(domain.clone());
    }
    let expires = (options.max_age > 0)
        .then(|| OffsetDateTime::now_utc().checked_add(max_age))
        .flatten();
    if let Some(expires) = expires {
        builder = builder.expires(expires);
    }

    builder.build()
}
