//! `sqlstore` keeps HTTP session state in a relational table and hands the
//! client nothing but a small authenticated token in a cookie.
//!
//! The crate is built around three pieces:
//!
//! * [`Store`](store::Store) implements the session lifecycle: loading a
//!   session for a request ([`Store::get`](store::Store::get),
//!   [`Store::new_session`](store::Store::new_session)) and persisting it when
//!   the response is written ([`Store::save`](store::Store::save)).
//! * [`Codecs`](codec::Codecs) turns session identifiers and payloads into
//!   tamper-evident, optionally encrypted strings. Several key pairs can be
//!   configured at once, which allows rotating keys without logging every
//!   user out.
//! * [`SessionBackend`](backend::SessionBackend) is the persistence adapter:
//!   select, insert, update and delete of one row. The database-backed
//!   implementation works with SQLite, PostgreSQL and MySQL.
//!
//! # Examples
//!
//! ```
//! use sqlstore::backend::memory::MemoryBackend;
//! use sqlstore::codec::Codecs;
//! use sqlstore::config::KeyPair;
//! use sqlstore::store::Store;
//!
//! # #[tokio::main]
//! # async fn main() -> sqlstore::Result<()> {
//! let codecs = Codecs::from_key_pairs(&[KeyPair::new("a very secret hash key")])?;
//! let store = Store::new(MemoryBackend::new(), codecs);
//!
//! let mut request = http::Request::new(());
//! let session = store.get(&mut request, "session").await.expect("no cookie was sent");
//! session.insert("user_id", 42)?;
//!
//! let mut response = http::Response::new(());
//! store.save_all(&mut request, &mut response).await?;
//! assert!(response.headers().contains_key(http::header::SET_COOKIE));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs, rustdoc::missing_crate_level_docs)]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub mod backend;
pub mod codec;
pub mod config;
#[cfg(feature = "db")]
pub mod db;
mod error;
mod serializers;
pub mod session;
pub mod store;

pub use error::Error;

/// A type alias for a result that can return a [`sqlstore::Error`](Error).
pub type Result<T> = std::result::Result<T, Error>;
