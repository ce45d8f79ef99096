#![cfg(feature = "sqlite")]

use std::collections::HashMap;

use http::{Request, Response};
use serde::{Deserialize, Serialize};
use sqlstore::backend::SessionBackend;
use sqlstore::codec::{CodecError, Codecs, DEFAULT_MAX_LENGTH};
use sqlstore::config::{KeyPair, StoreConfig};
use sqlstore::db::SessionTable;
use sqlstore::store::{LoadError, SaveError, Store};
use sqlstore::test::{TestDatabase, follow_up_request, request_with_cookie, response_cookies};

const NAME: &str = "session";
const BLOCK_KEY: &str = "0123456789abcdef0123456789abcdef";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Cart {
    items: Vec<String>,
    total_cents: u64,
}

fn codecs() -> Codecs {
    Codecs::from_key_pairs(&[KeyPair::encrypted("integration hash key", BLOCK_KEY)]).unwrap()
}

async fn store() -> (Store, TestDatabase) {
    let test_database = TestDatabase::new_sqlite().await.unwrap();
    let store = Store::new(test_database.backend().unwrap(), codecs());
    (store, test_database)
}

#[tokio::test]
async fn request_without_cookie() {
    let (store, test_database) = store().await;
    let mut request = Request::new(());

    let session = store.get(&mut request, NAME).await.unwrap();

    assert!(session.is_new());
    assert!(session.values().is_empty());
    assert_eq!(session.id(), "");

    test_database.cleanup().await.unwrap();
}

#[tokio::test]
async fn first_save_inserts_row() {
    let (store, test_database) = store().await;
    let backend = test_database.backend().unwrap();
    let mut request = Request::new(());
    let mut response = Response::new(());

    store
        .get(&mut request, NAME)
        .await
        .unwrap()
        .insert("user_id", 7)
        .unwrap();
    store.save_all(&mut request, &mut response).await.unwrap();

    let cookies = response_cookies(&response);
    assert_eq!(cookies.len(), 1);
    let id: String = store.codecs().decode(NAME, cookies[0].value()).unwrap();
    let row_id: i64 = id.parse().unwrap();
    assert!(backend.select(row_id).await.unwrap().is_some());
    assert!(backend.select(row_id + 1).await.unwrap().is_none());

    test_database.cleanup().await.unwrap();
}

#[tokio::test]
async fn values_survive_round_trip() {
    let (store, test_database) = store().await;
    let cart = Cart {
        items: vec!["book".to_owned(), "pen".to_owned()],
        total_cents: 2599,
    };
    let mut request = Request::new(());
    let mut response = Response::new(());

    let session = store.get(&mut request, NAME).await.unwrap();
    session.insert("cart", &cart).unwrap();
    session.insert("visits", 3).unwrap();
    session.insert("nickname", "ann").unwrap();
    let values = session.values().clone();
    store.save_all(&mut request, &mut response).await.unwrap();

    let mut request = follow_up_request(&response);
    let session = store.get(&mut request, NAME).await.unwrap();

    assert!(!session.is_new());
    assert_eq!(session.values(), &values);
    assert_eq!(session.get::<Cart>("cart").unwrap(), Some(cart));

    test_database.cleanup().await.unwrap();
}

#[tokio::test]
async fn floats_survive_round_trip() {
    let (store, test_database) = store().await;
    let mut request = Request::new(());
    let mut response = Response::new(());

    let session = store.get(&mut request, NAME).await.unwrap();
    session.insert("f", 1.071_566_039_146_582_6e-75).unwrap();
    session.insert("scores", [0.1_f64, 1e300, -5e-324]).unwrap();
    let values = session.values().clone();
    store.save_all(&mut request, &mut response).await.unwrap();

    let mut request = follow_up_request(&response);
    let session = store.get(&mut request, NAME).await.unwrap();

    assert_eq!(session.values(), &values);

    test_database.cleanup().await.unwrap();
}

#[tokio::test]
async fn large_session_is_stored() {
    let (store, test_database) = store().await;
    let items: Vec<String> = (0..200).map(|i| format!("item number {i:04}")).collect();
    let cart = Cart {
        items,
        total_cents: 123_456,
    };
    let mut session = store.new_session(&Request::new(()), NAME).await.unwrap();
    session.insert("cart", &cart).unwrap();
    session.insert("note", "x".repeat(DEFAULT_MAX_LENGTH)).unwrap();
    let mut response = Response::new(());

    store.save(&mut response, &mut session).await.unwrap();

    assert!(response_cookies(&response)[0].value().len() < DEFAULT_MAX_LENGTH);
    let loaded = store
        .new_session(&follow_up_request(&response), NAME)
        .await
        .unwrap();
    assert_eq!(loaded.get::<Cart>("cart").unwrap(), Some(cart));
    assert_eq!(
        loaded.get::<String>("note").unwrap().as_deref().map(str::len),
        Some(DEFAULT_MAX_LENGTH)
    );

    test_database.cleanup().await.unwrap();
}

#[tokio::test]
async fn later_saves_update_the_same_row() {
    let (store, test_database) = store().await;
    let mut response = Response::new(());
    let mut session = store.new_session(&Request::new(()), NAME).await.unwrap();
    store.save(&mut response, &mut session).await.unwrap();
    let id = session.id().to_owned();

    for visit in 1..=3 {
        let mut request = follow_up_request(&response);
        response = Response::new(());
        let session = store.get(&mut request, NAME).await.unwrap();
        session.insert("visits", visit).unwrap();
        store.save_all(&mut request, &mut response).await.unwrap();
    }

    let session = store
        .new_session(&follow_up_request(&response), NAME)
        .await
        .unwrap();
    assert_eq!(session.id(), id);
    assert_eq!(session.get::<i32>("visits").unwrap(), Some(3));

    test_database.cleanup().await.unwrap();
}

#[tokio::test]
async fn cookie_for_missing_row() {
    let (store, test_database) = store().await;
    let token = store.codecs().encode(NAME, "12345").unwrap();
    let mut request = request_with_cookie(NAME, &token);

    let failure = store.get(&mut request, NAME).await.unwrap_err();

    assert!(matches!(failure.error(), LoadError::NotFound(_)));
    assert!(failure.session().is_new());
    assert!(failure.session().values().is_empty());

    test_database.cleanup().await.unwrap();
}

#[tokio::test]
async fn expired_session_is_deleted() {
    let (store, test_database) = store().await;
    let backend = test_database.backend().unwrap();
    let mut session = store.new_session(&Request::new(()), NAME).await.unwrap();
    session.insert("user_id", 1).unwrap();
    store
        .save(&mut Response::new(()), &mut session)
        .await
        .unwrap();
    let row_id: i64 = session.id().parse().unwrap();

    session.expire();
    let mut response = Response::new(());
    store.save(&mut response, &mut session).await.unwrap();

    assert_eq!(backend.select(row_id).await.unwrap(), None);
    assert_eq!(session.id(), "");
    let cookies = response_cookies(&response);
    assert_eq!(cookies.len(), 1);
    assert_eq!(cookies[0].value(), "");
    assert_eq!(cookies[0].max_age(), Some(time::Duration::ZERO));

    test_database.cleanup().await.unwrap();
}

#[tokio::test]
async fn tampered_cookie_is_rejected() {
    let (store, test_database) = store().await;
    let mut session = store.new_session(&Request::new(()), NAME).await.unwrap();
    let mut response = Response::new(());
    store.save(&mut response, &mut session).await.unwrap();
    let token = response_cookies(&response)[0].value().to_owned();

    let mut tampered = token.clone();
    tampered.insert(tampered.len() / 2, 'x');
    let failure = store
        .new_session(&request_with_cookie(NAME, &tampered), NAME)
        .await
        .unwrap_err();

    assert!(matches!(failure.error(), LoadError::DecodeId(_)));
    assert!(failure.session().is_new());

    test_database.cleanup().await.unwrap();
}

#[tokio::test]
async fn cookie_from_other_store_is_rejected() {
    let (store, test_database) = store().await;
    let other = Store::new(
        test_database.backend().unwrap(),
        Codecs::from_key_pairs(&[KeyPair::new("another hash key")]).unwrap(),
    );
    let mut session = other.new_session(&Request::new(()), NAME).await.unwrap();
    let mut response = Response::new(());
    other.save(&mut response, &mut session).await.unwrap();

    let failure = store
        .new_session(&follow_up_request(&response), NAME)
        .await
        .unwrap_err();

    assert!(matches!(
        failure.error(),
        LoadError::DecodeId(CodecError::InvalidMac)
    ));

    test_database.cleanup().await.unwrap();
}

#[tokio::test]
async fn key_rotation_keeps_sessions() {
    let test_database = TestDatabase::new_sqlite().await.unwrap();
    let old_pair = KeyPair::new("old hash key");
    let old = Store::new(
        test_database.backend().unwrap(),
        Codecs::from_key_pairs(std::slice::from_ref(&old_pair)).unwrap(),
    );
    let mut session = old.new_session(&Request::new(()), NAME).await.unwrap();
    session.insert("user_id", 5).unwrap();
    let mut response = Response::new(());
    old.save(&mut response, &mut session).await.unwrap();

    let rotated = Store::new(
        test_database.backend().unwrap(),
        Codecs::from_key_pairs(&[KeyPair::encrypted("new hash key", BLOCK_KEY), old_pair])
            .unwrap(),
    );
    let session = rotated
        .new_session(&follow_up_request(&response), NAME)
        .await
        .unwrap();

    assert_eq!(session.get::<i32>("user_id").unwrap(), Some(5));

    test_database.cleanup().await.unwrap();
}

#[tokio::test]
async fn custom_table() {
    let table = SessionTable::new("web_sessions", "session_id", "payload");
    let test_database = TestDatabase::new_sqlite_with_table(table).await.unwrap();
    let store = Store::new(test_database.backend().unwrap(), codecs());
    let mut session = store.new_session(&Request::new(()), NAME).await.unwrap();
    session.insert("theme", "dark").unwrap();
    let mut response = Response::new(());

    store.save(&mut response, &mut session).await.unwrap();
    let loaded = store
        .new_session(&follow_up_request(&response), NAME)
        .await
        .unwrap();

    assert_eq!(loaded.get::<String>("theme").unwrap().as_deref(), Some("dark"));

    test_database.cleanup().await.unwrap();
}

#[tokio::test]
async fn several_sessions_per_request() {
    let (store, test_database) = store().await;
    let mut request = Request::new(());
    let mut response = Response::new(());

    store
        .get(&mut request, "auth")
        .await
        .unwrap()
        .insert("user_id", 1)
        .unwrap();
    store
        .get(&mut request, "prefs")
        .await
        .unwrap()
        .insert("theme", "dark")
        .unwrap();
    store.save_all(&mut request, &mut response).await.unwrap();

    let mut request = follow_up_request(&response);
    let auth = store.get(&mut request, "auth").await.unwrap().clone();
    let prefs = store.get(&mut request, "prefs").await.unwrap().clone();

    assert_ne!(auth.id(), prefs.id());
    assert_eq!(auth.get::<i32>("user_id").unwrap(), Some(1));
    assert_eq!(prefs.get::<String>("theme").unwrap().as_deref(), Some("dark"));
    assert_eq!(auth.get::<String>("theme").unwrap(), None);

    test_database.cleanup().await.unwrap();
}

#[tokio::test]
async fn from_config() {
    let config = StoreConfig::from_toml(
        r#"
        token_max_age = "1day"

        [[key_pairs]]
        hash_key = "configured hash key"
        block_key = "0123456789abcdef0123456789abcdef"

        [cookie]
        path = "/app"
        max_age = 3600
        same_site = "strict"

        [table]
        table = "configured_sessions"

        [database]
        url = "sqlite::memory:"
        create_table = true
        "#,
    )
    .unwrap();
    let store = Store::from_config(&config).await.unwrap();
    let mut session = store.new_session(&Request::new(()), NAME).await.unwrap();
    session.insert("values", HashMap::from([("a", 1), ("b", 2)])).unwrap();
    let mut response = Response::new(());

    store.save(&mut response, &mut session).await.unwrap();

    let cookie = &response_cookies(&response)[0];
    assert_eq!(cookie.path(), Some("/app"));
    assert_eq!(cookie.max_age(), Some(time::Duration::hours(1)));
    assert_eq!(cookie.same_site(), Some(cookie::SameSite::Strict));
    let loaded = store
        .new_session(&follow_up_request(&response), NAME)
        .await
        .unwrap();
    assert_eq!(
        loaded.get::<HashMap<String, i32>>("values").unwrap(),
        Some(HashMap::from([("a".to_owned(), 1), ("b".to_owned(), 2)]))
    );
}

#[tokio::test]
async fn from_config_with_max_length() {
    let config = StoreConfig::from_toml(
        r#"
        token_max_length = 256

        [[key_pairs]]
        hash_key = "configured hash key"

        [database]
        url = "sqlite::memory:"
        create_table = true
        "#,
    )
    .unwrap();
    let store = Store::from_config(&config).await.unwrap();
    let mut session = store.new_session(&Request::new(()), NAME).await.unwrap();
    session.insert("note", "x".repeat(512)).unwrap();
    let mut response = Response::new(());

    let error = store.save(&mut response, &mut session).await.unwrap_err();

    assert!(matches!(
        error,
        SaveError::EncodeValues(CodecError::ValueTooLong {
            max_length: 256,
            ..
        })
    ));
    assert!(response.headers().is_empty());
    assert_eq!(session.id(), "");
}

#[tokio::test]
async fn from_config_without_database_url() {
    let config = StoreConfig::builder()
        .key_pairs(vec![KeyPair::new("hash key")])
        .build();

    let error = Store::from_config(&config).await.unwrap_err();

    assert!(matches!(error, sqlstore::Error::MissingDatabaseUrl));
}

#[tokio::test]
async fn from_config_without_key_pairs() {
    let config = StoreConfig::from_toml(
        r#"
        [database]
        url = "sqlite::memory:"
        "#,
    )
    .unwrap();

    let error = Store::from_config(&config).await.unwrap_err();

    assert!(matches!(error, sqlstore::Error::Codec(CodecError::NoCodecs)));
}
