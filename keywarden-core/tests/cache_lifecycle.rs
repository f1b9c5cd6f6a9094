//! Integration tests for the token cache.
//!
//! These tests verify that the TokenCache correctly:
//! - Writes all records of an exchange atomically (or not at all)
//! - Answers superset-or-equal scope queries
//! - Keeps bearer and proof-of-possession entries distinct
//! - Cascades account removal
//! - Migrates the legacy cache format exactly once

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use keywarden_core::{
    cache::migration::{migrate_into_cache, MigrationState},
    cache::{CredentialQuery, TokenCache},
    model::{
        AccessTokenRecord, AccountRecord, AuthScheme, AuthorityType, Credential, IdTokenRecord,
        RefreshTokenRecord,
    },
    store::{KeyValueStore, MemoryStore, Secret, StoreError},
};

fn account() -> AccountRecord {
    AccountRecord::new(
        "uid.utid",
        "login.example.net",
        "common",
        "uid",
        "user@example.com",
        AuthorityType::Aad,
    )
}

fn access_token(target: &str, scheme: AuthScheme) -> AccessTokenRecord {
    AccessTokenRecord {
        home_account_id: "uid.utid".into(),
        environment: "login.example.net".into(),
        realm: "common".into(),
        client_id: "client-a".into(),
        secret: Secret::new("at-secret"),
        target: target.into(),
        cached_at: "0".into(),
        expires_on: "9999999999".into(),
        refresh_on: None,
        scheme,
        extra: HashMap::new(),
    }
}

fn refresh_token(client_id: &str, family_id: Option<&str>) -> RefreshTokenRecord {
    RefreshTokenRecord {
        home_account_id: "uid.utid".into(),
        environment: "login.example.net".into(),
        client_id: client_id.into(),
        secret: Secret::new("rt-secret"),
        target: None,
        family_id: family_id.map(String::from),
        cached_at: "0".into(),
        extra: HashMap::new(),
    }
}

fn id_token() -> IdTokenRecord {
    IdTokenRecord {
        home_account_id: "uid.utid".into(),
        environment: "login.example.net".into(),
        realm: "common".into(),
        client_id: "client-a".into(),
        secret: Secret::new("idt-secret"),
        cached_at: "0".into(),
        extra: HashMap::new(),
    }
}

fn query() -> CredentialQuery {
    CredentialQuery::new("uid.utid", "login.example.net", "client-a", "common")
}

#[tokio::test]
async fn save_then_load_round_trips_the_exchange() {
    let cache = TokenCache::new(MemoryStore::new());

    cache
        .save(
            &account(),
            &[
                Credential::AccessToken(access_token("mail.read user.read", AuthScheme::Bearer)),
                Credential::RefreshToken(refresh_token("client-a", None)),
                Credential::IdToken(id_token()),
            ],
        )
        .await
        .unwrap();

    let lookup = cache.load(&query()).await.unwrap();
    assert!(lookup.account.is_some());
    assert_eq!(
        lookup.access_token.unwrap().secret.expose(),
        "at-secret"
    );
    assert_eq!(lookup.refresh_token.unwrap().secret.expose(), "rt-secret");
    assert_eq!(lookup.id_token.unwrap().secret.expose(), "idt-secret");
}

#[tokio::test]
async fn superset_scope_match_is_a_hit_wider_is_a_miss() {
    let cache = TokenCache::new(MemoryStore::new());
    cache
        .save(
            &account(),
            &[Credential::AccessToken(access_token(
                "mail.read user.read",
                AuthScheme::Bearer,
            ))],
        )
        .await
        .unwrap();

    let narrower = query().with_target(vec!["mail.read".to_string()]);
    assert!(cache.load(&narrower).await.unwrap().access_token.is_some());

    let wider = query().with_target(vec!["mail.read".to_string(), "files.read".to_string()]);
    assert!(cache.load(&wider).await.unwrap().access_token.is_none());
}

#[tokio::test]
async fn bearer_and_pop_entries_are_distinct() {
    let cache = TokenCache::new(MemoryStore::new());
    cache
        .save(
            &account(),
            &[Credential::AccessToken(access_token(
                "mail.read",
                AuthScheme::Bearer,
            ))],
        )
        .await
        .unwrap();

    let pop_query = query()
        .with_target(vec!["mail.read".to_string()])
        .with_scheme(AuthScheme::Pop);
    assert!(cache.load(&pop_query).await.unwrap().access_token.is_none());
}

#[tokio::test]
async fn upsert_replaces_records_sharing_a_key() {
    let cache = TokenCache::new(MemoryStore::new());

    cache
        .save(
            &account(),
            &[Credential::AccessToken(access_token(
                "mail.read",
                AuthScheme::Bearer,
            ))],
        )
        .await
        .unwrap();

    let mut replacement = access_token("mail.read", AuthScheme::Bearer);
    replacement.secret = Secret::new("newer-secret");
    cache
        .save(&account(), &[Credential::AccessToken(replacement)])
        .await
        .unwrap();

    let lookup = cache
        .load(&query().with_target(vec!["mail.read".to_string()]))
        .await
        .unwrap();
    assert_eq!(lookup.access_token.unwrap().secret.expose(), "newer-secret");

    // Case-variant identity triples collapse onto one account record.
    let mut shouting = account();
    shouting.home_account_id = "UID.UTID".into();
    cache.save(&shouting, &[]).await.unwrap();
    assert_eq!(cache.accounts().await.unwrap().len(), 1);
}

#[tokio::test]
async fn family_refresh_token_matches_only_when_requested() {
    let cache = TokenCache::new(MemoryStore::new());
    cache
        .save(
            &account(),
            &[Credential::RefreshToken(refresh_token(
                "other-client",
                Some("1"),
            ))],
        )
        .await
        .unwrap();

    let strict = query();
    assert!(cache.load(&strict).await.unwrap().refresh_token.is_none());

    let family = query().with_family_tokens();
    assert!(cache.load(&family).await.unwrap().refresh_token.is_some());
}

#[tokio::test]
async fn remove_account_cascades_to_credentials() {
    let cache = TokenCache::new(MemoryStore::new());
    cache
        .save(
            &account(),
            &[
                Credential::AccessToken(access_token("mail.read", AuthScheme::Bearer)),
                Credential::RefreshToken(refresh_token("client-a", None)),
            ],
        )
        .await
        .unwrap();

    cache
        .remove_account("uid.utid", "login.example.net")
        .await
        .unwrap();

    let lookup = cache.load(&query()).await.unwrap();
    assert!(lookup.account.is_none());
    assert!(lookup.access_token.is_none());
    assert!(lookup.refresh_token.is_none());

    // Removing again is a no-op, not an error.
    cache
        .remove_account("uid.utid", "login.example.net")
        .await
        .unwrap();
}

#[tokio::test]
async fn snapshot_iteration_filters_credentials() {
    let cache = TokenCache::new(MemoryStore::new());
    cache
        .save(
            &account(),
            &[
                Credential::AccessToken(access_token("mail.read", AuthScheme::Bearer)),
                Credential::RefreshToken(refresh_token("client-a", None)),
                Credential::IdToken(id_token()),
            ],
        )
        .await
        .unwrap();

    let refresh_tokens = cache
        .all_filtered_by(|c| matches!(c, Credential::RefreshToken(_)))
        .await
        .unwrap();
    assert_eq!(refresh_tokens.len(), 1);

    let everything = cache.all_filtered_by(|_| true).await.unwrap();
    assert_eq!(everything.len(), 3);
}

/// Store that fails the Nth put, for write-transaction fault injection.
struct FailingStore {
    inner: MemoryStore,
    puts: AtomicUsize,
    fail_on: usize,
}

impl FailingStore {
    fn failing_on(fail_on: usize) -> Self {
        Self {
            inner: MemoryStore::new(),
            puts: AtomicUsize::new(0),
            fail_on,
        }
    }
}

#[async_trait]
impl KeyValueStore for FailingStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let n = self.puts.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_on {
            return Err(StoreError::BackendError {
                message: format!("injected failure on put #{}", n),
            });
        }
        self.inner.put(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.inner.remove(key).await
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.inner.keys(prefix).await
    }

    async fn get_all(&self) -> Result<Vec<(String, String)>, StoreError> {
        self.inner.get_all().await
    }
}

#[tokio::test]
async fn interrupted_save_persists_nothing() {
    // Entry order: account, then three credentials. Failing on the
    // third put interrupts the transaction on the second credential.
    let cache = TokenCache::new(FailingStore::failing_on(3));

    let result = cache
        .save(
            &account(),
            &[
                Credential::AccessToken(access_token("mail.read", AuthScheme::Bearer)),
                Credential::RefreshToken(refresh_token("client-a", None)),
                Credential::IdToken(id_token()),
            ],
        )
        .await;

    assert!(matches!(
        result,
        Err(keywarden_core::CacheError::WriteFailed { .. })
    ));

    // Nothing observable changed: no account, no credentials.
    let lookup = cache.load(&query()).await.unwrap();
    assert!(lookup.account.is_none());
    assert!(lookup.access_token.is_none());
    assert!(lookup.refresh_token.is_none());
    assert!(lookup.id_token.is_none());
    assert!(cache.accounts().await.unwrap().is_empty());
}

#[tokio::test]
async fn legacy_migration_lands_in_the_cache_once() {
    let cache = TokenCache::new(MemoryStore::new());
    let state = MigrationState::new();

    let legacy_value = serde_json::json!({
        "authority": "https://login.example.net/tenant-1",
        "client_id": "client-a",
        "tenant_id": "tenant-1",
        "refresh_token": "legacy-rt",
        "user_id": "uid-legacy",
        "is_multi_resource_refresh_token": true
    })
    .to_string();
    let mut raw = HashMap::new();
    raw.insert("legacy-key".to_string(), legacy_value);
    raw.insert("broken".to_string(), "{not json".to_string());

    let report = migrate_into_cache(&cache, &raw, &state)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.migrated.len(), 1);
    assert_eq!(report.skipped.len(), 1);

    let accounts = cache.accounts().await.unwrap();
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].home_account_id, "uid-legacy");

    // The flag stops a second run.
    assert!(migrate_into_cache(&cache, &raw, &state)
        .await
        .unwrap()
        .is_none());
    assert_eq!(cache.accounts().await.unwrap().len(), 1);
}
