//! Multi-account token cache.
//!
//! This module provides:
//! - [`TokenCache`] - CRUD and query over account/credential records
//! - [`CredentialQuery`] / [`CacheLookup`] - typed query surface
//! - [`is_expired`] / [`should_refresh`] - expiry evaluation
//! - [`key`] - deterministic cache key construction
//! - [`migration`] - one-shot legacy cache translation
//!
//! # Write atomicity
//!
//! All records produced by one protocol exchange are written in a single
//! transaction: serialization happens before the first write, writes run
//! under an exclusive lock, and a failure mid-transaction rolls back the
//! keys already written. Readers take the shared side of the same lock,
//! so they observe either the pre-write or the post-write state, never an
//! interleaving.
//!
//! Callers that support cancellation should cancel before calling
//! [`TokenCache::save`], not while it is in flight; the commit section is
//! intended to run to completion once entered.

pub mod key;
pub mod migration;

use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::model::{
    target_satisfies, AccessTokenRecord, AccountRecord, AuthScheme, Credential, CredentialKind,
    IdTokenRecord, RefreshTokenRecord,
};
use crate::store::KeyValueStore;
use crate::telemetry::{NoopTelemetry, TelemetryEvent, TelemetrySink};

/// Parameters for a credential lookup.
#[derive(Debug, Clone)]
pub struct CredentialQuery {
    /// Owning account id.
    pub home_account_id: String,

    /// Cloud host.
    pub environment: String,

    /// Client id the credential was issued to.
    pub client_id: String,

    /// Tenant partition (access and ID tokens are realm-scoped).
    pub realm: String,

    /// Requested scopes; empty matches any cached target.
    pub target: Vec<String>,

    /// Requested token scheme; bearer and PoP entries are distinct.
    pub scheme: AuthScheme,

    /// Also accept refresh tokens issued to other clients in the same
    /// family.
    pub include_family_tokens: bool,
}

impl CredentialQuery {
    /// Query for an account's credentials under one client and realm.
    pub fn new(
        home_account_id: impl Into<String>,
        environment: impl Into<String>,
        client_id: impl Into<String>,
        realm: impl Into<String>,
    ) -> Self {
        Self {
            home_account_id: home_account_id.into(),
            environment: environment.into(),
            client_id: client_id.into(),
            realm: realm.into(),
            target: Vec::new(),
            scheme: AuthScheme::Bearer,
            include_family_tokens: false,
        }
    }

    /// Set the requested scopes.
    pub fn with_target(mut self, target: Vec<String>) -> Self {
        self.target = target;
        self
    }

    /// Set the requested token scheme.
    pub fn with_scheme(mut self, scheme: AuthScheme) -> Self {
        self.scheme = scheme;
        self
    }

    /// Accept family refresh tokens from sibling clients.
    pub fn with_family_tokens(mut self) -> Self {
        self.include_family_tokens = true;
        self
    }
}

/// Result of a credential lookup.
#[derive(Debug, Clone, Default)]
pub struct CacheLookup {
    /// The owning account record, when cached.
    pub account: Option<AccountRecord>,

    /// Matching access token, if any.
    pub access_token: Option<AccessTokenRecord>,

    /// Matching refresh token, if any.
    pub refresh_token: Option<RefreshTokenRecord>,

    /// Matching ID token, if any.
    pub id_token: Option<IdTokenRecord>,
}

/// Token cache over a [`KeyValueStore`] backing store.
///
/// The cache owns all key construction; the store never sees anything
/// but opaque keys and JSON values. The backing store handle must be
/// passed in explicitly - there is no process-wide default instance.
pub struct TokenCache<S: KeyValueStore> {
    store: S,
    lock: RwLock<()>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl<S: KeyValueStore> TokenCache<S> {
    /// Create a cache over the given store with no telemetry sink.
    pub fn new(store: S) -> Self {
        Self::with_telemetry(store, Arc::new(NoopTelemetry))
    }

    /// Create a cache that reports hit/miss events to a telemetry sink.
    pub fn with_telemetry(store: S, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self {
            store,
            lock: RwLock::new(()),
            telemetry,
        }
    }

    /// Borrow the backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Persist the records produced by one protocol exchange.
    ///
    /// Idempotent upsert: records sharing a cache key replace the
    /// existing entry. Either the whole set lands or none of it does; a
    /// mid-transaction failure restores the keys already written and
    /// surfaces [`CacheError::WriteFailed`].
    pub async fn save(
        &self,
        account: &AccountRecord,
        credentials: &[Credential],
    ) -> Result<(), CacheError> {
        // Serialize everything up front so an encoding failure can never
        // leave a partial write behind.
        let mut entries: Vec<(String, String)> =
            Vec::with_capacity(credentials.len() + 1);
        entries.push((key::account_key(account), serde_json::to_string(account)?));
        for credential in credentials {
            entries.push((
                key::credential_key(credential),
                serde_json::to_string(credential)?,
            ));
        }

        let _guard = self.lock.write().await;

        let mut written: Vec<(String, Option<String>)> = Vec::new();
        for (cache_key, value) in &entries {
            let prior = match self.store.get(cache_key).await {
                Ok(prior) => prior,
                Err(e) => {
                    self.rollback(&written).await;
                    return Err(CacheError::WriteFailed {
                        message: format!("failed to stage {}: {}", cache_key, e),
                    });
                }
            };
            if let Err(e) = self.store.put(cache_key, value).await {
                self.rollback(&written).await;
                return Err(CacheError::WriteFailed {
                    message: format!("failed to write {}: {}", cache_key, e),
                });
            }
            written.push((cache_key.clone(), prior));
        }

        debug!(
            account = %key::account_key(account),
            records = credentials.len(),
            "cache write committed"
        );
        Ok(())
    }

    /// Restore previously written keys to their pre-transaction values.
    async fn rollback(&self, written: &[(String, Option<String>)]) {
        for (cache_key, prior) in written.iter().rev() {
            let outcome = match prior {
                Some(value) => self.store.put(cache_key, value).await,
                None => self.store.remove(cache_key).await,
            };
            if let Err(e) = outcome {
                warn!(key = %cache_key, error = %e, "cache rollback failed");
            }
        }
    }

    /// Look up the credentials matching a query.
    ///
    /// Access-token scope matching is superset-or-equal: a cached entry
    /// whose target covers every requested scope is a hit. Family
    /// refresh tokens from sibling clients are considered only when the
    /// query opts in.
    pub async fn load(&self, query: &CredentialQuery) -> Result<CacheLookup, CacheError> {
        let snapshot = {
            let _guard = self.lock.read().await;
            self.store.get_all().await?
        };

        let mut lookup = CacheLookup::default();

        let account_key =
            key::account_key_parts(&query.home_account_id, &query.environment, &query.realm);

        for (entry_key, value) in &snapshot {
            if !key::key_belongs_to(entry_key, &query.home_account_id, &query.environment) {
                continue;
            }

            match key::kind_of_key(entry_key) {
                None => {
                    if *entry_key == account_key {
                        match serde_json::from_str::<AccountRecord>(value) {
                            Ok(account) => lookup.account = Some(account),
                            Err(e) => {
                                warn!(key = %entry_key, error = %e, "skipping unreadable account record")
                            }
                        }
                    }
                }
                Some(kind) => {
                    let credential = match serde_json::from_str::<Credential>(value) {
                        Ok(credential) => credential,
                        Err(e) => {
                            warn!(key = %entry_key, error = %e, "skipping unreadable credential record");
                            continue;
                        }
                    };
                    match (kind, credential) {
                        (CredentialKind::AccessToken, Credential::AccessToken(at)) => {
                            if at.client_id.eq_ignore_ascii_case(&query.client_id)
                                && at.realm.eq_ignore_ascii_case(&query.realm)
                                && at.scheme == query.scheme
                                && target_satisfies(&at.target, &query.target)
                            {
                                lookup.access_token = Some(at);
                            }
                        }
                        (CredentialKind::RefreshToken, Credential::RefreshToken(rt)) => {
                            let client_matches =
                                rt.client_id.eq_ignore_ascii_case(&query.client_id);
                            let family_matches =
                                query.include_family_tokens && rt.is_family_token();
                            // A client-exact token wins over a family token.
                            if client_matches {
                                lookup.refresh_token = Some(rt);
                            } else if family_matches && lookup.refresh_token.is_none() {
                                lookup.refresh_token = Some(rt);
                            }
                        }
                        (CredentialKind::IdToken, Credential::IdToken(it)) => {
                            if it.client_id.eq_ignore_ascii_case(&query.client_id)
                                && it.realm.eq_ignore_ascii_case(&query.realm)
                            {
                                lookup.id_token = Some(it);
                            }
                        }
                        _ => {
                            warn!(key = %entry_key, "credential kind does not match its key");
                        }
                    }
                }
            }
        }

        let hit = lookup.access_token.is_some();
        self.telemetry.emit(TelemetryEvent::new(
            if hit { "cache_hit" } else { "cache_miss" },
            [
                ("client_id".to_string(), query.client_id.clone()),
                ("realm".to_string(), query.realm.clone()),
            ],
        ));
        debug!(
            client_id = %query.client_id,
            realm = %query.realm,
            hit,
            "cache lookup"
        );

        Ok(lookup)
    }

    /// Look up only the access token matching a query.
    pub async fn load_access_token(
        &self,
        query: &CredentialQuery,
    ) -> Result<Option<AccessTokenRecord>, CacheError> {
        Ok(self.load(query).await?.access_token)
    }

    /// Look up only the refresh token matching a query.
    pub async fn load_refresh_token(
        &self,
        query: &CredentialQuery,
    ) -> Result<Option<RefreshTokenRecord>, CacheError> {
        Ok(self.load(query).await?.refresh_token)
    }

    /// Look up only the ID token matching a query.
    pub async fn load_id_token(
        &self,
        query: &CredentialQuery,
    ) -> Result<Option<IdTokenRecord>, CacheError> {
        Ok(self.load(query).await?.id_token)
    }

    /// Fetch one account record by its identity triple.
    pub async fn get_account(
        &self,
        home_account_id: &str,
        environment: &str,
        realm: &str,
    ) -> Result<Option<AccountRecord>, CacheError> {
        let cache_key = key::account_key_parts(home_account_id, environment, realm);
        let value = {
            let _guard = self.lock.read().await;
            self.store.get(&cache_key).await?
        };
        match value {
            None => Ok(None),
            Some(raw) => {
                let account =
                    serde_json::from_str(&raw).map_err(|e| CacheError::InvalidRecord {
                        key: cache_key,
                        message: e.to_string(),
                    })?;
                Ok(Some(account))
            }
        }
    }

    /// List every cached account.
    pub async fn accounts(&self) -> Result<Vec<AccountRecord>, CacheError> {
        let snapshot = {
            let _guard = self.lock.read().await;
            self.store.get_all().await?
        };
        let mut accounts = Vec::new();
        for (entry_key, value) in &snapshot {
            if key::kind_of_key(entry_key).is_some() {
                continue;
            }
            match serde_json::from_str::<AccountRecord>(value) {
                Ok(account) => accounts.push(account),
                Err(e) => warn!(key = %entry_key, error = %e, "skipping unreadable account record"),
            }
        }
        Ok(accounts)
    }

    /// Remove an account and every credential keyed to it.
    ///
    /// Best-effort cascading delete across all realms; succeeds even if
    /// nothing matched.
    pub async fn remove_account(
        &self,
        home_account_id: &str,
        environment: &str,
    ) -> Result<(), CacheError> {
        let _guard = self.lock.write().await;
        let keys = self.store.keys("").await?;
        let mut removed = 0usize;
        for entry_key in keys {
            if key::key_belongs_to(&entry_key, home_account_id, environment) {
                self.store.remove(&entry_key).await?;
                removed += 1;
            }
        }
        debug!(home_account_id, environment, removed, "account removed");
        Ok(())
    }

    /// Remove every record in the cache.
    pub async fn clear(&self) -> Result<(), CacheError> {
        let _guard = self.lock.write().await;
        let keys = self.store.keys("").await?;
        for entry_key in keys {
            self.store.remove(&entry_key).await?;
        }
        Ok(())
    }

    /// Iterate a snapshot of all credentials matching a predicate.
    ///
    /// The returned records are a point-in-time copy; mutating the cache
    /// while holding them does not affect the snapshot.
    pub async fn all_filtered_by<F>(&self, predicate: F) -> Result<Vec<Credential>, CacheError>
    where
        F: Fn(&Credential) -> bool,
    {
        let snapshot = {
            let _guard = self.lock.read().await;
            self.store.get_all().await?
        };
        let mut matched = Vec::new();
        for (entry_key, value) in &snapshot {
            if key::kind_of_key(entry_key).is_none() {
                continue;
            }
            match serde_json::from_str::<Credential>(value) {
                Ok(credential) => {
                    if predicate(&credential) {
                        matched.push(credential);
                    }
                }
                Err(e) => warn!(key = %entry_key, error = %e, "skipping unreadable credential record"),
            }
        }
        Ok(matched)
    }
}

/// Parse a string-encoded epoch-seconds timestamp from a record field.
fn parse_epoch(raw: &str, record_key: &str, field: &str) -> Result<DateTime<Utc>, CacheError> {
    let seconds: i64 = raw.trim().parse().map_err(|_| CacheError::InvalidRecord {
        key: record_key.to_string(),
        message: format!("{} is not epoch seconds: {:?}", field, raw),
    })?;
    Utc.timestamp_opt(seconds, 0)
        .single()
        .ok_or_else(|| CacheError::InvalidRecord {
            key: record_key.to_string(),
            message: format!("{} out of range: {}", field, seconds),
        })
}

/// Whether an access token's hard expiry has passed.
///
/// A malformed or missing `expires_on` is a corruption signal
/// ([`CacheError::InvalidRecord`]), not "already expired".
pub fn is_expired(record: &AccessTokenRecord, now: DateTime<Utc>) -> Result<bool, CacheError> {
    let expires_on = parse_epoch(
        &record.expires_on,
        &key::access_token_key(record),
        "expires_on",
    )?;
    Ok(now >= expires_on)
}

/// Whether an access token has crossed its soft-refresh threshold.
///
/// Falls back to [`is_expired`] when `refresh_on` is absent or
/// malformed.
pub fn should_refresh(record: &AccessTokenRecord, now: DateTime<Utc>) -> Result<bool, CacheError> {
    match record.refresh_on.as_deref() {
        Some(raw) => match raw.trim().parse::<i64>() {
            Ok(seconds) => match Utc.timestamp_opt(seconds, 0).single() {
                Some(refresh_on) => Ok(now >= refresh_on),
                None => is_expired(record, now),
            },
            Err(_) => is_expired(record, now),
        },
        None => is_expired(record, now),
    }
}
