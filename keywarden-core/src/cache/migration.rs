//! One-shot translation of the legacy single-record-per-user cache
//! format into the current multi-record schema.
//!
//! The legacy cache is a flat map of opaque keys to JSON blobs, one blob
//! per (user, client, resource) holding the refresh token, access token
//! and identity claims together. Migration splits each blob into the
//! current [`AccountRecord`] + [`Credential`] shapes.
//!
//! Per-entry outcomes are values, not exceptions: a malformed entry is
//! skipped with a reason and never aborts migration of the remainder.
//! Output is keyed by the *original* legacy key, and translation is a
//! pure function of its input, so migrating the same map twice yields
//! the same result and re-running after a partial prior migration cannot
//! duplicate records (cache writes are keyed upserts).

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::CacheError;
use crate::model::{
    AccessTokenRecord, AccountRecord, AuthScheme, AuthorityType, Credential, IdTokenRecord,
    RefreshTokenRecord,
};
use crate::store::{KeyValueStore, Secret};
use crate::TokenCache;

/// A record in the legacy single-record-per-user schema.
///
/// Only `authority` and `client_id` are structurally required; the rest
/// is best-effort.
#[derive(Debug, Deserialize)]
struct LegacyTokenRecord {
    authority: String,
    client_id: String,
    #[serde(default)]
    resource: Option<String>,
    #[serde(default)]
    tenant_id: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    raw_id_token: Option<String>,
    #[serde(default)]
    expires_on: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    displayable_id: Option<String>,
    #[serde(default)]
    is_multi_resource_refresh_token: bool,
    #[serde(default)]
    family_client_id: Option<String>,
}

/// Why a legacy entry was not migrated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The value was not parseable as a legacy record.
    UnreadableJson,

    /// The authority was missing or not a URL with a host.
    InvalidAuthority,

    /// The client id was missing or blank.
    MissingClientId,

    /// No user identifier to key the account on.
    MissingUser,

    /// The record carried no credential material at all.
    NoCredentials,
}

/// A legacy entry that was skipped, with the reason.
#[derive(Debug, Clone)]
pub struct SkippedEntry {
    /// The original legacy key.
    pub key: String,

    /// Why the entry was skipped.
    pub reason: SkipReason,
}

/// The translated output for one legacy entry.
#[derive(Debug, Clone)]
pub struct MigratedEntry {
    /// Account reconstructed from the legacy user fields.
    pub account: AccountRecord,

    /// Credentials split out of the legacy blob.
    pub credentials: Vec<Credential>,
}

/// Outcome of translating a legacy cache map.
#[derive(Debug, Default)]
pub struct MigrationReport {
    /// Translated entries, keyed by the original legacy key.
    pub migrated: HashMap<String, MigratedEntry>,

    /// Entries that could not be translated.
    pub skipped: Vec<SkippedEntry>,
}

impl MigrationReport {
    /// Whether every input entry translated cleanly.
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Tracks whether migration has already run against a backing store.
///
/// An explicit handle shared by every component that can trigger
/// migration; toggling it off after a successful run prevents repeat
/// attempts on subsequent cache opens.
#[derive(Debug, Default)]
pub struct MigrationState {
    complete: AtomicBool,
}

impl MigrationState {
    /// New state with migration still pending.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether migration has already run.
    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    /// Mark migration as done; later calls to
    /// [`migrate_into_cache`] become no-ops.
    pub fn mark_complete(&self) {
        self.complete.store(true, Ordering::Release);
    }
}

/// Translate a legacy cache map into current record shapes.
///
/// Pure and deterministic: no store access, no clock reads. Malformed
/// entries land in [`MigrationReport::skipped`] and never abort the
/// remainder.
pub fn migrate(raw_entries: &HashMap<String, String>) -> MigrationReport {
    let mut report = MigrationReport::default();

    for (legacy_key, value) in raw_entries {
        match translate_entry(value) {
            Ok(entry) => {
                report.migrated.insert(legacy_key.clone(), entry);
            }
            Err(reason) => {
                debug!(key = %legacy_key, ?reason, "skipping legacy cache entry");
                report.skipped.push(SkippedEntry {
                    key: legacy_key.clone(),
                    reason,
                });
            }
        }
    }

    report
}

/// Translate one legacy value; the error side is the skip reason.
fn translate_entry(value: &str) -> Result<MigratedEntry, SkipReason> {
    let legacy: LegacyTokenRecord =
        serde_json::from_str(value).map_err(|_| SkipReason::UnreadableJson)?;

    let authority = Url::parse(legacy.authority.trim()).map_err(|_| SkipReason::InvalidAuthority)?;
    let environment = authority
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or(SkipReason::InvalidAuthority)?
        .to_string();

    if legacy.client_id.trim().is_empty() {
        return Err(SkipReason::MissingClientId);
    }

    let home_account_id = legacy
        .user_id
        .as_deref()
        .or(legacy.displayable_id.as_deref())
        .filter(|u| !u.trim().is_empty())
        .ok_or(SkipReason::MissingUser)?
        .to_string();

    let realm = legacy
        .tenant_id
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or("common")
        .to_string();

    let username = legacy
        .displayable_id
        .clone()
        .unwrap_or_else(|| home_account_id.clone());

    let account = AccountRecord::new(
        home_account_id.clone(),
        environment.clone(),
        realm.clone(),
        home_account_id.clone(),
        username,
        AuthorityType::Aad,
    );

    let mut credentials = Vec::new();

    if let Some(refresh_token) = legacy.refresh_token.as_deref().filter(|t| !t.is_empty()) {
        // A single-resource legacy token keeps its resource as the
        // target; multi-resource tokens are target-unscoped.
        let target = if legacy.is_multi_resource_refresh_token {
            None
        } else {
            legacy.resource.clone()
        };
        credentials.push(Credential::RefreshToken(RefreshTokenRecord {
            home_account_id: home_account_id.clone(),
            environment: environment.clone(),
            client_id: legacy.client_id.clone(),
            secret: Secret::new(refresh_token),
            target,
            family_id: legacy.family_client_id.clone().filter(|f| !f.is_empty()),
            cached_at: "0".to_string(),
            extra: HashMap::new(),
        }));
    }

    if let Some(access_token) = legacy.access_token.as_deref().filter(|t| !t.is_empty()) {
        if let Some(expires_on) = legacy.expires_on.as_deref().filter(|e| !e.is_empty()) {
            credentials.push(Credential::AccessToken(AccessTokenRecord {
                home_account_id: home_account_id.clone(),
                environment: environment.clone(),
                realm: realm.clone(),
                client_id: legacy.client_id.clone(),
                secret: Secret::new(access_token),
                target: legacy.resource.clone().unwrap_or_default(),
                cached_at: "0".to_string(),
                expires_on: expires_on.to_string(),
                refresh_on: None,
                scheme: AuthScheme::Bearer,
                extra: HashMap::new(),
            }));
        }
    }

    if let Some(raw_id_token) = legacy.raw_id_token.as_deref().filter(|t| !t.is_empty()) {
        credentials.push(Credential::IdToken(IdTokenRecord {
            home_account_id: home_account_id.clone(),
            environment: environment.clone(),
            realm: realm.clone(),
            client_id: legacy.client_id.clone(),
            secret: Secret::new(raw_id_token),
            cached_at: "0".to_string(),
            extra: HashMap::new(),
        }));
    }

    if credentials.is_empty() {
        return Err(SkipReason::NoCredentials);
    }

    Ok(MigratedEntry {
        account,
        credentials,
    })
}

/// Run migration into a cache, once.
///
/// Returns `Ok(None)` when the shared [`MigrationState`] says migration
/// already ran. Otherwise translates, upserts every migrated entry, and
/// marks the state complete. Safe to re-run after a partial prior
/// attempt: keys are deterministic, so upserts cannot duplicate.
pub async fn migrate_into_cache<S: KeyValueStore>(
    cache: &TokenCache<S>,
    raw_entries: &HashMap<String, String>,
    state: &MigrationState,
) -> Result<Option<MigrationReport>, CacheError> {
    if state.is_complete() {
        debug!("legacy cache migration already complete, skipping");
        return Ok(None);
    }

    let report = migrate(raw_entries);

    for entry in report.migrated.values() {
        cache.save(&entry.account, &entry.credentials).await?;
    }

    state.mark_complete();

    if report.is_clean() {
        info!(migrated = report.migrated.len(), "legacy cache migrated");
    } else {
        warn!(
            migrated = report.migrated.len(),
            skipped = report.skipped.len(),
            "legacy cache migrated with skipped entries"
        );
    }

    Ok(Some(report))
}
