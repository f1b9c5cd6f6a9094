//! Record shapes for the multi-account token cache.
//!
//! This module defines the core types persisted by the cache:
//! - [`AccountRecord`] - One signed-in account in one (environment, realm)
//! - [`AccessTokenRecord`], [`RefreshTokenRecord`], [`IdTokenRecord`] -
//!   The three credential variants sharing a common shape
//! - [`Credential`] - Tagged union over the credential variants
//! - [`AuthorityType`], [`AuthScheme`], [`CredentialKind`] - Discriminators
//!
//! Records carry an extensible blob of extra fields via `#[serde(flatten)]`
//! so newer writers can round-trip attributes older readers don't know.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::store::Secret;

/// The kind of identity authority that issued an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorityType {
    /// Azure AD-style multi-tenant authority.
    Aad,

    /// Business-to-consumer authority with named sign-in policies.
    B2c,

    /// On-premises federation service.
    Adfs,

    /// Consumer account authority.
    Msa,
}

impl AuthorityType {
    /// Get the authority type as a string for storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aad => "aad",
            Self::B2c => "b2c",
            Self::Adfs => "adfs",
            Self::Msa => "msa",
        }
    }
}

impl fmt::Display for AuthorityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How an access token proves possession to a resource.
///
/// Two tokens for the same scopes but different schemes are distinct
/// cache entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthScheme {
    /// Plain bearer token.
    #[default]
    Bearer,

    /// Proof-of-possession token bound to a key.
    Pop,
}

impl AuthScheme {
    /// Get the scheme as a string for storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bearer => "bearer",
            Self::Pop => "pop",
        }
    }
}

impl fmt::Display for AuthScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Discriminator for the three credential record variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    /// Short-lived token presented to resources.
    AccessToken,

    /// Long-lived token redeemable for new access tokens.
    RefreshToken,

    /// Identity claims token.
    IdToken,
}

impl CredentialKind {
    /// Get the kind as the lowercase segment used in cache keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccessToken => "accesstoken",
            Self::RefreshToken => "refreshtoken",
            Self::IdToken => "idtoken",
        }
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One signed-in account in one (environment, realm) partition.
///
/// Created on the first successful token response for a user, updated on
/// subsequent sign-ins, deleted on explicit removal or broker-driven wipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    /// Stable identifier per user + authority.
    pub home_account_id: String,

    /// Cloud host the account lives in (e.g. `login.example.net`).
    pub environment: String,

    /// Tenant partition, or `"common"` for multi-tenant.
    pub realm: String,

    /// Account identifier local to the realm.
    pub local_account_id: String,

    /// Sign-in name.
    pub username: String,

    /// Which authority flavor issued this account.
    pub authority_type: AuthorityType,

    /// Optional display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Attributes this version doesn't model; round-tripped verbatim.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl AccountRecord {
    /// Create a new account record with no display name or extra fields.
    pub fn new(
        home_account_id: impl Into<String>,
        environment: impl Into<String>,
        realm: impl Into<String>,
        local_account_id: impl Into<String>,
        username: impl Into<String>,
        authority_type: AuthorityType,
    ) -> Self {
        Self {
            home_account_id: home_account_id.into(),
            environment: environment.into(),
            realm: realm.into(),
            local_account_id: local_account_id.into(),
            username: username.into(),
            authority_type,
            name: None,
            extra: HashMap::new(),
        }
    }
}

/// Short-lived token presented to resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenRecord {
    /// Owning account id.
    pub home_account_id: String,

    /// Cloud host.
    pub environment: String,

    /// Tenant partition the token was minted for.
    pub realm: String,

    /// Client (application) id the token was issued to.
    pub client_id: String,

    /// The token material.
    pub secret: Secret,

    /// Space-delimited scope set; matching is order-insensitive.
    pub target: String,

    /// When this record was written, as string-encoded epoch seconds.
    pub cached_at: String,

    /// Hard expiry, as string-encoded epoch seconds.
    pub expires_on: String,

    /// Soft-refresh threshold, earlier than `expires_on` when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_on: Option<String>,

    /// Bearer vs. proof-of-possession.
    #[serde(default)]
    pub scheme: AuthScheme,

    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Long-lived token redeemable for new access tokens.
///
/// Carries no expiry; lifetime is server-managed. A refresh token may
/// mint access tokens for any realm/resource under the same
/// account + environment + client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    /// Owning account id.
    pub home_account_id: String,

    /// Cloud host.
    pub environment: String,

    /// Client (application) id the token was issued to.
    pub client_id: String,

    /// The token material.
    pub secret: Secret,

    /// Scope set, when the server scoped the grant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Family id for tokens shared across a family of clients.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family_id: Option<String>,

    /// When this record was written, as string-encoded epoch seconds.
    pub cached_at: String,

    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl RefreshTokenRecord {
    /// Whether this token belongs to a client family (usable by any
    /// client id in the family).
    pub fn is_family_token(&self) -> bool {
        self.family_id.as_deref().is_some_and(|f| !f.is_empty())
    }
}

/// Identity claims token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenRecord {
    /// Owning account id.
    pub home_account_id: String,

    /// Cloud host.
    pub environment: String,

    /// Tenant partition the token was minted for.
    pub realm: String,

    /// Client (application) id the token was issued to.
    pub client_id: String,

    /// The raw token material.
    pub secret: Secret,

    /// When this record was written, as string-encoded epoch seconds.
    pub cached_at: String,

    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Tagged union over the three credential variants.
///
/// Lets the cache save, key, and filter an exchange's records uniformly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "credential_type", rename_all = "snake_case")]
pub enum Credential {
    AccessToken(AccessTokenRecord),
    RefreshToken(RefreshTokenRecord),
    IdToken(IdTokenRecord),
}

impl Credential {
    /// The variant discriminator.
    pub fn kind(&self) -> CredentialKind {
        match self {
            Self::AccessToken(_) => CredentialKind::AccessToken,
            Self::RefreshToken(_) => CredentialKind::RefreshToken,
            Self::IdToken(_) => CredentialKind::IdToken,
        }
    }

    /// Owning account id.
    pub fn home_account_id(&self) -> &str {
        match self {
            Self::AccessToken(at) => &at.home_account_id,
            Self::RefreshToken(rt) => &rt.home_account_id,
            Self::IdToken(it) => &it.home_account_id,
        }
    }

    /// Cloud host.
    pub fn environment(&self) -> &str {
        match self {
            Self::AccessToken(at) => &at.environment,
            Self::RefreshToken(rt) => &rt.environment,
            Self::IdToken(it) => &it.environment,
        }
    }

    /// Client id the credential was issued to.
    pub fn client_id(&self) -> &str {
        match self {
            Self::AccessToken(at) => &at.client_id,
            Self::RefreshToken(rt) => &rt.client_id,
            Self::IdToken(it) => &it.client_id,
        }
    }
}

/// Check whether a cached target (space-delimited scopes) satisfies a
/// requested scope set.
///
/// Matching is superset-or-equal: a cached token whose scopes are a
/// superset of the request is a hit; a narrower intersection is not.
/// Comparison is case-insensitive and order-insensitive. An empty
/// request matches any cached target.
pub fn target_satisfies(cached_target: &str, requested: &[String]) -> bool {
    if requested.is_empty() {
        return true;
    }
    let cached: std::collections::HashSet<String> = cached_target
        .split_whitespace()
        .map(|s| s.to_lowercase())
        .collect();
    requested
        .iter()
        .all(|scope| cached.contains(&scope.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_superset_is_a_hit() {
        let cached = "mail.read user.read";
        assert!(target_satisfies(cached, &["mail.read".to_string()]));
        assert!(target_satisfies(
            cached,
            &["mail.read".to_string(), "user.read".to_string()]
        ));
    }

    #[test]
    fn target_wider_request_is_a_miss() {
        let cached = "mail.read user.read";
        assert!(!target_satisfies(
            cached,
            &["mail.read".to_string(), "files.read".to_string()]
        ));
    }

    #[test]
    fn target_match_is_case_and_order_insensitive() {
        let cached = "User.Read Mail.Read";
        assert!(target_satisfies(
            cached,
            &["mail.read".to_string(), "user.read".to_string()]
        ));
    }

    #[test]
    fn empty_request_matches_anything() {
        assert!(target_satisfies("mail.read", &[]));
        assert!(target_satisfies("", &[]));
    }

    #[test]
    fn account_record_roundtrips_extra_fields() {
        let json = r#"{
            "home_account_id": "uid.utid",
            "environment": "login.example.net",
            "realm": "common",
            "local_account_id": "uid",
            "username": "user@example.com",
            "authority_type": "aad",
            "future_field": {"nested": true}
        }"#;

        let record: AccountRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.authority_type, AuthorityType::Aad);
        assert!(record.extra.contains_key("future_field"));

        let out = serde_json::to_string(&record).unwrap();
        assert!(out.contains("future_field"));
    }

    #[test]
    fn credential_enum_tags_by_type() {
        let rt = RefreshTokenRecord {
            home_account_id: "uid.utid".into(),
            environment: "login.example.net".into(),
            client_id: "client-1".into(),
            secret: Secret::new("rt-secret"),
            target: None,
            family_id: Some("1".into()),
            cached_at: "0".into(),
            extra: HashMap::new(),
        };
        assert!(rt.is_family_token());

        let credential = Credential::RefreshToken(rt);
        let json = serde_json::to_string(&credential).unwrap();
        assert!(json.contains("\"credential_type\":\"refresh_token\""));

        let back: Credential = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind(), CredentialKind::RefreshToken);
    }
}
