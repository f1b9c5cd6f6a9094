//! Deterministic cache key construction.
//!
//! Keys are lowercase, trimmed, and joined with a reserved `-` delimiter
//! in a fixed field order, so two logically identical records always
//! serialize to the same key no matter how they were built. Construction
//! is pure; idempotent migration and deduplication depend on that.
//!
//! Layouts:
//! - account: `home_account_id-environment-realm`
//! - credential: `home_account_id-environment-kind-client_id-realm-target`
//!
//! Refresh tokens blank the realm segment (they are realm-agnostic);
//! ID tokens blank the target segment; proof-of-possession access
//! tokens use the distinct kind segment `accesstoken_with_authscheme`
//! so the same scopes under different schemes stay distinct entries.

use crate::model::{
    AccessTokenRecord, AccountRecord, AuthScheme, Credential, CredentialKind, IdTokenRecord,
    RefreshTokenRecord,
};

/// Reserved delimiter between key segments.
pub const KEY_DELIMITER: &str = "-";

/// Kind segment for proof-of-possession access tokens.
const ACCESS_TOKEN_WITH_SCHEME: &str = "accesstoken_with_authscheme";

/// Lowercase and trim a segment; absent values become empty segments.
fn sanitize(input: &str) -> String {
    input.trim().to_lowercase()
}

/// Build the cache key for an account record.
pub fn account_key(account: &AccountRecord) -> String {
    account_key_parts(&account.home_account_id, &account.environment, &account.realm)
}

/// Build an account cache key from its identity triple.
pub fn account_key_parts(home_account_id: &str, environment: &str, realm: &str) -> String {
    [
        sanitize(home_account_id),
        sanitize(environment),
        sanitize(realm),
    ]
    .join(KEY_DELIMITER)
}

/// Build the cache key for any credential record.
pub fn credential_key(credential: &Credential) -> String {
    match credential {
        Credential::AccessToken(at) => access_token_key(at),
        Credential::RefreshToken(rt) => refresh_token_key(rt),
        Credential::IdToken(it) => id_token_key(it),
    }
}

/// Build the cache key for an access token record.
pub fn access_token_key(at: &AccessTokenRecord) -> String {
    let kind = match at.scheme {
        AuthScheme::Bearer => CredentialKind::AccessToken.as_str(),
        AuthScheme::Pop => ACCESS_TOKEN_WITH_SCHEME,
    };
    [
        sanitize(&at.home_account_id),
        sanitize(&at.environment),
        kind.to_string(),
        sanitize(&at.client_id),
        sanitize(&at.realm),
        sanitize(&at.target),
    ]
    .join(KEY_DELIMITER)
}

/// Build the cache key for a refresh token record.
///
/// The realm segment is always blank: one refresh token serves every
/// realm under its account + environment + client.
pub fn refresh_token_key(rt: &RefreshTokenRecord) -> String {
    [
        sanitize(&rt.home_account_id),
        sanitize(&rt.environment),
        CredentialKind::RefreshToken.as_str().to_string(),
        sanitize(&rt.client_id),
        String::new(),
        sanitize(rt.target.as_deref().unwrap_or("")),
    ]
    .join(KEY_DELIMITER)
}

/// Build the cache key for an ID token record.
pub fn id_token_key(it: &IdTokenRecord) -> String {
    [
        sanitize(&it.home_account_id),
        sanitize(&it.environment),
        CredentialKind::IdToken.as_str().to_string(),
        sanitize(&it.client_id),
        sanitize(&it.realm),
        String::new(),
    ]
    .join(KEY_DELIMITER)
}

/// Detect which credential kind a cache key belongs to.
///
/// Keys are not parsed back into fields (segments may themselves contain
/// the delimiter); the kind segment is located by name, the way the
/// original cache distinguishes record types on read.
pub fn kind_of_key(key: &str) -> Option<CredentialKind> {
    let delimited = |segment: &str| format!("{}{}{}", KEY_DELIMITER, segment, KEY_DELIMITER);
    if key.contains(&delimited(ACCESS_TOKEN_WITH_SCHEME))
        || key.contains(&delimited(CredentialKind::AccessToken.as_str()))
    {
        Some(CredentialKind::AccessToken)
    } else if key.contains(&delimited(CredentialKind::RefreshToken.as_str())) {
        Some(CredentialKind::RefreshToken)
    } else if key.contains(&delimited(CredentialKind::IdToken.as_str())) {
        Some(CredentialKind::IdToken)
    } else {
        None
    }
}

/// Whether a credential key belongs to the given account + environment.
pub fn key_belongs_to(key: &str, home_account_id: &str, environment: &str) -> bool {
    let prefix = format!(
        "{}{}{}{}",
        sanitize(home_account_id),
        KEY_DELIMITER,
        sanitize(environment),
        KEY_DELIMITER
    );
    key.starts_with(&prefix)
}
