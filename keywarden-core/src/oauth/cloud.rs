//! Per-cloud protocol variation as a capability-set value.
//!
//! Clouds differ only in endpoint construction, request/response
//! validation rules, and how an account is reconstructed from a token
//! response. Everything else - the state machine in [`crate::oauth`] -
//! is invariant, so the variation lives in one [`CloudStrategy`] value
//! selected by a [`Cloud`] discriminator instead of a type hierarchy.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use url::Url;

use crate::error::FlowError;
use crate::model::{
    AccessTokenRecord, AccountRecord, AuthScheme, AuthorityType, Credential, IdTokenRecord,
    RefreshTokenRecord,
};
use crate::store::Secret;

use super::request::{
    Authority, AuthorizationRequest, TokenGrant, TokenRequest, TokenResponse,
};

/// Default access-token lifetime when the server omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Cloud discriminator selecting the capability set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cloud {
    /// Multi-tenant directory authority.
    Aad,

    /// Business-to-consumer authority with named policies.
    B2c,

    /// On-premises federation service.
    Adfs,
}

/// Issuer-assigned user identifiers carried in `client_info`.
#[derive(Debug, Deserialize)]
struct ClientInfo {
    uid: String,
    utid: String,
}

/// The subset of ID token claims the account factory reads.
#[derive(Debug, Default, Deserialize)]
pub struct IdTokenClaims {
    #[serde(default)]
    pub oid: Option<String>,

    #[serde(default)]
    pub sub: Option<String>,

    #[serde(default)]
    pub tid: Option<String>,

    #[serde(default)]
    pub preferred_username: Option<String>,

    #[serde(default)]
    pub upn: Option<String>,

    #[serde(default)]
    pub name: Option<String>,
}

/// Decode the payload segment of a compact JWT without verifying it.
///
/// Signature verification belongs to the server trust layer; here the
/// claims only seed local account metadata.
pub fn decode_id_token_claims(raw: &str) -> Result<IdTokenClaims, FlowError> {
    let payload = raw
        .split('.')
        .nth(1)
        .ok_or_else(|| FlowError::MalformedResponse {
            message: "id_token is not a compact JWT".to_string(),
        })?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| FlowError::MalformedResponse {
            message: format!("id_token payload is not base64url: {}", e),
        })?;
    serde_json::from_slice(&bytes).map_err(|e| FlowError::MalformedResponse {
        message: format!("id_token payload is not JSON: {}", e),
    })
}

fn decode_client_info(raw: &str) -> Result<ClientInfo, FlowError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(raw)
        .map_err(|e| FlowError::MalformedResponse {
            message: format!("client_info is not base64url: {}", e),
        })?;
    serde_json::from_slice(&bytes).map_err(|e| FlowError::MalformedResponse {
        message: format!("client_info is not JSON: {}", e),
    })
}

/// Per-cloud capability set the flow engine is parameterized by.
///
/// Holds the cloud discriminator and the target authority; every
/// cloud-specific behavior is a `match` on the discriminator.
#[derive(Debug, Clone)]
pub struct CloudStrategy {
    cloud: Cloud,
    authority: Authority,
    token_endpoint_override: Option<Url>,
}

impl CloudStrategy {
    /// Strategy for a multi-tenant directory authority.
    pub fn aad(authority: Authority) -> Self {
        Self {
            cloud: Cloud::Aad,
            authority,
            token_endpoint_override: None,
        }
    }

    /// Strategy for a B2C authority.
    pub fn b2c(authority: Authority) -> Self {
        Self {
            cloud: Cloud::B2c,
            authority,
            token_endpoint_override: None,
        }
    }

    /// Strategy for an on-premises federation authority.
    pub fn adfs(authority: Authority) -> Self {
        Self {
            cloud: Cloud::Adfs,
            authority,
            token_endpoint_override: None,
        }
    }

    /// Point the token exchange at an explicit endpoint.
    ///
    /// For deployments where the token service is not co-hosted with
    /// the authority (sovereign clouds, local test fixtures). Response
    /// validation still runs against the authority.
    pub fn with_token_endpoint_override(mut self, endpoint: Url) -> Self {
        self.token_endpoint_override = Some(endpoint);
        self
    }

    /// The cloud discriminator.
    pub fn cloud(&self) -> Cloud {
        self.cloud
    }

    /// The target authority.
    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    /// Authorization endpoint for this cloud.
    pub fn authorization_endpoint(&self) -> Result<Url, FlowError> {
        self.endpoint("authorize")
    }

    /// Token endpoint for this cloud.
    pub fn token_endpoint(&self) -> Result<Url, FlowError> {
        if let Some(endpoint) = &self.token_endpoint_override {
            return Ok(endpoint.clone());
        }
        self.endpoint("token")
    }

    fn endpoint(&self, leaf: &str) -> Result<Url, FlowError> {
        let base = self
            .authority
            .base_url()
            .map_err(|e| FlowError::InvalidRequest {
                message: format!("authority does not resolve to a URL: {}", e),
            })?;
        let path = match self.cloud {
            // ADFS mounts the protocol endpoints under a fixed path
            // instead of a tenant segment.
            Cloud::Adfs => format!("https://{}/adfs/oauth2/{}", self.authority.environment, leaf),
            Cloud::Aad | Cloud::B2c => format!("{}/oauth2/v2.0/{}", base, leaf),
        };
        Url::parse(&path).map_err(|e| FlowError::InvalidRequest {
            message: format!("endpoint does not resolve to a URL: {}", e),
        })
    }

    /// Validate an authorization request before it can reach the
    /// network. Fails closed.
    pub fn validate_authorization_request(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<(), FlowError> {
        if request.client_id.trim().is_empty() {
            return Err(FlowError::InvalidRequest {
                message: "client_id is required".to_string(),
            });
        }
        if request.redirect_uri.trim().is_empty() {
            return Err(FlowError::InvalidRequest {
                message: "redirect_uri is required".to_string(),
            });
        }
        if request.scopes.iter().all(|s| s.trim().is_empty()) {
            return Err(FlowError::InvalidRequest {
                message: "at least one scope is required".to_string(),
            });
        }

        match self.cloud {
            Cloud::Aad => {
                // The authority must resolve before we hand anything to
                // an execution path.
                self.authority
                    .base_url()
                    .map_err(|e| FlowError::InvalidRequest {
                        message: format!("authority does not resolve: {}", e),
                    })?;
                if self.authority.realm.trim().is_empty() {
                    return Err(FlowError::InvalidRequest {
                        message: "authority realm is required".to_string(),
                    });
                }
            }
            Cloud::B2c => {
                if request.policy.as_deref().map_or(true, |p| p.trim().is_empty()) {
                    return Err(FlowError::InvalidRequest {
                        message: "B2C requests require a sign-in policy".to_string(),
                    });
                }
            }
            Cloud::Adfs => {
                if request.policy.is_some() {
                    return Err(FlowError::InvalidRequest {
                        message: "policies are not supported on ADFS authorities".to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Validate a token request before the exchange.
    pub fn validate_token_request(&self, request: &TokenRequest) -> Result<(), FlowError> {
        if request.client_id.trim().is_empty() {
            return Err(FlowError::InvalidRequest {
                message: "client_id is required".to_string(),
            });
        }
        match &request.grant {
            TokenGrant::AuthorizationCode { code, .. } => {
                if code.trim().is_empty() {
                    return Err(FlowError::InvalidRequest {
                        message: "authorization code is empty".to_string(),
                    });
                }
            }
            TokenGrant::RefreshToken { refresh_token } => {
                if refresh_token.trim().is_empty() {
                    return Err(FlowError::InvalidRequest {
                        message: "refresh token is empty".to_string(),
                    });
                }
            }
            TokenGrant::ClientCredentials => {
                if matches!(self.cloud, Cloud::B2c) {
                    return Err(FlowError::InvalidRequest {
                        message: "B2C authorities do not support client credentials".to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Validate a 2xx token response body per cloud rules.
    pub fn validate_token_response(&self, response: &TokenResponse) -> Result<(), FlowError> {
        if response.access_token.trim().is_empty() {
            return Err(FlowError::MalformedResponse {
                message: "access_token is empty".to_string(),
            });
        }
        if let Some(issuer) = response.issuer.as_deref() {
            let issuer_url = Url::parse(issuer).map_err(|e| FlowError::MalformedResponse {
                message: format!("issuer is not a URL: {}", e),
            })?;
            if issuer_url.host_str() != Some(self.authority.environment.as_str()) {
                return Err(FlowError::MalformedResponse {
                    message: format!(
                        "issuer host {:?} does not match authority {}",
                        issuer_url.host_str(),
                        self.authority.environment
                    ),
                });
            }
        }
        match self.cloud {
            Cloud::Aad => {
                if response.client_info.as_deref().map_or(true, str::is_empty) {
                    return Err(FlowError::MalformedResponse {
                        message: "client_info is required".to_string(),
                    });
                }
            }
            Cloud::B2c => {
                if response.id_token.as_deref().map_or(true, str::is_empty) {
                    return Err(FlowError::MalformedResponse {
                        message: "id_token is required".to_string(),
                    });
                }
            }
            Cloud::Adfs => {}
        }
        Ok(())
    }

    /// Reconstruct the owning account from a validated token response.
    pub fn create_account(&self, response: &TokenResponse) -> Result<AccountRecord, FlowError> {
        let claims = match response.id_token.as_deref() {
            Some(raw) => decode_id_token_claims(raw)?,
            None => IdTokenClaims::default(),
        };

        match self.cloud {
            Cloud::Aad => {
                let info = decode_client_info(response.client_info.as_deref().ok_or_else(
                    || FlowError::MalformedResponse {
                        message: "client_info is required".to_string(),
                    },
                )?)?;
                let realm = claims
                    .tid
                    .clone()
                    .unwrap_or_else(|| info.utid.clone());
                let username = claims
                    .preferred_username
                    .or(claims.upn)
                    .unwrap_or_default();
                let mut account = AccountRecord::new(
                    format!("{}.{}", info.uid, info.utid),
                    self.authority.environment.clone(),
                    realm,
                    claims.oid.unwrap_or(info.uid),
                    username,
                    AuthorityType::Aad,
                );
                account.name = claims.name;
                Ok(account)
            }
            Cloud::B2c => {
                let subject =
                    claims
                        .sub
                        .clone()
                        .ok_or_else(|| FlowError::MalformedResponse {
                            message: "id_token carries no subject".to_string(),
                        })?;
                let mut account = AccountRecord::new(
                    subject.clone(),
                    self.authority.environment.clone(),
                    self.authority.realm.clone(),
                    subject,
                    claims.preferred_username.unwrap_or_default(),
                    AuthorityType::B2c,
                );
                account.name = claims.name;
                Ok(account)
            }
            Cloud::Adfs => {
                let subject = claims
                    .upn
                    .clone()
                    .or_else(|| claims.sub.clone())
                    .ok_or_else(|| FlowError::MalformedResponse {
                        message: "response carries no user identifier".to_string(),
                    })?;
                let username = claims.upn.unwrap_or_else(|| subject.clone());
                Ok(AccountRecord::new(
                    subject.clone(),
                    self.authority.environment.clone(),
                    self.authority.realm.clone(),
                    subject,
                    username,
                    AuthorityType::Adfs,
                ))
            }
        }
    }

    /// Extract the access token record from a validated response.
    pub fn access_token_from_response(
        &self,
        account: &AccountRecord,
        request: &TokenRequest,
        response: &TokenResponse,
        now: DateTime<Utc>,
    ) -> AccessTokenRecord {
        let target = response
            .scope
            .clone()
            .unwrap_or_else(|| request.scopes.join(" "));
        let expires_in = response.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        let scheme = match response.token_type.as_deref() {
            Some(t) if t.eq_ignore_ascii_case("pop") => AuthScheme::Pop,
            _ => AuthScheme::Bearer,
        };
        AccessTokenRecord {
            home_account_id: account.home_account_id.clone(),
            environment: account.environment.clone(),
            realm: account.realm.clone(),
            client_id: request.client_id.clone(),
            secret: Secret::new(&response.access_token),
            target,
            cached_at: now.timestamp().to_string(),
            expires_on: (now.timestamp() + expires_in).to_string(),
            // refresh_on never exceeds expires_on.
            refresh_on: response
                .refresh_in
                .map(|secs| (now.timestamp() + secs.min(expires_in)).to_string()),
            scheme,
            extra: HashMap::new(),
        }
    }

    /// Extract the refresh token record, when the response carries one.
    pub fn refresh_token_from_response(
        &self,
        account: &AccountRecord,
        request: &TokenRequest,
        response: &TokenResponse,
        now: DateTime<Utc>,
    ) -> Option<RefreshTokenRecord> {
        let refresh_token = response.refresh_token.as_deref()?;
        // Refresh grants are multi-resource: one record per
        // account + environment + client, never scoped to a target.
        // (Target scoping only survives migration of single-resource
        // legacy tokens.)
        Some(RefreshTokenRecord {
            home_account_id: account.home_account_id.clone(),
            environment: account.environment.clone(),
            client_id: request.client_id.clone(),
            secret: Secret::new(refresh_token),
            target: None,
            family_id: response.family_id.clone().filter(|f| !f.is_empty()),
            cached_at: now.timestamp().to_string(),
            extra: HashMap::new(),
        })
    }

    /// Extract the ID token record, when the response carries one.
    pub fn id_token_from_response(
        &self,
        account: &AccountRecord,
        request: &TokenRequest,
        response: &TokenResponse,
        now: DateTime<Utc>,
    ) -> Option<IdTokenRecord> {
        let id_token = response.id_token.as_deref()?;
        Some(IdTokenRecord {
            home_account_id: account.home_account_id.clone(),
            environment: account.environment.clone(),
            realm: account.realm.clone(),
            client_id: request.client_id.clone(),
            secret: Secret::new(id_token),
            cached_at: now.timestamp().to_string(),
            extra: HashMap::new(),
        })
    }

    /// All credential records carried by a validated response.
    pub fn credentials_from_response(
        &self,
        account: &AccountRecord,
        request: &TokenRequest,
        response: &TokenResponse,
        now: DateTime<Utc>,
    ) -> Vec<Credential> {
        let mut credentials = vec![Credential::AccessToken(
            self.access_token_from_response(account, request, response, now),
        )];
        if let Some(rt) = self.refresh_token_from_response(account, request, response, now) {
            credentials.push(Credential::RefreshToken(rt));
        }
        if let Some(it) = self.id_token_from_response(account, request, response, now) {
            credentials.push(Credential::IdToken(it));
        }
        credentials
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::request::AuthorizationRequest;
    use uuid::Uuid;

    fn encode_json(value: serde_json::Value) -> String {
        URL_SAFE_NO_PAD.encode(value.to_string())
    }

    fn test_id_token(claims: serde_json::Value) -> String {
        format!("{}.{}.{}", encode_json(serde_json::json!({"alg": "none"})), encode_json(claims), "sig")
    }

    fn aad_response() -> TokenResponse {
        serde_json::from_value(serde_json::json!({
            "access_token": "at-1",
            "token_type": "Bearer",
            "expires_in": 3600,
            "refresh_token": "rt-1",
            "id_token": test_id_token(serde_json::json!({
                "oid": "oid-1",
                "tid": "tenant-1",
                "preferred_username": "user@example.com",
                "name": "Test User"
            })),
            "scope": "mail.read user.read",
            "client_info": encode_json(serde_json::json!({"uid": "uid-1", "utid": "tenant-1"})),
        }))
        .unwrap()
    }

    fn authorization_request(policy: Option<&str>) -> AuthorizationRequest {
        let builder = AuthorizationRequest::builder("client-a", "https://localhost/cb", "ctx")
            .scopes(vec!["mail.read".to_string()]);
        match policy {
            Some(p) => builder.policy(p).build(),
            None => builder.build(),
        }
    }

    #[test]
    fn aad_endpoints_carry_the_realm() {
        let strategy = CloudStrategy::aad(Authority::new("login.example.net", "tenant-1"));
        assert_eq!(
            strategy.authorization_endpoint().unwrap().as_str(),
            "https://login.example.net/tenant-1/oauth2/v2.0/authorize"
        );
        assert_eq!(
            strategy.token_endpoint().unwrap().as_str(),
            "https://login.example.net/tenant-1/oauth2/v2.0/token"
        );
    }

    #[test]
    fn adfs_endpoints_use_the_fixed_path() {
        let strategy = CloudStrategy::adfs(Authority::new("fs.contoso.com", "adfs"));
        assert_eq!(
            strategy.token_endpoint().unwrap().as_str(),
            "https://fs.contoso.com/adfs/oauth2/token"
        );
    }

    #[test]
    fn b2c_requires_a_policy() {
        let strategy = CloudStrategy::b2c(Authority::new("tenant.b2clogin.example", "tenant"));
        let without = authorization_request(None);
        assert!(matches!(
            strategy.validate_authorization_request(&without),
            Err(FlowError::InvalidRequest { .. })
        ));

        let with = authorization_request(Some("b2c_1_signin"));
        assert!(strategy.validate_authorization_request(&with).is_ok());
    }

    #[test]
    fn adfs_rejects_policies() {
        let strategy = CloudStrategy::adfs(Authority::new("fs.contoso.com", "adfs"));
        let request = authorization_request(Some("b2c_1_signin"));
        assert!(matches!(
            strategy.validate_authorization_request(&request),
            Err(FlowError::InvalidRequest { .. })
        ));
    }

    #[test]
    fn scopeless_requests_fail_closed() {
        let strategy = CloudStrategy::aad(Authority::new("login.example.net", "common"));
        let request = AuthorizationRequest::builder("client-a", "https://localhost/cb", "ctx")
            .build();
        assert!(matches!(
            strategy.validate_authorization_request(&request),
            Err(FlowError::InvalidRequest { .. })
        ));
    }

    #[test]
    fn aad_response_requires_client_info() {
        let strategy = CloudStrategy::aad(Authority::new("login.example.net", "common"));
        let mut response = aad_response();
        response.client_info = None;
        assert!(matches!(
            strategy.validate_token_response(&response),
            Err(FlowError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn issuer_host_mismatch_is_rejected() {
        let strategy = CloudStrategy::aad(Authority::new("login.example.net", "common"));
        let mut response = aad_response();
        response.issuer = Some("https://evil.example.org/tenant-1".to_string());
        assert!(matches!(
            strategy.validate_token_response(&response),
            Err(FlowError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn aad_account_from_response() {
        let strategy = CloudStrategy::aad(Authority::new("login.example.net", "common"));
        let response = aad_response();
        strategy.validate_token_response(&response).unwrap();

        let account = strategy.create_account(&response).unwrap();
        assert_eq!(account.home_account_id, "uid-1.tenant-1");
        assert_eq!(account.environment, "login.example.net");
        assert_eq!(account.realm, "tenant-1");
        assert_eq!(account.local_account_id, "oid-1");
        assert_eq!(account.username, "user@example.com");
        assert_eq!(account.authority_type, AuthorityType::Aad);
        assert_eq!(account.name.as_deref(), Some("Test User"));
    }

    #[test]
    fn credentials_from_response_builds_all_three() {
        let strategy = CloudStrategy::aad(Authority::new("login.example.net", "common"));
        let response = aad_response();
        let account = strategy.create_account(&response).unwrap();
        let request = TokenRequest {
            client_id: "client-a".into(),
            scopes: vec!["mail.read".into()],
            grant: TokenGrant::ClientCredentials,
            correlation_id: Uuid::new_v4(),
        };

        let now = Utc::now();
        let credentials = strategy.credentials_from_response(&account, &request, &response, now);
        assert_eq!(credentials.len(), 3);

        let at = credentials
            .iter()
            .find_map(|c| match c {
                Credential::AccessToken(at) => Some(at),
                _ => None,
            })
            .unwrap();
        assert_eq!(at.target, "mail.read user.read");
        let expires_on: i64 = at.expires_on.parse().unwrap();
        assert_eq!(expires_on, now.timestamp() + 3600);
    }
}
