//! Protocol message shapes for the authorization and token endpoints.
//!
//! This module defines:
//! - [`Authority`] - environment + realm issuer pair
//! - [`AuthorizationRequest`] (builder) / [`AuthorizationResponse`]
//! - [`TokenRequest`] / [`TokenGrant`] - the three supported grants
//! - [`TokenResponse`] / [`WireErrorBody`] - token endpoint results

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;
use uuid::Uuid;

use super::state::AuthorizationState;

/// Issuer endpoint combination of environment and realm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authority {
    /// Cloud host, e.g. `login.example.net`.
    pub environment: String,

    /// Tenant partition, or `"common"`.
    pub realm: String,
}

impl Authority {
    /// Create an authority.
    pub fn new(environment: impl Into<String>, realm: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            realm: realm.into(),
        }
    }

    /// The authority base URL, `https://{environment}/{realm}`.
    pub fn base_url(&self) -> Result<Url, url::ParseError> {
        Url::parse(&format!("https://{}/{}", self.environment, self.realm))
    }
}

/// How the user should be prompted during authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Prompt {
    /// Let the server decide.
    #[default]
    Unspecified,

    /// Force credential entry.
    Login,

    /// Force the account picker.
    SelectAccount,

    /// Ask for consent again.
    Consent,
}

impl Prompt {
    /// Wire value for the `prompt` query parameter, if any.
    pub fn as_wire(&self) -> Option<&'static str> {
        match self {
            Self::Unspecified => None,
            Self::Login => Some("login"),
            Self::SelectAccount => Some("select_account"),
            Self::Consent => Some("consent"),
        }
    }
}

/// An authorization request ready for dispatch to an interactive or
/// silent execution path.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    /// Client (application) id.
    pub client_id: String,

    /// Redirect URI registered for the client.
    pub redirect_uri: String,

    /// Requested scopes.
    pub scopes: Vec<String>,

    /// Prompt behavior.
    pub prompt: Prompt,

    /// B2C sign-in policy, when targeting a B2C authority.
    pub policy: Option<String>,

    /// Additional query parameters passed through verbatim.
    pub extra_query_params: HashMap<String, String>,

    /// PKCE verifier to present at the token exchange. The matching
    /// challenge is rendered by the execution path, not here.
    pub pkce_verifier: Option<String>,

    /// CSRF state binding this request to its response.
    pub state: AuthorizationState,

    /// Correlation id for diagnostics.
    pub correlation_id: Uuid,
}

impl AuthorizationRequest {
    /// Start building a request; a fresh state is generated from the
    /// given context id.
    pub fn builder(
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
        context_id: impl Into<String>,
    ) -> AuthorizationRequestBuilder {
        AuthorizationRequestBuilder {
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
            scopes: Vec::new(),
            prompt: Prompt::Unspecified,
            policy: None,
            extra_query_params: HashMap::new(),
            pkce_verifier: None,
            state: AuthorizationState::generate(context_id),
            correlation_id: Uuid::new_v4(),
        }
    }

    /// Render the query parameters for the authorization endpoint.
    pub fn query_params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("client_id".to_string(), self.client_id.clone()),
            ("response_type".to_string(), "code".to_string()),
            ("redirect_uri".to_string(), self.redirect_uri.clone()),
            ("scope".to_string(), self.scopes.join(" ")),
            ("state".to_string(), self.state.encode()),
            (
                "client-request-id".to_string(),
                self.correlation_id.to_string(),
            ),
        ];
        if let Some(prompt) = self.prompt.as_wire() {
            params.push(("prompt".to_string(), prompt.to_string()));
        }
        if let Some(policy) = &self.policy {
            params.push(("p".to_string(), policy.clone()));
        }
        for (k, v) in &self.extra_query_params {
            params.push((k.clone(), v.clone()));
        }
        params
    }
}

/// Builder for [`AuthorizationRequest`].
pub struct AuthorizationRequestBuilder {
    client_id: String,
    redirect_uri: String,
    scopes: Vec<String>,
    prompt: Prompt,
    policy: Option<String>,
    extra_query_params: HashMap<String, String>,
    pkce_verifier: Option<String>,
    state: AuthorizationState,
    correlation_id: Uuid,
}

impl AuthorizationRequestBuilder {
    /// Set the requested scopes.
    pub fn scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Set the prompt behavior.
    pub fn prompt(mut self, prompt: Prompt) -> Self {
        self.prompt = prompt;
        self
    }

    /// Set the B2C sign-in policy.
    pub fn policy(mut self, policy: impl Into<String>) -> Self {
        self.policy = Some(policy.into());
        self
    }

    /// Add a pass-through query parameter.
    pub fn extra_query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_query_params.insert(key.into(), value.into());
        self
    }

    /// Set the PKCE verifier to present at the token exchange.
    pub fn pkce_verifier(mut self, verifier: impl Into<String>) -> Self {
        self.pkce_verifier = Some(verifier.into());
        self
    }

    /// Set an explicit correlation id (defaults to a fresh UUID).
    pub fn correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    /// Finish building.
    pub fn build(self) -> AuthorizationRequest {
        AuthorizationRequest {
            client_id: self.client_id,
            redirect_uri: self.redirect_uri,
            scopes: self.scopes,
            prompt: self.prompt,
            policy: self.policy,
            extra_query_params: self.extra_query_params,
            pkce_verifier: self.pkce_verifier,
            state: self.state,
            correlation_id: self.correlation_id,
        }
    }
}

/// The redirect-back result of an authorization request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationResponse {
    /// The authorization code to redeem.
    pub code: String,

    /// Echoed state from the request.
    pub state: String,
}

/// Grant variants for the token endpoint.
#[derive(Debug, Clone)]
pub enum TokenGrant {
    /// Redeem an authorization code.
    AuthorizationCode {
        code: String,
        redirect_uri: String,
        /// PKCE verifier matching the challenge sent at authorization.
        code_verifier: Option<String>,
    },

    /// Redeem a refresh token.
    RefreshToken { refresh_token: String },

    /// App-only credentials.
    ClientCredentials,
}

impl TokenGrant {
    /// Wire value for the `grant_type` parameter.
    pub fn grant_type(&self) -> &'static str {
        match self {
            Self::AuthorizationCode { .. } => "authorization_code",
            Self::RefreshToken { .. } => "refresh_token",
            Self::ClientCredentials => "client_credentials",
        }
    }
}

/// A token endpoint request.
#[derive(Debug, Clone)]
pub struct TokenRequest {
    /// Client (application) id.
    pub client_id: String,

    /// Requested scopes.
    pub scopes: Vec<String>,

    /// Grant being redeemed.
    pub grant: TokenGrant,

    /// Correlation id carried over from the authorization leg.
    pub correlation_id: Uuid,
}

impl TokenRequest {
    /// Render the form body for the token endpoint.
    pub fn form_params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("client_id".to_string(), self.client_id.clone()),
            ("grant_type".to_string(), self.grant.grant_type().to_string()),
            ("scope".to_string(), self.scopes.join(" ")),
            (
                "client-request-id".to_string(),
                self.correlation_id.to_string(),
            ),
        ];
        match &self.grant {
            TokenGrant::AuthorizationCode {
                code,
                redirect_uri,
                code_verifier,
            } => {
                params.push(("code".to_string(), code.clone()));
                params.push(("redirect_uri".to_string(), redirect_uri.clone()));
                if let Some(verifier) = code_verifier {
                    params.push(("code_verifier".to_string(), verifier.clone()));
                }
            }
            TokenGrant::RefreshToken { refresh_token } => {
                params.push(("refresh_token".to_string(), refresh_token.clone()));
            }
            TokenGrant::ClientCredentials => {}
        }
        params
    }
}

/// A successful token endpoint response body.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,

    #[serde(default)]
    pub token_type: Option<String>,

    /// Lifetime in seconds from issuance.
    #[serde(default)]
    pub expires_in: Option<i64>,

    /// Soft-refresh threshold in seconds from issuance, when the server
    /// supplies one.
    #[serde(default)]
    pub refresh_in: Option<i64>,

    #[serde(default)]
    pub refresh_token: Option<String>,

    #[serde(default)]
    pub id_token: Option<String>,

    /// Granted scopes; may be wider or narrower than requested.
    #[serde(default)]
    pub scope: Option<String>,

    /// Issuer-assigned user identifiers, `uid:utid` encoded.
    #[serde(default)]
    pub client_info: Option<String>,

    /// Family id for family-of-client refresh tokens.
    #[serde(default, rename = "foci")]
    pub family_id: Option<String>,

    /// Issuer URL, echoed by authorities that support it.
    #[serde(default)]
    pub issuer: Option<String>,
}

/// A well-formed error body from the token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct WireErrorBody {
    pub error: String,

    #[serde(default)]
    pub error_description: Option<String>,

    #[serde(default)]
    pub correlation_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_query_includes_state_and_scopes() {
        let request = AuthorizationRequest::builder("client-a", "https://localhost/cb", "ctx-1")
            .scopes(vec!["mail.read".to_string(), "user.read".to_string()])
            .prompt(Prompt::SelectAccount)
            .build();

        let params = request.query_params();
        let lookup = |name: &str| {
            params
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
        };

        assert_eq!(lookup("client_id"), Some("client-a"));
        assert_eq!(lookup("response_type"), Some("code"));
        assert_eq!(lookup("scope"), Some("mail.read user.read"));
        assert_eq!(lookup("prompt"), Some("select_account"));
        assert!(lookup("state").unwrap().starts_with("ctx-1:"));
    }

    #[test]
    fn token_form_for_refresh_grant() {
        let request = TokenRequest {
            client_id: "client-a".into(),
            scopes: vec!["mail.read".into()],
            grant: TokenGrant::RefreshToken {
                refresh_token: "rt-1".into(),
            },
            correlation_id: Uuid::new_v4(),
        };

        let params = request.form_params();
        assert!(params.contains(&("grant_type".to_string(), "refresh_token".to_string())));
        assert!(params.contains(&("refresh_token".to_string(), "rt-1".to_string())));
    }

    #[test]
    fn token_form_carries_pkce_verifier() {
        let request = TokenRequest {
            client_id: "client-a".into(),
            scopes: vec![],
            grant: TokenGrant::AuthorizationCode {
                code: "auth-code".into(),
                redirect_uri: "https://localhost/cb".into(),
                code_verifier: Some("verifier-1".into()),
            },
            correlation_id: Uuid::new_v4(),
        };

        let params = request.form_params();
        assert!(params.contains(&("code_verifier".to_string(), "verifier-1".to_string())));
    }

    #[test]
    fn authority_base_url() {
        let authority = Authority::new("login.example.net", "common");
        assert_eq!(
            authority.base_url().unwrap().as_str(),
            "https://login.example.net/common"
        );
    }

    #[test]
    fn token_response_parses_optional_fields() {
        let json = r#"{
            "access_token": "at",
            "token_type": "Bearer",
            "expires_in": 3600,
            "refresh_token": "rt",
            "id_token": "idt",
            "scope": "mail.read",
            "client_info": "uid:utid",
            "foci": "1"
        }"#;
        let response: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.expires_in, Some(3600));
        assert_eq!(response.family_id.as_deref(), Some("1"));
    }
}
