//! OAuth2/OIDC credential acquisition.
//!
//! This module provides:
//! - [`cloud`] - per-cloud protocol variation as a capability-set value
//! - [`request`] - protocol message shapes
//! - [`state`] - CSRF state binding requests to responses
//! - [`run_authorization_flow`] / [`acquire_token_silent`] - the flow
//!   engine itself
//!
//! The acquisition state machine is invariant across clouds:
//! build -> validate request -> dispatch -> reconcile state -> token
//! exchange -> validate response -> cache. Cloud-specific behavior is
//! confined to the [`cloud::CloudStrategy`] value the engine is
//! parameterized by.
//!
//! Concurrent identical acquisitions are not deduplicated here; callers
//! should coalesce in-flight exchanges for the same cache key. The
//! cache's last-writer-wins semantics make duplicates safe but
//! wasteful.

pub mod cloud;
pub mod request;
pub mod state;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::cache::{should_refresh, CredentialQuery, TokenCache};
use crate::error::{FlowError, ServerError};
use crate::http::{HttpRequest, HttpTransport, TransportFailure};
use crate::model::{
    AccessTokenRecord, AccountRecord, Credential, IdTokenRecord, RefreshTokenRecord,
};
use crate::store::KeyValueStore;
use crate::telemetry::{TelemetryEvent, TelemetrySink};

use cloud::CloudStrategy;
use request::{
    AuthorizationRequest, AuthorizationResponse, TokenGrant, TokenRequest, TokenResponse,
    WireErrorBody,
};

/// What an interactive or silent execution path produced.
#[derive(Debug, Clone)]
pub enum AuthorizationOutcome {
    /// The user authorized; a complete response came back.
    Authorized(AuthorizationResponse),

    /// The user dismissed the flow.
    Cancelled,

    /// The execution path gave up waiting.
    TimedOut,
}

/// UI/interactive collaborator: executes an authorization request and
/// reports its outcome. Never returns a partially-filled response.
#[async_trait]
pub trait AuthorizationDispatcher: Send + Sync {
    /// Execute the request and wait for its outcome.
    async fn dispatch(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<AuthorizationOutcome, FlowError>;
}

/// The records produced by one successful acquisition.
#[derive(Debug, Clone)]
pub struct TokenAcquisition {
    /// The owning account.
    pub account: AccountRecord,

    /// The access token to hand to the caller.
    pub access_token: AccessTokenRecord,

    /// Refresh token, when the grant produced one.
    pub refresh_token: Option<RefreshTokenRecord>,

    /// ID token, when the grant produced one.
    pub id_token: Option<IdTokenRecord>,
}

/// Run the full interactive authorization flow.
///
/// Validation fails closed: an invalid request never reaches the
/// dispatcher. A state mismatch on the way back is treated as a
/// possible interception attempt - surfaced as
/// [`FlowError::StateMismatch`] and never retried.
pub async fn run_authorization_flow<S: KeyValueStore>(
    strategy: &CloudStrategy,
    request: AuthorizationRequest,
    dispatcher: &dyn AuthorizationDispatcher,
    http: &dyn HttpTransport,
    cache: &TokenCache<S>,
    telemetry: &dyn TelemetrySink,
) -> Result<TokenAcquisition, FlowError> {
    let correlation_id = request.correlation_id;
    emit_step(telemetry, "validate_request", &request.client_id);
    strategy.validate_authorization_request(&request)?;

    emit_step(telemetry, "dispatch", &request.client_id);
    debug!(%correlation_id, client_id = %request.client_id, "dispatching authorization request");
    let response = match dispatcher.dispatch(&request).await? {
        AuthorizationOutcome::Authorized(response) => response,
        AuthorizationOutcome::Cancelled => {
            info!(%correlation_id, "authorization cancelled by user");
            return Err(FlowError::Cancelled);
        }
        AuthorizationOutcome::TimedOut => {
            warn!(%correlation_id, "authorization timed out");
            return Err(FlowError::TimedOut);
        }
    };

    emit_step(telemetry, "reconcile_state", &request.client_id);
    if !request.state.matches(&response.state) {
        error!(
            %correlation_id,
            context_id = %request.state.context_id(),
            "authorization response state does not match the originating request"
        );
        return Err(FlowError::StateMismatch {
            context_id: request.state.context_id().to_string(),
        });
    }

    let token_request = TokenRequest {
        client_id: request.client_id.clone(),
        scopes: request.scopes.clone(),
        grant: TokenGrant::AuthorizationCode {
            code: response.code,
            redirect_uri: request.redirect_uri.clone(),
            code_verifier: request.pkce_verifier.clone(),
        },
        correlation_id,
    };

    emit_step(telemetry, "token_exchange", &request.client_id);
    let token_response = exchange(strategy, http, &token_request).await?;
    strategy.validate_token_response(&token_response)?;

    let account = strategy.create_account(&token_response)?;
    finish_acquisition(strategy, cache, telemetry, &account, &token_request, &token_response).await
}

/// Acquire a token without user interaction.
///
/// Serves from the cache when the matching access token has not crossed
/// its refresh threshold; otherwise redeems the cached refresh token.
/// When neither path is possible, surfaces
/// [`FlowError::InteractionRequired`].
pub async fn acquire_token_silent<S: KeyValueStore>(
    strategy: &CloudStrategy,
    query: &CredentialQuery,
    http: &dyn HttpTransport,
    cache: &TokenCache<S>,
    telemetry: &dyn TelemetrySink,
) -> Result<TokenAcquisition, FlowError> {
    let mut lookup = cache.load(query).await?;
    let now = Utc::now();

    if let (Some(access_token), Some(account)) =
        (lookup.access_token.take(), lookup.account.take())
    {
        // should_refresh surfaces InvalidRecord on corrupt expiry data
        // instead of treating it as a miss.
        if !should_refresh(&access_token, now)? {
            debug!(client_id = %query.client_id, "silent acquisition served from cache");
            return Ok(TokenAcquisition {
                account,
                access_token,
                refresh_token: lookup.refresh_token,
                id_token: lookup.id_token,
            });
        }
        // Stale: keep the account around for the refresh path.
        lookup.account = Some(account);
    }

    let Some(refresh_token) = lookup.refresh_token else {
        return Err(FlowError::InteractionRequired {
            message: format!(
                "no usable cached credential for client {} in realm {}",
                query.client_id, query.realm
            ),
        });
    };

    let token_request = TokenRequest {
        client_id: query.client_id.clone(),
        scopes: query.target.clone(),
        grant: TokenGrant::RefreshToken {
            refresh_token: refresh_token.secret.expose().to_string(),
        },
        correlation_id: uuid::Uuid::new_v4(),
    };

    emit_step(telemetry, "refresh_exchange", &query.client_id);
    info!(client_id = %query.client_id, "redeeming refresh token");
    let token_response = exchange(strategy, http, &token_request).await?;
    strategy.validate_token_response(&token_response)?;

    // Prefer the cached account; a refresh response is not required to
    // restate the full identity.
    let account = match lookup.account {
        Some(account) => account,
        None => strategy.create_account(&token_response)?,
    };
    finish_acquisition(strategy, cache, telemetry, &account, &token_request, &token_response).await
}

/// Build records from a validated response and commit them as one
/// cache transaction.
async fn finish_acquisition<S: KeyValueStore>(
    strategy: &CloudStrategy,
    cache: &TokenCache<S>,
    telemetry: &dyn TelemetrySink,
    account: &AccountRecord,
    token_request: &TokenRequest,
    token_response: &TokenResponse,
) -> Result<TokenAcquisition, FlowError> {
    let now = Utc::now();
    let credentials =
        strategy.credentials_from_response(account, token_request, token_response, now);

    cache.save(account, &credentials).await?;
    emit_step(telemetry, "cached", &token_request.client_id);

    let mut access_token = None;
    let mut refresh_token = None;
    let mut id_token = None;
    for credential in credentials {
        match credential {
            Credential::AccessToken(at) => access_token = Some(at),
            Credential::RefreshToken(rt) => refresh_token = Some(rt),
            Credential::IdToken(it) => id_token = Some(it),
        }
    }
    let access_token = access_token.ok_or_else(|| FlowError::MalformedResponse {
        message: "response produced no access token record".to_string(),
    })?;

    Ok(TokenAcquisition {
        account: account.clone(),
        access_token,
        refresh_token,
        id_token,
    })
}

/// Perform the token-endpoint exchange and translate failures.
///
/// Transport faults become [`FlowError::Network`]; a well-formed error
/// body becomes [`FlowError::Server`]; anything else non-2xx is treated
/// as a network-level fault so callers keep their retry option.
async fn exchange(
    strategy: &CloudStrategy,
    http: &dyn HttpTransport,
    token_request: &TokenRequest,
) -> Result<TokenResponse, FlowError> {
    strategy.validate_token_request(token_request)?;
    let endpoint = strategy.token_endpoint()?;

    let response = http
        .send(HttpRequest::post_form(endpoint, token_request.form_params()))
        .await
        .map_err(|failure| match failure {
            TransportFailure::Timeout => FlowError::Network {
                message: "token endpoint timed out".to_string(),
            },
            TransportFailure::Connection { message } => FlowError::Network { message },
        })?;

    if response.is_success() {
        return serde_json::from_str(&response.body).map_err(|e| FlowError::MalformedResponse {
            message: format!("token response is not JSON: {}", e),
        });
    }

    match serde_json::from_str::<WireErrorBody>(&response.body) {
        Ok(body) => {
            let server_error = ServerError {
                code: body.error,
                description: body.error_description.unwrap_or_default(),
                correlation_id: body
                    .correlation_id
                    .unwrap_or_else(|| token_request.correlation_id.to_string()),
            };
            warn!(
                code = %server_error.code,
                correlation_id = %server_error.correlation_id,
                transient = server_error.is_transient(),
                "token endpoint returned an error body"
            );
            Err(FlowError::Server(server_error))
        }
        Err(_) => Err(FlowError::Network {
            message: format!("http {} with unreadable error body", response.status),
        }),
    }
}

fn emit_step(telemetry: &dyn TelemetrySink, step: &'static str, client_id: &str) {
    telemetry.emit(TelemetryEvent::new(
        "protocol_step",
        [
            ("step".to_string(), step.to_string()),
            ("client_id".to_string(), client_id.to_string()),
        ],
    ));
}
