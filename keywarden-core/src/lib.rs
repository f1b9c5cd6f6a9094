//! # Keywarden Core
//!
//! Client-side engine of the Keywarden identity SDK.
//!
//! This crate provides:
//! - A multi-account token cache with deterministic keys, transactional
//!   writes, and legacy-format migration
//! - The OAuth2/OIDC acquisition state machine, parameterized by a
//!   per-cloud capability set
//! - Collaborator traits for persistence, HTTP, interactive dispatch,
//!   and telemetry
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use keywarden_core::{
//!     cache::{CredentialQuery, TokenCache},
//!     http::ReqwestTransport,
//!     oauth::{acquire_token_silent, cloud::CloudStrategy, request::Authority},
//!     store::MemoryStore,
//!     telemetry::NoopTelemetry,
//! };
//!
//! async fn get_token(cache: &TokenCache<MemoryStore>) -> Result<(), keywarden_core::FlowError> {
//!     let strategy = CloudStrategy::aad(Authority::new("login.example.net", "common"));
//!     let query = CredentialQuery::new("uid.utid", "login.example.net", "client-a", "common")
//!         .with_target(vec!["mail.read".to_string()]);
//!     let acquisition = acquire_token_silent(
//!         &strategy, &query, &ReqwestTransport::new(), cache, &NoopTelemetry,
//!     ).await?;
//!     let _token = acquisition.access_token.secret.expose();
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod error;
pub mod http;
pub mod model;
pub mod oauth;
pub mod store;
pub mod telemetry;

// Re-export commonly used types at crate root
pub use model::{
    target_satisfies,
    AccessTokenRecord,
    AccountRecord,
    AuthScheme,
    AuthorityType,
    Credential,
    CredentialKind,
    IdTokenRecord,
    RefreshTokenRecord,
};

pub use store::{
    KeyValueStore,
    MemoryStore,
    Secret,
    StoreError,
};

pub use cache::{
    is_expired,
    should_refresh,
    CacheLookup,
    CredentialQuery,
    TokenCache,
};

pub use cache::migration::{
    migrate,
    migrate_into_cache,
    MigrationReport,
    MigrationState,
};

pub use error::{
    CacheError,
    FlowError,
    KeywardenError,
    ServerError,
};

pub use oauth::{
    acquire_token_silent,
    run_authorization_flow,
    AuthorizationDispatcher,
    AuthorizationOutcome,
    TokenAcquisition,
};

pub use oauth::cloud::{Cloud, CloudStrategy};
pub use oauth::request::{Authority, AuthorizationRequest, AuthorizationResponse};
pub use oauth::state::AuthorizationState;

pub use http::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, TransportFailure};

pub use telemetry::{NoopTelemetry, TelemetryEvent, TelemetrySink};
