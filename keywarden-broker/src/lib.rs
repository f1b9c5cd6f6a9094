//! # Keywarden Broker
//!
//! Broker IPC layer of the Keywarden identity SDK: delegates credential
//! custody to a system-level broker process over one of several
//! transports.
//!
//! This crate provides:
//! - [`BrokerOperationBundle`] / [`BrokerResponseBundle`] - operation
//!   envelopes
//! - [`IpcStrategy`] - the known transports behind one contract
//! - [`IpcCoordinator`] - ordered fallback with a first-success policy
//! - [`CallValidator`] - per-operation caller allow-list, checked
//!   before any transport is touched
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use keywarden_broker::{
//!     BrokerOperation, BrokerOperationBundle, CallerIdentity, IpcCoordinator,
//!     config::load_config,
//! };
//!
//! async fn get_accounts() -> Result<(), keywarden_broker::IpcError> {
//!     let config = load_config().expect("config");
//!     let coordinator = IpcCoordinator::new(config.strategies(), config.validator()?);
//!
//!     let caller = CallerIdentity::new("com.example.mail");
//!     coordinator.hello(caller.clone()).await?;
//!
//!     let bundle = BrokerOperationBundle::new(
//!         BrokerOperation::GetAccounts,
//!         caller,
//!         serde_json::json!({}),
//!     );
//!     let response = coordinator.execute(&bundle).await?;
//!     println!("accounts: {}", response.payload);
//!     Ok(())
//! }
//! ```

pub mod bundle;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod strategy;
pub mod validator;

// Re-export commonly used types at crate root
pub use bundle::{
    BrokerOperation,
    BrokerOperationBundle,
    BrokerResponseBundle,
    CallerIdentity,
    PROTOCOL_VERSION,
};

pub use config::{load_config, load_config_from, BrokerConfig, ConfigError};

pub use coordinator::IpcCoordinator;

pub use error::IpcError;

pub use strategy::{
    BrokerHandler,
    InProcessStrategy,
    IpcStrategy,
    IpcStrategyKind,
    TcpLoopbackStrategy,
    UnixSocketStrategy,
};

pub use validator::CallValidator;
