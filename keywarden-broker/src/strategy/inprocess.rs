//! In-process broker transport.

use async_trait::async_trait;
use std::sync::Arc;

use crate::bundle::{BrokerOperationBundle, BrokerResponseBundle};
use crate::error::IpcError;

/// A broker hosted inside the calling process.
///
/// Real deployments use this when the host application is itself the
/// credential custodian; tests use it to script transport behavior.
#[async_trait]
pub trait BrokerHandler: Send + Sync {
    /// Handle one operation.
    async fn handle(
        &self,
        bundle: &BrokerOperationBundle,
    ) -> Result<BrokerResponseBundle, IpcError>;
}

/// Transport that dispatches straight into a [`BrokerHandler`].
pub struct InProcessStrategy {
    handler: Arc<dyn BrokerHandler>,
    available: bool,
}

impl InProcessStrategy {
    /// Create an always-available in-process transport.
    pub fn new(handler: Arc<dyn BrokerHandler>) -> Self {
        Self {
            handler,
            available: true,
        }
    }

    /// Override the availability probe result.
    pub fn with_availability(mut self, available: bool) -> Self {
        self.available = available;
        self
    }

    /// Probe result.
    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Dispatch one operation into the handler.
    pub async fn execute(
        &self,
        bundle: &BrokerOperationBundle,
    ) -> Result<BrokerResponseBundle, IpcError> {
        self.handler.handle(bundle).await
    }
}

impl std::fmt::Debug for InProcessStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcessStrategy")
            .field("available", &self.available)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{BrokerOperation, CallerIdentity};

    struct EchoHandler;

    #[async_trait]
    impl BrokerHandler for EchoHandler {
        async fn handle(
            &self,
            bundle: &BrokerOperationBundle,
        ) -> Result<BrokerResponseBundle, IpcError> {
            Ok(BrokerResponseBundle {
                operation: bundle.operation,
                payload: bundle.payload.clone(),
            })
        }
    }

    #[tokio::test]
    async fn dispatches_into_the_handler() {
        let strategy = InProcessStrategy::new(Arc::new(EchoHandler));
        assert!(strategy.is_available());

        let bundle = BrokerOperationBundle::new(
            BrokerOperation::GetAccounts,
            CallerIdentity::new("com.example.mail"),
            serde_json::json!({"filter": "all"}),
        );
        let response = strategy.execute(&bundle).await.unwrap();
        assert_eq!(response.payload["filter"], "all");
    }

    #[test]
    fn availability_override() {
        let strategy = InProcessStrategy::new(Arc::new(EchoHandler)).with_availability(false);
        assert!(!strategy.is_available());
    }
}
