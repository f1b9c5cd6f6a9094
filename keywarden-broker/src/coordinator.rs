//! Ordered transport fallback.
//!
//! The coordinator holds a preference-ordered list of transports
//! (fastest/most-capable first). On each call it validates the caller
//! first, skips transports whose probe says unavailable, and attempts
//! the rest strictly in order. The first successful response wins; no
//! aggregation, no racing in parallel. Only connection-level failures
//! fall through - an operation a transport does not support, a broker
//! business error, or an unauthorized caller surfaces immediately.

use std::sync::Arc;
use tracing::{debug, warn};

use keywarden_core::telemetry::{NoopTelemetry, TelemetryEvent, TelemetrySink};

use crate::bundle::{
    BrokerOperation, BrokerOperationBundle, BrokerResponseBundle, CallerIdentity,
    PROTOCOL_VERSION,
};
use crate::error::IpcError;
use crate::strategy::IpcStrategy;
use crate::validator::CallValidator;

/// Coordinates one logical broker call across the transport list.
pub struct IpcCoordinator {
    strategies: Vec<IpcStrategy>,
    validator: CallValidator,
    telemetry: Arc<dyn TelemetrySink>,
}

impl IpcCoordinator {
    /// Create a coordinator over a preference-ordered transport list.
    pub fn new(strategies: Vec<IpcStrategy>, validator: CallValidator) -> Self {
        Self {
            strategies,
            validator,
            telemetry: Arc::new(NoopTelemetry),
        }
    }

    /// Report fallback events to a telemetry sink.
    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// The transports, in preference order.
    pub fn strategies(&self) -> &[IpcStrategy] {
        &self.strategies
    }

    /// Execute one operation, falling back across transports.
    pub async fn execute(
        &self,
        bundle: &BrokerOperationBundle,
    ) -> Result<BrokerResponseBundle, IpcError> {
        // Security check precedes IPC cost.
        self.validator.validate(&bundle.caller, bundle.operation)?;

        let mut attempts = 0usize;
        let mut last_error: Option<IpcError> = None;

        for strategy in &self.strategies {
            if !strategy.is_available() {
                debug!(transport = %strategy.kind(), "skipping unavailable transport");
                continue;
            }

            attempts += 1;
            match strategy.execute(bundle).await {
                Ok(response) => {
                    debug!(
                        transport = %strategy.kind(),
                        operation = %bundle.operation,
                        "broker operation succeeded"
                    );
                    return Ok(response);
                }
                Err(error) if error.is_fallback_eligible() => {
                    warn!(
                        transport = %strategy.kind(),
                        operation = %bundle.operation,
                        %error,
                        "transport failed, falling back"
                    );
                    self.telemetry.emit(TelemetryEvent::new(
                        "ipc_fallback",
                        [
                            (
                                "transport".to_string(),
                                strategy.kind().as_str().to_string(),
                            ),
                            (
                                "operation".to_string(),
                                bundle.operation.as_str().to_string(),
                            ),
                        ],
                    ));
                    last_error = Some(error);
                }
                Err(error) => return Err(error),
            }
        }

        Err(IpcError::Exhausted {
            attempts,
            last: Box::new(last_error.unwrap_or_else(|| IpcError::ConnectionFailed {
                transport: "none".to_string(),
                message: "no broker transport is available".to_string(),
            })),
        })
    }

    /// Negotiate the protocol with the broker.
    ///
    /// Must run before capability-dependent operations; the response
    /// payload carries the broker's negotiated version.
    pub async fn hello(&self, caller: CallerIdentity) -> Result<BrokerResponseBundle, IpcError> {
        let bundle = BrokerOperationBundle::new(
            BrokerOperation::Hello,
            caller,
            serde_json::json!({ "minimum_version": PROTOCOL_VERSION }),
        );
        self.execute(&bundle).await
    }
}
