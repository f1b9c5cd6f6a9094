//! IPC failure taxonomy.
//!
//! The coordinator routes on [`IpcError::is_fallback_eligible`]:
//! connection-level failures (broker absent, process death, malformed
//! envelope, per-attempt timeout) move on to the next transport, while
//! unsupported-by-design operations, broker business errors, and
//! authorization failures surface immediately.

use thiserror::Error;

use crate::bundle::BrokerOperation;

/// Error type for broker IPC operations.
#[derive(Debug, Error)]
pub enum IpcError {
    /// The transport could not complete a round trip.
    #[error("ipc connection failed over {transport}: {message}")]
    ConnectionFailed { transport: String, message: String },

    /// The transport reached the broker, but the broker does not
    /// implement this operation. Not the same failure class as
    /// unavailable-right-now; never falls through.
    #[error("operation {operation} not supported over {transport}")]
    OperationNotSupported {
        transport: String,
        operation: BrokerOperation,
    },

    /// The calling application is not on the allow-list for this
    /// operation. Checked before any transport is touched.
    #[error("caller {package_id} is not authorized for {operation}")]
    UnauthorizedCaller {
        package_id: String,
        operation: BrokerOperation,
    },

    /// The broker returned a business error for this operation.
    #[error("broker error {code}: {message}")]
    Broker { code: String, message: String },

    /// Every transport was attempted (or skipped as unavailable); wraps
    /// the last concrete failure.
    #[error("all {attempts} ipc transport attempts failed: {last}")]
    Exhausted { attempts: usize, last: Box<IpcError> },
}

impl IpcError {
    /// Whether the coordinator may try the next transport after this
    /// failure.
    pub fn is_fallback_eligible(&self) -> bool {
        matches!(self, Self::ConnectionFailed { .. })
    }

    /// Whether this failure must surface loudly rather than be retried.
    pub fn is_security_sensitive(&self) -> bool {
        matches!(self, Self::UnauthorizedCaller { .. })
    }
}
