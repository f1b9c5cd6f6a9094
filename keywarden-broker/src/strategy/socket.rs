//! Unix domain socket transport.

use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use super::{exchange_over, IpcStrategyKind};
use crate::bundle::{BrokerOperationBundle, BrokerResponseBundle};
use crate::error::IpcError;

#[cfg(unix)]
use tokio::net::UnixStream;

/// Default per-attempt timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Transport over a Unix domain socket owned by the broker process.
///
/// The preferred transport where available: lowest latency and the
/// socket's filesystem permissions already gate access to it.
#[derive(Debug)]
pub struct UnixSocketStrategy {
    socket_path: PathBuf,
    timeout: Duration,
}

impl UnixSocketStrategy {
    /// Create a strategy targeting the given socket path.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The socket path this strategy targets.
    pub fn socket_path(&self) -> &PathBuf {
        &self.socket_path
    }

    /// Probe: the socket file exists.
    ///
    /// Existence does not prove the broker is listening; a stale socket
    /// surfaces as a connection failure at execute time, which the
    /// coordinator treats as fallback-eligible.
    pub fn is_available(&self) -> bool {
        cfg!(unix) && self.socket_path.exists()
    }

    /// Perform one operation over the socket.
    #[cfg(unix)]
    pub async fn execute(
        &self,
        bundle: &BrokerOperationBundle,
    ) -> Result<BrokerResponseBundle, IpcError> {
        debug!(path = %self.socket_path.display(), operation = %bundle.operation, "connecting to broker socket");

        let stream = tokio::time::timeout(self.timeout, UnixStream::connect(&self.socket_path))
            .await
            .map_err(|_| IpcError::ConnectionFailed {
                transport: IpcStrategyKind::UnixSocket.as_str().to_string(),
                message: "connect timed out".to_string(),
            })?
            .map_err(|e| IpcError::ConnectionFailed {
                transport: IpcStrategyKind::UnixSocket.as_str().to_string(),
                message: format!(
                    "failed to connect to {}: {}",
                    self.socket_path.display(),
                    e
                ),
            })?;

        exchange_over(stream, bundle, self.timeout, IpcStrategyKind::UnixSocket).await
    }

    /// Stub for platforms without Unix sockets.
    #[cfg(not(unix))]
    pub async fn execute(
        &self,
        _bundle: &BrokerOperationBundle,
    ) -> Result<BrokerResponseBundle, IpcError> {
        Err(IpcError::ConnectionFailed {
            transport: IpcStrategyKind::UnixSocket.as_str().to_string(),
            message: "unix sockets are not supported on this platform".to_string(),
        })
    }
}
