//! Loopback TCP transport.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

use super::{exchange_over, IpcStrategyKind};
use crate::bundle::{BrokerOperationBundle, BrokerResponseBundle};
use crate::error::IpcError;

/// Default per-attempt timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Transport over loopback TCP, for environments without a socket
/// filesystem (containers, platform sandboxes).
///
/// Same framing as the Unix socket transport; only the carrier differs.
#[derive(Debug)]
pub struct TcpLoopbackStrategy {
    port: u16,
    timeout: Duration,
}

impl TcpLoopbackStrategy {
    /// Create a strategy targeting `127.0.0.1:port`.
    pub fn new(port: u16) -> Self {
        Self {
            port,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Probe: a port is configured.
    ///
    /// Probing the port itself would cost a connection attempt; whether
    /// anything is listening is discovered at execute time.
    pub fn is_available(&self) -> bool {
        self.port != 0
    }

    /// Perform one operation over loopback TCP.
    pub async fn execute(
        &self,
        bundle: &BrokerOperationBundle,
    ) -> Result<BrokerResponseBundle, IpcError> {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), self.port);
        debug!(%addr, operation = %bundle.operation, "connecting to broker over loopback tcp");

        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| IpcError::ConnectionFailed {
                transport: IpcStrategyKind::TcpLoopback.as_str().to_string(),
                message: "connect timed out".to_string(),
            })?
            .map_err(|e| IpcError::ConnectionFailed {
                transport: IpcStrategyKind::TcpLoopback.as_str().to_string(),
                message: format!("failed to connect to {}: {}", addr, e),
            })?;

        exchange_over(stream, bundle, self.timeout, IpcStrategyKind::TcpLoopback).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{BrokerOperation, CallerIdentity};

    #[test]
    fn unconfigured_port_is_unavailable() {
        assert!(!TcpLoopbackStrategy::new(0).is_available());
        assert!(TcpLoopbackStrategy::new(48752).is_available());
    }

    #[tokio::test]
    async fn round_trip_against_a_listener() {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut reader = BufReader::new(reader);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            writer
                .write_all(b"{\"result\":{\"accounts\":[]}}\n")
                .await
                .unwrap();
        });

        let strategy = TcpLoopbackStrategy::new(port);
        let bundle = BrokerOperationBundle::new(
            BrokerOperation::GetAccounts,
            CallerIdentity::new("com.example.mail"),
            serde_json::json!({}),
        );
        let response = strategy.execute(&bundle).await.unwrap();
        assert_eq!(response.operation, BrokerOperation::GetAccounts);
    }
}
