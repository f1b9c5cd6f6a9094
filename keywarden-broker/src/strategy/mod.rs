//! Broker transports behind one contract.
//!
//! [`IpcStrategy`] is a tagged enum over the known transport kinds; each
//! variant carries its own `execute`/`is_available` implementation and
//! the coordinator matches on the variant rather than dispatching
//! through an open-ended plugin interface.
//!
//! The socket-shaped transports share one wire framing: a single
//! newline-delimited JSON request line carrying the
//! [`BrokerOperationBundle`], answered by a single JSON response line.

mod inprocess;
mod socket;
mod tcp;

pub use inprocess::{BrokerHandler, InProcessStrategy};
pub use socket::UnixSocketStrategy;
pub use tcp::TcpLoopbackStrategy;

use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::trace;

use crate::bundle::{BrokerOperationBundle, BrokerResponseBundle};
use crate::error::IpcError;

/// Wire code a broker uses to reject an operation it does not
/// implement.
const WIRE_CODE_UNSUPPORTED: &str = "operation_not_supported";

/// Transport discriminator, used in logs and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcStrategyKind {
    UnixSocket,
    TcpLoopback,
    InProcess,
}

impl IpcStrategyKind {
    /// Name used in logs and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnixSocket => "unix_socket",
            Self::TcpLoopback => "tcp_loopback",
            Self::InProcess => "in_process",
        }
    }
}

impl fmt::Display for IpcStrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One broker transport.
#[derive(Debug)]
pub enum IpcStrategy {
    /// Unix domain socket to the broker process.
    UnixSocket(UnixSocketStrategy),

    /// Loopback TCP, for environments without socket filesystems.
    TcpLoopback(TcpLoopbackStrategy),

    /// Broker hosted in this process.
    InProcess(InProcessStrategy),
}

impl IpcStrategy {
    /// Which transport this is.
    pub fn kind(&self) -> IpcStrategyKind {
        match self {
            Self::UnixSocket(_) => IpcStrategyKind::UnixSocket,
            Self::TcpLoopback(_) => IpcStrategyKind::TcpLoopback,
            Self::InProcess(_) => IpcStrategyKind::InProcess,
        }
    }

    /// Cheap, side-effect-free availability probe.
    ///
    /// A `true` here is a hint, not a guarantee; `execute` can still
    /// fail with a connection error and the coordinator will move on.
    pub fn is_available(&self) -> bool {
        match self {
            Self::UnixSocket(s) => s.is_available(),
            Self::TcpLoopback(s) => s.is_available(),
            Self::InProcess(s) => s.is_available(),
        }
    }

    /// Perform one operation over this transport.
    pub async fn execute(
        &self,
        bundle: &BrokerOperationBundle,
    ) -> Result<BrokerResponseBundle, IpcError> {
        match self {
            Self::UnixSocket(s) => s.execute(bundle).await,
            Self::TcpLoopback(s) => s.execute(bundle).await,
            Self::InProcess(s) => s.execute(bundle).await,
        }
    }
}

/// Response line from a socket-shaped transport.
#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    result: Option<serde_json::Value>,

    #[serde(default)]
    error: Option<WireError>,
}

/// Error half of a wire response.
#[derive(Debug, Deserialize)]
struct WireError {
    code: String,
    message: String,
}

/// Run one request/response round trip over an established stream.
///
/// The timeout covers the whole round trip; expiry is a
/// [`IpcError::ConnectionFailed`] so the coordinator can fall through.
pub(crate) async fn exchange_over<S>(
    stream: S,
    bundle: &BrokerOperationBundle,
    timeout: Duration,
    kind: IpcStrategyKind,
) -> Result<BrokerResponseBundle, IpcError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let connection_failed = |message: String| IpcError::ConnectionFailed {
        transport: kind.as_str().to_string(),
        message,
    };

    let request_json = serde_json::to_string(bundle)
        .map_err(|e| connection_failed(format!("malformed envelope: {}", e)))?;
    trace!(transport = %kind, operation = %bundle.operation, "sending broker request");

    let round_trip = async {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);

        writer.write_all(request_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        let mut response_line = String::new();
        reader.read_line(&mut response_line).await?;
        Ok::<String, std::io::Error>(response_line)
    };

    let response_line = tokio::time::timeout(timeout, round_trip)
        .await
        .map_err(|_| connection_failed("attempt timed out".to_string()))?
        .map_err(|e| connection_failed(format!("i/o failure: {}", e)))?;

    if response_line.is_empty() {
        return Err(connection_failed("broker closed the connection".to_string()));
    }

    let response: WireResponse = serde_json::from_str(&response_line)
        .map_err(|e| connection_failed(format!("unreadable response: {}", e)))?;

    if let Some(error) = response.error {
        if error.code == WIRE_CODE_UNSUPPORTED {
            return Err(IpcError::OperationNotSupported {
                transport: kind.as_str().to_string(),
                operation: bundle.operation,
            });
        }
        return Err(IpcError::Broker {
            code: error.code,
            message: error.message,
        });
    }

    match response.result {
        Some(payload) => Ok(BrokerResponseBundle {
            operation: bundle.operation,
            payload,
        }),
        None => Err(connection_failed("response carried no result".to_string())),
    }
}
