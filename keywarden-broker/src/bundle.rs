//! Operation envelopes exchanged with a credential broker.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Version of the broker wire protocol this client speaks.
pub const PROTOCOL_VERSION: u32 = 3;

/// Named broker operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokerOperation {
    /// Protocol negotiation; must precede capability-dependent calls.
    Hello,

    /// Interactive credential acquisition.
    AcquireToken,

    /// Cache/refresh-token acquisition without UI.
    AcquireTokenSilent,

    /// Enumerate accounts the broker holds for this caller.
    GetAccounts,

    /// Remove one account and its credentials.
    RemoveAccount,

    /// Sign out of a shared device (broker-driven wipe).
    SignOut,
}

impl BrokerOperation {
    /// Operation name as it appears on the wire and in allow-lists.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hello => "hello",
            Self::AcquireToken => "acquire_token",
            Self::AcquireTokenSilent => "acquire_token_silent",
            Self::GetAccounts => "get_accounts",
            Self::RemoveAccount => "remove_account",
            Self::SignOut => "sign_out",
        }
    }
}

impl fmt::Display for BrokerOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BrokerOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hello" => Ok(Self::Hello),
            "acquire_token" => Ok(Self::AcquireToken),
            "acquire_token_silent" => Ok(Self::AcquireTokenSilent),
            "get_accounts" => Ok(Self::GetAccounts),
            "remove_account" => Ok(Self::RemoveAccount),
            "sign_out" => Ok(Self::SignOut),
            other => Err(format!("unknown broker operation: {}", other)),
        }
    }
}

/// Identity of the application invoking a broker operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    /// Package/bundle identifier of the calling application.
    pub package_id: String,

    /// Digest of the caller's signing key, when the platform exposes
    /// one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing_key_digest: Option<String>,
}

impl CallerIdentity {
    /// Identity with no signing information.
    pub fn new(package_id: impl Into<String>) -> Self {
        Self {
            package_id: package_id.into(),
            signing_key_digest: None,
        }
    }

    /// Attach a signing key digest.
    pub fn with_signing_key_digest(mut self, digest: impl Into<String>) -> Self {
        self.signing_key_digest = Some(digest.into());
        self
    }
}

/// Request envelope for one broker operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerOperationBundle {
    /// Which operation to perform.
    pub operation: BrokerOperation,

    /// Who is asking.
    pub caller: CallerIdentity,

    /// Wire protocol version the caller speaks.
    pub protocol_version: u32,

    /// Operation-specific payload, opaque to the transports.
    pub payload: serde_json::Value,
}

impl BrokerOperationBundle {
    /// Build a bundle at the current protocol version.
    pub fn new(
        operation: BrokerOperation,
        caller: CallerIdentity,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            operation,
            caller,
            protocol_version: PROTOCOL_VERSION,
            payload,
        }
    }
}

/// Response envelope from a broker operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerResponseBundle {
    /// The operation this responds to.
    pub operation: BrokerOperation,

    /// Operation-specific payload.
    pub payload: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_round_trips_through_its_name() {
        for op in [
            BrokerOperation::Hello,
            BrokerOperation::AcquireToken,
            BrokerOperation::AcquireTokenSilent,
            BrokerOperation::GetAccounts,
            BrokerOperation::RemoveAccount,
            BrokerOperation::SignOut,
        ] {
            assert_eq!(op.as_str().parse::<BrokerOperation>().unwrap(), op);
        }
    }

    #[test]
    fn bundle_serializes_with_snake_case_operation() {
        let bundle = BrokerOperationBundle::new(
            BrokerOperation::AcquireTokenSilent,
            CallerIdentity::new("com.example.mail"),
            serde_json::json!({"client_id": "client-a"}),
        );
        let json = serde_json::to_string(&bundle).unwrap();
        assert!(json.contains("\"operation\":\"acquire_token_silent\""));
        assert!(json.contains("\"protocol_version\":3"));
    }
}
