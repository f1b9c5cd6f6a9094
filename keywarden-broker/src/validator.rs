//! Caller validation.
//!
//! Every broker operation is gated on an allow-list keyed by operation:
//! only named caller packages may invoke it, optionally pinned to a
//! signing key digest. Validation runs before any transport is touched,
//! so an unauthorized caller never costs an IPC round trip.

use std::collections::{HashMap, HashSet};
use tracing::warn;

use crate::bundle::{BrokerOperation, CallerIdentity};
use crate::error::IpcError;

/// Per-operation allow-list of caller packages.
#[derive(Debug, Default, Clone)]
pub struct CallValidator {
    allowed: HashMap<BrokerOperation, HashSet<String>>,
    pinned_digests: HashMap<String, String>,
}

impl CallValidator {
    /// An empty validator denies every caller.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow a package to invoke an operation.
    pub fn allow(&mut self, operation: BrokerOperation, package_id: impl Into<String>) {
        self.allowed
            .entry(operation)
            .or_default()
            .insert(package_id.into());
    }

    /// Pin a package to a signing key digest.
    ///
    /// Once pinned, calls from that package must present the matching
    /// digest.
    pub fn pin_signing_key(&mut self, package_id: impl Into<String>, digest: impl Into<String>) {
        self.pinned_digests.insert(package_id.into(), digest.into());
    }

    /// Check a caller against the allow-list for one operation.
    pub fn validate(
        &self,
        caller: &CallerIdentity,
        operation: BrokerOperation,
    ) -> Result<(), IpcError> {
        let unauthorized = || {
            warn!(
                package_id = %caller.package_id,
                %operation,
                "rejecting unauthorized broker caller"
            );
            IpcError::UnauthorizedCaller {
                package_id: caller.package_id.clone(),
                operation,
            }
        };

        let allowed = self
            .allowed
            .get(&operation)
            .is_some_and(|packages| packages.contains(&caller.package_id));
        if !allowed {
            return Err(unauthorized());
        }

        if let Some(expected) = self.pinned_digests.get(&caller.package_id) {
            let presented = caller.signing_key_digest.as_deref();
            if presented != Some(expected.as_str()) {
                return Err(unauthorized());
            }
        }

        Ok(())
    }
}
