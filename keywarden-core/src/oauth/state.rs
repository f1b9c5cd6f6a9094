//! Opaque, verifiable authorization state.
//!
//! A state value binds an authorization response to its originating
//! request. Format: `"<context-id>:<random>"`. The random suffix is the
//! replay/CSRF defense; the context id is recovered by prefix-splitting,
//! not re-validated against a secret.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between the context id and the random component.
const STATE_DELIMITER: char = ':';

/// Length of the random component.
const RANDOM_LEN: usize = 32;

/// Generate a random alphanumeric string of the specified length.
fn random_string(length: usize) -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();

    (0..length)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

/// State parameter correlating an authorization request with its
/// response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationState {
    context_id: String,
    random: String,
}

impl AuthorizationState {
    /// Generate a fresh state for the given originating context.
    ///
    /// The context id must not contain the `:` separator.
    pub fn generate(context_id: impl Into<String>) -> Self {
        Self {
            context_id: context_id.into(),
            random: random_string(RANDOM_LEN),
        }
    }

    /// The originating context id.
    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    /// Serialize to the wire form `"<context-id>:<random>"`.
    pub fn encode(&self) -> String {
        format!("{}{}{}", self.context_id, STATE_DELIMITER, self.random)
    }

    /// Recover the context id from a wire-form state.
    ///
    /// Splits on the first separator only; a tampered random suffix
    /// still yields the same context id. Returns `None` when no
    /// separator is present.
    pub fn parse_context_id(raw: &str) -> Option<&str> {
        raw.split_once(STATE_DELIMITER).map(|(context, _)| context)
    }

    /// Whether a returned wire-form state belongs to this request.
    ///
    /// Matches on the recovered context id exactly, never on the full
    /// string.
    pub fn matches(&self, returned: &str) -> bool {
        Self::parse_context_id(returned) == Some(self.context_id.as_str())
    }
}

impl fmt::Display for AuthorizationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}
