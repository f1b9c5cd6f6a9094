//! Telemetry collaborator seam.
//!
//! The core emits structured events at defined checkpoints (cache
//! hit/miss, protocol steps, IPC fallback) but never blocks on the sink
//! and treats its failures as ignorable - [`TelemetrySink::emit`] is
//! synchronous and infallible from the caller's point of view.

use std::collections::HashMap;

/// A structured telemetry event: a name plus string attributes.
///
/// Attribute values must never contain secret material; secrets stay
/// inside [`crate::store::Secret`] and are redacted everywhere else.
#[derive(Debug, Clone)]
pub struct TelemetryEvent {
    /// Event name, e.g. `cache_hit` or `ipc_fallback`.
    pub name: &'static str,

    /// Event attributes.
    pub attributes: HashMap<String, String>,
}

impl TelemetryEvent {
    /// Create an event from a name and attribute pairs.
    pub fn new(
        name: &'static str,
        attributes: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        Self {
            name,
            attributes: attributes.into_iter().collect(),
        }
    }
}

/// Receiver for telemetry events.
///
/// Implementations must not block; queue-and-forward if delivery is
/// slow. A failing sink must swallow its own errors.
pub trait TelemetrySink: Send + Sync {
    /// Record one event.
    fn emit(&self, event: TelemetryEvent);
}

/// Sink that discards every event.
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn emit(&self, _event: TelemetryEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Collecting sink for assertions in tests.
    pub struct CollectingSink(pub Mutex<Vec<TelemetryEvent>>);

    impl TelemetrySink for CollectingSink {
        fn emit(&self, event: TelemetryEvent) {
            self.0.lock().push(event);
        }
    }

    #[test]
    fn event_collects_attributes() {
        let sink = CollectingSink(Mutex::new(Vec::new()));
        sink.emit(TelemetryEvent::new(
            "cache_hit",
            [("client_id".to_string(), "client-a".to_string())],
        ));
        let events = sink.0.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "cache_hit");
        assert_eq!(events[0].attributes["client_id"], "client-a");
    }
}
