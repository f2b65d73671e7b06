//! Metrics definitions for the signaling service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `signal_` prefix
//! - `_total` suffix for counters
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `kind`: 3 values (immediate, retry, replay)
//! - `reason`: 2 values (expired, attempts_exhausted)
//! - `outcome`: 2 values (allowed, denied)
//!
//! Room and peer ids are deliberately never used as labels.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Initialize the Prometheus metrics recorder and return the handle for
/// serving metrics via HTTP.
///
/// Must be called once, before any metrics are recorded.
///
/// # Errors
///
/// Returns an error if the recorder fails to install (e.g., already
/// installed in this process).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

/// A peer attached (fresh join or resume).
pub fn record_peer_attached(resumed: bool) {
    let kind = if resumed { "resume" } else { "fresh" };
    counter!("signal_peer_attach_total", "kind" => kind).increment(1);
    gauge!("signal_connected_peers").increment(1.0);
}

/// A connected peer's socket departed.
pub fn record_peer_detached() {
    counter!("signal_peer_detach_total").increment(1);
    gauge!("signal_connected_peers").decrement(1.0);
}

/// A detached peer's resume window elapsed and it was removed.
pub fn record_peer_collected() {
    counter!("signal_peer_collected_total").increment(1);
}

/// A delivery was persisted and admitted.
pub fn record_delivery_admitted() {
    counter!("signal_delivery_admitted_total").increment(1);
}

/// A delivery frame was written toward its recipient.
pub fn record_delivery_attempt(kind: &'static str) {
    counter!("signal_delivery_attempts_total", "kind" => kind).increment(1);
}

/// A recipient confirmed a delivery.
pub fn record_delivery_confirmed() {
    counter!("signal_delivery_confirmed_total").increment(1);
}

/// A delivery was dropped without confirmation.
pub fn record_delivery_dropped(reason: &'static str) {
    counter!("signal_delivery_dropped_total", "reason" => reason).increment(1);
}

/// A TURN credential pair was minted.
pub fn record_turn_credentials_issued() {
    counter!("signal_turn_credentials_issued_total").increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_a_noop() {
        // The metrics facade drops events when no recorder is installed;
        // these must never panic in that state.
        record_peer_attached(false);
        record_peer_attached(true);
        record_peer_detached();
        record_peer_collected();
        record_delivery_admitted();
        record_delivery_attempt("immediate");
        record_delivery_confirmed();
        record_delivery_dropped("expired");
        record_turn_credentials_issued();
    }
}
