//! Observability hook for the streaming core.
//! By default, no telemetry is emitted unless a sink is installed via `set_telemetry_sink`.

pub mod keys;
pub mod types;
#[cfg(test)]
pub mod test_span;

pub use keys::*;
pub use types::*;

use std::sync::Arc;

use once_cell::sync::OnceCell;

/// Implement this to receive telemetry events.
///
/// Requirements:
/// - Implementations must be thread-safe (`Send + Sync`) and `'static`.
/// - Calls happen inline on the streaming path, in frame order; keep them cheap.
pub trait TelemetrySink: Send + Sync + 'static {
    /// A frame payload failed to decode. The session keeps going.
    fn record_malformed(&self, frame: MalformedFrame);

    /// A session reached a terminal status. Default no-op.
    fn record_session(&self, _log: SessionLog) {}
}

static TELEMETRY_SINK: OnceCell<Arc<dyn TelemetrySink>> = OnceCell::new();

// In tests, gate emission to only the calling test thread to avoid cross-test interference.
#[cfg(test)]
thread_local! {
    static TEST_CAPTURE: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

/// Install a global telemetry sink. Returns `false` if a sink is already installed.
///
/// This is a write-once global for the process lifetime (backed by `OnceCell`).
pub fn set_telemetry_sink(sink: Arc<dyn TelemetrySink>) -> bool {
    TELEMETRY_SINK.set(sink).is_ok()
}

fn sink() -> Option<&'static Arc<dyn TelemetrySink>> {
    #[cfg(test)]
    {
        if !TEST_CAPTURE.with(|c| c.get()) {
            return None;
        }
    }
    TELEMETRY_SINK.get()
}

#[inline]
pub(crate) fn emit_malformed(frame: MalformedFrame) {
    if let Some(sink) = sink() {
        sink.record_malformed(frame);
    }
}

#[inline]
pub(crate) fn emit_session(log: SessionLog) {
    if let Some(sink) = sink() {
        sink.record_session(log);
    }
}

#[cfg(test)]
/// Test-only helper: enable or disable capture for the current test thread.
pub fn test_set_capture_enabled(enabled: bool) {
    TEST_CAPTURE.with(|c| c.set(enabled));
}
