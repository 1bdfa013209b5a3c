//! Shared fixtures for unit tests.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures_util::StreamExt;
use once_cell::sync::Lazy;

use crate::controller::StreamObserver;
use crate::session::{StreamSession, StreamStatus};
use crate::telemetry::{self, MalformedFrame, SessionLog, TelemetrySink};
use crate::transport::ChunkStream;

#[derive(Default)]
pub struct TestSink {
    malformed: Mutex<Vec<MalformedFrame>>,
    sessions: Mutex<Vec<SessionLog>>,
}

impl TestSink {
    pub fn malformed(&self) -> Vec<MalformedFrame> {
        self.malformed.lock().unwrap().clone()
    }

    pub fn sessions(&self) -> Vec<SessionLog> {
        self.sessions.lock().unwrap().clone()
    }
}

impl TelemetrySink for TestSink {
    fn record_malformed(&self, frame: MalformedFrame) {
        self.malformed.lock().unwrap().push(frame);
    }

    fn record_session(&self, log: SessionLog) {
        self.sessions.lock().unwrap().push(log);
    }
}

/// Process-wide sink. Tests filter by turn id since the global is shared.
pub static TEST_SINK: Lazy<Arc<TestSink>> = Lazy::new(|| Arc::new(TestSink::default()));

pub fn ensure_test_sink() {
    let _ = telemetry::set_telemetry_sink(TEST_SINK.clone());
}

#[derive(Debug, Default)]
pub struct RecordingObserver {
    pub snapshots: Vec<String>,
    pub finished: Vec<StreamStatus>,
}

impl StreamObserver for RecordingObserver {
    fn on_text(&mut self, snapshot: &str) {
        self.snapshots.push(snapshot.to_string());
    }

    fn on_finish(&mut self, session: &StreamSession) {
        self.finished.push(session.status());
    }
}

/// A chunk stream that yields each part as-is and then closes.
pub fn chunks(parts: &[&str]) -> ChunkStream {
    let owned: Vec<_> = parts
        .iter()
        .map(|p| Ok(Bytes::copy_from_slice(p.as_bytes())))
        .collect();
    futures::stream::iter(owned).boxed()
}
