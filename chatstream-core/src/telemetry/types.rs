use serde::{Deserialize, Serialize};

use crate::session::{StreamSession, StreamStatus};

/// A frame payload that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MalformedFrame {
    pub turn_id: String,
    /// Payload as received, after the `data: ` prefix.
    pub raw: String,
    /// Decoder error message.
    pub reason: String,
    /// Malformed frames seen so far in this session, including this one.
    pub count: u32,
}

/// Structured summary of one finished session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionLog {
    pub turn_id: Option<String>,
    pub model: Option<String>,
    pub status: Option<StreamStatus>,
    pub latency_ms: Option<u64>,
    pub fragments: Option<usize>,
    pub chars: Option<usize>,
    pub malformed: Option<u32>,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
}

impl SessionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed turn id, status, counters and failure from a terminal session.
    pub fn from_session(session: &StreamSession) -> Self {
        let mut log = Self::new()
            .turn_id(session.turn_id())
            .status(session.status())
            .counts(
                session.fragments(),
                session.text().chars().count(),
                session.malformed_count(),
            );
        if let Some(failure) = session.failure() {
            log = log.error(failure.kind(), &failure.to_string());
        }
        log
    }

    pub fn turn_id(mut self, v: &str) -> Self { self.turn_id = Some(v.to_string()); self }
    pub fn model(mut self, v: &str) -> Self { self.model = Some(v.to_string()); self }
    pub fn status(mut self, v: StreamStatus) -> Self { self.status = Some(v); self }
    pub fn latency_ms(mut self, v: u64) -> Self { self.latency_ms = Some(v); self }
    pub fn counts(mut self, fragments: usize, chars: usize, malformed: u32) -> Self {
        self.fragments = Some(fragments);
        self.chars = Some(chars);
        self.malformed = Some(malformed);
        self
    }
    pub fn error(mut self, kind: &str, message: &str) -> Self {
        self.error_kind = Some(kind.to_string());
        self.error_message = Some(message.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionFailure;
    use serde_json::json;

    #[test]
    fn session_log_from_errored_session() {
        let mut s = StreamSession::new("turn-9");
        s.append("A");
        s.append("ü");
        s.fail(SessionFailure::Provider("rate limited".into()));

        let log = SessionLog::from_session(&s).model("gpt-4o").latency_ms(42);
        let as_json = serde_json::to_value(&log).unwrap();
        assert_eq!(as_json["turn_id"], json!("turn-9"));
        assert_eq!(as_json["model"], json!("gpt-4o"));
        assert_eq!(as_json["status"], json!("errored"));
        assert_eq!(as_json["fragments"], json!(2));
        assert_eq!(as_json["chars"], json!(2));
        assert_eq!(as_json["error_kind"], json!("provider"));
        assert_eq!(as_json["error_message"], json!("rate limited"));
    }

    #[test]
    fn completed_session_has_no_error_fields() {
        let mut s = StreamSession::new("turn-1");
        s.complete();
        let log = SessionLog::from_session(&s);
        assert_eq!(log.status, Some(StreamStatus::Completed));
        assert_eq!(log.error_kind, None);
        assert_eq!(log.latency_ms, None);
    }
}
