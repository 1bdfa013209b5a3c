//! Frame payload decoding and the fold into a `StreamSession`.

use serde::Deserialize;

use crate::frame::Frame;
use crate::session::{SessionFailure, StreamSession, StreamStatus};
use crate::telemetry::{self, MalformedFrame};

/// Decoded form of a non-terminator frame payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenEvent {
    Text(String),
    Error(String),
    /// Payload was not the expected JSON record. Carries the raw payload.
    Malformed { raw: String, reason: String },
}

#[derive(Deserialize)]
struct WirePayload {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl TokenEvent {
    /// An `error` field wins over `text` if a producer ever sends both.
    pub fn decode(payload: &str) -> Self {
        match serde_json::from_str::<WirePayload>(payload) {
            Ok(WirePayload {
                error: Some(message),
                ..
            }) => Self::Error(message),
            Ok(WirePayload { text, .. }) => Self::Text(text.unwrap_or_default()),
            Err(e) => Self::Malformed {
                raw: payload.to_string(),
                reason: e.to_string(),
            },
        }
    }
}

/// What applying one frame did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// A non-empty fragment was appended.
    Text,
    /// Nothing changed: empty text, or the session was already terminal.
    Skipped,
    /// Payload was malformed and skipped; the session continues.
    Malformed,
    /// The session reached this terminal status.
    Terminal(StreamStatus),
}

/// Folds frames, in arrival order, into the session it owns.
#[derive(Debug)]
pub struct TokenAccumulator {
    session: StreamSession,
    malformed_tolerance: Option<u32>,
}

impl TokenAccumulator {
    pub fn new(turn_id: impl Into<String>, malformed_tolerance: Option<u32>) -> Self {
        Self {
            session: StreamSession::new(turn_id),
            malformed_tolerance,
        }
    }

    pub fn session(&self) -> &StreamSession {
        &self.session
    }

    pub fn into_session(self) -> StreamSession {
        self.session
    }

    pub fn is_active(&self) -> bool {
        self.session.is_active()
    }

    pub fn accept(&mut self, frame: &Frame) -> Applied {
        if !self.session.is_active() {
            return Applied::Skipped;
        }
        if frame.is_terminator {
            self.session.complete();
            return Applied::Terminal(StreamStatus::Completed);
        }
        match TokenEvent::decode(&frame.payload) {
            TokenEvent::Text(fragment) => {
                if self.session.append(&fragment) {
                    Applied::Text
                } else {
                    Applied::Skipped
                }
            }
            TokenEvent::Error(message) => {
                self.session.fail(SessionFailure::Provider(message));
                Applied::Terminal(StreamStatus::Errored)
            }
            TokenEvent::Malformed { raw, reason } => self.malformed(raw, reason),
        }
    }

    /// Transport ended cleanly without a terminator.
    pub fn close(&mut self) {
        self.session.complete();
    }

    pub fn fail_transport(&mut self, message: impl Into<String>) {
        self.session.fail(SessionFailure::Transport(message.into()));
    }

    pub fn cancel(&mut self) {
        self.session.cancel();
    }

    fn malformed(&mut self, raw: String, reason: String) -> Applied {
        let count = self.session.record_malformed();
        tracing::warn!(
            turn_id = self.session.turn_id(),
            count,
            %reason,
            "skipping malformed frame: {raw}"
        );
        telemetry::emit_malformed(MalformedFrame {
            turn_id: self.session.turn_id().to_string(),
            raw,
            reason,
            count,
        });

        match self.malformed_tolerance {
            Some(limit) if count > limit => {
                self.session.fail(SessionFailure::TooManyMalformed(count));
                Applied::Terminal(StreamStatus::Errored)
            }
            _ => Applied::Malformed,
        }
    }
}
