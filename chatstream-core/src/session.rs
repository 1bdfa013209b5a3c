use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Active,
    Completed,
    Errored,
    Cancelled,
}

impl StreamStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Errored => "errored",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Why a session ended in `Errored`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionFailure {
    /// The provider sent an `error` frame.
    #[error("{0}")]
    Provider(String),
    /// Connection failed before or during the body.
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("too many malformed frames ({0})")]
    TooManyMalformed(u32),
}

impl SessionFailure {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Provider(_) => "provider",
            Self::Transport(_) => "transport",
            Self::TooManyMalformed(_) => "malformed",
        }
    }
}

/// State of one streaming exchange, from dispatch to terminal status.
///
/// The text only grows while the session is active; once the status leaves
/// `Active` every mutator is a no-op.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSession {
    turn_id: String,
    text: String,
    status: StreamStatus,
    cancel_requested: bool,
    failure: Option<SessionFailure>,
    fragments: usize,
    malformed: u32,
}

impl StreamSession {
    pub fn new(turn_id: impl Into<String>) -> Self {
        Self {
            turn_id: turn_id.into(),
            text: String::new(),
            status: StreamStatus::Active,
            cancel_requested: false,
            failure: None,
            fragments: 0,
            malformed: 0,
        }
    }

    /// A session whose transport never delivered a byte.
    pub fn failed_before_start(turn_id: impl Into<String>, failure: SessionFailure) -> Self {
        let mut session = Self::new(turn_id);
        session.fail(failure);
        session
    }

    /// A session stopped while its transport was still opening.
    pub fn cancelled_before_start(turn_id: impl Into<String>) -> Self {
        let mut session = Self::new(turn_id);
        session.cancel();
        session
    }

    pub fn turn_id(&self) -> &str {
        &self.turn_id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }

    pub fn status(&self) -> StreamStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == StreamStatus::Active
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested
    }

    pub fn failure(&self) -> Option<&SessionFailure> {
        self.failure.as_ref()
    }

    /// Number of text fragments folded in.
    pub fn fragments(&self) -> usize {
        self.fragments
    }

    pub fn malformed_count(&self) -> u32 {
        self.malformed
    }

    pub(crate) fn append(&mut self, fragment: &str) -> bool {
        if !self.is_active() || fragment.is_empty() {
            return false;
        }
        self.text.push_str(fragment);
        self.fragments += 1;
        true
    }

    pub(crate) fn record_malformed(&mut self) -> u32 {
        if self.is_active() {
            self.malformed += 1;
        }
        self.malformed
    }

    pub(crate) fn complete(&mut self) {
        if self.is_active() {
            self.status = StreamStatus::Completed;
        }
    }

    pub(crate) fn fail(&mut self, failure: SessionFailure) {
        if self.is_active() {
            self.status = StreamStatus::Errored;
            self.failure = Some(failure);
        }
    }

    pub(crate) fn cancel(&mut self) {
        if self.is_active() {
            self.cancel_requested = true;
            self.status = StreamStatus::Cancelled;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_freeze_everything() {
        let mut s = StreamSession::new("t1");
        assert!(s.append("A"));
        s.fail(SessionFailure::Provider("rate limited".into()));
        assert_eq!(s.status(), StreamStatus::Errored);

        assert!(!s.append("B"));
        s.complete();
        s.cancel();
        s.record_malformed();
        assert_eq!(s.text(), "A");
        assert_eq!(s.status(), StreamStatus::Errored);
        assert_eq!(s.malformed_count(), 0);
        assert!(!s.cancel_requested());
        assert_eq!(s.failure(), Some(&SessionFailure::Provider("rate limited".into())));
    }

    #[test]
    fn cancelled_before_start_is_terminal_and_empty() {
        let mut s = StreamSession::cancelled_before_start("t0");
        assert_eq!(s.status(), StreamStatus::Cancelled);
        assert!(s.cancel_requested());
        assert!(!s.append("late"));
        assert_eq!(s.text(), "");
        assert_eq!(s.failure(), None);
    }

    #[test]
    fn cancel_keeps_partial_text() {
        let mut s = StreamSession::new("t2");
        s.append("Hel");
        s.append("lo");
        s.cancel();
        assert_eq!(s.status(), StreamStatus::Cancelled);
        assert!(s.cancel_requested());
        assert_eq!(s.text(), "Hello");
        assert_eq!(s.fragments(), 2);
        assert_eq!(s.failure(), None);
    }

    #[test]
    fn empty_fragment_is_not_counted() {
        let mut s = StreamSession::new("t3");
        assert!(!s.append(""));
        assert_eq!(s.fragments(), 0);
    }

    #[test]
    fn failed_before_start_has_empty_text() {
        let s = StreamSession::failed_before_start("t4", SessionFailure::Transport("down".into()));
        assert_eq!(s.status(), StreamStatus::Errored);
        assert_eq!(s.text(), "");
        assert_eq!(s.failure().map(|f| f.kind()), Some("transport"));
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&StreamStatus::Cancelled).unwrap(), "\"cancelled\"");
        assert!(StreamStatus::Completed.is_terminal());
        assert!(!StreamStatus::Active.is_terminal());
    }
}
