//! Lifecycle of one request/response exchange.
//!
//! `active → completed` on a terminator frame or clean transport close,
//! `active → errored` on an error frame, transport failure or exceeded
//! malformed tolerance, `active → cancelled` once the cancel token fires.
//! Cancellation is observed between frames, so a frame is never applied
//! half-way and already-applied text is kept.

use std::time::Instant;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::field::Empty;
use tracing_futures::Instrument;

use crate::frame::FrameStream;
use crate::session::StreamSession;
use crate::telemetry::{self, SessionLog, keys};
use crate::token::{Applied, TokenAccumulator};
use crate::transport::ChunkStream;

/// Receives progressive output of one session.
///
/// Calls are synchronous and in frame order: one `on_text` per applied
/// fragment, then exactly one `on_finish`.
pub trait StreamObserver {
    /// Full accumulated text after a fragment was appended.
    fn on_text(&mut self, snapshot: &str);

    fn on_finish(&mut self, _session: &StreamSession) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl StreamObserver for NoopObserver {
    fn on_text(&mut self, _snapshot: &str) {}
}

#[derive(Debug, Clone)]
pub struct StreamController {
    turn_id: String,
    model: String,
    malformed_tolerance: Option<u32>,
}

impl StreamController {
    pub fn new(turn_id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            turn_id: turn_id.into(),
            model: model.into(),
            malformed_tolerance: None,
        }
    }

    pub fn with_malformed_tolerance(mut self, tolerance: Option<u32>) -> Self {
        self.malformed_tolerance = tolerance;
        self
    }

    pub fn turn_id(&self) -> &str {
        &self.turn_id
    }

    /// Drive `chunks` to a terminal session.
    pub async fn run<O>(
        &self,
        chunks: ChunkStream,
        cancel: &CancellationToken,
        observer: &mut O,
    ) -> StreamSession
    where
        O: StreamObserver + ?Sized,
    {
        let span = tracing::info_span!(
            "chat.stream",
            turn.id = %self.turn_id,
            llm.model = %self.model,
            stream.status = Empty,
            stream.fragments = Empty,
            stream.chars = Empty,
            stream.malformed = Empty,
            latency.ms = Empty,
            error.kind = Empty,
            error.message = Empty,
        );
        let started = Instant::now();
        let session = self
            .drive(chunks, cancel, observer)
            .instrument(span.clone())
            .await;
        self.finish(&span, started, &session, observer);
        session
    }

    /// Report a session that never got a stream: the transport refused to
    /// open, or a stop arrived first.
    pub fn abandon<O>(&self, session: StreamSession, observer: &mut O) -> StreamSession
    where
        O: StreamObserver + ?Sized,
    {
        let span = tracing::info_span!(
            "chat.stream",
            turn.id = %self.turn_id,
            llm.model = %self.model,
            stream.status = Empty,
            stream.fragments = Empty,
            stream.chars = Empty,
            stream.malformed = Empty,
            latency.ms = Empty,
            error.kind = Empty,
            error.message = Empty,
        );
        self.finish(&span, Instant::now(), &session, observer);
        session
    }

    async fn drive<O>(
        &self,
        chunks: ChunkStream,
        cancel: &CancellationToken,
        observer: &mut O,
    ) -> StreamSession
    where
        O: StreamObserver + ?Sized,
    {
        let mut frames = FrameStream::new(chunks);
        let mut acc = TokenAccumulator::new(self.turn_id.clone(), self.malformed_tolerance);

        while acc.is_active() {
            // Cancel is checked before every frame, including frames already
            // buffered from a chunk.
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(applied = acc.session().fragments(), "stop requested");
                    acc.cancel();
                    break;
                }
                next = frames.next() => next,
            };

            match next {
                Some(Ok(frame)) => match acc.accept(&frame) {
                    Applied::Text => observer.on_text(acc.session().text()),
                    Applied::Terminal(status) => {
                        tracing::debug!(status = status.as_str(), "stream reached terminal frame");
                    }
                    Applied::Skipped | Applied::Malformed => {}
                },
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "transport failed mid-stream");
                    acc.fail_transport(e.to_string());
                }
                None => acc.close(),
            }
        }
        // `frames` drops here, releasing the transport.
        acc.into_session()
    }

    fn finish<O>(
        &self,
        span: &tracing::Span,
        started: Instant,
        session: &StreamSession,
        observer: &mut O,
    ) where
        O: StreamObserver + ?Sized,
    {
        let latency_ms = started.elapsed().as_millis() as u64;
        let chars = session.text().chars().count();
        span.record(keys::KEY_STATUS, session.status().as_str());
        span.record(keys::KEY_FRAGMENTS, session.fragments() as u64);
        span.record(keys::KEY_CHARS, chars as u64);
        span.record(keys::KEY_MALFORMED, session.malformed_count() as u64);
        span.record(keys::KEY_LATENCY_MS, latency_ms);
        if let Some(failure) = session.failure() {
            span.record(keys::KEY_ERROR_KIND, failure.kind());
            span.record(keys::KEY_ERROR_MESSAGE, failure.to_string().as_str());
        }

        telemetry::emit_session(
            SessionLog::from_session(session)
                .model(&self.model)
                .latency_ms(latency_ms),
        );
        observer.on_finish(session);
    }
}
