//! Conversation-level control: send, stop, regenerate and the pending draft.
//!
//! At most one session is in flight per coordinator. All methods take `&self`
//! so a UI can hold the coordinator in an `Arc` and call `request_stop` from
//! another task while `send` is awaiting.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::{Config, StreamCfg};
use crate::controller::{StreamController, StreamObserver};
use crate::error::{ChatStreamError, CoreResult};
use crate::model::{ChatMessage, ChatRequest, Role};
use crate::session::{SessionFailure, StreamSession};
use crate::transport::ChatTransport;

#[derive(Debug, Default)]
struct State {
    history: Vec<ChatMessage>,
    draft: String,
    active: Option<CancellationToken>,
    next_turn: u64,
}

/// Stop affordance state. Armed by a stop request, cleared by the cool-down
/// timer whose generation still matches.
#[derive(Debug, Default)]
struct StopGuard {
    armed: AtomicBool,
    generation: AtomicU64,
}

pub struct ChatCoordinator {
    transport: Arc<dyn ChatTransport>,
    model: String,
    temperature: Option<f32>,
    cfg: StreamCfg,
    state: Mutex<State>,
    stop: Arc<StopGuard>,
}

impl std::fmt::Debug for ChatCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCoordinator")
            .field("transport", &self.transport.name())
            .field("model", &self.model)
            .field("cfg", &self.cfg)
            .finish_non_exhaustive()
    }
}

/// Clears the active slot when the owning `send` finishes or is dropped.
struct ActiveGuard<'a> {
    state: &'a Mutex<State>,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .active = None;
    }
}

struct Dispatch<'a> {
    turn_id: String,
    token: CancellationToken,
    request: ChatRequest,
    guard: ActiveGuard<'a>,
}

impl ChatCoordinator {
    pub fn new(transport: Arc<dyn ChatTransport>, model: impl Into<String>, cfg: StreamCfg) -> Self {
        Self {
            transport,
            model: model.into(),
            temperature: None,
            cfg,
            state: Mutex::new(State::default()),
            stop: Arc::new(StopGuard::default()),
        }
    }

    pub fn from_config(cfg: &Config, transport: Arc<dyn ChatTransport>) -> Self {
        Self::new(transport, cfg.endpoint.model.clone(), cfg.stream.clone())
            .with_temperature(cfg.endpoint.temperature)
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_len(&self, content: &str) -> CoreResult<()> {
        let actual = content.chars().count();
        if actual > self.cfg.max_input_chars {
            return Err(ChatStreamError::InputTooLong {
                max: self.cfg.max_input_chars,
                actual,
            });
        }
        Ok(())
    }

    /// Replace the pending input. Over-length input leaves the draft untouched.
    pub fn set_draft(&self, text: impl Into<String>) -> CoreResult<()> {
        let text = text.into();
        self.check_len(&text)?;
        self.lock().draft = text;
        Ok(())
    }

    /// Dictation hook. Returns `false` when the transcript was blank and ignored.
    pub fn apply_transcript(&self, transcript: &str) -> CoreResult<bool> {
        if transcript.trim().is_empty() {
            return Ok(false);
        }
        self.set_draft(transcript)?;
        Ok(true)
    }

    pub fn draft(&self) -> String {
        self.lock().draft.clone()
    }

    pub fn history(&self) -> Vec<ChatMessage> {
        self.lock().history.clone()
    }

    pub fn is_streaming(&self) -> bool {
        self.lock().active.is_some()
    }

    /// True between a stop request and the end of its cool-down.
    pub fn stop_armed(&self) -> bool {
        self.stop.armed.load(Ordering::SeqCst)
    }

    pub fn can_regenerate(&self) -> bool {
        let st = self.lock();
        st.active.is_none() && st.history.iter().any(|m| m.role == Role::User)
    }

    /// Send a user message and stream the reply to completion.
    ///
    /// Rejections (`Validation`, `InputTooLong`, `Busy`) happen before any
    /// session exists. Transport failures come back as an errored session.
    pub async fn send<O>(&self, content: &str, observer: &mut O) -> CoreResult<StreamSession>
    where
        O: StreamObserver + ?Sized,
    {
        self.check_input(content)?;
        let content = content.to_string();
        let dispatch = self.begin(move |st| {
            st.history.push(ChatMessage::user(content));
            Ok(())
        })?;
        Ok(self.stream(dispatch, observer).await)
    }

    /// Send the pending draft, clearing it once the send is accepted.
    pub async fn send_draft<O>(&self, observer: &mut O) -> CoreResult<StreamSession>
    where
        O: StreamObserver + ?Sized,
    {
        let dispatch = self.begin(|st| {
            self.check_input(&st.draft)?;
            let content = std::mem::take(&mut st.draft);
            st.history.push(ChatMessage::user(content));
            Ok(())
        })?;
        Ok(self.stream(dispatch, observer).await)
    }

    /// Re-issue the last user turn, dropping the reply that followed it.
    pub async fn request_regenerate<O>(&self, observer: &mut O) -> CoreResult<StreamSession>
    where
        O: StreamObserver + ?Sized,
    {
        let dispatch = self.begin(|st| {
            let last_user = st
                .history
                .iter()
                .rposition(|m| m.role == Role::User)
                .ok_or_else(|| ChatStreamError::Validation("nothing to regenerate".into()))?;
            st.history.truncate(last_user + 1);
            Ok(())
        })?;
        Ok(self.stream(dispatch, observer).await)
    }

    /// Cancel the in-flight session and arm the stop affordance.
    ///
    /// Returns `false` (and changes nothing) when there is no active session
    /// or it was already asked to stop.
    pub fn request_stop(&self) -> bool {
        {
            let st = self.lock();
            match &st.active {
                Some(token) if !token.is_cancelled() => token.cancel(),
                _ => return false,
            }
        }

        self.stop.armed.store(true, Ordering::SeqCst);
        let generation = self.stop.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cooldown = Duration::from_millis(self.cfg.stop_cooldown_ms);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let stop = Arc::clone(&self.stop);
                handle.spawn(async move {
                    tokio::time::sleep(cooldown).await;
                    if stop.generation.load(Ordering::SeqCst) == generation {
                        stop.armed.store(false, Ordering::SeqCst);
                    }
                });
            }
            Err(_) => {
                tracing::debug!("no runtime for stop cool-down; disarming immediately");
                self.stop.armed.store(false, Ordering::SeqCst);
            }
        }
        tracing::info!(generation, "stop requested");
        true
    }

    fn check_input(&self, content: &str) -> CoreResult<()> {
        if content.trim().is_empty() {
            return Err(ChatStreamError::Validation("message is empty".into()));
        }
        self.check_len(content)
    }

    /// Claim the active slot and build the request under one lock.
    fn begin<F>(&self, prepare: F) -> CoreResult<Dispatch<'_>>
    where
        F: FnOnce(&mut State) -> CoreResult<()>,
    {
        let mut st = self.lock();
        if st.active.is_some() {
            return Err(ChatStreamError::Busy);
        }
        prepare(&mut st)?;

        st.next_turn += 1;
        let token = CancellationToken::new();
        st.active = Some(token.clone());
        let request = ChatRequest {
            model: self.model.clone(),
            messages: st.history.clone(),
            temperature: self.temperature,
        };
        Ok(Dispatch {
            turn_id: format!("turn-{}", st.next_turn),
            token,
            request,
            guard: ActiveGuard { state: &self.state },
        })
    }

    async fn stream<O>(&self, dispatch: Dispatch<'_>, observer: &mut O) -> StreamSession
    where
        O: StreamObserver + ?Sized,
    {
        let Dispatch {
            turn_id,
            token,
            request,
            guard,
        } = dispatch;
        let ctl = StreamController::new(turn_id.clone(), self.model.clone())
            .with_malformed_tolerance(self.cfg.malformed_tolerance);

        // A stop may land before the transport has answered; dropping the
        // pending open releases the request.
        let opened = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            opened = self.transport.open(&request) => Some(opened),
        };

        let session = match opened {
            None => {
                tracing::debug!(turn_id = %turn_id, "stop requested while opening transport");
                ctl.abandon(StreamSession::cancelled_before_start(turn_id), observer)
            }
            Some(Ok(chunks)) => ctl.run(chunks, &token, observer).await,
            Some(Err(e)) => {
                tracing::warn!(
                    transport = self.transport.name(),
                    turn_id = %turn_id,
                    error = %e,
                    "transport failed to open"
                );
                ctl.abandon(
                    StreamSession::failed_before_start(turn_id, SessionFailure::Transport(e.to_string())),
                    observer,
                )
            }
        };

        if !session.text().is_empty() {
            self.lock()
                .history
                .push(ChatMessage::assistant(session.text()));
        }
        drop(guard);
        session
    }
}
