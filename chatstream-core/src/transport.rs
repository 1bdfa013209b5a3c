use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use secrecy::{ExposeSecret, SecretString};

use crate::config::Config;
use crate::error::{ChatStreamError, CoreResult};
use crate::frame::{encode_done, encode_text};
use crate::http_client::HttpClient;
use crate::model::ChatRequest;

/// Raw body chunks as they come off the wire. Not aligned to frame boundaries.
pub type ChunkStream = futures::stream::BoxStream<'static, CoreResult<Bytes>>;

/// Source of SSE bytes for one exchange.
///
/// Dropping the returned stream asks the transport to stop delivering.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    fn name(&self) -> &str;
    async fn open(&self, req: &ChatRequest) -> CoreResult<ChunkStream>;
}

/// POSTs the request to an SSE endpoint.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: HttpClient,
    url: String,
    api_key: Option<SecretString>,
}

impl HttpTransport {
    pub fn new(http: HttpClient, url: String, api_key: Option<SecretString>) -> Self {
        Self { http, url, api_key }
    }

    /// Build from config, reading the bearer key from `endpoint.api_key_env` if set.
    pub fn from_config(cfg: &Config) -> CoreResult<Self> {
        let http = HttpClient::from_cfg(&cfg.http)?;
        let api_key = match &cfg.endpoint.api_key_env {
            Some(var) => {
                let key = std::env::var(var).map_err(|_| {
                    ChatStreamError::Validation(format!("environment variable '{var}' is not set"))
                })?;
                Some(SecretString::from(key))
            }
            None => None,
        };
        Ok(Self::new(http, cfg.endpoint.url.clone(), api_key))
    }

    fn headers(&self) -> Vec<(String, String)> {
        let mut h = vec![("Content-Type".to_string(), "application/json".to_string())];
        if let Some(key) = &self.api_key {
            h.push((
                "Authorization".to_string(),
                format!("Bearer {}", key.expose_secret()),
            ));
        }
        h
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn open(&self, req: &ChatRequest) -> CoreResult<ChunkStream> {
        let owned_headers = self.headers();
        let hdrs: Vec<(&str, &str)> = owned_headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        self.http.post_sse(&self.url, req, &hdrs).await
    }
}

/// One step of a scripted body.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Chunk(Bytes),
    Delay(Duration),
    /// Fail mid-body with `StreamInterrupted`.
    Fail(String),
}

/// In-process transport that replays the same script on every open.
/// Used for replaying captured bodies and in tests.
#[derive(Debug)]
pub struct ScriptedTransport {
    steps: Vec<ScriptStep>,
    hold_open: bool,
    refuse: bool,
    opens: AtomicUsize,
    last_request: Mutex<Option<ChatRequest>>,
}

impl ScriptedTransport {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps,
            hold_open: false,
            refuse: false,
            opens: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// One chunk per token, then the terminator.
    pub fn from_tokens(tokens: &[&str]) -> Self {
        let mut steps: Vec<ScriptStep> = tokens
            .iter()
            .map(|t| ScriptStep::Chunk(Bytes::from(encode_text(t))))
            .collect();
        steps.push(ScriptStep::Chunk(Bytes::from(encode_done())));
        Self::new(steps)
    }

    /// Split a captured body into fixed-size chunks, ignoring frame and
    /// character boundaries.
    pub fn from_body(body: impl Into<Bytes>, chunk_size: usize) -> Self {
        let body = body.into();
        let size = chunk_size.max(1);
        let steps = (0..body.len())
            .step_by(size)
            .map(|start| ScriptStep::Chunk(body.slice(start..(start + size).min(body.len()))))
            .collect();
        Self::new(steps)
    }

    /// Keep the stream pending after the last step instead of closing it.
    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    /// Fail every open with `Unavailable`.
    pub fn refuse(mut self) -> Self {
        self.refuse = true;
        self
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<ChatRequest> {
        self.last_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ChatTransport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn open(&self, req: &ChatRequest) -> CoreResult<ChunkStream> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        *self
            .last_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(req.clone());
        if self.refuse {
            return Err(ChatStreamError::Unavailable {
                endpoint: "scripted".into(),
            });
        }

        let steps: VecDeque<ScriptStep> = self.steps.iter().cloned().collect();
        let script = futures::stream::unfold(steps, |mut steps| async move {
            loop {
                match steps.pop_front()? {
                    ScriptStep::Chunk(bytes) => return Some((Ok(bytes), steps)),
                    ScriptStep::Delay(d) => tokio::time::sleep(d).await,
                    ScriptStep::Fail(msg) => {
                        return Some((Err(ChatStreamError::StreamInterrupted(msg)), steps));
                    }
                }
            }
        });
        if self.hold_open {
            Ok(script.chain(futures::stream::pending()).boxed())
        } else {
            Ok(script.boxed())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ChatMessage;

    fn req() -> ChatRequest {
        ChatRequest {
            model: "gpt-4o".into(),
            messages: vec![ChatMessage::user("hi")],
            temperature: Some(0.9),
        }
    }

    #[tokio::test]
    async fn from_body_preserves_bytes() {
        let body = "data: {\"text\":\"🎯\"}\n\n";
        let t = ScriptedTransport::from_body(body, 3);
        let chunks: Vec<Bytes> = t
            .open(&req())
            .await
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert!(chunks.iter().all(|c| c.len() <= 3));
        assert_eq!(chunks.concat(), body.as_bytes());
        assert_eq!(t.opens(), 1);
        assert_eq!(t.last_request(), Some(req()));
    }

    #[tokio::test]
    async fn fail_step_interrupts() {
        let t = ScriptedTransport::new(vec![
            ScriptStep::Chunk(Bytes::from(encode_text("a"))),
            ScriptStep::Fail("reset".into()),
        ]);
        let items: Vec<_> = t.open(&req()).await.unwrap().collect().await;
        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], Err(ChatStreamError::StreamInterrupted(_))));
    }

    #[tokio::test]
    async fn refuse_fails_open() {
        let t = ScriptedTransport::from_tokens(&["a"]).refuse();
        assert!(matches!(
            t.open(&req()).await,
            Err(ChatStreamError::Unavailable { .. })
        ));
    }

    #[tokio::test]
    async fn http_transport_from_config_requires_key_env() {
        let mut cfg = Config::for_url("http://127.0.0.1:9/api/chat");
        cfg.endpoint.api_key_env = Some("CHATSTREAM_TEST_KEY_THAT_IS_NOT_SET".into());
        let err = HttpTransport::from_config(&cfg).unwrap_err();
        assert!(matches!(err, ChatStreamError::Validation(msg) if msg.contains("not set")));
    }
}
