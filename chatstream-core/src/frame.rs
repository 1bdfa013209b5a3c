//! SSE framing.
//!
//! Wire contract, one frame per logical unit:
//! - `data: <payload>` lines carry frames; blank lines separate them.
//! - Lines without the `data: ` prefix are ignored, never an error.
//! - `data: [DONE]` terminates the stream. Nothing is emitted after it.
//!
//! Chunks are buffered as raw bytes and only decoded as UTF-8 once a full
//! line has been reassembled, so a multi-byte character split across two
//! network chunks is never decoded half-way.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::stream::Stream;

use crate::error::CoreResult;
use crate::transport::ChunkStream;

pub const DATA_PREFIX: &str = "data: ";
pub const DONE_SENTINEL: &str = "[DONE]";

/// One decoded SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw text after the `data: ` prefix.
    pub payload: String,
    pub is_terminator: bool,
}

impl Frame {
    fn from_payload(payload: &str) -> Self {
        Self {
            is_terminator: payload == DONE_SENTINEL,
            payload: payload.to_string(),
        }
    }
}

/// Incremental line reassembler for one stream. Create a fresh decoder per
/// session; a finished decoder ignores all further input.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    /// Leading bytes of `buf` already known to hold no `\n`.
    scanned: usize,
    done: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once a terminator was emitted or the input was finished.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Bytes held back waiting for the end of their line.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Feed one transport chunk and return every frame it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        if self.done || chunk.is_empty() {
            return frames;
        }
        self.buf.extend_from_slice(chunk);

        let mut start = 0;
        let mut from = self.scanned;
        while let Some(off) = self.buf[from..].iter().position(|b| *b == b'\n') {
            let end = from + off;
            let frame = parse_line(&self.buf[start..end]);
            start = end + 1;
            from = start;
            if let Some(frame) = frame {
                let terminator = frame.is_terminator;
                frames.push(frame);
                if terminator {
                    self.done = true;
                    break;
                }
            }
        }

        if self.done {
            self.buf = Vec::new();
            self.scanned = 0;
        } else {
            self.buf.drain(..start);
            self.scanned = self.buf.len();
        }
        frames
    }

    /// Transport closed: the unterminated tail, if any, is a complete line now.
    pub fn finish(&mut self) -> Option<Frame> {
        if self.done {
            return None;
        }
        self.done = true;
        self.scanned = 0;
        let tail = std::mem::take(&mut self.buf);
        parse_line(&tail)
    }
}

fn parse_line(raw: &[u8]) -> Option<Frame> {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    let line = String::from_utf8_lossy(raw);
    line.strip_prefix(DATA_PREFIX).map(Frame::from_payload)
}

/// Lazy frame sequence over a transport chunk stream.
///
/// Ends right after the terminator frame and drops the underlying transport
/// stream at that point, which asks the transport to stop delivering.
pub struct FrameStream {
    inner: Option<ChunkStream>,
    decoder: FrameDecoder,
    ready: VecDeque<Frame>,
}

impl FrameStream {
    pub fn new(inner: ChunkStream) -> Self {
        Self {
            inner: Some(inner),
            decoder: FrameDecoder::new(),
            ready: VecDeque::new(),
        }
    }
}

impl Stream for FrameStream {
    type Item = CoreResult<Frame>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(frame) = this.ready.pop_front() {
                return Poll::Ready(Some(Ok(frame)));
            }
            if this.decoder.is_done() {
                this.inner = None;
                return Poll::Ready(None);
            }
            let Some(inner) = this.inner.as_mut() else {
                return Poll::Ready(None);
            };
            match inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    let frames = this.decoder.push(&chunk);
                    this.ready.extend(frames);
                }
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => {
                    this.inner = None;
                    this.ready.extend(this.decoder.finish());
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// `data: {"text": ...}` frame for one token.
pub fn encode_text(token: &str) -> String {
    format!("{DATA_PREFIX}{}\n\n", serde_json::json!({ "text": token }))
}

/// `data: {"error": ...}` frame.
pub fn encode_error(message: &str) -> String {
    format!("{DATA_PREFIX}{}\n\n", serde_json::json!({ "error": message }))
}

pub fn encode_done() -> String {
    format!("{DATA_PREFIX}{DONE_SENTINEL}\n\n")
}
