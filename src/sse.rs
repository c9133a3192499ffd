//! Byte-level SSE stream parser.
//!
//! Reassembles `data: ...\n\n` frames from a raw, possibly arbitrarily
//! chopped-up, byte stream and drives TTFT capture, content accumulation
//! and usage-based token counting. Grounded in the early-emit buffering
//! policy that makes TTFT measurement accurate even when the upstream
//! server delays its trailing frame delimiter.

use std::time::Instant;

use futures::Stream;
use futures::StreamExt;
use serde::Deserialize;

use crate::protocol::UserResponse;

/// One parsed SSE data payload, or the terminator.
enum Frame {
    Done,
    Json(ChatChunk),
    Unparseable,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<ChunkUsage>,
    #[serde(default)]
    error: Option<ChunkError>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

impl ChunkDelta {
    fn text(&self) -> Option<&str> {
        self.content
            .as_deref()
            .or(self.reasoning_content.as_deref())
            .or(self.reasoning.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct ChunkUsage {
    #[serde(default)]
    prompt_tokens: Option<u32>,
    #[serde(default)]
    completion_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChunkError {
    #[serde(default)]
    code: Option<i32>,
    #[serde(default)]
    message: Option<String>,
}

/// Accumulates raw bytes across chunk boundaries and yields complete SSE
/// frames, including the early-emit case where a `data: ` tail already
/// parses as `[DONE]` or valid JSON even though the trailing `\n\n` has
/// not arrived yet.
struct StreamedResponseHandler {
    buffer: Vec<u8>,
}

impl StreamedResponseHandler {
    fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Feed one chunk of bytes, returning all frames it completes (zero,
    /// one, or more — a single chunk can carry several `\n\n`-delimited
    /// messages).
    fn add_chunk(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        loop {
            if let Some(pos) = find_double_newline(&self.buffer) {
                let message: Vec<u8> = self.buffer.drain(..pos + 2).collect();
                if let Some(frame) = parse_message(&message) {
                    frames.push(frame);
                }
                continue;
            }

            if let Some(tail) = strip_data_prefix(&self.buffer) {
                let tail = tail.trim_end();
                if tail == "[DONE]" {
                    frames.push(Frame::Done);
                    self.buffer.clear();
                    continue;
                }
                if let Ok(chunk) = serde_json::from_str::<ChatChunk>(tail) {
                    frames.push(Frame::Json(chunk));
                    self.buffer.clear();
                    continue;
                }
            }

            break;
        }

        frames
    }
}

fn find_double_newline(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

fn strip_data_prefix(buf: &[u8]) -> Option<&str> {
    let text = std::str::from_utf8(buf).ok()?;
    text.strip_prefix("data: ").or_else(|| text.strip_prefix("data:"))
}

fn parse_message(message: &[u8]) -> Option<Frame> {
    let text = std::str::from_utf8(message).ok()?;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let payload = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:"))?;
        let payload = payload.trim();
        if payload == "[DONE]" {
            return Some(Frame::Done);
        }
        return match serde_json::from_str::<ChatChunk>(payload) {
            Ok(chunk) => Some(Frame::Json(chunk)),
            Err(_) => Some(Frame::Unparseable),
        };
    }
    None
}

/// Drive a byte stream (SSE mode) to completion and produce a
/// `UserResponse`. `clock_start` is the wall-clock instant the request
/// was sent; `start_time`/`now` are expressed as seconds-since-epoch for
/// the resulting `UserResponse` fields.
pub async fn parse_sse_stream<S, E>(
    mut body: S,
    start_time: f64,
    clock_start: Instant,
    num_prefill_tokens: Option<u32>,
) -> UserResponse
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut handler = StreamedResponseHandler::new();
    let mut generated_text = String::new();
    let mut tokens_received: u32 = 0;
    let mut usage_overwrote_tokens = false;
    let mut time_at_first_token: Option<f64> = None;
    let mut num_prefill_tokens = num_prefill_tokens;
    let mut finish_reason = None;

    while let Some(item) = body.next().await {
        let chunk = match item {
            Ok(bytes) => bytes,
            Err(err) => {
                return UserResponse {
                    status_code: 500,
                    start_time,
                    end_time: now_secs(start_time, clock_start),
                    time_at_first_token,
                    tokens_received,
                    num_prefill_tokens,
                    generated_text,
                    finish_reason,
                    error_message: Some(err.to_string()),
                };
            }
        };

        for frame in handler.add_chunk(&chunk) {
            match frame {
                Frame::Done => {}
                Frame::Unparseable => {
                    tracing::debug!("skipping unparseable SSE frame");
                }
                Frame::Json(chunk) => {
                    if let Some(error) = chunk.error {
                        return UserResponse {
                            status_code: error.code.unwrap_or(-1),
                            start_time,
                            end_time: now_secs(start_time, clock_start),
                            time_at_first_token: None,
                            tokens_received,
                            num_prefill_tokens,
                            generated_text,
                            finish_reason: None,
                            error_message: error.message,
                        };
                    }

                    if !chunk.choices.is_empty() {
                        if time_at_first_token.is_none() {
                            time_at_first_token = Some(now_secs(start_time, clock_start));
                        }
                        if let Some(choice) = chunk.choices.first() {
                            if let Some(text) = choice.delta.text() {
                                generated_text.push_str(text);
                                if !usage_overwrote_tokens {
                                    tokens_received += 1;
                                }
                            }
                            if choice.finish_reason.is_some() {
                                finish_reason = choice.finish_reason.clone();
                            }
                        }
                    }

                    if let Some(usage) = chunk.usage {
                        if num_prefill_tokens.is_none() {
                            num_prefill_tokens = usage.prompt_tokens;
                        }
                        if let Some(completion) = usage.completion_tokens {
                            tokens_received = completion;
                            usage_overwrote_tokens = true;
                        }
                    }
                }
            }
        }
    }

    let end_time = now_secs(start_time, clock_start);

    if time_at_first_token.is_none() {
        return UserResponse {
            status_code: 500,
            start_time,
            end_time,
            time_at_first_token: None,
            tokens_received,
            num_prefill_tokens,
            generated_text,
            finish_reason,
            error_message: Some("No valid streaming data received".to_string()),
        };
    }

    UserResponse {
        status_code: 200,
        start_time,
        end_time,
        time_at_first_token,
        tokens_received,
        num_prefill_tokens,
        generated_text,
        finish_reason,
        error_message: None,
    }
}

/// Drive a byte stream in "plain prompt" mode: no SSE framing, every
/// chunk is appended verbatim, TTFT is set at the first non-whitespace
/// chunk, and token count comes from a caller-supplied estimator over
/// the final text (e.g. a BPE tokenizer).
pub async fn parse_plain_stream<S, E>(
    mut body: S,
    start_time: f64,
    clock_start: Instant,
    num_prefill_tokens: Option<u32>,
    token_estimator: impl Fn(&str) -> u32,
) -> UserResponse
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut generated_text = String::new();
    let mut time_at_first_token: Option<f64> = None;

    while let Some(item) = body.next().await {
        let chunk = match item {
            Ok(bytes) => bytes,
            Err(err) => {
                return UserResponse {
                    status_code: 500,
                    start_time,
                    end_time: now_secs(start_time, clock_start),
                    time_at_first_token,
                    tokens_received: token_estimator(&generated_text),
                    num_prefill_tokens,
                    generated_text,
                    finish_reason: None,
                    error_message: Some(err.to_string()),
                };
            }
        };

        let text = String::from_utf8_lossy(&chunk);
        if time_at_first_token.is_none() && !text.trim().is_empty() {
            time_at_first_token = Some(now_secs(start_time, clock_start));
        }
        generated_text.push_str(&text);
    }

    let end_time = now_secs(start_time, clock_start);
    let tokens_received = token_estimator(&generated_text);

    if time_at_first_token.is_none() {
        return UserResponse {
            status_code: 500,
            start_time,
            end_time,
            time_at_first_token: None,
            tokens_received,
            num_prefill_tokens,
            generated_text,
            finish_reason: None,
            error_message: Some("No valid streaming data received".to_string()),
        };
    }

    UserResponse {
        status_code: 200,
        start_time,
        end_time,
        time_at_first_token,
        tokens_received,
        num_prefill_tokens,
        generated_text,
        finish_reason: None,
        error_message: None,
    }
}

fn now_secs(start_time: f64, clock_start: Instant) -> f64 {
    start_time + clock_start.elapsed().as_secs_f64()
}

/// Default token estimator for plain-prompt mode: `cl100k_base` BPE,
/// the same tokenizer the teacher loads once and reuses for its own
/// pre-request token audit.
pub fn cl100k_token_estimator(text: &str) -> u32 {
    static BPE: std::sync::OnceLock<tiktoken_rs::CoreBPE> = std::sync::OnceLock::new();
    let bpe = BPE.get_or_init(|| {
        tiktoken_rs::cl100k_base().expect("failed to load cl100k_base tokenizer")
    });
    bpe.encode_ordinary(text).len() as u32
}
