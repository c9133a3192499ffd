//! Request Executor: issues one HTTP POST, times it, and drives the
//! stream parser to produce a `UserResponse`.

use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::watch;

use crate::auth::ModelAuthProvider;
use crate::protocol::UserRequest;
use crate::protocol::UserResponse;
use crate::sampler::BackendAdapter;
use crate::sse;

/// Configuration passed into the executor at construction, replacing the
/// teacher's global mutable `host`/`auth_provider`/`disable_streaming`
/// class fields with an explicit, owned struct.
#[derive(Clone)]
pub struct ExecutorConfig {
    pub host: String,
    pub enable_streaming: bool,
    pub auth: Arc<dyn ModelAuthProvider>,
    pub adapter: Arc<dyn BackendAdapter>,
}

/// Owns one pooled `reqwest::Client`; all requests issued through it
/// share keep-alive connections, as the teacher's `Config::http_client`
/// shares one pool across handlers.
pub struct RequestExecutor {
    client: reqwest::Client,
    config: ExecutorConfig,
}

impl RequestExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(64)
            .build()
            .expect("reqwest client builder should never fail with default TLS backend");
        Self { client, config }
    }

    pub fn with_client(client: reqwest::Client, config: ExecutorConfig) -> Self {
        Self { client, config }
    }

    /// Issue one request and drive it to a `UserResponse`. Never panics,
    /// never propagates a transport error upward: failures are encoded
    /// in the returned `UserResponse` per the error taxonomy. Races the
    /// whole attempt (send + stream read) against `cancel`: the instant
    /// the run's cancellation token trips, the read is abandoned and a
    /// `status_code=-1` response is produced, per the per-request
    /// cancellation contract.
    pub async fn execute(&self, request: &UserRequest, mut cancel: watch::Receiver<bool>) -> UserResponse {
        let start_instant = Instant::now();
        let start_time = now_secs();

        tokio::select! {
            biased;
            _ = wait_for_cancel(&mut cancel) => UserResponse {
                status_code: -1,
                start_time,
                end_time: now_secs(),
                time_at_first_token: None,
                tokens_received: 0,
                num_prefill_tokens: request.num_prefill_tokens,
                generated_text: String::new(),
                finish_reason: None,
                error_message: Some("cancelled".to_string()),
            },
            response = self.send_and_parse(request, start_time, start_instant) => response,
        }
    }

    async fn send_and_parse(&self, request: &UserRequest, start_time: f64, start_instant: Instant) -> UserResponse {
        let url = self.config.adapter.url(&self.config.host);
        let body = self.config.adapter.build_payload(request, self.config.enable_streaming);

        let mut builder = self.client.post(&url).json(&body);
        if let Some(token) = self.config.auth.bearer_token() {
            builder = builder.bearer_auth(token);
        }

        let response = match builder.send().await {
            Ok(resp) => resp,
            Err(err) => {
                return UserResponse {
                    status_code: -1,
                    start_time,
                    end_time: now_secs(),
                    time_at_first_token: None,
                    tokens_received: 0,
                    num_prefill_tokens: request.num_prefill_tokens,
                    generated_text: String::new(),
                    finish_reason: None,
                    error_message: Some(err.to_string()),
                };
            }
        };

        let status = response.status();
        if status.as_u16() != 200 {
            let body_text = response.text().await.unwrap_or_default();
            return UserResponse {
                status_code: status.as_u16() as i32,
                start_time,
                end_time: now_secs(),
                time_at_first_token: None,
                tokens_received: 0,
                num_prefill_tokens: request.num_prefill_tokens,
                generated_text: String::new(),
                finish_reason: None,
                error_message: Some(body_text),
            };
        }

        let stream = response.bytes_stream();
        if self.config.adapter.is_plain_text() {
            sse::parse_plain_stream(
                stream,
                start_time,
                start_instant,
                request.num_prefill_tokens,
                sse::cl100k_token_estimator,
            )
            .await
        } else {
            sse::parse_sse_stream(stream, start_time, start_instant, request.num_prefill_tokens)
                .await
        }
    }
}

fn now_secs() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("clock before epoch").as_secs_f64()
}

/// Resolves once the run's cancellation watch carries `true`, whether it
/// was already `true` at subscribe time or flips later.
async fn wait_for_cancel(cancel: &mut watch::Receiver<bool>) {
    if *cancel.borrow() {
        return;
    }
    while cancel.changed().await.is_ok() {
        if *cancel.borrow() {
            return;
        }
    }
}
