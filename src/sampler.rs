//! Sampler / Backend adapter (A3): out-of-scope collaborators per the
//! core's contract, but the core defines their trait boundary and ships
//! thin reference implementations of the two payload shapes so the
//! pipeline is runnable end to end without a real workload generator.

use std::collections::HashMap;

use rand::Rng;
use serde_json::{json, Value};

use crate::protocol::{RequestKind, UserRequest};

/// Produces one `UserRequest` per call. `scenario` is an opaque string,
/// interpreted by the sampler, not the core (spec GLOSSARY: "Scenario").
pub trait RequestSampler: Send + Sync {
    fn sample(&self, scenario: &str) -> UserRequest;
}

/// Builds the outbound URL and JSON payload for one backend shape. The
/// core never concatenates a path to a host without the adapter's
/// consent.
pub trait BackendAdapter: Send + Sync {
    fn url(&self, host: &str) -> String;
    fn build_payload(&self, request: &UserRequest, stream: bool) -> Value;

    /// Whether this adapter's wire response is the plain-text variant
    /// (spec §4.1: raw bytes appended verbatim, no SSE framing) rather
    /// than OpenAI-style `data: {...}` chunks. The Request Executor picks
    /// its stream parser off this, not off `enable_streaming`.
    fn is_plain_text(&self) -> bool {
        false
    }
}

pub struct OpenAiChatAdapter;

impl BackendAdapter for OpenAiChatAdapter {
    fn url(&self, host: &str) -> String {
        format!("{}/v1/chat/completions", host.trim_end_matches('/'))
    }

    fn build_payload(&self, request: &UserRequest, stream: bool) -> Value {
        let content = match &request.kind {
            RequestKind::Chat { prompt } => json!(prompt),
            RequestKind::ImageChat { prompt, image_content } => {
                let mut parts: Vec<Value> = image_content
                    .iter()
                    .map(|url| json!({"type": "image_url", "image_url": {"url": url}}))
                    .collect();
                parts.push(json!({"type": "text", "text": prompt}));
                json!(parts)
            }
            RequestKind::Embedding { prompt } => json!(prompt),
        };

        let mut body = json!({
            "model": request.model,
            "messages": [{"role": "user", "content": content}],
            "max_tokens": request.max_tokens,
            "temperature": 0.0,
            "stream": stream,
        });

        if stream {
            body["stream_options"] = json!({"include_usage": true});
        }

        merge_additional_params(&mut body, &request.additional_params);
        body
    }
}

pub struct PlainPromptAdapter;

impl BackendAdapter for PlainPromptAdapter {
    fn url(&self, host: &str) -> String {
        format!("{}/v1/completions", host.trim_end_matches('/'))
    }

    fn is_plain_text(&self) -> bool {
        true
    }

    fn build_payload(&self, request: &UserRequest, stream: bool) -> Value {
        let prompt = match &request.kind {
            RequestKind::Chat { prompt } => prompt.clone(),
            RequestKind::ImageChat { prompt, .. } => prompt.clone(),
            RequestKind::Embedding { prompt } => prompt.clone(),
        };

        let mut body = json!({
            "prompt": prompt,
            "max_tokens": request.max_tokens,
            "temperature": 0.0,
            "stream": stream,
        });

        merge_additional_params(&mut body, &request.additional_params);
        body
    }
}

fn merge_additional_params(body: &mut Value, params: &HashMap<String, Value>) {
    if let Some(map) = body.as_object_mut() {
        for (key, value) in params {
            map.insert(key.clone(), value.clone());
        }
    }
}

/// Parses the `D(num_input,num_output)` scenario-string convention and
/// produces bounded pseudo-random prompts of roughly the requested input
/// length. A reference implementation only — real workload distributions
/// are an external collaborator's concern.
pub struct UniformScenarioSampler {
    model: String,
}

impl UniformScenarioSampler {
    pub fn new(model: String) -> Self {
        Self { model }
    }

    fn parse_scenario(scenario: &str) -> (usize, usize) {
        let inner = scenario.trim_start_matches('D').trim_start_matches('(').trim_end_matches(')');
        let mut parts = inner.split(',');
        let input_len: usize = parts.next().and_then(|s| s.trim().parse().ok()).unwrap_or(64);
        let output_len: usize = parts.next().and_then(|s| s.trim().parse().ok()).unwrap_or(64);
        (input_len, output_len)
    }
}

const WORD_BANK: &[&str] = &[
    "the", "model", "responds", "quickly", "to", "each", "prompt", "with", "varying", "length",
    "and", "latency", "depending", "on", "load",
];

impl RequestSampler for UniformScenarioSampler {
    fn sample(&self, scenario: &str) -> UserRequest {
        let (input_len, output_len) = Self::parse_scenario(scenario);
        let mut rng = rand::thread_rng();
        let prompt: String = (0..input_len.max(1))
            .map(|_| WORD_BANK[rng.gen_range(0..WORD_BANK.len())])
            .collect::<Vec<_>>()
            .join(" ");

        UserRequest {
            model: self.model.clone(),
            kind: RequestKind::Chat { prompt },
            num_prefill_tokens: Some(input_len as u32),
            max_tokens: Some(output_len as u32),
            additional_params: HashMap::new(),
        }
    }
}
