//! Metrics Collector (C3): turns completed `UserResponse`s into sliding-
//! window latency/throughput statistics, guarded the way the teacher's
//! `routing::EwmaTracker` guards its per-tier state — a single
//! `parking_lot::RwLock`, updated then read back as one atomic step.

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;

use crate::protocol::{LiveMetrics, Stats, UserResponse};

const WINDOW_CAP: usize = 1000;

/// Capacity-bounded sequence of samples. Oldest sample is evicted once
/// the window is full.
#[derive(Debug, Default)]
struct SlidingWindow {
    samples: VecDeque<f64>,
    cap: usize,
}

impl SlidingWindow {
    fn new(cap: usize) -> Self {
        Self { samples: VecDeque::with_capacity(cap), cap }
    }

    fn push(&mut self, value: f64) {
        if self.samples.len() == self.cap {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    fn stats(&self) -> Stats {
        if self.samples.is_empty() {
            return Stats::default();
        }
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let len = sorted.len();
        let sum: f64 = sorted.iter().sum();
        Stats {
            mean: sum / len as f64,
            min: sorted[0],
            max: sorted[len - 1],
            p50: percentile(&sorted, 0.50),
            p90: percentile(&sorted, 0.90),
            p95: percentile(&sorted, 0.95),
            p99: percentile(&sorted, 0.99),
        }
    }

    fn len(&self) -> usize {
        self.samples.len()
    }

    fn clear(&mut self) {
        self.samples.clear();
    }

    fn to_vec(&self) -> Vec<f64> {
        self.samples.iter().copied().collect()
    }
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = p * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return sorted[lower];
    }
    let weight = rank - lower as f64;
    sorted[lower] * (1.0 - weight) + sorted[upper] * weight
}

#[derive(Default)]
struct Windows {
    ttft: SlidingWindow,
    input_throughput: SlidingWindow,
    output_throughput: SlidingWindow,
    output_latency: SlidingWindow,
    e2e_latency: SlidingWindow,
}

impl Windows {
    fn new() -> Self {
        Self {
            ttft: SlidingWindow::new(WINDOW_CAP),
            input_throughput: SlidingWindow::new(WINDOW_CAP),
            output_throughput: SlidingWindow::new(WINDOW_CAP),
            output_latency: SlidingWindow::new(WINDOW_CAP),
            e2e_latency: SlidingWindow::new(WINDOW_CAP),
        }
    }

    fn snapshot(&self) -> LiveMetrics {
        LiveMetrics {
            ttft: self.ttft.stats(),
            input_throughput: self.input_throughput.stats(),
            output_throughput: self.output_throughput.stats(),
            output_latency: self.output_latency.stats(),
            e2e_latency: self.e2e_latency.stats(),
        }
    }
}

/// Per-request derived metrics admitted into the sliding windows; `None`
/// fields mean the corresponding denominator was undefined and the
/// metric was not recorded, per spec.
struct Derived {
    ttft: Option<f64>,
    e2e_latency: f64,
    output_latency: Option<f64>,
    input_throughput: Option<f64>,
    output_throughput: Option<f64>,
}

fn derive(response: &UserResponse) -> Derived {
    let e2e_latency = response.end_time - response.start_time;
    let ttft = response.time_at_first_token.map(|t| t - response.start_time);

    let output_latency = match (response.time_at_first_token, response.tokens_received) {
        (Some(tfirst), tokens) => {
            let denom = (tokens.saturating_sub(1)).max(1) as f64;
            Some((response.end_time - tfirst) / denom)
        }
        _ => None,
    };

    let input_throughput = match (response.num_prefill_tokens, ttft) {
        (Some(prefill), Some(ttft)) if ttft > 0.0 => Some(prefill as f64 / ttft),
        _ => None,
    };

    let output_throughput = match response.time_at_first_token {
        Some(tfirst) => {
            let denom = response.end_time - tfirst;
            if denom > 0.0 {
                Some(response.tokens_received as f64 / denom)
            } else {
                None
            }
        }
        None => None,
    };

    Derived { ttft, e2e_latency, output_latency, input_throughput, output_throughput }
}

/// Error counts bucketed by HTTP status class, as required by the
/// failure-mode contract in §4.3: failed responses are NOT admitted into
/// latency/throughput windows but ARE counted.
#[derive(Debug, Default, Clone)]
pub struct ErrorCounters {
    pub counts: HashMap<&'static str, u64>,
}

pub struct MetricsCollector {
    windows: RwLock<Windows>,
    errors: RwLock<ErrorCounters>,
    total_requests: RwLock<u64>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            windows: RwLock::new(Windows::new()),
            errors: RwLock::new(ErrorCounters::default()),
            total_requests: RwLock::new(0),
        }
    }

    /// Record one completed response. Returns the metrics snapshot taken
    /// immediately after the update, atomic with respect to other
    /// readers/writers.
    pub fn record(&self, response: &UserResponse) -> LiveMetrics {
        *self.total_requests.write() += 1;

        if !response.is_success() {
            *self.errors.write().counts.entry(response.status_class()).or_insert(0) += 1;
            tracing::debug!(status = response.status_code, "request excluded from metrics windows");
            return self.windows.read().snapshot();
        }

        let derived = derive(response);
        let mut windows = self.windows.write();
        if let Some(ttft) = derived.ttft {
            windows.ttft.push(ttft);
        }
        windows.e2e_latency.push(derived.e2e_latency);
        if let Some(v) = derived.output_latency {
            windows.output_latency.push(v);
        }
        if let Some(v) = derived.input_throughput {
            windows.input_throughput.push(v);
        }
        if let Some(v) = derived.output_throughput {
            windows.output_throughput.push(v);
        }
        windows.snapshot()
    }

    pub fn snapshot(&self) -> LiveMetrics {
        self.windows.read().snapshot()
    }

    pub fn error_counters(&self) -> ErrorCounters {
        self.errors.read().clone()
    }

    pub fn total_requests(&self) -> u64 {
        *self.total_requests.read()
    }

    /// Clear all windows. Satisfies testable property 7: stats read back
    /// after reset report zero-size windows with all-zero `Stats`.
    pub fn reset(&self) {
        let mut windows = self.windows.write();
        windows.ttft.clear();
        windows.input_throughput.clear();
        windows.output_throughput.clear();
        windows.output_latency.clear();
        windows.e2e_latency.clear();
        *self.errors.write() = ErrorCounters::default();
        *self.total_requests.write() = 0;
    }

    pub fn ttft_len(&self) -> usize {
        self.windows.read().ttft.len()
    }

    /// Raw per-request TTFT samples currently in the sliding window, for
    /// the Dashboard Facade's histogram panel to bucket directly rather
    /// than bucketing summary stats.
    pub fn ttft_samples(&self) -> Vec<f64> {
        self.windows.read().ttft.to_vec()
    }

    pub fn output_latency_samples(&self) -> Vec<f64> {
        self.windows.read().output_latency.to_vec()
    }
}
