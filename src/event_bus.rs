//! Event Bus (C6): single-producer/multi-consumer distribution of
//! `StreamEvent`s to WebSocket clients, with bounded replay history.
//!
//! Built on `tokio::sync::broadcast`, which natively provides the
//! semantics this component needs: one shared ring buffer, each
//! subscriber its own read cursor, and `RecvError::Lagged(n)` reporting
//! exactly how many events a slow subscriber missed — the producer never
//! blocks on a slow client.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::protocol::{EventType, HistoricalEntry, StreamEvent};

const BROADCAST_CAPACITY: usize = 1024;
const HISTORY_CAP: usize = 1000;
const HISTOGRAM_CAP: usize = 100;

fn now_secs() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("clock before epoch").as_secs_f64()
}

#[derive(Default)]
struct Histories {
    metrics: VecDeque<StreamEvent>,
    logs: VecDeque<StreamEvent>,
    status: VecDeque<StreamEvent>,
    scatter: VecDeque<StreamEvent>,
    histogram: VecDeque<StreamEvent>,
    historical_data: Vec<HistoricalEntry>,
}

fn push_capped(queue: &mut VecDeque<StreamEvent>, cap: usize, event: StreamEvent) {
    if queue.len() == cap {
        queue.pop_front();
    }
    queue.push_back(event);
}

/// Producer-and-replay side of the bus. Cheap to clone (an `Arc` of this
/// type is what both the Dashboard Facade and the Streaming Server hold).
pub struct EventBus {
    sender: broadcast::Sender<StreamEvent>,
    histories: RwLock<Histories>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { sender, histories: RwLock::new(Histories::default()) }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.sender.subscribe()
    }

    /// Record an event in its corresponding history ring buffer (if any)
    /// and broadcast it. History is updated before broadcast so a client
    /// that connects mid-run and requests a replay sees a prefix
    /// consistent with the live tail.
    pub fn publish(&self, event_type: EventType, data: Value) {
        let event = StreamEvent::new(event_type, now_secs(), data);

        {
            let mut histories = self.histories.write();
            match event_type {
                EventType::Metrics => push_capped(&mut histories.metrics, HISTORY_CAP, event.clone()),
                EventType::Log => push_capped(&mut histories.logs, HISTORY_CAP, event.clone()),
                EventType::Status => push_capped(&mut histories.status, HISTORY_CAP, event.clone()),
                EventType::Scatter => push_capped(&mut histories.scatter, HISTORY_CAP, event.clone()),
                EventType::Histogram => {
                    push_capped(&mut histories.histogram, HISTOGRAM_CAP, event.clone())
                }
                _ => {}
            }
        }

        // No subscribers is not an error — it just means nobody is
        // listening right now (e.g. during shutdown drain).
        let _ = self.sender.send(event);
    }

    pub fn add_historical_data(&self, entry: HistoricalEntry) {
        self.histories.write().historical_data.push(entry);
    }

    /// Full replay snapshot: all five ring buffers plus the unbounded
    /// historical-run list, for the `GET /api/history` endpoint and the
    /// WebSocket's post-connect `historical_data` event.
    pub fn complete_history(&self) -> CompleteHistory {
        let histories = self.histories.read();
        CompleteHistory {
            metrics_history: histories.metrics.iter().cloned().collect(),
            logs_history: histories.logs.iter().cloned().collect(),
            status_history: histories.status.iter().cloned().collect(),
            scatter_history: histories.scatter.iter().cloned().collect(),
            histogram_history: histories.histogram.iter().cloned().collect(),
            historical_data: histories.historical_data.clone(),
        }
    }

    pub fn historical_data(&self) -> Vec<HistoricalEntry> {
        self.histories.read().historical_data.clone()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CompleteHistory {
    pub metrics_history: Vec<StreamEvent>,
    pub logs_history: Vec<StreamEvent>,
    pub status_history: Vec<StreamEvent>,
    pub scatter_history: Vec<StreamEvent>,
    pub histogram_history: Vec<StreamEvent>,
    pub historical_data: Vec<HistoricalEntry>,
}
