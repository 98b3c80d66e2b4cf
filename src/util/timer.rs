use std::{
    sync::OnceLock,
    time::{Duration, Instant},
};

use linked_hash_map::LinkedHashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, trace};

/// The accumulated time of one checkpoint label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Checkpoint {
    /// How many times the label was checked.
    pub count: u64,
    /// Total time spent between the previous checkpoint and this label.
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

fn serialize_millis<S: serde::Serializer>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(elapsed.as_secs_f64() * 1e3)
}

#[derive(Debug)]
struct TimerState {
    last: Instant,
    checkpoints: LinkedHashMap<String, Checkpoint>,
}

/// A stopwatch attributing wall-clock time to named checkpoints.
///
/// Each [`time_check`](Self::time_check) charges the time elapsed since the
/// previous check (of any label) to the given label. Labels keep the order in
/// which they were first seen.
#[derive(Debug)]
pub struct StatefulTimer {
    state: Mutex<TimerState>,
}

impl Default for StatefulTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl StatefulTimer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TimerState {
                last: Instant::now(),
                checkpoints: LinkedHashMap::new(),
            }),
        }
    }

    /// The process-wide timer, created on first use.
    pub fn instance() -> &'static StatefulTimer {
        static INSTANCE: OnceLock<StatefulTimer> = OnceLock::new();
        INSTANCE.get_or_init(StatefulTimer::new)
    }

    pub fn time_check(&self, label: &str) {
        let now = Instant::now();
        let mut state = self.state.lock();
        let elapsed = now.saturating_duration_since(state.last);
        state.last = now;
        if let Some(checkpoint) = state.checkpoints.get_mut(label) {
            checkpoint.count += 1;
            checkpoint.elapsed += elapsed;
        } else {
            state.checkpoints.insert(label.to_owned(), Checkpoint { count: 1, elapsed });
        }
        trace!(label, elapsed_us = elapsed.as_micros() as u64, "time check");
    }

    pub fn checkpoint(&self, label: &str) -> Option<Checkpoint> {
        self.state.lock().checkpoints.get(label).copied()
    }

    pub fn snapshot(&self) -> Vec<(String, Checkpoint)> {
        self.state
            .lock()
            .checkpoints
            .iter()
            .map(|(label, checkpoint)| (label.clone(), *checkpoint))
            .collect()
    }

    /// Forget every checkpoint and restart the clock.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.checkpoints.clear();
        state.last = Instant::now();
    }

    /// Log every checkpoint at `info` level.
    pub fn dump(&self) {
        for (label, checkpoint) in self.snapshot() {
            info!(
                label = %label,
                count = checkpoint.count,
                elapsed_ms = checkpoint.elapsed.as_secs_f64() * 1e3,
                "timer"
            );
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .snapshot()
            .into_iter()
            .map(|(label, checkpoint)| {
                (label, serde_json::to_value(checkpoint).unwrap_or(serde_json::Value::Null))
            })
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }
}

/// Record a checkpoint on the process-wide [`StatefulTimer`].
pub fn time_check(label: &str) {
    StatefulTimer::instance().time_check(label);
}
