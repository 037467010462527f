use crate::{
    config::ThresholdPair,
    types::{SensorSnapshot, TelemetryPayload},
};

#[derive(Debug, Clone)]
pub struct TelemetryScheduler {
    interval_ms: u64,
    last_push_ms: u64,
}

impl TelemetryScheduler {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            last_push_ms: 0,
        }
    }

    pub fn maybe_push(
        &mut self,
        now_ms: u64,
        snapshot: &SensorSnapshot,
        thresholds: ThresholdPair,
    ) -> Option<TelemetryPayload> {
        if now_ms.saturating_sub(self.last_push_ms) < self.interval_ms {
            return None;
        }
        self.last_push_ms = now_ms;
        Some(TelemetryPayload::new(snapshot, thresholds))
    }
}
