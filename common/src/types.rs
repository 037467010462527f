use serde::{Deserialize, Serialize};

use crate::config::ThresholdPair;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub value: f32,
    pub valid: bool,
    pub timestamp_ms: Option<u64>,
}

impl Default for Reading {
    fn default() -> Self {
        Self {
            value: 0.0,
            valid: false,
            timestamp_ms: None,
        }
    }
}

impl Reading {
    pub fn record(&mut self, sample: f32, valid: bool, now_ms: u64) {
        self.valid = valid;
        if valid {
            self.value = sample;
            self.timestamp_ms = Some(now_ms);
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SensorSnapshot {
    pub air_temp: Reading,
    pub air_hum: Reading,
    pub water_temp: Reading,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NetworkMode {
    Managed,
    Provisioning,
}

impl NetworkMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Managed => "MANAGED",
            Self::Provisioning => "PROVISIONING",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TelemetryPayload {
    pub temperature: f32,
    pub humidity: f32,
    pub water_temp: f32,
    pub water_temp_threshold_hi: f32,
    pub water_temp_threshold_lo: f32,
}

impl TelemetryPayload {
    pub fn new(snapshot: &SensorSnapshot, thresholds: ThresholdPair) -> Self {
        Self {
            temperature: snapshot.air_temp.value,
            humidity: snapshot.air_hum.value,
            water_temp: snapshot.water_temp.value,
            water_temp_threshold_hi: thresholds.high,
            water_temp_threshold_lo: thresholds.low,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    Ping { uptime_ms: u64 },
    NewReadings(TelemetryPayload),
}

impl PushEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ping { .. } => "ping",
            Self::NewReadings(_) => "new_readings",
        }
    }

    pub fn data(&self) -> serde_json::Result<String> {
        match self {
            Self::Ping { uptime_ms } => Ok(uptime_ms.to_string()),
            Self::NewReadings(payload) => serde_json::to_string(payload),
        }
    }

    pub fn to_frame(&self) -> serde_json::Result<String> {
        let data = match self {
            Self::Ping { uptime_ms } => serde_json::Value::from(*uptime_ms),
            Self::NewReadings(payload) => serde_json::to_value(payload)?,
        };
        serde_json::to_string(&serde_json::json!({ "event": self.name(), "data": data }))
    }
}
