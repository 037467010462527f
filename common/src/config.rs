use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{name} thresholds inverted: high {high} must be greater than low {low}")]
    InvertedThresholds {
        name: &'static str,
        high: f32,
        low: f32,
    },
    #[error("alarm low threshold {alarm_low} overlaps relay high threshold {relay_high}")]
    AlarmBandOverlap { alarm_low: f32, relay_high: f32 },
    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdPair {
    pub high: f32,
    pub low: f32,
}

impl ThresholdPair {
    pub const fn new(high: f32, low: f32) -> Self {
        Self { high, low }
    }

    fn validate(&self, name: &'static str) -> Result<(), ConfigError> {
        // NaN fails this comparison too.
        if self.high > self.low {
            Ok(())
        } else {
            Err(ConfigError::InvertedThresholds {
                name,
                high: self.high,
                low: self.low,
            })
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub relay: ThresholdPair,
    pub alarm: ThresholdPair,
    pub sensor_poll_interval_ms: u64,
    pub alarm_pulse_count: u8,
    pub alarm_pulse_half_period_ms: u64,
    pub buzzer_toggle_interval_ms: u64,
    pub telemetry_interval_ms: u64,
    pub control_tick_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            relay: ThresholdPair::new(70.0, 60.0),
            alarm: ThresholdPair::new(90.0, 85.0),
            sensor_poll_interval_ms: 1_000,
            alarm_pulse_count: 3,
            alarm_pulse_half_period_ms: 500,
            buzzer_toggle_interval_ms: 500,
            telemetry_interval_ms: 3_000,
            control_tick_ms: 100,
        }
    }
}

impl ControlConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.relay.validate("relay")?;
        self.alarm.validate("alarm")?;

        if self.alarm.low < self.relay.high {
            return Err(ConfigError::AlarmBandOverlap {
                alarm_low: self.alarm.low,
                relay_high: self.relay.high,
            });
        }

        for (name, value) in [
            ("sensor_poll_interval_ms", self.sensor_poll_interval_ms),
            ("alarm_pulse_half_period_ms", self.alarm_pulse_half_period_ms),
            ("buzzer_toggle_interval_ms", self.buzzer_toggle_interval_ms),
            ("telemetry_interval_ms", self.telemetry_interval_ms),
            ("control_tick_ms", self.control_tick_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroInterval(name));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkTimings {
    pub join_timeout_ms: u64,
    pub join_poll_interval_ms: u64,
    pub restart_grace_ms: u64,
    pub subnet_mask: Ipv4Addr,
}

impl Default for NetworkTimings {
    fn default() -> Self {
        Self {
            join_timeout_ms: 10_000,
            join_poll_interval_ms: 500,
            restart_grace_ms: 5_000,
            subnet_mask: Ipv4Addr::new(255, 255, 0, 0),
        }
    }
}

impl NetworkTimings {
    pub fn sanitize(&mut self) {
        if self.join_poll_interval_ms == 0 {
            self.join_poll_interval_ms = 500;
        }
        self.join_poll_interval_ms = self.join_poll_interval_ms.min(self.join_timeout_ms.max(1));
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub control: ControlConfig,
    pub network: NetworkTimings,
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) -> Option<ConfigError> {
        self.network.sanitize();
        match self.control.validate() {
            Ok(()) => None,
            Err(err) => {
                self.control = ControlConfig::default();
                Some(err)
            }
        }
    }
}
