use std::collections::HashMap;

use crate::{
    controller::{ActionSink, ControlAction},
    network::{Clock, CredentialKey, CredentialStore, NetworkError, StaticIpConfig, StationLink, StoreError},
    sensor::{SensorSource, DEVICE_DISCONNECTED_C},
};

#[derive(Debug, Default)]
pub struct ScriptedSensor {
    pub water: Vec<f32>,
    pub air: f32,
    pub humidity: f32,
    pub reads: usize,
}

impl SensorSource for ScriptedSensor {
    fn read_water_temp_c(&mut self) -> f32 {
        let sample = self
            .water
            .get(self.reads)
            .or_else(|| self.water.last())
            .copied()
            .unwrap_or(DEVICE_DISCONNECTED_C);
        self.reads += 1;
        sample
    }

    fn read_air_temp_c(&mut self) -> f32 {
        self.air
    }

    fn read_air_humidity(&mut self) -> f32 {
        self.humidity
    }
}

#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    pub records: HashMap<&'static str, String>,
    pub fail_writes: bool,
    pub writes: Vec<(&'static str, String)>,
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self, key: CredentialKey) -> String {
        self.records.get(key.as_str()).cloned().unwrap_or_default()
    }

    fn save(&mut self, key: CredentialKey, value: &str) -> Result<(), StoreError> {
        if self.fail_writes {
            return Err(StoreError::Write {
                key: key.as_str(),
                reason: "flash full".into(),
            });
        }
        self.writes.push((key.as_str(), value.to_string()));
        self.records.insert(key.as_str(), value.to_string());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FakeStationLink {
    connect_after_polls: Option<u32>,
    polls: u32,
    pub reject_configure: bool,
    pub configured: Option<StaticIpConfig>,
    pub joined_ssid: Option<String>,
    pub begin_calls: u32,
}

impl FakeStationLink {
    pub fn connects_after(polls: u32) -> Self {
        Self {
            connect_after_polls: Some(polls),
            ..Default::default()
        }
    }

    pub fn never_connects() -> Self {
        Self::default()
    }
}

impl StationLink for FakeStationLink {
    fn configure(&mut self, addressing: &StaticIpConfig) -> Result<(), NetworkError> {
        if self.reject_configure {
            return Err(NetworkError::Configure("netif refused".into()));
        }
        self.configured = Some(*addressing);
        Ok(())
    }

    fn begin(&mut self, ssid: &str, _passphrase: &str) -> Result<(), NetworkError> {
        self.begin_calls += 1;
        self.joined_ssid = Some(ssid.to_string());
        Ok(())
    }

    fn is_connected(&mut self) -> bool {
        let connected = self
            .connect_after_polls
            .map(|limit| self.polls >= limit)
            .unwrap_or(false);
        self.polls += 1;
        connected
    }
}

#[derive(Debug, Default)]
pub struct FakeClock {
    now_ms: u64,
    pub sleeps: Vec<u64>,
}

impl Clock for FakeClock {
    fn now_ms(&self) -> u64 {
        self.now_ms
    }

    fn sleep_ms(&mut self, ms: u64) {
        self.sleeps.push(ms);
        self.now_ms += ms;
    }
}

#[derive(Debug, Default)]
pub struct RecordingActuators {
    pub relay: bool,
    pub buzzer: bool,
    pub status_led: bool,
    pub applied: Vec<ControlAction>,
}

impl ActionSink for RecordingActuators {
    fn apply(&mut self, actions: &[ControlAction]) {
        for action in actions {
            match *action {
                ControlAction::Relay { energized, .. } => self.relay = energized,
                ControlAction::Buzzer(on) => self.buzzer = on,
                ControlAction::StatusLed(on) => self.status_led = on,
                ControlAction::StatusColor(_) => {}
            }
            self.applied.push(*action);
        }
    }
}
