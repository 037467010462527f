pub mod alarm;
pub mod buzzer;
pub mod config;
pub mod controller;
pub mod network;
pub mod provisioning;
pub mod push;
pub mod relay;
pub mod sensor;
pub mod telemetry;
pub mod types;
pub mod web;

#[cfg(test)]
pub(crate) mod testing;

pub use alarm::{AlarmLayer, AlarmTransition, PulseStep, PulseTrain};
pub use buzzer::BuzzerPattern;
pub use config::{ConfigError, ControlConfig, NetworkTimings, RuntimeConfig, ThresholdPair};
pub use controller::{
    ActionSink, ControlAction, ControlCore, ControlUnit, RelayAuthority, RelayBusy, TickOutput,
};
pub use network::{
    parse_ipv4, Clock, CredentialKey, CredentialStore, ModeResolver, NetworkCredentials,
    NetworkError, StaticIpConfig, StationLink, StoreError,
};
pub use provisioning::{apply_submission, ProvisioningSubmission};
pub use push::{SessionId, SubscriberHandle, SubscriberRegistry};
pub use relay::HysteresisController;
pub use sensor::{
    Rgb, SensorAdapter, SensorSample, SensorSource, TemperatureBand, DEVICE_DISCONNECTED_C,
};
pub use telemetry::TelemetryScheduler;
pub use types::{NetworkMode, PushEvent, Reading, SensorSnapshot, TelemetryPayload};
pub use web::render_index;
