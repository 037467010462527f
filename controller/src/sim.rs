use std::{
    thread,
    time::{Duration, Instant},
};

use kalorifer_common::{
    ActionSink, Clock, ControlAction, NetworkError, SensorSource, StaticIpConfig, StationLink,
    DEVICE_DISCONNECTED_C,
};
use tracing::{debug, info};

const HEATING_RATE_C_PER_S: f32 = 0.6;
const DUMP_RATE_C_PER_S: f32 = 0.9;
const WATER_DROPOUT_EVERY: u32 = 37;
const DHT_DROPOUT_EVERY: u32 = 53;

#[derive(Debug, Clone)]
pub struct SimulatedBoiler {
    water_c: f32,
    air_c: f32,
    humidity: f32,
    relay_energized: bool,
    runaway: bool,
    last_advance_ms: Option<u64>,
    water_reads: u32,
    air_reads: u32,
}

impl SimulatedBoiler {
    pub fn new(runaway: bool) -> Self {
        Self {
            water_c: 22.0,
            air_c: 21.5,
            humidity: 48.0,
            relay_energized: false,
            runaway,
            last_advance_ms: None,
            water_reads: 0,
            air_reads: 0,
        }
    }

    pub fn from_env() -> Self {
        let runaway = std::env::var("KALORIFER_SIM_RUNAWAY")
            .map(|value| !value.is_empty() && value != "0")
            .unwrap_or(false);
        if runaway {
            info!("simulation: runaway heating enabled, relay cannot shed heat");
        }
        Self::new(runaway)
    }

    pub fn water_c(&self) -> f32 {
        self.water_c
    }

    pub fn set_relay(&mut self, energized: bool) {
        self.relay_energized = energized;
    }

    pub fn advance(&mut self, now_ms: u64) {
        let Some(last) = self.last_advance_ms.replace(now_ms) else {
            return;
        };
        let dt_s = now_ms.saturating_sub(last) as f32 / 1000.0;

        let heating = !self.relay_energized || self.runaway;
        let rate = if heating {
            HEATING_RATE_C_PER_S
        } else {
            -DUMP_RATE_C_PER_S
        };
        self.water_c = (self.water_c + rate * dt_s).clamp(self.air_c, 110.0);
        self.air_c = 21.5 + 0.01 * (self.water_c - 22.0);
    }
}

impl ActionSink for SimulatedBoiler {
    fn apply(&mut self, actions: &[ControlAction]) {
        for action in actions {
            match *action {
                ControlAction::Relay {
                    energized,
                    authority,
                } => {
                    info!(
                        "relay {} ({authority:?})",
                        if energized { "energized" } else { "released" }
                    );
                    self.set_relay(energized);
                }
                ControlAction::Buzzer(on) => debug!("buzzer {}", if on { "on" } else { "off" }),
                ControlAction::StatusColor((r, g, b)) => {
                    info!("status colour #{r:02x}{g:02x}{b:02x}")
                }
                ControlAction::StatusLed(on) => {
                    info!("status led {}", if on { "on" } else { "off" })
                }
            }
        }
    }
}

impl SensorSource for SimulatedBoiler {
    fn read_water_temp_c(&mut self) -> f32 {
        self.water_reads = self.water_reads.wrapping_add(1);
        if self.water_reads % WATER_DROPOUT_EVERY == 0 {
            debug!("simulation: water probe dropout");
            return DEVICE_DISCONNECTED_C;
        }
        self.water_c
    }

    fn read_air_temp_c(&mut self) -> f32 {
        self.air_reads = self.air_reads.wrapping_add(1);
        if self.air_reads % DHT_DROPOUT_EVERY == 0 {
            return f32::NAN;
        }
        self.air_c
    }

    fn read_air_humidity(&mut self) -> f32 {
        if self.air_reads % DHT_DROPOUT_EVERY == 0 {
            return f32::NAN;
        }
        self.humidity
    }
}

#[derive(Debug)]
pub struct SimulatedStation {
    joins: bool,
    polls: u32,
}

impl SimulatedStation {
    const POLLS_TO_CONNECT: u32 = 3;

    pub fn new(joins: bool) -> Self {
        Self { joins, polls: 0 }
    }

    pub fn from_env() -> Self {
        let joins = std::env::var("KALORIFER_SIM_JOIN")
            .map(|value| !value.eq_ignore_ascii_case("fail"))
            .unwrap_or(true);
        Self::new(joins)
    }
}

impl StationLink for SimulatedStation {
    fn configure(&mut self, addressing: &StaticIpConfig) -> Result<(), NetworkError> {
        info!(
            "simulation: station ip {} gw {} /{}",
            addressing.ip,
            addressing.gateway,
            addressing.prefix_len()
        );
        Ok(())
    }

    fn begin(&mut self, ssid: &str, _passphrase: &str) -> Result<(), NetworkError> {
        info!("simulation: joining '{ssid}'");
        self.polls = 0;
        Ok(())
    }

    fn is_connected(&mut self) -> bool {
        self.polls += 1;
        self.joins && self.polls > Self::POLLS_TO_CONNECT
    }
}

#[derive(Debug)]
pub struct SystemClock {
    start: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis().try_into().unwrap_or(u64::MAX)
    }

    fn sleep_ms(&mut self, ms: u64) {
        thread::sleep(Duration::from_millis(ms));
    }
}

#[cfg(test)]
mod tests {
    use kalorifer_common::{ControlConfig, ControlCore, ControlUnit};

    use super::*;

    fn run(boiler: &mut SimulatedBoiler, from_ms: u64, to_ms: u64) {
        let mut now = from_ms;
        while now <= to_ms {
            boiler.advance(now);
            now += 100;
        }
    }

    #[test]
    fn released_relay_heats_and_energized_relay_dumps() {
        let mut boiler = SimulatedBoiler::new(false);
        run(&mut boiler, 0, 60_000);
        let heated = boiler.water_c();
        assert!(heated > 50.0, "{heated}");

        boiler.set_relay(true);
        run(&mut boiler, 60_100, 80_000);
        assert!(boiler.water_c() < heated);
    }

    #[test]
    fn runaway_ignores_relay() {
        let mut boiler = SimulatedBoiler::new(true);
        boiler.set_relay(true);
        run(&mut boiler, 0, 200_000);

        assert!(boiler.water_c() >= 90.0);
    }

    #[test]
    fn probe_drops_out_periodically() {
        let mut boiler = SimulatedBoiler::new(false);
        let samples: Vec<f32> = (0..WATER_DROPOUT_EVERY)
            .map(|_| boiler.read_water_temp_c())
            .collect();

        assert_eq!(samples.last().copied(), Some(DEVICE_DISCONNECTED_C));
        assert!(samples[..samples.len() - 1]
            .iter()
            .all(|sample| *sample != DEVICE_DISCONNECTED_C));
    }

    #[test]
    fn failing_station_never_connects() {
        let mut station = SimulatedStation::new(false);
        station.begin("Home", "secret").unwrap();

        assert!((0..20).all(|_| !station.is_connected()));
    }

    #[test]
    fn joining_station_connects_after_a_few_polls() {
        let mut station = SimulatedStation::new(true);
        station.begin("Home", "secret").unwrap();

        let polls = (1..=10).find(|_| station.is_connected());
        assert_eq!(polls, Some(4));
    }

    #[test]
    fn manual_override_reaches_the_simulated_relay() {
        let mut unit = ControlUnit::new(
            ControlCore::new(ControlConfig::default()),
            SimulatedBoiler::new(false),
        );
        run(unit.actuators_mut(), 0, 30_000);
        let heated = unit.actuators().water_c();

        unit.force_relay(true).unwrap();
        run(unit.actuators_mut(), 30_100, 40_000);

        assert!(unit.actuators().water_c() < heated);
    }
}
