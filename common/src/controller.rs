use log::{info, warn};

use crate::{
    alarm::{AlarmLayer, AlarmTransition},
    buzzer::BuzzerPattern,
    config::{ControlConfig, ThresholdPair},
    relay::HysteresisController,
    sensor::{Rgb, SensorAdapter, SensorSample, SensorSource, TemperatureBand},
    telemetry::TelemetryScheduler,
    types::{SensorSnapshot, TelemetryPayload},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayAuthority {
    Hysteresis,
    AlarmPulse,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Relay {
        energized: bool,
        authority: RelayAuthority,
    },
    Buzzer(bool),
    StatusColor(Rgb),
    StatusLed(bool),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickOutput {
    pub actions: Vec<ControlAction>,
    pub alarm: Option<AlarmTransition>,
    pub telemetry: Option<TelemetryPayload>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayBusy;

pub trait ActionSink {
    fn apply(&mut self, actions: &[ControlAction]);
}

#[derive(Debug, Clone)]
pub struct ControlCore {
    pub config: ControlConfig,
    sensors: SensorAdapter,
    hysteresis: HysteresisController,
    alarm: AlarmLayer,
    buzzer: BuzzerPattern,
    telemetry: TelemetryScheduler,
    relay_energized: bool,
    status_led_on: bool,
    shown_band: Option<TemperatureBand>,
}

impl ControlCore {
    pub fn new(config: ControlConfig) -> Self {
        Self {
            sensors: SensorAdapter::new(config.sensor_poll_interval_ms),
            hysteresis: HysteresisController::new(config.relay),
            alarm: AlarmLayer::new(
                config.alarm,
                config.alarm_pulse_count,
                config.alarm_pulse_half_period_ms,
            ),
            buzzer: BuzzerPattern::new(config.buzzer_toggle_interval_ms),
            telemetry: TelemetryScheduler::new(config.telemetry_interval_ms),
            relay_energized: false,
            status_led_on: false,
            shown_band: None,
            config,
        }
    }

    pub fn snapshot(&self) -> &SensorSnapshot {
        self.sensors.snapshot()
    }

    pub fn relay_thresholds(&self) -> ThresholdPair {
        self.hysteresis.thresholds()
    }

    pub fn is_relay_energized(&self) -> bool {
        self.relay_energized
    }

    pub fn is_cooling_active(&self) -> bool {
        self.hysteresis.is_cooling_active()
    }

    pub fn is_alarm_armed(&self) -> bool {
        self.alarm.is_armed()
    }

    pub fn is_alarm_pulsing(&self) -> bool {
        self.alarm.is_pulsing()
    }

    pub fn buzzer_enabled(&self) -> bool {
        self.alarm.buzzer_enabled()
    }

    pub fn is_status_led_on(&self) -> bool {
        self.status_led_on
    }

    pub fn sensors_due(&self, now_ms: u64) -> bool {
        self.sensors.is_due(now_ms)
    }

    pub fn telemetry_payload(&self) -> TelemetryPayload {
        TelemetryPayload::new(self.sensors.snapshot(), self.hysteresis.thresholds())
    }

    pub fn tick<S: SensorSource + ?Sized>(&mut self, now_ms: u64, source: &mut S) -> TickOutput {
        let mut out = TickOutput::default();

        if self.sensors.poll(now_ms, source) {
            let band = self.sensors.band();
            if self.shown_band != Some(band) {
                self.shown_band = Some(band);
                out.actions.push(ControlAction::StatusColor(band.color()));
            }
        }

        let water_temp = self.sensors.snapshot().water_temp.value;
        let hysteresis_edge = self.hysteresis.evaluate(water_temp);
        let alarm = self.alarm.update(now_ms, water_temp);
        out.alarm = alarm.transition;

        if alarm.owned_relay {
            if let Some(level) = alarm.relay {
                self.write_relay(level, RelayAuthority::AlarmPulse, &mut out.actions);
            }
            if alarm.released_relay {
                let latched = self.hysteresis.is_cooling_active();
                if latched != self.relay_energized {
                    self.write_relay(latched, RelayAuthority::Hysteresis, &mut out.actions);
                }
            }
        } else if let Some(level) = hysteresis_edge {
            info!(
                "water {:.1}°C: relay {}",
                water_temp,
                if level { "energized" } else { "released" }
            );
            self.write_relay(level, RelayAuthority::Hysteresis, &mut out.actions);
        }

        if let Some(level) = self.buzzer.tick(now_ms, self.alarm.buzzer_enabled()) {
            out.actions.push(ControlAction::Buzzer(level));
        }

        out.telemetry = self.telemetry.maybe_push(
            now_ms,
            self.sensors.snapshot(),
            self.hysteresis.thresholds(),
        );

        out
    }

    pub fn force_relay(&mut self, energized: bool) -> Result<Vec<ControlAction>, RelayBusy> {
        if self.alarm.is_pulsing() {
            warn!("manual relay override refused while alarm pulse train is running");
            return Err(RelayBusy);
        }

        let mut actions = Vec::new();
        self.write_relay(energized, RelayAuthority::Manual, &mut actions);
        self.status_led_on = energized;
        actions.push(ControlAction::StatusLed(energized));
        Ok(actions)
    }

    fn write_relay(
        &mut self,
        energized: bool,
        authority: RelayAuthority,
        actions: &mut Vec<ControlAction>,
    ) {
        self.relay_energized = energized;
        actions.push(ControlAction::Relay {
            energized,
            authority,
        });
    }
}

// Decisions and pin writes happen under the same borrow, so the physical
// relay always matches `ControlCore::is_relay_energized`.
#[derive(Debug)]
pub struct ControlUnit<A> {
    core: ControlCore,
    actuators: A,
}

impl<A: ActionSink> ControlUnit<A> {
    pub fn new(core: ControlCore, actuators: A) -> Self {
        Self { core, actuators }
    }

    pub fn core(&self) -> &ControlCore {
        &self.core
    }

    pub fn actuators(&self) -> &A {
        &self.actuators
    }

    pub fn actuators_mut(&mut self) -> &mut A {
        &mut self.actuators
    }

    pub fn sensors_due(&self, now_ms: u64) -> bool {
        self.core.sensors_due(now_ms)
    }

    // `sample` is read by the caller outside the lock guarding this unit;
    // `None` is fine whenever `sensors_due` was false.
    pub fn tick(&mut self, now_ms: u64, sample: Option<SensorSample>) -> TickOutput {
        let mut source = sample.unwrap_or(SensorSample::UNAVAILABLE);
        let output = self.core.tick(now_ms, &mut source);
        self.actuators.apply(&output.actions);
        output
    }

    pub fn force_relay(&mut self, energized: bool) -> Result<(), RelayBusy> {
        let actions = self.core.force_relay(energized)?;
        self.actuators.apply(&actions);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingActuators, ScriptedSensor};
    use pretty_assertions::assert_eq;

    fn config(relay: ThresholdPair) -> ControlConfig {
        ControlConfig {
            relay,
            ..ControlConfig::default()
        }
    }

    fn relay_writes(actions: &[ControlAction]) -> Vec<(bool, RelayAuthority)> {
        actions
            .iter()
            .filter_map(|action| match action {
                ControlAction::Relay {
                    energized,
                    authority,
                } => Some((*energized, *authority)),
                _ => None,
            })
            .collect()
    }

    fn run_samples(core: &mut ControlCore, start_ms: u64, samples: &[f32]) -> Vec<TickOutput> {
        let mut sensor = ScriptedSensor {
            water: samples.to_vec(),
            air: 21.0,
            humidity: 45.0,
            ..Default::default()
        };
        let mut outputs = Vec::new();
        let end = start_ms + samples.len() as u64 * 1_000;
        let mut now = start_ms;
        while now < end {
            outputs.push(core.tick(now, &mut sensor));
            now += 100;
        }
        outputs
    }

    fn all_relay_writes(outputs: &[TickOutput]) -> Vec<(bool, RelayAuthority)> {
        outputs
            .iter()
            .flat_map(|out| relay_writes(&out.actions))
            .collect()
    }

    #[test]
    fn relay_switches_once_per_crossing() {
        let mut core = ControlCore::new(config(ThresholdPair::new(60.0, 55.0)));

        let rising = run_samples(&mut core, 0, &[50.0, 53.0, 56.0, 58.0, 61.0, 61.0]);
        assert_eq!(
            all_relay_writes(&rising),
            vec![(true, RelayAuthority::Hysteresis)]
        );

        let falling = run_samples(&mut core, 10_000, &[61.0, 58.0, 56.0, 54.0, 54.0]);
        assert_eq!(
            all_relay_writes(&falling),
            vec![(false, RelayAuthority::Hysteresis)]
        );

        let wobble = run_samples(&mut core, 20_000, &[58.0, 59.0, 58.0, 59.0, 58.0, 59.0]);
        assert!(all_relay_writes(&wobble).is_empty());
        assert!(!core.is_relay_energized());
    }

    #[test]
    fn alarm_entry_with_relay_on_pulses_three_cycles() {
        let mut core = ControlCore::new(ControlConfig::default());
        run_samples(&mut core, 0, &[75.0]);
        assert!(core.is_relay_energized());

        let outputs = run_samples(&mut core, 1_000, &[91.0, 91.0, 91.0, 91.0]);
        let writes = all_relay_writes(&outputs);

        assert_eq!(
            writes,
            vec![
                (false, RelayAuthority::AlarmPulse),
                (true, RelayAuthority::AlarmPulse),
                (false, RelayAuthority::AlarmPulse),
                (true, RelayAuthority::AlarmPulse),
                (false, RelayAuthority::AlarmPulse),
                (true, RelayAuthority::AlarmPulse),
            ]
        );
        assert_eq!(outputs[0].alarm, Some(AlarmTransition::Armed));
        assert!(core.buzzer_enabled());
        assert!(core.is_relay_energized());
    }

    #[test]
    fn single_relay_authority_per_tick() {
        let mut core = ControlCore::new(ControlConfig::default());
        let samples = [
            20.0, 50.0, 91.0, 72.0, 95.0, 86.0, 58.0, 91.0, 91.0, 84.0, 65.0, 55.0,
        ];

        for out in run_samples(&mut core, 0, &samples) {
            let writes = relay_writes(&out.actions);
            if let Some((_, first)) = writes.first() {
                assert!(writes.iter().all(|(_, authority)| authority == first));
            }
        }
    }

    #[test]
    fn hysteresis_suppressed_while_pulsing_then_reasserted() {
        let mut core = ControlCore::new(ControlConfig::default());

        // Cold start straight into the alarm band: the latch turns on but the
        // pulse train owns the relay until it ends.
        let outputs = run_samples(&mut core, 0, &[92.0, 92.0, 92.0, 50.0, 50.0]);
        let writes = all_relay_writes(&outputs);

        assert!(writes[..6]
            .iter()
            .all(|(_, authority)| *authority == RelayAuthority::AlarmPulse));
        assert_eq!(writes.last(), Some(&(false, RelayAuthority::Hysteresis)));
        assert!(!core.is_relay_energized());
        assert!(!core.is_alarm_armed());
        assert!(!core.buzzer_enabled());
    }

    fn armed_with_buzzer_enabled() -> ControlCore {
        // Pulse train ends at 3_000; the buzzer sounds 3_000..3_500 and is
        // quiet for the rest of the run.
        let mut core = ControlCore::new(ControlConfig::default());
        let outputs = run_samples(&mut core, 0, &[91.0, 91.0, 91.0, 91.0]);
        assert!(core.buzzer_enabled());
        assert!(outputs
            .iter()
            .any(|out| out.actions.contains(&ControlAction::Buzzer(true))));
        assert!(!core.buzzer.is_sounding());
        core
    }

    #[test]
    fn buzzer_silenced_when_alarm_clears_during_on_phase() {
        let mut core = armed_with_buzzer_enabled();
        let mut sensor = ScriptedSensor {
            water: vec![91.0, 85.0],
            ..Default::default()
        };

        let on = core.tick(4_000, &mut sensor);
        assert!(on.actions.contains(&ControlAction::Buzzer(true)));
        assert!(core.buzzer.is_sounding());

        let out = core.tick(5_000, &mut sensor);
        assert_eq!(out.alarm, Some(AlarmTransition::Cleared));
        assert!(!core.buzzer_enabled());
        assert!(out.actions.contains(&ControlAction::Buzzer(false)));
        assert!(!core.buzzer.is_sounding());
    }

    #[test]
    fn no_buzzer_write_when_alarm_clears_during_off_phase() {
        let mut core = armed_with_buzzer_enabled();
        let mut sensor = ScriptedSensor {
            water: vec![85.0],
            ..Default::default()
        };

        let out = core.tick(4_200, &mut sensor);
        assert_eq!(out.alarm, Some(AlarmTransition::Cleared));
        assert!(!core.buzzer_enabled());
        assert!(!out
            .actions
            .iter()
            .any(|action| matches!(action, ControlAction::Buzzer(_))));
        assert!(!core.buzzer.is_sounding());

        // Stays quiet afterwards.
        let later = core.tick(5_200, &mut sensor);
        assert!(!later.actions.contains(&ControlAction::Buzzer(true)));
    }

    #[test]
    fn status_color_written_only_on_band_change() {
        let mut core = ControlCore::new(ControlConfig::default());
        let outputs = run_samples(&mut core, 0, &[20.0, 30.0, 40.0, 45.0, 65.0]);

        let colors: Vec<Rgb> = outputs
            .iter()
            .flat_map(|out| out.actions.iter())
            .filter_map(|action| match action {
                ControlAction::StatusColor(rgb) => Some(*rgb),
                _ => None,
            })
            .collect();

        assert_eq!(colors, vec![(0, 0, 0), (0, 255, 255), (255, 255, 0)]);
    }

    #[test]
    fn manual_override_refused_during_pulse() {
        let mut core = ControlCore::new(ControlConfig::default());
        run_samples(&mut core, 0, &[91.0]);
        assert!(core.is_alarm_pulsing());

        assert_eq!(core.force_relay(false), Err(RelayBusy));
    }

    #[test]
    fn manual_override_drives_relay_and_status_led() {
        let mut core = ControlCore::new(ControlConfig::default());

        let actions = core.force_relay(true).unwrap();

        assert_eq!(
            actions,
            vec![
                ControlAction::Relay {
                    energized: true,
                    authority: RelayAuthority::Manual
                },
                ControlAction::StatusLed(true),
            ]
        );
        assert!(core.is_relay_energized());
        assert!(!core.is_cooling_active());
    }

    #[test]
    fn telemetry_reports_live_thresholds() {
        let mut core = ControlCore::new(config(ThresholdPair::new(60.0, 55.0)));
        let outputs = run_samples(&mut core, 0, &[57.0, 57.0, 57.0, 57.0]);

        let pushes: Vec<_> = outputs.iter().filter_map(|out| out.telemetry).collect();

        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].water_temp, 57.0);
        assert_eq!(pushes[0].humidity, 45.0);
        assert_eq!(pushes[0].water_temp_threshold_hi, 60.0);
        assert_eq!(pushes[0].water_temp_threshold_lo, 55.0);
    }

    fn unit_tick(
        unit: &mut ControlUnit<RecordingActuators>,
        now_ms: u64,
        sensor: &mut ScriptedSensor,
    ) -> TickOutput {
        let sample = unit
            .sensors_due(now_ms)
            .then(|| SensorSample::read(sensor));
        unit.tick(now_ms, sample)
    }

    #[test]
    fn relay_pin_follows_core_across_ticks_and_overrides() {
        let mut unit = ControlUnit::new(
            ControlCore::new(ControlConfig::default()),
            RecordingActuators::default(),
        );
        let mut sensor = ScriptedSensor {
            water: vec![75.0, 55.0, 55.0, 75.0, 58.0],
            air: 21.0,
            humidity: 45.0,
            ..Default::default()
        };

        // Tick edges interleaved with manual writes, including an override
        // landing right after a tick released the relay.
        let steps: [(u64, Option<bool>); 8] = [
            (0, None),
            (1_000, None),
            (1_050, Some(true)),
            (2_000, None),
            (2_100, Some(false)),
            (3_000, None),
            (3_100, Some(false)),
            (4_000, None),
        ];
        for (now, manual) in steps {
            match manual {
                Some(level) => unit.force_relay(level).unwrap(),
                None => {
                    unit_tick(&mut unit, now, &mut sensor);
                }
            }
            assert_eq!(
                unit.actuators().relay,
                unit.core().is_relay_energized(),
                "at {now} ms"
            );
        }
    }

    #[test]
    fn override_refused_during_pulse_leaves_pins_alone() {
        let mut unit = ControlUnit::new(
            ControlCore::new(ControlConfig::default()),
            RecordingActuators::default(),
        );
        let mut sensor = ScriptedSensor {
            water: vec![92.0],
            ..Default::default()
        };
        unit_tick(&mut unit, 0, &mut sensor);
        let applied = unit.actuators().applied.len();

        assert_eq!(unit.force_relay(true), Err(RelayBusy));
        assert_eq!(unit.actuators().applied.len(), applied);
        assert!(!unit.actuators().status_led);
    }

    #[test]
    fn sensors_not_read_between_polls() {
        let mut unit = ControlUnit::new(
            ControlCore::new(ControlConfig::default()),
            RecordingActuators::default(),
        );
        let mut sensor = ScriptedSensor {
            water: vec![40.0, 41.0],
            air: 21.0,
            humidity: 45.0,
            ..Default::default()
        };

        for now in (0..1_000).step_by(100) {
            unit_tick(&mut unit, now, &mut sensor);
        }

        assert_eq!(sensor.reads, 1);
        assert!(unit.core().snapshot().water_temp.valid);
        assert_eq!(unit.core().snapshot().water_temp.value, 40.0);
    }
}
