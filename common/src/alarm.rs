use log::{info, warn};

use crate::config::ThresholdPair;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmTransition {
    Armed,
    Cleared,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PulseTrain {
    half_period_ms: u64,
    edges_total: u16,
    edges_done: u16,
    next_deadline_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulseStep {
    Write(bool),
    Waiting,
    Finished,
}

impl PulseTrain {
    pub fn new(cycles: u8, half_period_ms: u64, now_ms: u64) -> Self {
        Self {
            half_period_ms,
            edges_total: u16::from(cycles) * 2,
            edges_done: 0,
            next_deadline_ms: now_ms,
        }
    }

    // Even edges release the relay, odd edges energize it; the train ends one
    // half-period after the last edge.
    pub fn step(&mut self, now_ms: u64) -> PulseStep {
        if now_ms < self.next_deadline_ms {
            return PulseStep::Waiting;
        }
        if self.edges_done >= self.edges_total {
            return PulseStep::Finished;
        }

        let energize = self.edges_done % 2 == 1;
        self.edges_done += 1;
        self.next_deadline_ms = now_ms.saturating_add(self.half_period_ms);
        PulseStep::Write(energize)
    }

    pub fn cycles_completed(&self) -> u16 {
        self.edges_done / 2
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlarmUpdate {
    pub transition: Option<AlarmTransition>,
    pub relay: Option<bool>,
    pub owned_relay: bool,
    pub released_relay: bool,
}

#[derive(Debug, Clone)]
pub struct AlarmLayer {
    thresholds: ThresholdPair,
    pulse_cycles: u8,
    pulse_half_period_ms: u64,
    armed: bool,
    buzzer_enabled: bool,
    pulse: Option<PulseTrain>,
}

impl AlarmLayer {
    pub fn new(thresholds: ThresholdPair, pulse_cycles: u8, pulse_half_period_ms: u64) -> Self {
        Self {
            thresholds,
            pulse_cycles,
            pulse_half_period_ms,
            armed: false,
            buzzer_enabled: false,
            pulse: None,
        }
    }

    pub fn thresholds(&self) -> ThresholdPair {
        self.thresholds
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn buzzer_enabled(&self) -> bool {
        self.buzzer_enabled
    }

    pub fn is_pulsing(&self) -> bool {
        self.pulse.is_some()
    }

    pub fn update(&mut self, now_ms: u64, water_temp_c: f32) -> AlarmUpdate {
        let mut update = AlarmUpdate::default();

        if water_temp_c >= self.thresholds.high && !self.armed {
            warn!(
                "water temperature {:.1}°C reached alarm threshold {:.1}°C",
                water_temp_c, self.thresholds.high
            );
            self.armed = true;
            update.transition = Some(AlarmTransition::Armed);
            if self.pulse.is_none() {
                self.pulse = Some(PulseTrain::new(
                    self.pulse_cycles,
                    self.pulse_half_period_ms,
                    now_ms,
                ));
            }
        } else if water_temp_c <= self.thresholds.low && self.armed {
            info!(
                "water temperature {:.1}°C back below alarm release {:.1}°C",
                water_temp_c, self.thresholds.low
            );
            self.armed = false;
            self.buzzer_enabled = false;
            update.transition = Some(AlarmTransition::Cleared);
        }

        let Some(pulse) = self.pulse.as_mut() else {
            return update;
        };

        update.owned_relay = true;
        match pulse.step(now_ms) {
            PulseStep::Write(level) => update.relay = Some(level),
            PulseStep::Waiting => {}
            PulseStep::Finished => {
                self.pulse = None;
                update.released_relay = true;
                if self.armed {
                    self.buzzer_enabled = true;
                }
            }
        }

        update
    }
}
