#[derive(Debug, Clone)]
pub struct BuzzerPattern {
    toggle_interval_ms: u64,
    was_enabled: bool,
    output_on: bool,
    last_toggle_ms: u64,
}

impl BuzzerPattern {
    pub fn new(toggle_interval_ms: u64) -> Self {
        Self {
            toggle_interval_ms,
            was_enabled: false,
            output_on: false,
            last_toggle_ms: 0,
        }
    }

    pub fn is_sounding(&self) -> bool {
        self.output_on
    }

    pub fn tick(&mut self, now_ms: u64, enabled: bool) -> Option<bool> {
        if !enabled {
            if !self.was_enabled {
                return None;
            }
            self.was_enabled = false;
            self.last_toggle_ms = 0;
            let was_on = self.output_on;
            self.output_on = false;
            // Off-phase at disable time: the pin is already low.
            return was_on.then_some(false);
        }

        if !self.was_enabled {
            self.was_enabled = true;
            self.output_on = true;
            self.last_toggle_ms = now_ms;
            return Some(true);
        }

        if now_ms.saturating_sub(self.last_toggle_ms) < self.toggle_interval_ms {
            return None;
        }

        self.output_on = !self.output_on;
        self.last_toggle_ms = now_ms;
        Some(self.output_on)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn toggles_every_interval_while_enabled() {
        let mut buzzer = BuzzerPattern::new(500);
        let writes: Vec<(u64, bool)> = (0..=20)
            .map(|step| step * 100)
            .filter_map(|now| buzzer.tick(now, true).map(|level| (now, level)))
            .collect();

        assert_eq!(
            writes,
            vec![
                (0, true),
                (500, false),
                (1_000, true),
                (1_500, false),
                (2_000, true),
            ]
        );
    }

    #[test]
    fn disable_forces_off_immediately_from_on_phase() {
        let mut buzzer = BuzzerPattern::new(500);
        buzzer.tick(0, true);
        assert!(buzzer.is_sounding());

        assert_eq!(buzzer.tick(200, false), Some(false));
        assert!(!buzzer.is_sounding());
    }

    #[test]
    fn no_redundant_writes_while_disabled() {
        let mut buzzer = BuzzerPattern::new(500);
        assert_eq!(buzzer.tick(0, false), None);

        buzzer.tick(100, true);
        buzzer.tick(600, true);
        assert!(!buzzer.is_sounding());

        let writes: Vec<_> = (7..30).filter_map(|step| buzzer.tick(step * 100, false)).collect();
        assert!(writes.is_empty());
        assert!(!buzzer.is_sounding());
    }

    #[test]
    fn re_enable_restarts_pattern_from_on() {
        let mut buzzer = BuzzerPattern::new(500);
        buzzer.tick(0, true);
        buzzer.tick(500, true);
        buzzer.tick(700, false);

        assert_eq!(buzzer.tick(800, true), Some(true));
        assert_eq!(buzzer.tick(1_200, true), None);
        assert_eq!(buzzer.tick(1_300, true), Some(false));
    }
}
