use crate::config::ThresholdPair;

#[derive(Debug, Clone)]
pub struct HysteresisController {
    thresholds: ThresholdPair,
    cooling_active: bool,
}

impl HysteresisController {
    pub fn new(thresholds: ThresholdPair) -> Self {
        Self {
            thresholds,
            cooling_active: false,
        }
    }

    pub fn thresholds(&self) -> ThresholdPair {
        self.thresholds
    }

    pub fn is_cooling_active(&self) -> bool {
        self.cooling_active
    }

    pub fn evaluate(&mut self, water_temp_c: f32) -> Option<bool> {
        if water_temp_c >= self.thresholds.high && !self.cooling_active {
            self.cooling_active = true;
            Some(true)
        } else if water_temp_c <= self.thresholds.low && self.cooling_active {
            self.cooling_active = false;
            Some(false)
        } else {
            None
        }
    }
}
