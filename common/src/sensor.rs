use log::{debug, warn};

use crate::types::SensorSnapshot;

pub const DEVICE_DISCONNECTED_C: f32 = -127.0;

pub trait SensorSource {
    fn read_water_temp_c(&mut self) -> f32;
    fn read_air_temp_c(&mut self) -> f32;
    fn read_air_humidity(&mut self) -> f32;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorSample {
    pub water_temp_c: f32,
    pub air_temp_c: f32,
    pub air_humidity: f32,
}

impl SensorSample {
    pub const UNAVAILABLE: Self = Self {
        water_temp_c: DEVICE_DISCONNECTED_C,
        air_temp_c: f32::NAN,
        air_humidity: f32::NAN,
    };

    // Same call order as `SensorAdapter::poll`: drivers may cache humidity
    // from the air temperature transaction.
    pub fn read<S: SensorSource + ?Sized>(source: &mut S) -> Self {
        let air_temp_c = source.read_air_temp_c();
        let air_humidity = source.read_air_humidity();
        let water_temp_c = source.read_water_temp_c();
        Self {
            water_temp_c,
            air_temp_c,
            air_humidity,
        }
    }
}

impl SensorSource for SensorSample {
    fn read_water_temp_c(&mut self) -> f32 {
        self.water_temp_c
    }

    fn read_air_temp_c(&mut self) -> f32 {
        self.air_temp_c
    }

    fn read_air_humidity(&mut self) -> f32 {
        self.air_humidity
    }
}

pub type Rgb = (u8, u8, u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemperatureBand {
    Cold,
    Warm,
    Hot,
    VeryHot,
    Critical,
}

impl TemperatureBand {
    pub fn from_water_temp(water_temp_c: f32) -> Self {
        if water_temp_c >= 95.0 {
            Self::Critical
        } else if water_temp_c >= 80.0 {
            Self::VeryHot
        } else if water_temp_c >= 60.0 {
            Self::Hot
        } else if water_temp_c >= 35.0 {
            Self::Warm
        } else {
            Self::Cold
        }
    }

    pub fn color(self) -> Rgb {
        match self {
            Self::Critical => (255, 0, 0),
            Self::VeryHot => (255, 140, 0),
            Self::Hot => (255, 255, 0),
            Self::Warm => (0, 255, 255),
            Self::Cold => (0, 0, 0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SensorAdapter {
    interval_ms: u64,
    last_poll_ms: Option<u64>,
    snapshot: SensorSnapshot,
    band: TemperatureBand,
}

impl SensorAdapter {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            last_poll_ms: None,
            snapshot: SensorSnapshot::default(),
            band: TemperatureBand::from_water_temp(0.0),
        }
    }

    pub fn snapshot(&self) -> &SensorSnapshot {
        &self.snapshot
    }

    pub fn band(&self) -> TemperatureBand {
        self.band
    }

    pub fn is_due(&self, now_ms: u64) -> bool {
        self.last_poll_ms
            .map(|last| now_ms.saturating_sub(last) >= self.interval_ms)
            .unwrap_or(true)
    }

    pub fn poll<S: SensorSource + ?Sized>(&mut self, now_ms: u64, source: &mut S) -> bool {
        if !self.is_due(now_ms) {
            return false;
        }
        self.last_poll_ms = Some(now_ms);

        let air_temp = source.read_air_temp_c();
        let air_temp_ok = air_temp.is_finite();
        if !air_temp_ok {
            warn!("error reading air temperature");
        }
        self.snapshot.air_temp.record(air_temp, air_temp_ok, now_ms);

        let humidity = source.read_air_humidity();
        let humidity_ok = humidity.is_finite();
        if !humidity_ok {
            warn!("error reading air humidity");
        }
        self.snapshot.air_hum.record(humidity, humidity_ok, now_ms);

        let water = source.read_water_temp_c();
        let water_ok = water.is_finite() && water != DEVICE_DISCONNECTED_C;
        if !water_ok {
            warn!("error reading water temperature (probe disconnected?)");
        }
        self.snapshot.water_temp.record(water, water_ok, now_ms);

        self.band = TemperatureBand::from_water_temp(self.snapshot.water_temp.value);
        debug!(
            "sensors: air {:.1}°C / {:.1}%RH, water {:.1}°C",
            self.snapshot.air_temp.value, self.snapshot.air_hum.value, self.snapshot.water_temp.value
        );
        true
    }
}
