// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Synthetic I/Q source for development and testing.
//!
//! Produces a single carrier plus uniform noise. The carrier sits at a fixed
//! RF frequency, so retuning moves it within (or out of) the baseband.
//! No hardware required; also used as the receiver's fallback source.

use std::f64::consts::TAU;

use num_complex::Complex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use trx_core::{DynResult, FreqRange, GainRange, RxError, SampleSource};

use crate::DeviceSpec;

const DEFAULT_RATE: f64 = 96_000.0;
const DEFAULT_FREQ_HZ: f64 = 144_800_000.0;
const DEFAULT_TONE_OFFSET_HZ: f64 = 10_000.0;
const DEFAULT_LEVEL: f32 = 0.25;
const DEFAULT_NOISE: f32 = 0.01;
const MIN_RATE: f64 = 8_000.0;
const MAX_RATE: f64 = 20_000_000.0;
const GAIN_NAME: &str = "LNA";
const GAIN_RANGE: GainRange = GainRange {
    min_db: 0.0,
    max_db: 40.0,
    step_db: 1.0,
};
const FREQ_RANGE: FreqRange = FreqRange {
    low_hz: 1_000_000.0,
    high_hz: 6_000_000_000.0,
};
const ANTENNA: &str = "RX";

pub struct DummySource {
    rate: f64,
    center_hz: f64,
    carrier_hz: f64,
    level: f32,
    noise: f32,
    phase: f64,
    rng: StdRng,
    gain_db: f64,
    auto_gain: bool,
    bandwidth_hz: f64,
    freq_corr_ppm: f64,
    iq_balance_mode: u32,
}

impl Default for DummySource {
    fn default() -> Self {
        Self::new(DEFAULT_RATE, DEFAULT_FREQ_HZ)
    }
}

impl DummySource {
    pub fn new(rate: f64, center_hz: f64) -> Self {
        Self {
            rate,
            center_hz,
            carrier_hz: center_hz + DEFAULT_TONE_OFFSET_HZ,
            level: DEFAULT_LEVEL,
            noise: DEFAULT_NOISE,
            phase: 0.0,
            rng: StdRng::from_entropy(),
            gain_db: 0.0,
            auto_gain: false,
            bandwidth_hz: 0.0,
            freq_corr_ppm: 0.0,
            iq_balance_mode: 0,
        }
    }

    /// Keys: `rate`, `freq`, `tone` (carrier offset from `freq`), `level`,
    /// `noise`, `seed`.
    pub fn from_spec(spec: &DeviceSpec) -> DynResult<Self> {
        let rate = spec.get_parsed::<f64>("rate")?.unwrap_or(DEFAULT_RATE);
        if !(MIN_RATE..=MAX_RATE).contains(&rate) {
            return Err(format!("dummy: sample rate {} out of range", rate).into());
        }
        let freq = spec.get_parsed::<f64>("freq")?.unwrap_or(DEFAULT_FREQ_HZ);
        let mut src = Self::new(rate, freq);
        if let Some(tone) = spec.get_parsed::<f64>("tone")? {
            src.carrier_hz = freq + tone;
        }
        if let Some(level) = spec.get_parsed::<f32>("level")? {
            src.level = level.max(0.0);
        }
        if let Some(noise) = spec.get_parsed::<f32>("noise")? {
            src.noise = noise.max(0.0);
        }
        if let Some(seed) = spec.get_parsed::<u64>("seed")? {
            src.rng = StdRng::seed_from_u64(seed);
        }
        Ok(src)
    }

    /// Absolute frequency of the synthetic carrier.
    pub fn carrier_hz(&self) -> f64 {
        self.carrier_hz
    }

    /// Last I/Q balance mode requested by the receiver.
    pub fn iq_balance_mode(&self) -> u32 {
        self.iq_balance_mode
    }

    fn linear_gain(&self) -> f32 {
        let db = if self.auto_gain {
            (GAIN_RANGE.min_db + GAIN_RANGE.max_db) / 2.0
        } else {
            self.gain_db
        };
        10.0_f64.powf(db / 20.0) as f32
    }

    /// Tuned frequency including the crystal correction.
    fn corrected_center(&self) -> f64 {
        self.center_hz * (1.0 + self.freq_corr_ppm * 1e-6)
    }
}

impl SampleSource for DummySource {
    fn read_into(&mut self, buf: &mut [Complex<f32>]) -> DynResult<usize> {
        let offset = self.carrier_hz - self.corrected_center();
        let in_band = offset.abs() < self.rate / 2.0;
        let inc = if in_band { TAU * offset / self.rate } else { 0.0 };
        let level = if in_band { self.level } else { 0.0 };
        let k = self.linear_gain();
        for s in buf.iter_mut() {
            let carrier = Complex::from_polar(level, self.phase as f32);
            let noise = Complex::new(
                self.rng.gen_range(-1.0_f32..=1.0) * self.noise,
                self.rng.gen_range(-1.0_f32..=1.0) * self.noise,
            );
            *s = (carrier + noise) * k;
            self.phase = (self.phase + inc) % TAU;
        }
        Ok(buf.len())
    }

    fn is_throttled(&self) -> bool {
        true
    }

    fn sample_rate(&self) -> f64 {
        self.rate
    }

    fn set_sample_rate(&mut self, rate: f64) -> f64 {
        if !(MIN_RATE..=MAX_RATE).contains(&rate) {
            return 0.0;
        }
        self.rate = rate;
        rate
    }

    fn center_freq(&self) -> f64 {
        self.center_hz
    }

    fn set_center_freq(&mut self, hz: f64) -> DynResult<f64> {
        if !FREQ_RANGE.contains(hz) {
            return Err(Box::new(RxError::invalid(format!(
                "dummy: {} Hz outside tuning range",
                hz
            ))));
        }
        self.center_hz = hz;
        Ok(hz)
    }

    fn freq_range(&self) -> Option<FreqRange> {
        Some(FREQ_RANGE)
    }

    fn bandwidth(&self) -> f64 {
        self.bandwidth_hz
    }

    fn set_bandwidth(&mut self, hz: f64) -> DynResult<f64> {
        self.bandwidth_hz = hz.max(0.0);
        Ok(self.bandwidth_hz)
    }

    fn gain_names(&self) -> Vec<String> {
        vec![GAIN_NAME.to_string()]
    }

    fn gain_range(&self, name: &str) -> Option<GainRange> {
        name.eq_ignore_ascii_case(GAIN_NAME).then_some(GAIN_RANGE)
    }

    fn gain(&self, name: &str) -> Option<f64> {
        name.eq_ignore_ascii_case(GAIN_NAME).then_some(self.gain_db)
    }

    fn set_gain(&mut self, name: &str, db: f64) -> DynResult<f64> {
        if !name.eq_ignore_ascii_case(GAIN_NAME) {
            return Err(Box::new(RxError::invalid(format!(
                "dummy: no gain stage '{}'",
                name
            ))));
        }
        self.gain_db = db.clamp(GAIN_RANGE.min_db, GAIN_RANGE.max_db).round();
        Ok(self.gain_db)
    }

    fn set_gain_mode(&mut self, automatic: bool) -> DynResult<()> {
        self.auto_gain = automatic;
        Ok(())
    }

    fn antennas(&self) -> Vec<String> {
        vec![ANTENNA.to_string()]
    }

    fn set_antenna(&mut self, name: &str) -> DynResult<()> {
        if name != ANTENNA {
            return Err(Box::new(RxError::invalid(format!(
                "dummy: no antenna '{}'",
                name
            ))));
        }
        Ok(())
    }

    fn set_freq_corr(&mut self, ppm: f64) -> DynResult<()> {
        self.freq_corr_ppm = ppm;
        Ok(())
    }

    fn set_iq_balance_mode(&mut self, mode: u32) -> DynResult<()> {
        self.iq_balance_mode = mode;
        Ok(())
    }
}
