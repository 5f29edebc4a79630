// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use num_complex::Complex;

/// Fixed attack time of the envelope follower.
const ATTACK_MS: f32 = 2.0;
/// Output level the AGC levels towards.
const TARGET: f32 = 0.5;

/// Complex-domain AGC with a fast-attack / slow-decay envelope follower.
///
/// The gain never exceeds `-threshold_db`. With a non-zero `slope_db` the
/// output level drops by that many dB per 10 dB of input below full scale. With hang enabled the gain is held for one
/// decay period after a peak before it starts recovering. When the AGC is
/// off a fixed `manual_gain_db` is applied instead.
#[derive(Debug, Clone)]
pub struct Agc {
    sample_rate: f32,
    enabled: bool,
    hang: bool,
    threshold_db: i32,
    slope_db: i32,
    decay_ms: i32,
    manual_gain_db: i32,
    gain: f32,
    envelope: f32,
    hang_left: u32,
    attack_coeff: f32,
    release_coeff: f32,
}

impl Agc {
    pub fn new(sample_rate: f32) -> Self {
        let mut agc = Self {
            sample_rate: sample_rate.max(1.0),
            enabled: true,
            hang: false,
            threshold_db: -100,
            slope_db: 0,
            decay_ms: 500,
            manual_gain_db: 0,
            gain: 1.0,
            envelope: 0.0,
            hang_left: 0,
            attack_coeff: 0.0,
            release_coeff: 0.0,
        };
        agc.update_coeffs();
        agc
    }

    fn update_coeffs(&mut self) {
        let sr = self.sample_rate;
        self.attack_coeff = 1.0 - (-1.0 / (ATTACK_MS * 1e-3 * sr)).exp();
        let decay = self.decay_ms.max(1) as f32;
        self.release_coeff = 1.0 - (-1.0 / (decay * 1e-3 * sr)).exp();
    }

    pub fn set_sample_rate(&mut self, rate: f32) {
        self.sample_rate = rate.max(1.0);
        self.update_coeffs();
    }

    pub fn set_enabled(&mut self, on: bool) {
        self.enabled = on;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_hang(&mut self, hang: bool) {
        self.hang = hang;
        self.hang_left = 0;
    }

    pub fn set_threshold(&mut self, db: i32) {
        self.threshold_db = db.clamp(-160, 0);
    }

    pub fn set_slope(&mut self, db: i32) {
        self.slope_db = db.clamp(0, 10);
    }

    pub fn set_decay(&mut self, ms: i32) {
        self.decay_ms = ms.clamp(20, 5000);
        self.update_coeffs();
    }

    pub fn set_manual_gain(&mut self, db: i32) {
        self.manual_gain_db = db.clamp(-20, 100);
    }

    pub fn threshold(&self) -> i32 {
        self.threshold_db
    }

    pub fn decay(&self) -> i32 {
        self.decay_ms
    }

    /// Current linear gain (manual gain when disabled).
    pub fn gain(&self) -> f32 {
        if self.enabled {
            self.gain
        } else {
            10.0_f32.powf(self.manual_gain_db as f32 / 20.0)
        }
    }

    fn desired_gain(&self) -> f32 {
        let max_gain = 10.0_f32.powf(-self.threshold_db as f32 / 20.0);
        if self.envelope <= 1e-9 {
            return max_gain;
        }
        let level_db = (20.0 * self.envelope.log10()).min(0.0);
        let target_db = 20.0 * TARGET.log10() + self.slope_db as f32 * level_db / 10.0;
        let target = 10.0_f32.powf(target_db / 20.0);
        (target / self.envelope).min(max_gain)
    }

    fn update(&mut self, level: f32) -> f32 {
        let rising = level > self.envelope;
        let coeff = if rising {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.envelope += coeff * (level - self.envelope);

        let desired = self.desired_gain();
        if desired < self.gain {
            self.gain += self.attack_coeff * (desired - self.gain);
            if self.hang {
                self.hang_left = (self.decay_ms as f32 * 1e-3 * self.sample_rate) as u32;
            }
        } else if self.hang_left > 0 {
            self.hang_left -= 1;
        } else {
            self.gain += self.release_coeff * (desired - self.gain);
        }
        self.gain
    }

    pub fn process(&mut self, input: &[Complex<f32>]) -> Vec<Complex<f32>> {
        if !self.enabled {
            let g = self.gain();
            return input.iter().map(|&s| s * g).collect();
        }
        input
            .iter()
            .map(|&s| {
                let g = self.update(s.norm());
                let mut y = s * g;
                let mag = y.norm();
                if mag > 1.0 {
                    y /= mag;
                }
                y
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_weak_carrier_towards_target() {
        let mut agc = Agc::new(8000.0);
        agc.set_decay(50);
        let input = vec![Complex::new(0.01, 0.0); 16_000];
        let out = agc.process(&input);
        let last = out[out.len() - 1].norm();
        assert!((last - TARGET).abs() < 0.05, "level {}", last);
    }

    #[test]
    fn manual_gain_applies_when_disabled() {
        let mut agc = Agc::new(8000.0);
        agc.set_enabled(false);
        agc.set_manual_gain(20);
        let out = agc.process(&[Complex::new(0.01, 0.0)]);
        assert!((out[0].re - 0.1).abs() < 1e-4);
    }

    #[test]
    fn output_never_exceeds_full_scale() {
        let mut agc = Agc::new(8000.0);
        let out = agc.process(&vec![Complex::new(3.0, 4.0); 100]);
        assert!(out.iter().all(|s| s.norm() <= 1.0 + 1e-6));
    }

    #[test]
    fn parameters_are_clamped() {
        let mut agc = Agc::new(8000.0);
        agc.set_threshold(20);
        agc.set_decay(1);
        assert_eq!(agc.threshold(), 0);
        assert_eq!(agc.decay(), 20);
    }
}
