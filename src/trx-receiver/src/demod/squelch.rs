// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use num_complex::Complex;

/// Level that keeps the squelch permanently open.
pub const SQUELCH_OPEN_DB: f64 = -150.0;

/// Power squelch: mutes the channel while the averaged power is below
/// `level_db`. `alpha` is the averaging coefficient (0..=1).
#[derive(Debug, Clone)]
pub struct Squelch {
    level_db: f64,
    alpha: f64,
    avg_power: f32,
}

impl Default for Squelch {
    fn default() -> Self {
        Self {
            level_db: SQUELCH_OPEN_DB,
            alpha: 0.001,
            avg_power: 0.0,
        }
    }
}

impl Squelch {
    pub fn set_level(&mut self, db: f64) {
        self.level_db = db;
    }

    pub fn level(&self) -> f64 {
        self.level_db
    }

    pub fn set_alpha(&mut self, alpha: f64) {
        self.alpha = alpha.clamp(1e-6, 1.0);
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    fn threshold(&self) -> f32 {
        10.0_f64.powf(self.level_db / 10.0) as f32
    }

    /// Zero every sample taken while the gate is closed.
    pub fn process(&mut self, samples: &mut [Complex<f32>]) {
        if self.level_db <= SQUELCH_OPEN_DB {
            return;
        }
        let threshold = self.threshold();
        let alpha = self.alpha as f32;
        for s in samples.iter_mut() {
            self.avg_power += alpha * (s.norm_sqr() - self.avg_power);
            if self.avg_power < threshold {
                *s = Complex::new(0.0, 0.0);
            }
        }
    }
}

/// Smoothed channel power meter.
#[derive(Debug, Clone)]
pub struct LevelMeter {
    level_db: f32,
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self { level_db: -200.0 }
    }
}

impl LevelMeter {
    pub fn update(&mut self, block_db: f32) {
        if self.level_db <= -199.0 {
            self.level_db = block_db;
        } else {
            self.level_db += 0.3 * (block_db - self.level_db);
        }
    }

    pub fn level_db(&self) -> f32 {
        self.level_db
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_squelch_passes_everything() {
        let mut sql = Squelch::default();
        let mut buf = vec![Complex::new(1e-6, 0.0); 8];
        sql.process(&mut buf);
        assert!(buf.iter().all(|s| s.re > 0.0));
    }

    #[test]
    fn closed_squelch_mutes_weak_signal() {
        let mut sql = Squelch::default();
        sql.set_level(-40.0);
        sql.set_alpha(0.5);
        let mut weak = vec![Complex::new(1e-3, 0.0); 64];
        sql.process(&mut weak);
        assert!(weak.iter().all(|s| s.norm() == 0.0));

        let mut strong = vec![Complex::new(0.5, 0.0); 64];
        sql.process(&mut strong);
        assert!(strong[63].norm() > 0.0);
    }

    #[test]
    fn meter_starts_at_first_reading() {
        let mut meter = LevelMeter::default();
        meter.update(-30.0);
        assert_eq!(meter.level_db(), -30.0);
        meter.update(-40.0);
        assert!(meter.level_db() < -30.0 && meter.level_db() > -40.0);
    }
}
