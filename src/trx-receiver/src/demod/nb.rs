// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use num_complex::Complex;

/// Impulse noise blanker.
///
/// Tracks the average magnitude and blanks samples exceeding
/// `threshold` times that average, plus `hold` samples after each hit.
#[derive(Debug, Clone)]
pub struct NoiseBlanker {
    enabled: bool,
    threshold: f32,
    hold: usize,
    avg_mag: f32,
    blank_left: usize,
}

impl NoiseBlanker {
    /// Blanker 1: short pulses, no hold.
    pub fn pulse() -> Self {
        Self::new(3.3, 0)
    }

    /// Blanker 2: longer bursts, blanks a few samples past the peak.
    pub fn burst() -> Self {
        Self::new(2.5, 8)
    }

    fn new(threshold: f32, hold: usize) -> Self {
        Self {
            enabled: false,
            threshold,
            hold,
            avg_mag: 0.0,
            blank_left: 0,
        }
    }

    pub fn set_enabled(&mut self, on: bool) {
        self.enabled = on;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold.max(1.0);
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn process(&mut self, samples: &mut [Complex<f32>]) {
        if !self.enabled {
            return;
        }
        for s in samples.iter_mut() {
            let mag = s.norm();
            if self.avg_mag > 0.0 && mag > self.threshold * self.avg_mag {
                self.blank_left = self.hold + 1;
            } else {
                self.avg_mag += 0.01 * (mag - self.avg_mag);
            }
            if self.blank_left > 0 {
                self.blank_left -= 1;
                *s = Complex::new(0.0, 0.0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blanks_isolated_spike() {
        let mut nb = NoiseBlanker::pulse();
        nb.set_enabled(true);
        let mut buf = vec![Complex::new(0.1, 0.0); 200];
        buf[150] = Complex::new(5.0, 0.0);
        nb.process(&mut buf);
        assert_eq!(buf[150].norm(), 0.0);
        assert!(buf[151].norm() > 0.0);
    }

    #[test]
    fn burst_blanker_holds() {
        let mut nb = NoiseBlanker::burst();
        nb.set_enabled(true);
        let mut buf = vec![Complex::new(0.1, 0.0); 200];
        buf[150] = Complex::new(5.0, 0.0);
        nb.process(&mut buf);
        assert!(buf[150..159].iter().all(|s| s.norm() == 0.0));
        assert!(buf[159].norm() > 0.0);
    }

    #[test]
    fn disabled_blanker_is_transparent() {
        let mut nb = NoiseBlanker::pulse();
        let mut buf = vec![Complex::new(5.0, 0.0); 4];
        nb.process(&mut buf);
        assert!(buf.iter().all(|s| s.re == 5.0));
    }
}
