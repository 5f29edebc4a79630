// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Small recursive filters used inside the demodulators.

use std::f32::consts::PI;

#[derive(Debug, Clone)]
pub(crate) struct DcBlocker {
    r: f32,
    x1: f32,
    y1: f32,
}

impl DcBlocker {
    pub(crate) fn new(r: f32) -> Self {
        Self {
            r: r.clamp(0.9, 0.9999),
            x1: 0.0,
            y1: 0.0,
        }
    }

    pub(crate) fn process(&mut self, x: f32) -> f32 {
        let y = x - self.x1 + self.r * self.y1;
        self.x1 = x;
        self.y1 = y;
        y
    }
}

/// First-order de-emphasis with time constant `tau` seconds.
/// A non-positive `tau` disables it.
#[derive(Debug, Clone)]
pub(crate) struct Deemphasis {
    alpha: f32,
    y: f32,
}

impl Deemphasis {
    pub(crate) fn new(sample_rate: f32, tau: f64) -> Self {
        let alpha = if tau <= 0.0 {
            1.0
        } else {
            let sr = sample_rate.max(1.0) as f64;
            (1.0 - (-1.0 / (sr * tau)).exp()) as f32
        };
        Self { alpha, y: 0.0 }
    }

    pub(crate) fn process(&mut self, x: f32) -> f32 {
        self.y += self.alpha * (x - self.y);
        self.y
    }
}

#[derive(Debug, Clone)]
pub(crate) struct OnePoleLowPass {
    alpha: f32,
    y: f32,
}

impl OnePoleLowPass {
    pub(crate) fn new(sample_rate: f32, cutoff_hz: f32) -> Self {
        let sr = sample_rate.max(1.0);
        let cutoff = cutoff_hz.clamp(1.0, sr * 0.49);
        let dt = 1.0 / sr;
        let rc = 1.0 / (2.0 * PI * cutoff);
        Self {
            alpha: dt / (rc + dt),
            y: 0.0,
        }
    }

    pub(crate) fn process(&mut self, x: f32) -> f32 {
        self.y += self.alpha * (x - self.y);
        self.y
    }
}

/// RBJ cookbook biquad. Only the low-pass and band-pass forms are needed.
#[derive(Debug, Clone)]
pub(crate) struct Biquad {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

/// Q values of a 4th-order Butterworth built from two biquads.
pub(crate) const BW4_Q1: f32 = 0.5412;
pub(crate) const BW4_Q2: f32 = 1.3066;

impl Biquad {
    fn from_coeffs(b0: f32, b1: f32, b2: f32, a0: f32, a1: f32, a2: f32) -> Self {
        let inv = 1.0 / a0;
        Self {
            b0: b0 * inv,
            b1: b1 * inv,
            b2: b2 * inv,
            a1: a1 * inv,
            a2: a2 * inv,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    pub(crate) fn low_pass(sample_rate: f32, cutoff_hz: f32, q: f32) -> Self {
        let sr = sample_rate.max(1.0);
        let w0 = 2.0 * PI * cutoff_hz.clamp(1.0, sr * 0.45) / sr;
        let alpha = w0.sin() / (2.0 * q.max(0.1));
        let cos_w0 = w0.cos();
        Self::from_coeffs(
            (1.0 - cos_w0) * 0.5,
            1.0 - cos_w0,
            (1.0 - cos_w0) * 0.5,
            1.0 + alpha,
            -2.0 * cos_w0,
            1.0 - alpha,
        )
    }

    pub(crate) fn band_pass(sample_rate: f32, center_hz: f32, q: f32) -> Self {
        let sr = sample_rate.max(1.0);
        let w0 = 2.0 * PI * center_hz.clamp(100.0, sr * 0.45) / sr;
        let alpha = w0.sin() / (2.0 * q.max(0.2));
        Self::from_coeffs(alpha, 0.0, -alpha, 1.0 + alpha, -2.0 * w0.cos(), 1.0 - alpha)
    }

    pub(crate) fn process(&mut self, x: f32) -> f32 {
        let y = self.b0 * x + self.b1 * self.x1 + self.b2 * self.x2
            - self.a1 * self.y1
            - self.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;
        y
    }
}

/// Two cascaded biquads forming a 4th-order Butterworth low-pass.
#[derive(Debug, Clone)]
pub(crate) struct Butterworth4 {
    first: Biquad,
    second: Biquad,
}

impl Butterworth4 {
    pub(crate) fn new(sample_rate: f32, cutoff_hz: f32) -> Self {
        Self {
            first: Biquad::low_pass(sample_rate, cutoff_hz, BW4_Q1),
            second: Biquad::low_pass(sample_rate, cutoff_hz, BW4_Q2),
        }
    }

    pub(crate) fn process(&mut self, x: f32) -> f32 {
        self.second.process(self.first.process(x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dc_blocker_removes_offset() {
        let mut dc = DcBlocker::new(0.99);
        let mut y = 0.0;
        for _ in 0..5000 {
            y = dc.process(1.0);
        }
        assert!(y.abs() < 1e-3);
    }

    #[test]
    fn deemphasis_disabled_for_zero_tau() {
        let mut d = Deemphasis::new(48_000.0, 0.0);
        assert_eq!(d.process(0.7), 0.7);
    }

    #[test]
    fn butterworth_passes_dc_and_attenuates_high_tone() {
        let sr = 48_000.0;
        let mut lp = Butterworth4::new(sr, 1000.0);
        let mut y = 0.0;
        for _ in 0..4800 {
            y = lp.process(1.0);
        }
        assert!((y - 1.0).abs() < 1e-3);

        let mut lp = Butterworth4::new(sr, 1000.0);
        let peak = (0..4800)
            .map(|n| lp.process((2.0 * PI * 10_000.0 * n as f32 / sr).sin()))
            .skip(2400)
            .fold(0.0_f32, |m, v| m.max(v.abs()));
        assert!(peak < 0.01, "peak {}", peak);
    }
}
