// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::f32::consts::PI;

use num_complex::Complex;

/// Upper bound on designed filter length.
const MAX_TAPS: usize = 1023;

/// Number of taps for a Hann-windowed design with the given transition width.
pub fn taps_for_transition(sample_rate: f32, transition_hz: f32) -> usize {
    if sample_rate <= 0.0 || transition_hz <= 0.0 {
        return MAX_TAPS;
    }
    let n = (3.1 * sample_rate / transition_hz).ceil() as usize;
    (n.clamp(15, MAX_TAPS)) | 1
}

/// Windowed-sinc low-pass taps, normalised to unity DC gain.
///
/// `cutoff_norm` is `cutoff_hz / sample_rate` (0.0..0.5).
pub fn low_pass(cutoff_norm: f32, taps: usize) -> Vec<f32> {
    let taps = taps.max(1);
    let m = (taps - 1) as f32;
    let mut coeffs: Vec<f32> = (0..taps)
        .map(|i| {
            let x = i as f32 - m / 2.0;
            let sinc = if x == 0.0 {
                2.0 * cutoff_norm
            } else {
                (2.0 * PI * cutoff_norm * x).sin() / (PI * x)
            };
            let window = if taps == 1 {
                1.0
            } else {
                0.5 * (1.0 - (2.0 * PI * i as f32 / m).cos())
            };
            sinc * window
        })
        .collect();

    let sum: f32 = coeffs.iter().sum();
    if sum.abs() > 1e-12 {
        coeffs.iter_mut().for_each(|c| *c /= sum);
    }
    coeffs
}

/// Complex band-pass taps covering `low_hz..high_hz` (either may be negative).
pub fn complex_band_pass(
    sample_rate: f32,
    low_hz: f32,
    high_hz: f32,
    transition_hz: f32,
) -> Vec<Complex<f32>> {
    let rate = sample_rate.max(1.0);
    let half_width = ((high_hz - low_hz) / 2.0).abs();
    let center = (high_hz + low_hz) / 2.0;
    let taps = taps_for_transition(rate, transition_hz);
    let proto = low_pass(((half_width + transition_hz / 2.0) / rate).min(0.499), taps);
    let m = (taps - 1) as f32 / 2.0;
    proto
        .iter()
        .enumerate()
        .map(|(i, &c)| Complex::from_polar(c, 2.0 * PI * center / rate * (i as f32 - m)))
        .collect()
}

/// Direct-form FIR over complex samples with real or complex taps.
#[derive(Debug, Clone)]
pub struct ComplexFir {
    taps: Vec<Complex<f32>>,
    history: Vec<Complex<f32>>,
}

impl ComplexFir {
    pub fn new(taps: Vec<Complex<f32>>) -> Self {
        let taps = if taps.is_empty() {
            vec![Complex::new(1.0, 0.0)]
        } else {
            taps
        };
        Self {
            history: vec![Complex::new(0.0, 0.0); taps.len() - 1],
            taps,
        }
    }

    pub fn from_real(taps: &[f32]) -> Self {
        Self::new(taps.iter().map(|&t| Complex::new(t, 0.0)).collect())
    }

    pub fn len(&self) -> usize {
        self.taps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taps.is_empty()
    }

    /// Filter a block, computing only every `step`-th output.
    pub fn filter_decimate(
        &mut self,
        input: &[Complex<f32>],
        step: usize,
        phase: &mut usize,
    ) -> Vec<Complex<f32>> {
        let step = step.max(1);
        let hist_len = self.history.len();
        let mut ext = Vec::with_capacity(hist_len + input.len());
        ext.extend_from_slice(&self.history);
        ext.extend_from_slice(input);

        let mut out = Vec::with_capacity(input.len() / step + 1);
        let mut idx = *phase;
        while idx < input.len() {
            let window = &ext[idx..idx + self.taps.len()];
            let acc = window
                .iter()
                .rev()
                .zip(self.taps.iter())
                .fold(Complex::new(0.0_f32, 0.0), |acc, (&x, &h)| acc + x * h);
            out.push(acc);
            idx += step;
        }
        *phase = idx - input.len();

        if hist_len > 0 {
            let keep_from = ext.len() - hist_len;
            self.history.copy_from_slice(&ext[keep_from..]);
        }
        out
    }

    pub fn filter(&mut self, input: &[Complex<f32>]) -> Vec<Complex<f32>> {
        let mut phase = 0;
        self.filter_decimate(input, 1, &mut phase)
    }
}

/// Direct-form FIR over real samples.
#[derive(Debug, Clone)]
pub struct RealFir {
    taps: Vec<f32>,
    history: Vec<f32>,
}

impl RealFir {
    pub fn new(taps: Vec<f32>) -> Self {
        let taps = if taps.is_empty() { vec![1.0] } else { taps };
        Self {
            history: vec![0.0; taps.len() - 1],
            taps,
        }
    }

    pub fn filter(&mut self, input: &[f32]) -> Vec<f32> {
        let hist_len = self.history.len();
        let mut ext = Vec::with_capacity(hist_len + input.len());
        ext.extend_from_slice(&self.history);
        ext.extend_from_slice(input);
        let out = (0..input.len())
            .map(|i| {
                ext[i..i + self.taps.len()]
                    .iter()
                    .rev()
                    .zip(self.taps.iter())
                    .map(|(x, h)| x * h)
                    .sum()
            })
            .collect();
        if hist_len > 0 {
            let keep_from = ext.len() - hist_len;
            self.history.copy_from_slice(&ext[keep_from..]);
        }
        out
    }
}
