// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use num_complex::Complex;
use trx_core::RxResult;

use crate::stage::{complex_input, Block, Buffer, PortType, StageKind, COMPLEX_1};

/// Swaps I and Q when enabled, pass-through otherwise.
#[derive(Debug, Default)]
pub struct IqSwap {
    enabled: bool,
}

impl IqSwap {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl Block for IqSwap {
    fn kind(&self) -> StageKind {
        StageKind::Swap
    }

    fn inputs(&self) -> &'static [PortType] {
        COMPLEX_1
    }

    fn outputs(&self) -> &'static [PortType] {
        COMPLEX_1
    }

    fn work(&mut self, inputs: &[&Buffer]) -> RxResult<Vec<Buffer>> {
        let input = complex_input(inputs, 0)?;
        let out = if self.enabled {
            input.iter().map(|s| Complex::new(s.im, s.re)).collect()
        } else {
            input.to_vec()
        };
        Ok(vec![Buffer::Complex(out)])
    }
}

/// Removes the DC offset by subtracting a slow running mean.
///
/// `tau` is the averaging time constant in seconds; the per-sample
/// coefficient is recomputed whenever the sample rate changes.
#[derive(Debug)]
pub struct DcCorrector {
    sample_rate: f64,
    tau: f64,
    alpha: f32,
    mean: Complex<f32>,
}

impl DcCorrector {
    pub fn new(sample_rate: f64, tau: f64) -> Self {
        let mut dc = Self {
            sample_rate,
            tau: tau.max(1e-3),
            alpha: 0.0,
            mean: Complex::new(0.0, 0.0),
        };
        dc.update_alpha();
        dc
    }

    fn update_alpha(&mut self) {
        let n = (self.tau * self.sample_rate).max(1.0);
        self.alpha = (1.0 / n) as f32;
    }

    pub fn set_sample_rate(&mut self, rate: f64) {
        self.sample_rate = rate;
        self.update_alpha();
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn process(&mut self, input: &[Complex<f32>]) -> Vec<Complex<f32>> {
        input
            .iter()
            .map(|&x| {
                self.mean += (x - self.mean) * self.alpha;
                x - self.mean
            })
            .collect()
    }
}

impl Block for DcCorrector {
    fn kind(&self) -> StageKind {
        StageKind::DcCorrector
    }

    fn inputs(&self) -> &'static [PortType] {
        COMPLEX_1
    }

    fn outputs(&self) -> &'static [PortType] {
        COMPLEX_1
    }

    fn work(&mut self, inputs: &[&Buffer]) -> RxResult<Vec<Buffer>> {
        let input = complex_input(inputs, 0)?;
        Ok(vec![Buffer::Complex(self.process(input))])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swap_exchanges_components_only_when_enabled() {
        let buf = Buffer::Complex(vec![Complex::new(1.0, 2.0)]);
        let mut swap = IqSwap::default();
        assert_eq!(swap.work(&[&buf]).unwrap()[0], buf);
        swap.set_enabled(true);
        assert_eq!(
            swap.work(&[&buf]).unwrap()[0],
            Buffer::Complex(vec![Complex::new(2.0, 1.0)])
        );
    }

    #[test]
    fn dc_corrector_converges_on_offset() {
        let mut dc = DcCorrector::new(1000.0, 0.01);
        let out = dc.process(&vec![Complex::new(0.3, -0.2); 500]);
        let last = out[out.len() - 1];
        assert!(last.norm() < 1e-3, "residual {}", last);
    }

    #[test]
    fn dc_corrector_tracks_rate_changes() {
        let mut dc = DcCorrector::new(96_000.0, 1.0);
        dc.set_sample_rate(48_000.0);
        assert_eq!(dc.sample_rate(), 48_000.0);
        assert!((dc.alpha - 1.0 / 48_000.0).abs() < 1e-9);
    }
}
