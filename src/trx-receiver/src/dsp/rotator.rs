// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::f64::consts::TAU;

use num_complex::Complex;
use trx_core::RxResult;

use crate::stage::{complex_input, Block, Buffer, PortType, StageKind, COMPLEX_1};

/// Frequency shifter multiplying each sample by `exp(j * phase)`.
#[derive(Debug, Default)]
pub struct Rotator {
    phase_inc: f64,
    phase: f64,
}

impl Rotator {
    pub fn new(phase_inc: f64) -> Self {
        Self {
            phase_inc,
            phase: 0.0,
        }
    }

    /// Radians per sample.
    pub fn set_phase_inc(&mut self, inc: f64) {
        self.phase_inc = inc;
    }

    pub fn phase_inc(&self) -> f64 {
        self.phase_inc
    }

    pub fn process(&mut self, input: &[Complex<f32>]) -> Vec<Complex<f32>> {
        input
            .iter()
            .map(|&x| {
                let lo = Complex::from_polar(1.0_f32, self.phase as f32);
                self.phase = (self.phase + self.phase_inc).rem_euclid(TAU);
                x * lo
            })
            .collect()
    }
}

impl Block for Rotator {
    fn kind(&self) -> StageKind {
        StageKind::Rotator
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
    fn shifts_tone_to_dc() {
        let inc = TAU / 8.0;
        let tone: Vec<Complex<f32>> = (0..16)
            .map(|n| Complex::from_polar(1.0, (inc * n as f64) as f32))
            .collect();
        let mut rot = Rotator::new(-inc);
        for y in rot.process(&tone) {
            assert!((y.re - 1.0).abs() < 1e-4 && y.im.abs() < 1e-4);
        }
    }

    #[test]
    fn zero_increment_is_identity() {
        let mut rot = Rotator::default();
        let x = vec![Complex::new(0.3, -0.7); 4];
        assert_eq!(rot.process(&x), x);
    }
}
