// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use num_complex::Complex;
use trx_core::{RxError, RxResult};

use super::filter::{low_pass, ComplexFir};
use crate::stage::{complex_input, Block, Buffer, PortType, StageKind, COMPLEX_1};

/// Largest supported decimation factor.
pub const MAX_DECIMATION: u32 = 512;

/// Anti-alias cutoff as a fraction of the output Nyquist band.
const PASSBAND_FRACTION: f32 = 0.8;

/// True for the factors [`Decimator::new`] accepts (powers of two in 2..=512).
pub fn is_supported_factor(factor: u32) -> bool {
    (2..=MAX_DECIMATION).contains(&factor) && factor.is_power_of_two()
}

/// Low-pass filter followed by keep-one-in-N.
#[derive(Debug)]
pub struct Decimator {
    factor: u32,
    fir: ComplexFir,
    phase: usize,
}

impl Decimator {
    pub fn new(factor: u32) -> RxResult<Self> {
        if !is_supported_factor(factor) {
            return Err(RxError::invalid(format!(
                "unsupported decimation factor {}",
                factor
            )));
        }
        let cutoff = PASSBAND_FRACTION * 0.5 / factor as f32;
        let taps = (8 * factor as usize + 1).min(1023) | 1;
        Ok(Self {
            factor,
            fir: ComplexFir::from_real(&low_pass(cutoff, taps)),
            phase: 0,
        })
    }

    pub fn factor(&self) -> u32 {
        self.factor
    }

    pub fn process(&mut self, input: &[Complex<f32>]) -> Vec<Complex<f32>> {
        self.fir
            .filter_decimate(input, self.factor as usize, &mut self.phase)
    }
}

impl Block for Decimator {
    fn kind(&self) -> StageKind {
        StageKind::Decimator
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
    fn rejects_unsupported_factors() {
        for factor in [0, 1, 3, 6, 1024] {
            assert!(Decimator::new(factor).is_err(), "factor {}", factor);
        }
        for factor in [2, 4, 8, 16, 32, 64, 128, 256, 512] {
            assert_eq!(Decimator::new(factor).unwrap().factor(), factor);
        }
    }

    #[test]
    fn output_length_divides_input() {
        let mut decim = Decimator::new(4).unwrap();
        let input = vec![Complex::new(1.0, 0.0); 1000];
        let mut total = 0;
        for chunk in input.chunks(333) {
            total += decim.process(chunk).len();
        }
        assert_eq!(total, 250);
    }

    #[test]
    fn dc_passes_through() {
        let mut decim = Decimator::new(2).unwrap();
        let out = decim.process(&vec![Complex::new(0.5, -0.5); 512]);
        let last = out[out.len() - 1];
        assert!((last.re - 0.5).abs() < 1e-3);
        assert!((last.im + 0.5).abs() < 1e-3);
    }
}
