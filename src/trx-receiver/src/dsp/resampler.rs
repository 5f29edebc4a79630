// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use trx_core::{RxError, RxResult};

use super::filter::{low_pass, RealFir};
use crate::stage::{real_input, Block, Buffer, PortType, StageKind, REAL_1};

/// Fractional-rate resampler for real samples.
///
/// Output/input ratio is arbitrary; downsampling applies a low-pass at the
/// output Nyquist band first, then linear interpolation.
#[derive(Debug)]
pub struct Resampler {
    ratio: f64,
    step: f64,
    pos: f64,
    last: f32,
    aa: Option<RealFir>,
}

impl Resampler {
    pub fn new(ratio: f64) -> RxResult<Self> {
        if !ratio.is_finite() || ratio <= 0.0 {
            return Err(RxError::invalid(format!("invalid resampling ratio {}", ratio)));
        }
        let aa = (ratio < 1.0).then(|| RealFir::new(low_pass((0.45 * ratio) as f32, 63)));
        Ok(Self {
            ratio,
            step: 1.0 / ratio,
            pos: 0.0,
            last: 0.0,
            aa,
        })
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        let filtered;
        let input = match self.aa.as_mut() {
            Some(fir) => {
                filtered = fir.filter(input);
                filtered.as_slice()
            }
            None => input,
        };

        // `pos` is measured from `last`, the sample before `input[0]`.
        let mut out = Vec::with_capacity((input.len() as f64 * self.ratio) as usize + 1);
        while self.pos < input.len() as f64 {
            let idx = self.pos.floor() as usize;
            let frac = (self.pos - idx as f64) as f32;
            let a = if idx == 0 { self.last } else { input[idx - 1] };
            let b = input[idx];
            out.push(a + (b - a) * frac);
            self.pos += self.step;
        }
        self.pos -= input.len() as f64;
        if let Some(&tail) = input.last() {
            self.last = tail;
        }
        out
    }
}

impl Block for Resampler {
    fn kind(&self) -> StageKind {
        StageKind::Resampler
    }

    fn inputs(&self) -> &'static [PortType] {
        REAL_1
    }

    fn outputs(&self) -> &'static [PortType] {
        REAL_1
    }

    fn work(&mut self, inputs: &[&Buffer]) -> RxResult<Vec<Buffer>> {
        let input = real_input(inputs, 0)?;
        Ok(vec![Buffer::Real(self.process(input))])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_ratio() {
        assert!(Resampler::new(0.0).is_err());
        assert!(Resampler::new(-1.0).is_err());
        assert!(Resampler::new(f64::NAN).is_err());
    }

    #[test]
    fn one_sixth_ratio_yields_one_sixth_samples() {
        let mut rs = Resampler::new(8000.0 / 48_000.0).unwrap();
        assert!((rs.ratio() - 1.0 / 6.0).abs() < 1e-12);
        let mut total = 0;
        for _ in 0..10 {
            total += rs.process(&[0.0; 4800]).len();
        }
        assert!((total as i64 - 8000).abs() <= 1, "got {}", total);
    }

    #[test]
    fn upsampling_interpolates() {
        let mut rs = Resampler::new(2.0).unwrap();
        let out = rs.process(&[1.0, 1.0, 1.0]);
        assert_eq!(out.len(), 6);
        assert_eq!(out[0], 0.0);
        assert_eq!(out[1], 0.5);
        assert!(out[2..].iter().all(|&x| (x - 1.0).abs() < 1e-6));
    }
}
