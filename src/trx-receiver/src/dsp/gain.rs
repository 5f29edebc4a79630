// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use trx_core::RxResult;

use crate::stage::{real_input, Block, Buffer, PortType, StageKind, REAL_1};

/// Convert a dB value to a linear amplitude factor.
pub fn db_to_linear(db: f64) -> f32 {
    10.0_f64.powf(db / 20.0) as f32
}

/// Constant real gain.
#[derive(Debug)]
pub struct Gain {
    k: f32,
}

impl Gain {
    pub fn new(k: f32) -> Self {
        Self { k }
    }

    pub fn set_k(&mut self, k: f32) {
        self.k = k;
    }

    pub fn k(&self) -> f32 {
        self.k
    }
}

impl Block for Gain {
    fn kind(&self) -> StageKind {
        StageKind::Gain
    }

    fn inputs(&self) -> &'static [PortType] {
        REAL_1
    }

    fn outputs(&self) -> &'static [PortType] {
        REAL_1
    }

    fn work(&mut self, inputs: &[&Buffer]) -> RxResult<Vec<Buffer>> {
        let input = real_input(inputs, 0)?;
        Ok(vec![Buffer::Real(input.iter().map(|x| x * self.k).collect())])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minus_six_db_halves_amplitude() {
        assert!((db_to_linear(-6.0) - 0.501).abs() < 1e-3);
        assert_eq!(db_to_linear(0.0), 1.0);
    }

    #[test]
    fn scales_samples() {
        let mut gain = Gain::new(2.0);
        let buf = Buffer::Real(vec![0.25, -0.5]);
        assert_eq!(gain.work(&[&buf]).unwrap(), vec![Buffer::Real(vec![0.5, -1.0])]);
        gain.set_k(0.0);
        assert_eq!(gain.k(), 0.0);
    }
}
