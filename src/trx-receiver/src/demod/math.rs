// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use num_complex::Complex;

/// FM quadrature discriminator: `arg(s[n] * conj(s[n-1])) / π`, so the output
/// is normalised to `[-1, 1]` (±1 = ±fs/2). `prev` carries the last sample
/// across blocks.
pub(crate) fn demod_fm_with_prev(
    samples: &[Complex<f32>],
    prev: &mut Option<Complex<f32>>,
) -> Vec<f32> {
    let inv_pi = std::f32::consts::FRAC_1_PI;
    let mut last = *prev;
    let out = samples
        .iter()
        .map(|&s| {
            let y = match last {
                Some(p) => {
                    let product = s * p.conj();
                    product.im.atan2(product.re) * inv_pi
                }
                None => 0.0,
            };
            last = Some(s);
            y
        })
        .collect();
    *prev = last;
    out
}

/// Mean power of a block in dBFS, floored at -200 dB.
pub(crate) fn power_db(samples: &[Complex<f32>]) -> f32 {
    if samples.is_empty() {
        return -200.0;
    }
    let mean = samples.iter().map(|s| s.norm_sqr()).sum::<f32>() / samples.len() as f32;
    10.0 * mean.max(1e-20).log10()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::TAU;

    fn complex_tone(freq_norm: f32, len: usize) -> Vec<Complex<f32>> {
        (0..len)
            .map(|n| Complex::from_polar(1.0, TAU * freq_norm * n as f32))
            .collect()
    }

    #[test]
    fn fm_tone_frequency() {
        let mut prev = None;
        let out = demod_fm_with_prev(&complex_tone(0.25, 16), &mut prev);
        assert_eq!(out[0], 0.0);
        for &sample in &out[1..] {
            assert!((sample - 0.5).abs() < 1e-3);
        }
    }

    #[test]
    fn fm_state_continues_across_blocks() {
        let tone = complex_tone(0.1, 32);
        let mut prev = None;
        let _ = demod_fm_with_prev(&tone[..16], &mut prev);
        let second = demod_fm_with_prev(&tone[16..], &mut prev);
        assert!((second[0] - 0.2).abs() < 1e-3);
    }

    #[test]
    fn power_of_unit_carrier_is_zero_db() {
        assert!(power_db(&complex_tone(0.1, 64)).abs() < 1e-3);
        assert_eq!(power_db(&[]), -200.0);
    }
}
