// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Conditioning stages between the source and the demodulator, plus the
//! audio-side helpers (gain, resampler, spectrum).

pub mod decim;
pub mod filter;
pub mod gain;
pub mod iq;
pub mod resampler;
pub mod rotator;
pub mod spectrum;

pub use decim::Decimator;
pub use gain::Gain;
pub use iq::{DcCorrector, IqSwap};
pub use resampler::Resampler;
pub use rotator::Rotator;
pub use spectrum::{FftWindow, Spectrum};
