// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Device contracts implemented by the source and audio backends.

use num_complex::Complex;

use super::error::RxError;
use super::{FreqRange, GainRange};
use crate::DynResult;

fn not_supported<T>(op: &'static str) -> DynResult<T> {
    Err(Box::new(RxError::NotSupported(op)))
}

/// A tunable source of complex baseband samples.
///
/// Only the reading and rate/frequency methods are mandatory; everything else
/// defaults to "not supported" so simple sources stay small.
pub trait SampleSource: Send + 'static {
    /// Read the next block of I/Q samples into `buf`.
    /// Returns the number of samples written.
    fn read_into(&mut self, buf: &mut [Complex<f32>]) -> DynResult<usize>;

    /// True when the source does not pace itself and the scheduler must
    /// throttle reads to real time (synthetic and file sources).
    fn is_throttled(&self) -> bool {
        false
    }

    fn sample_rate(&self) -> f64;

    /// Request a new sample rate. Returns the accepted rate, or `0.0` when
    /// the device refused the request.
    fn set_sample_rate(&mut self, rate: f64) -> f64;

    fn center_freq(&self) -> f64;

    /// Tune the device. Returns the frequency actually set.
    fn set_center_freq(&mut self, hz: f64) -> DynResult<f64>;

    fn freq_range(&self) -> Option<FreqRange> {
        None
    }

    fn bandwidth(&self) -> f64 {
        0.0
    }

    fn set_bandwidth(&mut self, _hz: f64) -> DynResult<f64> {
        not_supported("set_bandwidth")
    }

    fn gain_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn gain_range(&self, _name: &str) -> Option<GainRange> {
        None
    }

    fn gain(&self, _name: &str) -> Option<f64> {
        None
    }

    /// Set a named gain stage. Returns the gain actually applied.
    fn set_gain(&mut self, _name: &str, _db: f64) -> DynResult<f64> {
        not_supported("set_gain")
    }

    fn set_gain_mode(&mut self, _automatic: bool) -> DynResult<()> {
        not_supported("set_gain_mode")
    }

    fn antennas(&self) -> Vec<String> {
        Vec::new()
    }

    fn set_antenna(&mut self, _name: &str) -> DynResult<()> {
        not_supported("set_antenna")
    }

    fn set_freq_corr(&mut self, _ppm: f64) -> DynResult<()> {
        not_supported("set_freq_corr")
    }

    /// 0 disables automatic I/Q balance, 2 selects the automatic mode.
    fn set_iq_balance_mode(&mut self, _mode: u32) -> DynResult<()> {
        not_supported("set_iq_balance_mode")
    }

    /// Reposition a file-backed source. The offset is in bytes.
    fn seek(&mut self, _byte_offset: u64) -> DynResult<()> {
        not_supported("seek")
    }
}

/// Stereo audio output device.
pub trait AudioSink: Send + 'static {
    /// Queue one block of samples per channel. Both slices have equal length.
    fn write(&mut self, left: &[f32], right: &[f32]) -> DynResult<()>;

    fn sample_rate(&self) -> u32;
}

/// Builds devices from their spec strings for the receiver.
pub trait DeviceFactory: Send + Sync {
    fn open_source(&self, spec: &str) -> DynResult<Box<dyn SampleSource>>;

    /// Synthetic source that cannot fail; installed when `open_source` does.
    fn fallback_source(&self) -> Box<dyn SampleSource>;

    fn open_audio_sink(
        &self,
        spec: &str,
        rate: u32,
        stereo: bool,
    ) -> DynResult<Box<dyn AudioSink>>;
}
