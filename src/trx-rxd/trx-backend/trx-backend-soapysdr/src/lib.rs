// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! I/Q source for any SoapySDR-compatible device.
//!
//! Without the `soapysdr-sys` feature the crate builds, but opening a device
//! fails with a descriptive error.

#[cfg(feature = "soapysdr-sys")]
mod device;

#[cfg(feature = "soapysdr-sys")]
pub use device::SoapySource;

#[cfg(not(feature = "soapysdr-sys"))]
pub use self::unavailable::SoapySource;

#[cfg(not(feature = "soapysdr-sys"))]
mod unavailable {
    use num_complex::Complex;
    use trx_core::{DynResult, SampleSource};

    /// Placeholder used when SoapySDR support is compiled out.
    pub enum SoapySource {}

    impl SoapySource {
        pub fn open(args: &str) -> DynResult<Self> {
            Err(format!(
                "cannot open SoapySDR device '{}': built without SoapySDR support",
                args
            )
            .into())
        }
    }

    impl SampleSource for SoapySource {
        fn read_into(&mut self, _buf: &mut [Complex<f32>]) -> DynResult<usize> {
            match *self {}
        }

        fn sample_rate(&self) -> f64 {
            match *self {}
        }

        fn set_sample_rate(&mut self, _rate: f64) -> f64 {
            match *self {}
        }

        fn center_freq(&self) -> f64 {
            match *self {}
        }

        fn set_center_freq(&mut self, _hz: f64) -> DynResult<f64> {
            match *self {}
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_open_reports_missing_support() {
            let err = SoapySource::open("driver=rtlsdr").err().unwrap();
            assert!(err.to_string().contains("without SoapySDR support"));
        }
    }
}
