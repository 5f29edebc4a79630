// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use num_complex::Complex;
use soapysdr::{Device, Direction, RxStream};

use trx_core::{DynResult, FreqRange, GainRange, RxError, SampleSource};

const CHANNEL: usize = 0;
/// Read timeout in microseconds.
const READ_TIMEOUT_US: i64 = 100_000;

fn soapy_err(what: &str, e: soapysdr::Error) -> Box<dyn std::error::Error + Send + Sync> {
    format!("{}: {}", what, e).into()
}

/// Streaming SoapySDR receiver channel 0.
pub struct SoapySource {
    device: Device,
    stream: RxStream<Complex<f32>>,
    args: String,
    rate: f64,
}

impl SoapySource {
    /// Open a device from its SoapySDR args string (e.g. `"driver=rtlsdr"`)
    /// and start streaming.
    pub fn open(args: &str) -> DynResult<Self> {
        tracing::info!("Initializing SoapySDR device with args: {}", args);
        let device = Device::new(args)
            .map_err(|e| soapy_err(&format!("Failed to open SoapySDR device (args={})", args), e))?;
        let rate = device
            .sample_rate(Direction::Rx, CHANNEL)
            .map_err(|e| soapy_err("Failed to read sample rate", e))?;
        let mut stream = device
            .rx_stream::<Complex<f32>>(&[CHANNEL])
            .map_err(|e| soapy_err("Failed to set up RX stream", e))?;
        stream
            .activate(None)
            .map_err(|e| soapy_err("Failed to activate RX stream", e))?;
        tracing::info!("SoapySDR device opened at {} S/s", rate);
        Ok(Self {
            device,
            stream,
            args: args.to_string(),
            rate,
        })
    }

    pub fn args(&self) -> &str {
        &self.args
    }
}

impl SampleSource for SoapySource {
    fn read_into(&mut self, buf: &mut [Complex<f32>]) -> DynResult<usize> {
        self.stream
            .read(&mut [buf], READ_TIMEOUT_US)
            .map_err(|e| soapy_err("RX stream read failed", e))
    }

    fn sample_rate(&self) -> f64 {
        self.rate
    }

    fn set_sample_rate(&mut self, rate: f64) -> f64 {
        if let Err(e) = self.device.set_sample_rate(Direction::Rx, CHANNEL, rate) {
            tracing::warn!("Failed to set sample rate {}: {}", rate, e);
            return 0.0;
        }
        match self.device.sample_rate(Direction::Rx, CHANNEL) {
            Ok(actual) => {
                self.rate = actual;
                actual
            }
            Err(_) => {
                self.rate = rate;
                rate
            }
        }
    }

    fn center_freq(&self) -> f64 {
        self.device.frequency(Direction::Rx, CHANNEL).unwrap_or(0.0)
    }

    fn set_center_freq(&mut self, hz: f64) -> DynResult<f64> {
        self.device
            .set_frequency(Direction::Rx, CHANNEL, hz, ())
            .map_err(|e| soapy_err("Failed to set frequency", e))?;
        Ok(self.device.frequency(Direction::Rx, CHANNEL).unwrap_or(hz))
    }

    fn freq_range(&self) -> Option<FreqRange> {
        let ranges = self.device.frequency_range(Direction::Rx, CHANNEL).ok()?;
        let low_hz = ranges.iter().map(|r| r.minimum).fold(f64::INFINITY, f64::min);
        let high_hz = ranges.iter().map(|r| r.maximum).fold(f64::NEG_INFINITY, f64::max);
        (low_hz <= high_hz).then_some(FreqRange { low_hz, high_hz })
    }

    fn bandwidth(&self) -> f64 {
        self.device.bandwidth(Direction::Rx, CHANNEL).unwrap_or(0.0)
    }

    fn set_bandwidth(&mut self, hz: f64) -> DynResult<f64> {
        self.device
            .set_bandwidth(Direction::Rx, CHANNEL, hz)
            .map_err(|e| soapy_err("Failed to set bandwidth", e))?;
        Ok(self.bandwidth())
    }

    fn gain_names(&self) -> Vec<String> {
        self.device
            .list_gains(Direction::Rx, CHANNEL)
            .unwrap_or_default()
    }

    fn gain_range(&self, name: &str) -> Option<GainRange> {
        let range = self
            .device
            .gain_element_range(Direction::Rx, CHANNEL, name)
            .ok()?;
        Some(GainRange {
            min_db: range.minimum,
            max_db: range.maximum,
            step_db: range.step,
        })
    }

    fn gain(&self, name: &str) -> Option<f64> {
        self.device.gain_element(Direction::Rx, CHANNEL, name).ok()
    }

    fn set_gain(&mut self, name: &str, db: f64) -> DynResult<f64> {
        self.device
            .set_gain_element(Direction::Rx, CHANNEL, name, db)
            .map_err(|e| soapy_err(&format!("Failed to set gain {}", name), e))?;
        Ok(self.gain(name).unwrap_or(db))
    }

    fn set_gain_mode(&mut self, automatic: bool) -> DynResult<()> {
        self.device
            .set_gain_mode(Direction::Rx, CHANNEL, automatic)
            .map_err(|e| soapy_err("Failed to set gain mode", e))
    }

    fn antennas(&self) -> Vec<String> {
        self.device
            .antennas(Direction::Rx, CHANNEL)
            .unwrap_or_default()
    }

    fn set_antenna(&mut self, name: &str) -> DynResult<()> {
        self.device
            .set_antenna(Direction::Rx, CHANNEL, name)
            .map_err(|e| soapy_err("Failed to set antenna", e))
    }

    fn set_freq_corr(&mut self, ppm: f64) -> DynResult<()> {
        self.device
            .set_frequency_correction(Direction::Rx, CHANNEL, ppm)
            .map_err(|e| soapy_err("Failed to set frequency correction", e))
    }

    fn set_iq_balance_mode(&mut self, mode: u32) -> DynResult<()> {
        if mode == 0 {
            return Ok(());
        }
        Err(Box::new(RxError::NotSupported("automatic I/Q balance")))
    }
}

impl Drop for SoapySource {
    fn drop(&mut self) {
        if let Err(e) = self.stream.deactivate(None) {
            tracing::warn!("Failed to deactivate RX stream: {}", e);
        }
    }
}
