// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::collections::VecDeque;
use std::f32::consts::PI;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use trx_core::{RxError, RxResult};

use crate::stage::{
    complex_input, real_input, Block, Buffer, PortType, StageKind, COMPLEX_1, NO_PORTS, REAL_1,
};

/// Default number of FFT bins for both spectrum taps.
pub const DEFAULT_FFT_SIZE: usize = 8192;
pub const MIN_FFT_SIZE: usize = 32;
pub const MAX_FFT_SIZE: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FftWindow {
    Rectangular,
    Hamming,
    #[default]
    Hann,
    Blackman,
}

impl FftWindow {
    fn coefficients(self, size: usize) -> Vec<f32> {
        let m = (size.max(2) - 1) as f32;
        (0..size)
            .map(|i| {
                let x = 2.0 * PI * i as f32 / m;
                match self {
                    FftWindow::Rectangular => 1.0,
                    FftWindow::Hamming => 0.54 - 0.46 * x.cos(),
                    FftWindow::Hann => 0.5 * (1.0 - x.cos()),
                    FftWindow::Blackman => 0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos(),
                }
            })
            .collect()
    }
}

impl fmt::Display for FftWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FftWindow::Rectangular => "rectangular",
            FftWindow::Hamming => "hamming",
            FftWindow::Hann => "hann",
            FftWindow::Blackman => "blackman",
        };
        f.write_str(name)
    }
}

impl FromStr for FftWindow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rectangular" | "rect" | "none" => Ok(FftWindow::Rectangular),
            "hamming" => Ok(FftWindow::Hamming),
            "hann" | "hanning" => Ok(FftWindow::Hann),
            "blackman" => Ok(FftWindow::Blackman),
            _ => Err(format!("unknown FFT window '{}'", s)),
        }
    }
}

/// Spectrum tap. Keeps the most recent `size` samples and transforms them on
/// demand; the flowgraph thread only appends.
pub struct Spectrum {
    input: PortType,
    size: usize,
    window_kind: FftWindow,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    ring: VecDeque<Complex<f32>>,
    quad_rate: f64,
}

impl fmt::Debug for Spectrum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Spectrum")
            .field("input", &self.input)
            .field("size", &self.size)
            .field("window", &self.window_kind)
            .field("quad_rate", &self.quad_rate)
            .finish()
    }
}

impl Spectrum {
    /// Tap on the complex I/Q stream.
    pub fn complex(size: usize, quad_rate: f64, window: FftWindow) -> Self {
        Self::build(PortType::Complex, size, quad_rate, window)
    }

    /// Tap on one real audio channel.
    pub fn real(size: usize, window: FftWindow) -> Self {
        Self::build(PortType::Real, size, 0.0, window)
    }

    fn build(input: PortType, size: usize, quad_rate: f64, window_kind: FftWindow) -> Self {
        let size = size.clamp(MIN_FFT_SIZE, MAX_FFT_SIZE);
        let fft = FftPlanner::<f32>::new().plan_fft_forward(size);
        Self {
            input,
            size,
            window_kind,
            window: window_kind.coefficients(size),
            fft,
            ring: VecDeque::with_capacity(size),
            quad_rate,
        }
    }

    pub fn set_fft_size(&mut self, size: usize) -> RxResult<()> {
        if !(MIN_FFT_SIZE..=MAX_FFT_SIZE).contains(&size) {
            return Err(RxError::invalid(format!(
                "FFT size {} outside {}..={}",
                size, MIN_FFT_SIZE, MAX_FFT_SIZE
            )));
        }
        if size == self.size {
            return Ok(());
        }
        self.size = size;
        self.fft = FftPlanner::<f32>::new().plan_fft_forward(size);
        self.window = self.window_kind.coefficients(size);
        while self.ring.len() > size {
            self.ring.pop_front();
        }
        Ok(())
    }

    pub fn fft_size(&self) -> usize {
        self.size
    }

    pub fn set_window(&mut self, window: FftWindow) {
        self.window_kind = window;
        self.window = window.coefficients(self.size);
    }

    pub fn window(&self) -> FftWindow {
        self.window_kind
    }

    pub fn set_quad_rate(&mut self, rate: f64) {
        self.quad_rate = rate;
    }

    pub fn quad_rate(&self) -> f64 {
        self.quad_rate
    }

    fn push(&mut self, samples: impl Iterator<Item = Complex<f32>>) {
        for s in samples {
            if self.ring.len() == self.size {
                self.ring.pop_front();
            }
            self.ring.push_back(s);
        }
    }

    /// Magnitude spectrum in dB, DC centred. Empty until `size` samples arrived.
    pub fn data(&self) -> Vec<f32> {
        if self.ring.len() < self.size {
            return Vec::new();
        }
        let mut buf: Vec<Complex<f32>> = self
            .ring
            .iter()
            .zip(self.window.iter())
            .map(|(s, w)| *s * *w)
            .collect();
        self.fft.process(&mut buf);

        let half = self.size / 2;
        let scale = 1.0 / self.size as f32;
        buf[half..]
            .iter()
            .chain(buf[..half].iter())
            .map(|v| 20.0 * (v.norm() * scale).max(1e-10_f32).log10())
            .collect()
    }
}

impl Block for Spectrum {
    fn kind(&self) -> StageKind {
        StageKind::Spectrum
    }

    fn inputs(&self) -> &'static [PortType] {
        match self.input {
            PortType::Complex => COMPLEX_1,
            PortType::Real => REAL_1,
        }
    }

    fn outputs(&self) -> &'static [PortType] {
        NO_PORTS
    }

    fn work(&mut self, inputs: &[&Buffer]) -> RxResult<Vec<Buffer>> {
        match self.input {
            PortType::Complex => {
                let input = complex_input(inputs, 0)?;
                self.push(input.iter().copied());
            }
            PortType::Real => {
                let input = real_input(inputs, 0)?;
                self.push(input.iter().map(|&x| Complex::new(x, 0.0)));
            }
        }
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peak_bin(data: &[f32]) -> usize {
        data.iter()
            .enumerate()
            .fold((0, f32::MIN), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
            .0
    }

    #[test]
    fn empty_until_full() {
        let mut spec = Spectrum::complex(64, 48_000.0, FftWindow::Hann);
        let buf = Buffer::Complex(vec![Complex::new(1.0, 0.0); 32]);
        spec.work(&[&buf]).unwrap();
        assert!(spec.data().is_empty());
        spec.work(&[&buf]).unwrap();
        assert_eq!(spec.data().len(), 64);
    }

    #[test]
    fn tone_lands_in_expected_bin() {
        let size = 256;
        let mut spec = Spectrum::complex(size, 256.0, FftWindow::Blackman);
        let tone: Vec<Complex<f32>> = (0..size)
            .map(|n| Complex::from_polar(1.0, 2.0 * PI * 32.0 * n as f32 / size as f32))
            .collect();
        spec.work(&[&Buffer::Complex(tone)]).unwrap();
        assert_eq!(peak_bin(&spec.data()), size / 2 + 32);
    }

    #[test]
    fn fft_size_bounds() {
        let mut spec = Spectrum::real(DEFAULT_FFT_SIZE, FftWindow::Hann);
        assert!(spec.set_fft_size(16).is_err());
        assert!(spec.set_fft_size(MAX_FFT_SIZE * 2).is_err());
        spec.set_fft_size(1024).unwrap();
        assert_eq!(spec.fft_size(), 1024);
        assert_eq!(spec.inputs(), REAL_1);
    }

    #[test]
    fn window_names_parse() {
        assert_eq!("Hanning".parse::<FftWindow>(), Ok(FftWindow::Hann));
        assert_eq!("blackman".parse::<FftWindow>(), Ok(FftWindow::Blackman));
        assert!("kaiser".parse::<FftWindow>().is_err());
    }
}
