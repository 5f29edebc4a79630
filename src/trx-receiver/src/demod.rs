// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Swappable demodulator stage.
//!
//! [`DemodChain`] is a tagged variant over the two receiver families. The
//! orchestrator replaces the whole stage when the family changes and only
//! calls [`DemodChain::set_demod`] when it stays the same.

pub mod agc;
pub(crate) mod iir;
pub(crate) mod math;
pub mod narrow;
pub mod nb;
pub mod squelch;
pub mod wide;

use num_complex::Complex;
use trx_core::{Demod, DemodFamily, FilterShape, RxError, RxResult};

pub use narrow::NarrowbandRx;
pub use wide::WidebandRx;

use crate::dsp::filter::complex_band_pass;
use crate::stage::{complex_input, Block, Buffer, PortType, StageKind, COMPLEX_1, REAL_2};

/// Narrowest passband `set_filter` accepts.
pub const MIN_FILTER_WIDTH_HZ: f64 = 100.0;

/// Channel filter edges relative to the tuned frequency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelFilter {
    pub low_hz: f64,
    pub high_hz: f64,
    pub transition_hz: f64,
}

impl ChannelFilter {
    /// Validate a requested band and derive the transition width from `shape`.
    pub fn from_shape(low_hz: f64, high_hz: f64, shape: FilterShape) -> RxResult<Self> {
        if !(low_hz < high_hz) {
            return Err(RxError::invalid(format!(
                "filter low edge {} Hz not below high edge {} Hz",
                low_hz, high_hz
            )));
        }
        let width = high_hz - low_hz;
        if width < MIN_FILTER_WIDTH_HZ {
            return Err(RxError::invalid(format!(
                "filter width {} Hz below minimum {} Hz",
                width, MIN_FILTER_WIDTH_HZ
            )));
        }
        Ok(Self {
            low_hz,
            high_hz,
            transition_hz: width * shape.transition_fraction(),
        })
    }

    pub(crate) fn taps(&self, rate: f64) -> Vec<Complex<f32>> {
        complex_band_pass(
            rate as f32,
            self.low_hz as f32,
            self.high_hz as f32,
            self.transition_hz as f32,
        )
    }
}

/// Sub-controls a demodulator family supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities(u8);

impl Capabilities {
    pub const SQUELCH: Capabilities = Capabilities(1 << 0);
    pub const AGC: Capabilities = Capabilities(1 << 1);
    pub const NOISE_BLANKER: Capabilities = Capabilities(1 << 2);
    pub const FM: Capabilities = Capabilities(1 << 3);
    pub const AM: Capabilities = Capabilities(1 << 4);

    pub const fn union(self, other: Capabilities) -> Capabilities {
        Capabilities(self.0 | other.0)
    }

    pub const fn contains(self, other: Capabilities) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Capabilities {
    type Output = Capabilities;

    fn bitor(self, rhs: Capabilities) -> Capabilities {
        self.union(rhs)
    }
}

const NARROWBAND_CAPS: Capabilities = Capabilities::SQUELCH
    .union(Capabilities::AGC)
    .union(Capabilities::NOISE_BLANKER)
    .union(Capabilities::FM)
    .union(Capabilities::AM);
const WIDEBAND_CAPS: Capabilities = Capabilities::SQUELCH.union(Capabilities::FM);

/// Demodulator stage: one complex input, two real audio outputs.
#[derive(Debug)]
pub enum DemodChain {
    Narrow(NarrowbandRx),
    Wide(WidebandRx),
}

impl DemodChain {
    pub fn new(family: DemodFamily, quad_rate: f64, audio_rate: u32) -> RxResult<Self> {
        Ok(match family {
            DemodFamily::Narrowband => DemodChain::Narrow(NarrowbandRx::new(quad_rate, audio_rate)?),
            DemodFamily::Wideband => DemodChain::Wide(WidebandRx::new(quad_rate, audio_rate)?),
        })
    }

    pub fn family(&self) -> DemodFamily {
        match self {
            DemodChain::Narrow(_) => DemodFamily::Narrowband,
            DemodChain::Wide(_) => DemodFamily::Wideband,
        }
    }

    pub fn caps(&self) -> Capabilities {
        match self {
            DemodChain::Narrow(_) => NARROWBAND_CAPS,
            DemodChain::Wide(_) => WIDEBAND_CAPS,
        }
    }

    pub fn has(&self, cap: Capabilities) -> bool {
        self.caps().contains(cap)
    }

    pub fn demod(&self) -> Demod {
        match self {
            DemodChain::Narrow(rx) => rx.demod(),
            DemodChain::Wide(rx) => rx.demod(),
        }
    }

    /// Select a variant within this family.
    pub fn set_demod(&mut self, demod: Demod) -> RxResult<()> {
        match self {
            DemodChain::Narrow(rx) => rx.set_demod(demod),
            DemodChain::Wide(rx) => rx.set_demod(demod),
        }
    }

    pub fn quad_rate(&self) -> f64 {
        match self {
            DemodChain::Narrow(rx) => rx.quad_rate(),
            DemodChain::Wide(rx) => rx.quad_rate(),
        }
    }

    pub fn set_quad_rate(&mut self, rate: f64) -> RxResult<()> {
        match self {
            DemodChain::Narrow(rx) => rx.set_quad_rate(rate),
            DemodChain::Wide(rx) => rx.set_quad_rate(rate),
        }
    }

    pub fn filter(&self) -> ChannelFilter {
        match self {
            DemodChain::Narrow(rx) => rx.filter(),
            DemodChain::Wide(rx) => rx.filter(),
        }
    }

    pub fn set_filter(&mut self, low_hz: f64, high_hz: f64, shape: FilterShape) -> RxResult<()> {
        let filter = ChannelFilter::from_shape(low_hz, high_hz, shape)?;
        match self {
            DemodChain::Narrow(rx) => rx.set_filter(filter),
            DemodChain::Wide(rx) => rx.set_filter(filter),
        }
        Ok(())
    }

    pub fn set_cw_offset(&mut self, hz: f64) {
        if let DemodChain::Narrow(rx) = self {
            rx.set_cw_offset(hz);
        }
    }

    pub fn signal_level_db(&self) -> f32 {
        match self {
            DemodChain::Narrow(rx) => rx.signal_level_db(),
            DemodChain::Wide(rx) => rx.signal_level_db(),
        }
    }

    pub fn set_sql_level(&mut self, db: f64) {
        match self {
            DemodChain::Narrow(rx) => rx.squelch().set_level(db),
            DemodChain::Wide(rx) => rx.squelch().set_level(db),
        }
    }

    pub fn sql_level(&self) -> f64 {
        match self {
            DemodChain::Narrow(rx) => rx.sql_level(),
            DemodChain::Wide(rx) => rx.sql_level(),
        }
    }

    pub fn set_sql_alpha(&mut self, alpha: f64) {
        match self {
            DemodChain::Narrow(rx) => rx.squelch().set_alpha(alpha),
            DemodChain::Wide(rx) => rx.squelch().set_alpha(alpha),
        }
    }

    pub fn set_fm_maxdev(&mut self, hz: f64) {
        match self {
            DemodChain::Narrow(rx) => rx.set_fm_maxdev(hz),
            DemodChain::Wide(rx) => rx.set_fm_maxdev(hz),
        }
    }

    pub fn set_fm_deemph(&mut self, tau: f64) {
        match self {
            DemodChain::Narrow(rx) => rx.set_fm_deemph(tau),
            DemodChain::Wide(rx) => rx.set_fm_deemph(tau),
        }
    }

    /// Narrowband-only controls; `None` on the wideband chain.
    pub fn narrow_mut(&mut self) -> Option<&mut NarrowbandRx> {
        match self {
            DemodChain::Narrow(rx) => Some(rx),
            DemodChain::Wide(_) => None,
        }
    }

    pub fn wide(&self) -> Option<&WidebandRx> {
        match self {
            DemodChain::Wide(rx) => Some(rx),
            DemodChain::Narrow(_) => None,
        }
    }
}

impl Block for DemodChain {
    fn kind(&self) -> StageKind {
        StageKind::Demodulator
    }

    fn inputs(&self) -> &'static [PortType] {
        COMPLEX_1
    }

    fn outputs(&self) -> &'static [PortType] {
        REAL_2
    }

    fn work(&mut self, inputs: &[&Buffer]) -> RxResult<Vec<Buffer>> {
        let input = complex_input(inputs, 0)?;
        let (left, right) = match self {
            DemodChain::Narrow(rx) => rx.process(input),
            DemodChain::Wide(rx) => rx.process(input),
        };
        Ok(vec![Buffer::Real(left), Buffer::Real(right)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_sets_per_family() {
        let nb = DemodChain::new(DemodFamily::Narrowband, 96_000.0, 48_000).unwrap();
        let wb = DemodChain::new(DemodFamily::Wideband, 240_000.0, 48_000).unwrap();
        for cap in [
            Capabilities::SQUELCH,
            Capabilities::AGC,
            Capabilities::NOISE_BLANKER,
            Capabilities::FM,
            Capabilities::AM,
        ] {
            assert!(nb.has(cap));
        }
        assert!(wb.has(Capabilities::SQUELCH | Capabilities::FM));
        assert!(!wb.has(Capabilities::AGC));
        assert!(!wb.has(Capabilities::NOISE_BLANKER));
        assert!(!wb.has(Capabilities::AM));
    }

    #[test]
    fn filter_rejects_inverted_and_narrow_bands() {
        let mut chain = DemodChain::new(DemodFamily::Narrowband, 96_000.0, 48_000).unwrap();
        let before = chain.filter();
        assert!(chain.set_filter(1000.0, 1000.0, FilterShape::Normal).is_err());
        assert!(chain.set_filter(2000.0, 1000.0, FilterShape::Normal).is_err());
        assert!(chain.set_filter(1000.0, 1099.0, FilterShape::Normal).is_err());
        assert_eq!(chain.filter(), before);

        chain.set_filter(-2000.0, 2000.0, FilterShape::Sharp).unwrap();
        let f = chain.filter();
        assert_eq!((f.low_hz, f.high_hz), (-2000.0, 2000.0));
        assert!((f.transition_hz - 400.0).abs() < 1e-9);
    }

    #[test]
    fn transition_follows_shape() {
        let soft = ChannelFilter::from_shape(0.0, 1000.0, FilterShape::Soft).unwrap();
        let normal = ChannelFilter::from_shape(0.0, 1000.0, FilterShape::Normal).unwrap();
        assert_eq!(soft.transition_hz, 500.0);
        assert_eq!(normal.transition_hz, 200.0);
    }

    #[test]
    fn block_emits_two_audio_channels() {
        let mut chain = DemodChain::new(DemodFamily::Narrowband, 48_000.0, 48_000).unwrap();
        let input = Buffer::Complex(vec![Complex::new(0.1, 0.0); 480]);
        let out = chain.work(&[&input]).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].len(), out[1].len());
    }
}
