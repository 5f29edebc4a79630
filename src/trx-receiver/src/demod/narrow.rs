// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use num_complex::Complex;
use trx_core::{Demod, DemodFamily, RxError, RxResult};

use super::agc::Agc;
use super::iir::{DcBlocker, Deemphasis};
use super::math::{demod_fm_with_prev, power_db};
use super::nb::NoiseBlanker;
use super::squelch::{LevelMeter, Squelch};
use super::ChannelFilter;
use crate::dsp::filter::ComplexFir;
use crate::dsp::Resampler;

const DEFAULT_FILTER: ChannelFilter = ChannelFilter {
    low_hz: -5000.0,
    high_hz: 5000.0,
    transition_hz: 1000.0,
};
const DEFAULT_FM_MAXDEV: f64 = 2500.0;
const DEFAULT_FM_TAU: f64 = 75e-6;

/// Narrowband receiver: noise blankers, channel filter, squelch, AGC and one
/// of the raw / AM / FM / SSB detectors, resampled to the audio rate.
#[derive(Debug)]
pub struct NarrowbandRx {
    quad_rate: f64,
    audio_rate: u32,
    demod: Demod,
    filter: ChannelFilter,
    chan: ComplexFir,
    nb: [NoiseBlanker; 2],
    sql: Squelch,
    meter: LevelMeter,
    agc: Agc,
    fm_maxdev: f64,
    fm_tau: f64,
    deemph: Deemphasis,
    prev_iq: Option<Complex<f32>>,
    am_dcr: bool,
    dcr: DcBlocker,
    cw_offset: f64,
    resamplers: [Resampler; 2],
}

impl NarrowbandRx {
    pub fn new(quad_rate: f64, audio_rate: u32) -> RxResult<Self> {
        let ratio = audio_rate as f64 / quad_rate;
        Ok(Self {
            quad_rate,
            audio_rate,
            demod: Demod::Nfm,
            filter: DEFAULT_FILTER,
            chan: ComplexFir::new(DEFAULT_FILTER.taps(quad_rate)),
            nb: [NoiseBlanker::pulse(), NoiseBlanker::burst()],
            sql: Squelch::default(),
            meter: LevelMeter::default(),
            agc: Agc::new(quad_rate as f32),
            fm_maxdev: DEFAULT_FM_MAXDEV,
            fm_tau: DEFAULT_FM_TAU,
            deemph: Deemphasis::new(quad_rate as f32, DEFAULT_FM_TAU),
            prev_iq: None,
            am_dcr: true,
            dcr: DcBlocker::new(0.999),
            cw_offset: 0.0,
            resamplers: [Resampler::new(ratio)?, Resampler::new(ratio)?],
        })
    }

    pub fn demod(&self) -> Demod {
        self.demod
    }

    pub fn set_demod(&mut self, demod: Demod) -> RxResult<()> {
        if demod.family() != Some(DemodFamily::Narrowband) {
            return Err(RxError::invalid(format!(
                "{} is not a narrowband demodulator",
                demod
            )));
        }
        if demod != self.demod {
            self.demod = demod;
            self.prev_iq = None;
        }
        Ok(())
    }

    pub fn quad_rate(&self) -> f64 {
        self.quad_rate
    }

    pub fn set_quad_rate(&mut self, rate: f64) -> RxResult<()> {
        let ratio = self.audio_rate as f64 / rate;
        self.resamplers = [Resampler::new(ratio)?, Resampler::new(ratio)?];
        self.quad_rate = rate;
        self.chan = ComplexFir::new(self.filter.taps(rate));
        self.agc.set_sample_rate(rate as f32);
        self.deemph = Deemphasis::new(rate as f32, self.fm_tau);
        Ok(())
    }

    pub fn filter(&self) -> ChannelFilter {
        self.filter
    }

    pub fn set_filter(&mut self, filter: ChannelFilter) {
        self.filter = filter;
        self.chan = ComplexFir::new(filter.taps(self.quad_rate));
    }

    pub fn set_cw_offset(&mut self, hz: f64) {
        self.cw_offset = hz;
    }

    pub fn cw_offset(&self) -> f64 {
        self.cw_offset
    }

    pub fn squelch(&mut self) -> &mut Squelch {
        &mut self.sql
    }

    pub fn sql_level(&self) -> f64 {
        self.sql.level()
    }

    pub fn agc(&mut self) -> &mut Agc {
        &mut self.agc
    }

    /// Blanker by 1-based id; `None` for unknown ids.
    pub fn noise_blanker(&mut self, id: u32) -> Option<&mut NoiseBlanker> {
        match id {
            1 | 2 => self.nb.get_mut(id as usize - 1),
            _ => None,
        }
    }

    pub fn set_fm_maxdev(&mut self, hz: f64) {
        self.fm_maxdev = hz.max(1.0);
    }

    pub fn fm_maxdev(&self) -> f64 {
        self.fm_maxdev
    }

    pub fn set_fm_deemph(&mut self, tau: f64) {
        self.fm_tau = tau;
        self.deemph = Deemphasis::new(self.quad_rate as f32, tau);
    }

    pub fn fm_deemph(&self) -> f64 {
        self.fm_tau
    }

    pub fn set_am_dcr(&mut self, on: bool) {
        self.am_dcr = on;
    }

    pub fn am_dcr(&self) -> bool {
        self.am_dcr
    }

    pub fn signal_level_db(&self) -> f32 {
        self.meter.level_db()
    }

    pub fn process(&mut self, input: &[Complex<f32>]) -> (Vec<f32>, Vec<f32>) {
        let mut samples = input.to_vec();
        for nb in self.nb.iter_mut() {
            nb.process(&mut samples);
        }
        let mut samples = self.chan.filter(&samples);
        self.meter.update(power_db(&samples));
        self.sql.process(&mut samples);

        let (left, right) = match self.demod {
            Demod::Raw => (
                samples.iter().map(|s| s.re).collect(),
                samples.iter().map(|s| s.im).collect(),
            ),
            Demod::Nfm => {
                let gain = (self.quad_rate / (2.0 * self.fm_maxdev)) as f32;
                let audio: Vec<f32> = demod_fm_with_prev(&samples, &mut self.prev_iq)
                    .into_iter()
                    .map(|x| self.deemph.process(x * gain))
                    .collect();
                (audio.clone(), audio)
            }
            Demod::Am => {
                let audio: Vec<f32> = self
                    .agc
                    .process(&samples)
                    .iter()
                    .map(|s| {
                        let env = s.norm();
                        if self.am_dcr {
                            self.dcr.process(env)
                        } else {
                            env
                        }
                    })
                    .collect();
                (audio.clone(), audio)
            }
            _ => {
                let audio: Vec<f32> = self.agc.process(&samples).iter().map(|s| s.re).collect();
                (audio.clone(), audio)
            }
        };
        (
            self.resamplers[0].process(&left),
            self.resamplers[1].process(&right),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::TAU;

    fn carrier(offset_hz: f32, rate: f32, len: usize) -> Vec<Complex<f32>> {
        (0..len)
            .map(|n| Complex::from_polar(0.5, TAU * offset_hz * n as f32 / rate))
            .collect()
    }

    #[test]
    fn rejects_wideband_variants() {
        let mut rx = NarrowbandRx::new(96_000.0, 48_000).unwrap();
        assert!(rx.set_demod(Demod::WfmStereo).is_err());
        assert!(rx.set_demod(Demod::Off).is_err());
        assert_eq!(rx.demod(), Demod::Nfm);
        rx.set_demod(Demod::Am).unwrap();
        assert_eq!(rx.demod(), Demod::Am);
    }

    #[test]
    fn output_is_at_audio_rate() {
        let mut rx = NarrowbandRx::new(96_000.0, 48_000).unwrap();
        let (l, r) = rx.process(&carrier(1000.0, 96_000.0, 9600));
        assert_eq!(l.len(), r.len());
        assert!((l.len() as i64 - 4800).abs() <= 1);
    }

    #[test]
    fn fm_discriminator_reports_carrier_offset() {
        let mut rx = NarrowbandRx::new(48_000.0, 48_000).unwrap();
        rx.set_fm_deemph(0.0);
        rx.set_fm_maxdev(1000.0);
        let (l, _) = rx.process(&carrier(1000.0, 48_000.0, 4800));
        let tail = l[l.len() - 1];
        assert!((tail - 1.0).abs() < 0.05, "tail {}", tail);
    }

    #[test]
    fn meter_tracks_filtered_power() {
        let mut rx = NarrowbandRx::new(48_000.0, 48_000).unwrap();
        rx.process(&carrier(0.0, 48_000.0, 4800));
        let level = rx.signal_level_db();
        assert!((level - -6.0).abs() < 1.0, "level {}", level);
    }

    #[test]
    fn unknown_blanker_id() {
        let mut rx = NarrowbandRx::new(48_000.0, 48_000).unwrap();
        assert!(rx.noise_blanker(0).is_none());
        assert!(rx.noise_blanker(3).is_none());
        assert!(rx.noise_blanker(2).is_some());
    }
}
