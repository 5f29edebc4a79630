// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::f32::consts::TAU;

use num_complex::Complex;
use trx_core::{Demod, DemodFamily, RxError, RxResult};

use super::iir::{Biquad, Butterworth4, Deemphasis, OnePoleLowPass};
use super::math::{demod_fm_with_prev, power_db};
use super::squelch::{LevelMeter, Squelch};
use super::ChannelFilter;
use crate::dsp::filter::ComplexFir;
use crate::dsp::Resampler;

const DEFAULT_FILTER: ChannelFilter = ChannelFilter {
    low_hz: -80_000.0,
    high_hz: 80_000.0,
    transition_hz: 20_000.0,
};
const DEFAULT_FM_MAXDEV: f64 = 75_000.0;
const DEFAULT_FM_TAU: f64 = 50e-6;
/// Audio bandwidth of the sum and difference channels.
const AUDIO_BW_HZ: f32 = 15_000.0;
const PILOT_BPF_Q: f32 = 20.0;
/// Stereo subcarrier of the CCIR system (pilot is half of it).
const CCIR_SUBCARRIER_HZ: f32 = 38_000.0;
/// Stereo subcarrier of the OIRT system.
const OIRT_SUBCARRIER_HZ: f32 = 31_250.0;

/// Pilot-locked stereo matrix decoder working on the FM composite signal.
#[derive(Debug, Clone)]
struct StereoDecoder {
    pilot_phase: f32,
    pilot_inc: f32,
    pilot_bpf: Biquad,
    pilot_i_lp: OnePoleLowPass,
    pilot_q_lp: OnePoleLowPass,
    pilot_abs_lp: OnePoleLowPass,
    sum_lpf: Butterworth4,
    diff_lpf: Butterworth4,
    blend: f32,
}

impl StereoDecoder {
    fn new(rate: f32, subcarrier_hz: f32) -> Self {
        let pilot_hz = subcarrier_hz / 2.0;
        Self {
            pilot_phase: 0.0,
            pilot_inc: TAU * pilot_hz / rate.max(1.0),
            pilot_bpf: Biquad::band_pass(rate, pilot_hz, PILOT_BPF_Q),
            pilot_i_lp: OnePoleLowPass::new(rate, 400.0),
            pilot_q_lp: OnePoleLowPass::new(rate, 400.0),
            pilot_abs_lp: OnePoleLowPass::new(rate, 400.0),
            sum_lpf: Butterworth4::new(rate, AUDIO_BW_HZ),
            diff_lpf: Butterworth4::new(rate, AUDIO_BW_HZ),
            blend: 0.0,
        }
    }

    /// One composite sample in, (left, right) out.
    fn process(&mut self, x: f32) -> (f32, f32) {
        let pilot = self.pilot_bpf.process(x);
        let (sin_p, cos_p) = self.pilot_phase.sin_cos();
        let i = self.pilot_i_lp.process(pilot * cos_p);
        let q = self.pilot_q_lp.process(pilot * -sin_p);
        let phase_est = self.pilot_phase + q.atan2(i);
        self.pilot_phase = (self.pilot_phase + self.pilot_inc).rem_euclid(TAU);

        let coherence = ((i * i + q * q).sqrt() / (self.pilot_abs_lp.process(pilot.abs()) + 1e-4))
            .clamp(0.0, 1.0);
        let target = ((coherence - 0.4) / 0.2).clamp(0.0, 1.0);
        self.blend += 0.0005 * (target - self.blend);

        let sum = self.sum_lpf.process(x);
        let diff = self.diff_lpf.process(x * (2.0 * phase_est).cos() * 2.0) * self.blend;
        (sum + diff, sum - diff)
    }

    fn pilot_locked(&self) -> bool {
        self.blend > 0.5
    }
}

/// Wideband FM receiver with mono, CCIR stereo and OIRT stereo outputs.
#[derive(Debug)]
pub struct WidebandRx {
    quad_rate: f64,
    audio_rate: u32,
    demod: Demod,
    filter: ChannelFilter,
    chan: ComplexFir,
    sql: Squelch,
    meter: LevelMeter,
    fm_maxdev: f64,
    fm_tau: f64,
    prev_iq: Option<Complex<f32>>,
    mono_lpf: Butterworth4,
    stereo: StereoDecoder,
    deemph: [Deemphasis; 2],
    resamplers: [Resampler; 2],
}

impl WidebandRx {
    pub fn new(quad_rate: f64, audio_rate: u32) -> RxResult<Self> {
        let ratio = audio_rate as f64 / quad_rate;
        let rate = quad_rate as f32;
        Ok(Self {
            quad_rate,
            audio_rate,
            demod: Demod::WfmMono,
            filter: DEFAULT_FILTER,
            chan: ComplexFir::new(DEFAULT_FILTER.taps(quad_rate)),
            sql: Squelch::default(),
            meter: LevelMeter::default(),
            fm_maxdev: DEFAULT_FM_MAXDEV,
            fm_tau: DEFAULT_FM_TAU,
            prev_iq: None,
            mono_lpf: Butterworth4::new(rate, AUDIO_BW_HZ),
            stereo: StereoDecoder::new(rate, CCIR_SUBCARRIER_HZ),
            deemph: [
                Deemphasis::new(rate, DEFAULT_FM_TAU),
                Deemphasis::new(rate, DEFAULT_FM_TAU),
            ],
            resamplers: [Resampler::new(ratio)?, Resampler::new(ratio)?],
        })
    }

    fn subcarrier(&self) -> f32 {
        if self.demod == Demod::WfmStereoOirt {
            OIRT_SUBCARRIER_HZ
        } else {
            CCIR_SUBCARRIER_HZ
        }
    }

    pub fn demod(&self) -> Demod {
        self.demod
    }

    pub fn set_demod(&mut self, demod: Demod) -> RxResult<()> {
        if demod.family() != Some(DemodFamily::Wideband) {
            return Err(RxError::invalid(format!(
                "{} is not a wideband demodulator",
                demod
            )));
        }
        if demod != self.demod {
            self.demod = demod;
            self.stereo = StereoDecoder::new(self.quad_rate as f32, self.subcarrier());
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
        let r = rate as f32;
        self.chan = ComplexFir::new(self.filter.taps(rate));
        self.mono_lpf = Butterworth4::new(r, AUDIO_BW_HZ);
        self.stereo = StereoDecoder::new(r, self.subcarrier());
        self.deemph = [Deemphasis::new(r, self.fm_tau), Deemphasis::new(r, self.fm_tau)];
        Ok(())
    }

    pub fn filter(&self) -> ChannelFilter {
        self.filter
    }

    pub fn set_filter(&mut self, filter: ChannelFilter) {
        self.filter = filter;
        self.chan = ComplexFir::new(filter.taps(self.quad_rate));
    }

    pub fn squelch(&mut self) -> &mut Squelch {
        &mut self.sql
    }

    pub fn sql_level(&self) -> f64 {
        self.sql.level()
    }

    pub fn set_fm_maxdev(&mut self, hz: f64) {
        self.fm_maxdev = hz.max(1.0);
    }

    pub fn fm_maxdev(&self) -> f64 {
        self.fm_maxdev
    }

    pub fn set_fm_deemph(&mut self, tau: f64) {
        self.fm_tau = tau;
        let r = self.quad_rate as f32;
        self.deemph = [Deemphasis::new(r, tau), Deemphasis::new(r, tau)];
    }

    pub fn fm_deemph(&self) -> f64 {
        self.fm_tau
    }

    pub fn signal_level_db(&self) -> f32 {
        self.meter.level_db()
    }

    pub fn stereo_locked(&self) -> bool {
        self.demod != Demod::WfmMono && self.stereo.pilot_locked()
    }

    pub fn process(&mut self, input: &[Complex<f32>]) -> (Vec<f32>, Vec<f32>) {
        let mut samples = self.chan.filter(input);
        self.meter.update(power_db(&samples));
        self.sql.process(&mut samples);

        let gain = (self.quad_rate / (2.0 * self.fm_maxdev)) as f32;
        let composite = demod_fm_with_prev(&samples, &mut self.prev_iq);
        let mut left = Vec::with_capacity(composite.len());
        let mut right = Vec::with_capacity(composite.len());
        for x in composite {
            let x = x * gain;
            let (l, r) = if self.demod == Demod::WfmMono {
                let m = self.mono_lpf.process(x);
                (m, m)
            } else {
                self.stereo.process(x)
            };
            left.push(self.deemph[0].process(l));
            right.push(self.deemph[1].process(r));
        }
        (
            self.resamplers[0].process(&left),
            self.resamplers[1].process(&right),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fm_modulate(audio: impl Fn(f32) -> f32, rate: f32, dev: f32, len: usize) -> Vec<Complex<f32>> {
        let mut phase = 0.0_f32;
        (0..len)
            .map(|n| {
                phase = (phase + TAU * dev * audio(n as f32 / rate) / rate).rem_euclid(TAU);
                Complex::from_polar(1.0, phase)
            })
            .collect()
    }

    #[test]
    fn rejects_narrowband_variants() {
        let mut rx = WidebandRx::new(240_000.0, 48_000).unwrap();
        assert!(rx.set_demod(Demod::Nfm).is_err());
        rx.set_demod(Demod::WfmStereoOirt).unwrap();
        assert_eq!(rx.demod(), Demod::WfmStereoOirt);
    }

    #[test]
    fn mono_recovers_constant_deviation() {
        let rate = 240_000.0;
        let mut rx = WidebandRx::new(rate as f64, 48_000).unwrap();
        rx.set_fm_deemph(0.0);
        let iq = fm_modulate(|_| 0.5, rate, 75_000.0, 24_000);
        let (l, r) = rx.process(&iq);
        assert!((l.len() as i64 - 4800).abs() <= 1);
        let tail = l[l.len() - 1];
        assert!((tail - 0.5).abs() < 0.05, "tail {}", tail);
        assert_eq!(l, r);
    }

    #[test]
    fn stereo_locks_on_pilot() {
        let rate = 240_000.0;
        let mut rx = WidebandRx::new(rate as f64, 48_000).unwrap();
        rx.set_demod(Demod::WfmStereo).unwrap();
        let pilot = |t: f32| 0.1 * (TAU * 19_000.0 * t).sin();
        let iq = fm_modulate(pilot, rate, 75_000.0, 240_000);
        for chunk in iq.chunks(4800) {
            rx.process(chunk);
        }
        assert!(rx.stereo_locked());
    }
}
