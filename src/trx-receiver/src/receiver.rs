// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Pipeline orchestrator.
//!
//! [`Receiver`] owns every stage of the flowgraph and is the only place that
//! changes its topology. Topology changes happen either with the scheduler
//! stopped (quiesced) or while holding the flowgraph mutex; parameter-only
//! updates lock just the affected stage.
//!
//! Lock order is always flowgraph first, then stage.

use std::f64::consts::TAU;
use std::path::Path;
use std::sync::{Arc, Mutex};

use trx_core::{
    Demod, DeviceFactory, FilterShape, FreqRange, GainRange, RxError, RxResult, SampleSource,
};

use crate::demod::{Capabilities, ChannelFilter, DemodChain};
use crate::dsp::gain::db_to_linear;
use crate::dsp::spectrum::DEFAULT_FFT_SIZE;
use crate::dsp::{DcCorrector, Decimator, FftWindow, Gain, IqSwap, Resampler, Rotator, Spectrum};
use crate::graph::{Edge, Flowgraph, Runner, Stage, StageId};
use crate::stage::{lock, NullSink, StageKind};
use crate::taps::{AudioOut, RawIqSink, Sniffer, SourceStage, UdpSink, WavSink, WavSource};

pub const DEFAULT_INPUT_RATE: f64 = 96_000.0;
pub const DEFAULT_AUDIO_RATE: u32 = 48_000;
pub const DEFAULT_RF_FREQ_HZ: f64 = 144_800_000.0;
pub const DEFAULT_AF_GAIN_DB: f64 = -6.0;
/// Sniffer capacity until a session chooses its own.
const DEFAULT_SNIFFER_SIZE: usize = 8192;
/// Averaging time constant of the DC corrector in seconds.
const DC_CORR_TAU: f64 = 1.0;

/// Snapshot of the pipeline parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RxState {
    pub running: bool,
    pub input_rate: f64,
    pub decim: u32,
    pub quad_rate: f64,
    pub audio_rate: u32,
    pub demod: Demod,
    pub filter_offset: f64,
    pub cw_offset: f64,
    pub iq_swap: bool,
    pub dc_cancel: bool,
    pub iq_balance: bool,
    pub rf_freq: f64,
    pub af_gain_db: f64,
    pub input_device: String,
    pub output_device: String,
}

/// Quadrature rate as seen by each rate-dependent stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageRates {
    pub dc_corrector: f64,
    pub demodulator: f64,
    pub iq_spectrum: f64,
}

/// One edge of the current topology with the kinds of both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    pub edge: Edge,
    pub src: StageKind,
    pub dst: StageKind,
}

/// Optional consumers; a present handle means the tap is active.
#[derive(Default)]
struct Taps {
    wav_sink: Option<Stage<WavSink>>,
    wav_src: Option<Stage<WavSource>>,
    iq_sink: Option<Stage<RawIqSink>>,
    sniffer_rr: Option<Stage<Resampler>>,
}

pub struct Receiver {
    devices: Arc<dyn DeviceFactory>,
    graph: Arc<Mutex<Flowgraph>>,
    runner: Option<Runner>,
    state: RxState,

    src: Stage<SourceStage>,
    decim: Option<Stage<Decimator>>,
    iq_swap: Stage<IqSwap>,
    dc_corr: Stage<DcCorrector>,
    iq_fft: Stage<Spectrum>,
    rot: Stage<Rotator>,
    rx: Stage<DemodChain>,
    audio_fft: Stage<Spectrum>,
    gain0: Stage<Gain>,
    gain1: Stage<Gain>,
    audio_snk: Stage<AudioOut>,
    udp: Stage<UdpSink>,
    null0: Stage<NullSink>,
    null1: Stage<NullSink>,
    sniffer: Stage<Sniffer>,
    taps: Taps,
}

/// Turn a boxed backend error back into an [`RxError`].
fn backend_err(err: Box<dyn std::error::Error + Send + Sync>) -> RxError {
    match err.downcast::<RxError>() {
        Ok(rx) => *rx,
        Err(other) => RxError::device(other),
    }
}

/// Relative-epsilon comparison of two sample rates.
fn rate_changed(requested: f64, current: f64) -> bool {
    !(requested == current
        || (requested - current).abs() < requested.min(current).abs() * f64::EPSILON)
}

impl Receiver {
    /// Build the pipeline. An empty or failing `input_device` falls back to the
    /// factory's synthetic source; the demodulator starts as narrowband FM.
    pub fn new(
        devices: Arc<dyn DeviceFactory>,
        input_device: &str,
        output_device: &str,
        decimation: u32,
    ) -> RxResult<Self> {
        let mut input_devstr = input_device.to_string();
        let source: Box<dyn SampleSource> = if input_device.is_empty() {
            devices.fallback_source()
        } else {
            match devices.open_source(input_device) {
                Ok(source) => source,
                Err(e) => {
                    tracing::warn!(
                        "Failed to open input device '{}': {}; using fallback source",
                        input_device,
                        e
                    );
                    input_devstr.clear();
                    devices.fallback_source()
                }
            }
        };
        let input_rate = match source.sample_rate() {
            r if r > 0.0 => r,
            _ => DEFAULT_INPUT_RATE,
        };

        let audio_rate = DEFAULT_AUDIO_RATE;
        let sink = devices
            .open_audio_sink(output_device, audio_rate, true)
            .map_err(backend_err)?;

        let mut g = Flowgraph::new();
        let src = g.add(SourceStage::new(source));

        let mut decim = decimation.max(1);
        let decim_stage = if decim >= 2 {
            match Decimator::new(decim) {
                Ok(d) => Some(g.add(d)),
                Err(e) => {
                    tracing::warn!("{}; using decimation 1", e);
                    decim = 1;
                    None
                }
            }
        } else {
            None
        };
        let quad_rate = input_rate / decim as f64;

        let af_k = db_to_linear(DEFAULT_AF_GAIN_DB);
        let rx = g.add(DemodChain::new(
            trx_core::DemodFamily::Narrowband,
            quad_rate,
            audio_rate,
        )?);

        let mut receiver = Self {
            devices,
            state: RxState {
                running: false,
                input_rate,
                decim,
                quad_rate,
                audio_rate,
                demod: Demod::Off,
                filter_offset: 0.0,
                cw_offset: 0.0,
                iq_swap: false,
                dc_cancel: false,
                iq_balance: false,
                rf_freq: DEFAULT_RF_FREQ_HZ,
                af_gain_db: DEFAULT_AF_GAIN_DB,
                input_device: input_devstr,
                output_device: output_device.to_string(),
            },
            src,
            decim: decim_stage,
            iq_swap: g.add(IqSwap::new(false)),
            dc_corr: g.add(DcCorrector::new(quad_rate, DC_CORR_TAU)),
            iq_fft: g.add(Spectrum::complex(DEFAULT_FFT_SIZE, quad_rate, FftWindow::Hann)),
            rot: g.add(Rotator::new(0.0)),
            rx,
            audio_fft: g.add(Spectrum::real(DEFAULT_FFT_SIZE, FftWindow::Hann)),
            gain0: g.add(Gain::new(af_k)),
            gain1: g.add(Gain::new(af_k)),
            audio_snk: g.add(AudioOut::new(sink)),
            udp: g.add(UdpSink::new()),
            null0: g.add(NullSink::new()),
            null1: g.add(NullSink::new()),
            sniffer: g.add(Sniffer::new(DEFAULT_SNIFFER_SIZE)),
            taps: Taps::default(),
            graph: Arc::new(Mutex::new(g)),
            runner: None,
        };
        receiver.set_demodulator(Demod::Nfm)?;
        tracing::info!(
            "Receiver created: input {} S/s, decimation {}, audio {} S/s",
            input_rate,
            decim,
            audio_rate
        );
        Ok(receiver)
    }

    pub fn state(&self) -> &RxState {
        &self.state
    }

    pub fn is_running(&self) -> bool {
        self.runner.is_some()
    }

    /// Start the scheduler. No-op when already running.
    pub fn start(&mut self) -> RxResult<()> {
        if self.runner.is_some() {
            return Ok(());
        }
        self.runner = Some(Runner::spawn(self.graph.clone())?);
        self.state.running = true;
        tracing::info!("Receiver started");
        Ok(())
    }

    /// Stop the scheduler, wait for it to exit and flush the file sinks.
    /// No-op when already stopped.
    pub fn stop(&mut self) {
        if let Some(runner) = self.runner.take() {
            runner.stop();
            lock(&self.graph).stop_all();
            self.state.running = false;
            tracing::info!("Receiver stopped");
        }
    }

    /// Halt the scheduler for a topology change; returns whether it was running.
    fn quiesce(&mut self) -> bool {
        match self.runner.take() {
            Some(runner) => {
                runner.stop();
                true
            }
            None => false,
        }
    }

    /// Run `f` with the scheduler halted and restart it afterwards if it was
    /// running before.
    fn with_quiesced<T>(&mut self, f: impl FnOnce(&mut Self) -> RxResult<T>) -> RxResult<T> {
        let was_running = self.quiesce();
        let out = f(self);
        if was_running {
            self.state.running = false;
            if let Err(e) = self.start() {
                tracing::error!("Failed to restart receiver: {}", e);
                if out.is_ok() {
                    return Err(e);
                }
            }
        }
        out
    }

    /// Run `f` while holding the flowgraph lock.
    fn with_graph<T>(&mut self, f: impl FnOnce(&mut Self, &mut Flowgraph) -> T) -> T {
        let graph = self.graph.clone();
        let mut g = lock(&graph);
        f(self, &mut g)
    }

    fn head(&self) -> StageId {
        self.decim.as_ref().map_or(self.src.id(), |d| d.id())
    }

    fn detach_head(&self, g: &mut Flowgraph) {
        g.disconnect_outputs(self.src.id());
        if let Some(decim) = &self.decim {
            g.disconnect_outputs(decim.id());
        }
    }

    fn attach_head(&self, g: &mut Flowgraph) -> RxResult<()> {
        if let Some(decim) = &self.decim {
            g.connect(self.src.id(), 0, decim.id(), 0)?;
        }
        let head = self.head();
        if let Some(iq) = &self.taps.iq_sink {
            g.connect(head, 0, iq.id(), 0)?;
        }
        g.connect(head, 0, self.iq_swap.id(), 0)
    }

    /// Demodulated-audio consumers fed by `from`.
    fn audio_fanout(&self, from: StageId) -> [Edge; 5] {
        [
            Edge::new(from, 0, self.audio_fft.id(), 0),
            Edge::new(from, 0, self.udp.id(), 0),
            Edge::new(from, 1, self.udp.id(), 1),
            Edge::new(from, 0, self.gain0.id(), 0),
            Edge::new(from, 1, self.gain1.id(), 0),
        ]
    }

    fn connect_edges(g: &mut Flowgraph, edges: &[Edge]) -> RxResult<()> {
        for e in edges {
            g.connect(e.src, e.src_port, e.dst, e.dst_port)?;
        }
        Ok(())
    }

    fn disconnect_edges(g: &mut Flowgraph, edges: &[Edge]) -> RxResult<()> {
        for e in edges {
            g.disconnect(e.src, e.src_port, e.dst, e.dst_port)?;
        }
        Ok(())
    }

    /// Build the whole topology for the current state on an edge-free graph.
    fn connect_all(&self, g: &mut Flowgraph) -> RxResult<()> {
        self.attach_head(g)?;

        let mut b = self.iq_swap.id();
        if self.state.dc_cancel {
            g.connect(b, 0, self.dc_corr.id(), 0)?;
            b = self.dc_corr.id();
        }
        g.connect(b, 0, self.iq_fft.id(), 0)?;

        if self.state.demod == Demod::Off {
            return Ok(());
        }

        let rx = self.rx.id();
        g.connect(b, 0, self.rot.id(), 0)?;
        g.connect(self.rot.id(), 0, rx, 0)?;

        let audio = match &self.taps.wav_src {
            Some(wav) => {
                g.connect(rx, 0, self.null0.id(), 0)?;
                g.connect(rx, 1, self.null1.id(), 0)?;
                g.connect(rx, 0, wav.id(), 0)?;
                wav.id()
            }
            None => rx,
        };
        Self::connect_edges(g, &self.audio_fanout(audio))?;
        g.connect(self.gain0.id(), 0, self.audio_snk.id(), 0)?;
        g.connect(self.gain1.id(), 0, self.audio_snk.id(), 1)?;

        if let Some(wav) = &self.taps.wav_sink {
            g.connect(rx, 0, wav.id(), 0)?;
            g.connect(rx, 1, wav.id(), 1)?;
        }
        if let Some(rr) = &self.taps.sniffer_rr {
            g.connect(rx, 0, rr.id(), 0)?;
            g.connect(rr.id(), 0, self.sniffer.id(), 0)?;
        }
        Ok(())
    }

    fn update_ddc(&self) {
        let inc = TAU * (self.state.cw_offset - self.state.filter_offset) / self.state.quad_rate;
        self.rot.lock().set_phase_inc(inc);
    }

    /// Recompute the quadrature rate and hand it to every stage that needs it.
    fn update_quad_rate(&mut self) -> RxResult<()> {
        let quad_rate = self.state.input_rate / self.state.decim.max(1) as f64;
        self.state.quad_rate = quad_rate;
        self.dc_corr.lock().set_sample_rate(quad_rate);
        self.rx.lock().set_quad_rate(quad_rate)?;
        self.iq_fft.lock().set_quad_rate(quad_rate);
        self.update_ddc();
        tracing::debug!("Quadrature rate now {} S/s", quad_rate);
        Ok(())
    }

    /// Replace the sample source. On failure the synthetic fallback source is
    /// installed, the pipeline is left runnable and the error is returned.
    pub fn set_input_device(&mut self, device: &str) -> RxResult<()> {
        if device.is_empty() || device == self.state.input_device {
            return Ok(());
        }
        self.with_quiesced(|rx| {
            let failure = rx.with_graph(|rx, g| -> RxResult<Option<RxError>> {
                rx.detach_head(g);
                g.remove(rx.src.id());
                let (mut source, failure) = match rx.devices.open_source(device) {
                    Ok(source) => (source, None),
                    Err(e) => {
                        let err = backend_err(e);
                        tracing::warn!(
                            "Failed to open input device '{}': {}; using fallback source",
                            device,
                            err
                        );
                        (rx.devices.fallback_source(), Some(err))
                    }
                };
                if let Err(e) = source.set_center_freq(rx.state.rf_freq) {
                    tracing::debug!("New source rejected {} Hz: {}", rx.state.rf_freq, e);
                }
                rx.src = g.add(SourceStage::new(source));
                rx.attach_head(g)?;
                rx.state.input_device = if failure.is_some() {
                    String::new()
                } else {
                    device.to_string()
                };
                Ok(failure)
            })?;

            let rate = rx.src.lock().source().sample_rate();
            if rate > 0.0 {
                rx.apply_input_rate(rate)?;
            }
            match failure {
                Some(err) => Err(err),
                None => {
                    tracing::info!("Input device set to '{}'", device);
                    Ok(())
                }
            }
        })
    }

    /// Replace the audio output. Only the gain-to-sink edges are touched.
    pub fn set_output_device(&mut self, device: &str) -> RxResult<()> {
        if device == self.state.output_device {
            return Ok(());
        }
        let sink = self
            .devices
            .open_audio_sink(device, self.state.audio_rate, true)
            .map_err(backend_err)?;
        self.with_graph(|rx, g| -> RxResult<()> {
            g.remove(rx.audio_snk.id());
            rx.audio_snk = g.add(AudioOut::new(sink));
            if rx.state.demod != Demod::Off {
                g.connect(rx.gain0.id(), 0, rx.audio_snk.id(), 0)?;
                g.connect(rx.gain1.id(), 0, rx.audio_snk.id(), 1)?;
            }
            Ok(())
        })?;
        self.state.output_device = device.to_string();
        tracing::info!("Output device set to '{}'", device);
        Ok(())
    }

    fn apply_input_rate(&mut self, rate: f64) -> RxResult<f64> {
        let graph = self.graph.clone();
        let _guard = lock(&graph);

        let (current, accepted) = {
            let mut src = self.src.lock();
            let current = src.source().sample_rate();
            (current, src.source_mut().set_sample_rate(rate))
        };
        self.state.input_rate = if accepted == 0.0 {
            if rate_changed(rate, current) {
                tracing::warn!(
                    "Failed to set input rate to {}; the device may not be working properly",
                    rate
                );
            }
            rate
        } else {
            accepted
        };
        self.update_quad_rate()?;
        Ok(self.state.input_rate)
    }

    /// Request a new source rate. Returns the rate actually in use.
    pub fn set_input_rate(&mut self, rate: f64) -> RxResult<f64> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(RxError::invalid(format!("invalid input rate {}", rate)));
        }
        self.apply_input_rate(rate)
    }

    /// Change the input decimation. Unsupported factors fall back to 1.
    /// Returns the factor in effect.
    pub fn set_input_decimation(&mut self, factor: u32) -> RxResult<u32> {
        let factor = factor.max(1);
        if factor == self.state.decim {
            return Ok(factor);
        }
        self.with_quiesced(|rx| {
            rx.with_graph(|rx, g| -> RxResult<()> {
                rx.detach_head(g);
                if let Some(old) = rx.decim.take() {
                    g.remove(old.id());
                }
                let mut decim = factor;
                if factor >= 2 {
                    match Decimator::new(factor) {
                        Ok(d) => rx.decim = Some(g.add(d)),
                        Err(e) => {
                            tracing::warn!("{}; using decimation 1", e);
                            decim = 1;
                        }
                    }
                }
                rx.state.decim = decim;
                rx.update_quad_rate()?;
                rx.attach_head(g)
            })?;
            Ok(rx.state.decim)
        })
    }

    /// Select the demodulator and rebuild the topology from scratch.
    /// Re-applying the current variant is allowed.
    pub fn set_demodulator(&mut self, demod: Demod) -> RxResult<()> {
        let replacement = match demod.family() {
            Some(family) if family != self.rx.lock().family() => Some(DemodChain::new(
                family,
                self.state.quad_rate,
                self.state.audio_rate,
            )?),
            _ => None,
        };
        self.with_quiesced(|rx| {
            rx.with_graph(|rx, g| {
                g.disconnect_all();
                if let Some(mut chain) = replacement {
                    chain.set_cw_offset(rx.state.cw_offset);
                    g.remove(rx.rx.id());
                    rx.rx = g.add(chain);
                }
                if demod != Demod::Off {
                    rx.rx.lock().set_demod(demod)?;
                }
                rx.state.demod = demod;
                rx.connect_all(g)
            })
        })?;
        tracing::debug!("Demodulator set to {}", demod);
        Ok(())
    }

    pub fn demodulator(&self) -> Demod {
        self.state.demod
    }

    pub fn set_filter_offset(&mut self, hz: f64) {
        self.state.filter_offset = hz;
        self.update_ddc();
    }

    pub fn filter_offset(&self) -> f64 {
        self.state.filter_offset
    }

    pub fn set_cw_offset(&mut self, hz: f64) {
        self.state.cw_offset = hz;
        self.update_ddc();
        self.rx.lock().set_cw_offset(hz);
    }

    pub fn cw_offset(&self) -> f64 {
        self.state.cw_offset
    }

    /// Current DDC rotation in radians per sample.
    pub fn ddc_phase_inc(&self) -> f64 {
        self.rot.lock().phase_inc()
    }

    pub fn set_filter(&mut self, low_hz: f64, high_hz: f64, shape: FilterShape) -> RxResult<()> {
        self.rx.lock().set_filter(low_hz, high_hz, shape)
    }

    pub fn filter(&self) -> ChannelFilter {
        self.rx.lock().filter()
    }

    pub fn quad_rate(&self) -> f64 {
        self.state.quad_rate
    }

    pub fn input_rate(&self) -> f64 {
        self.state.input_rate
    }

    pub fn decimation(&self) -> u32 {
        self.state.decim
    }

    pub fn audio_rate(&self) -> u32 {
        self.state.audio_rate
    }

    pub fn stage_rates(&self) -> StageRates {
        StageRates {
            dc_corrector: self.dc_corr.lock().sample_rate(),
            demodulator: self.rx.lock().quad_rate(),
            iq_spectrum: self.iq_fft.lock().quad_rate(),
        }
    }

    /// Current edges, ordered, with the kind of each endpoint.
    pub fn topology(&self) -> Vec<Link> {
        let g = lock(&self.graph);
        g.edges()
            .filter_map(|e| {
                Some(Link {
                    edge: *e,
                    src: g.kind(e.src)?,
                    dst: g.kind(e.dst)?,
                })
            })
            .collect()
    }

    // RF controls forwarded to the source.

    pub fn set_rf_freq(&mut self, hz: f64) -> RxResult<f64> {
        let actual = self
            .src
            .lock()
            .source_mut()
            .set_center_freq(hz)
            .map_err(backend_err)?;
        self.state.rf_freq = actual;
        Ok(actual)
    }

    pub fn rf_freq(&self) -> f64 {
        self.src.lock().source().center_freq()
    }

    pub fn rf_range(&self) -> Option<FreqRange> {
        self.src.lock().source().freq_range()
    }

    pub fn gain_names(&self) -> Vec<String> {
        self.src.lock().source().gain_names()
    }

    pub fn gain_range(&self, name: &str) -> Option<GainRange> {
        self.src.lock().source().gain_range(name)
    }

    pub fn set_gain(&mut self, name: &str, db: f64) -> RxResult<f64> {
        self.src
            .lock()
            .source_mut()
            .set_gain(name, db)
            .map_err(backend_err)
    }

    pub fn gain(&self, name: &str) -> Option<f64> {
        self.src.lock().source().gain(name)
    }

    pub fn set_auto_gain(&mut self, automatic: bool) -> RxResult<()> {
        self.src
            .lock()
            .source_mut()
            .set_gain_mode(automatic)
            .map_err(backend_err)
    }

    pub fn set_freq_corr(&mut self, ppm: f64) -> RxResult<()> {
        self.src
            .lock()
            .source_mut()
            .set_freq_corr(ppm)
            .map_err(backend_err)
    }

    pub fn antennas(&self) -> Vec<String> {
        self.src.lock().source().antennas()
    }

    pub fn set_antenna(&mut self, name: &str) -> RxResult<()> {
        if name.is_empty() {
            return Ok(());
        }
        self.src
            .lock()
            .source_mut()
            .set_antenna(name)
            .map_err(backend_err)
    }

    pub fn set_analog_bandwidth(&mut self, hz: f64) -> RxResult<f64> {
        self.src
            .lock()
            .source_mut()
            .set_bandwidth(hz)
            .map_err(backend_err)
    }

    pub fn analog_bandwidth(&self) -> f64 {
        self.src.lock().source().bandwidth()
    }

    /// Reposition a file-backed source.
    pub fn seek_iq_file(&mut self, byte_offset: u64) -> RxResult<()> {
        self.src
            .lock()
            .source_mut()
            .seek(byte_offset)
            .map_err(backend_err)
    }

    // Conditioning.

    pub fn set_iq_swap(&mut self, enabled: bool) {
        self.iq_swap.lock().set_enabled(enabled);
        self.state.iq_swap = enabled;
    }

    pub fn set_dc_cancel(&mut self, enabled: bool) -> RxResult<()> {
        if enabled == self.state.dc_cancel {
            return Ok(());
        }
        self.state.dc_cancel = enabled;
        self.set_demodulator(self.state.demod)
    }

    pub fn set_iq_balance(&mut self, enabled: bool) -> RxResult<()> {
        let mode = if enabled { 2 } else { 0 };
        self.src
            .lock()
            .source_mut()
            .set_iq_balance_mode(mode)
            .map_err(backend_err)?;
        self.state.iq_balance = enabled;
        Ok(())
    }

    pub fn set_af_gain(&mut self, db: f64) {
        let k = db_to_linear(db);
        self.gain0.lock().set_k(k);
        self.gain1.lock().set_k(k);
        self.state.af_gain_db = db;
    }

    pub fn af_gain(&self) -> f64 {
        self.state.af_gain_db
    }

    // Spectrum taps.

    pub fn set_iq_fft_size(&mut self, size: usize) -> RxResult<()> {
        self.iq_fft.lock().set_fft_size(size)
    }

    pub fn set_iq_fft_window(&mut self, window: FftWindow) {
        self.iq_fft.lock().set_window(window);
    }

    pub fn iq_fft_data(&self) -> Vec<f32> {
        self.iq_fft.lock().data()
    }

    pub fn audio_fft_data(&self) -> Vec<f32> {
        self.audio_fft.lock().data()
    }

    /// Channel power after the filter, in dBFS or as linear power.
    pub fn signal_power(&self, dbfs: bool) -> f32 {
        let db = self.rx.lock().signal_level_db();
        if dbfs {
            db
        } else {
            10.0_f32.powf(db / 10.0)
        }
    }

    // Demodulator sub-controls. Unsupported controls are ignored.

    fn with_cap(&self, cap: Capabilities, f: impl FnOnce(&mut DemodChain)) {
        let mut rx = self.rx.lock();
        if rx.has(cap) {
            f(&mut *rx);
        }
    }

    pub fn set_sql_level(&mut self, db: f64) {
        self.with_cap(Capabilities::SQUELCH, |rx| rx.set_sql_level(db));
    }

    pub fn sql_level(&self) -> f64 {
        self.rx.lock().sql_level()
    }

    pub fn set_sql_alpha(&mut self, alpha: f64) {
        self.with_cap(Capabilities::SQUELCH, |rx| rx.set_sql_alpha(alpha));
    }

    pub fn set_agc_on(&mut self, on: bool) {
        self.with_cap(Capabilities::AGC, |rx| {
            if let Some(nb) = rx.narrow_mut() {
                nb.agc().set_enabled(on);
            }
        });
    }

    pub fn set_agc_hang(&mut self, hang: bool) {
        self.with_cap(Capabilities::AGC, |rx| {
            if let Some(nb) = rx.narrow_mut() {
                nb.agc().set_hang(hang);
            }
        });
    }

    pub fn set_agc_threshold(&mut self, db: i32) {
        self.with_cap(Capabilities::AGC, |rx| {
            if let Some(nb) = rx.narrow_mut() {
                nb.agc().set_threshold(db);
            }
        });
    }

    pub fn set_agc_slope(&mut self, db: i32) {
        self.with_cap(Capabilities::AGC, |rx| {
            if let Some(nb) = rx.narrow_mut() {
                nb.agc().set_slope(db);
            }
        });
    }

    pub fn set_agc_decay(&mut self, ms: i32) {
        self.with_cap(Capabilities::AGC, |rx| {
            if let Some(nb) = rx.narrow_mut() {
                nb.agc().set_decay(ms);
            }
        });
    }

    pub fn set_agc_manual_gain(&mut self, db: i32) {
        self.with_cap(Capabilities::AGC, |rx| {
            if let Some(nb) = rx.narrow_mut() {
                nb.agc().set_manual_gain(db);
            }
        });
    }

    pub fn set_fm_maxdev(&mut self, hz: f64) {
        self.with_cap(Capabilities::FM, |rx| rx.set_fm_maxdev(hz));
    }

    pub fn set_fm_deemph(&mut self, tau: f64) {
        self.with_cap(Capabilities::FM, |rx| rx.set_fm_deemph(tau));
    }

    pub fn set_am_dcr(&mut self, enabled: bool) {
        self.with_cap(Capabilities::AM, |rx| {
            if let Some(nb) = rx.narrow_mut() {
                nb.set_am_dcr(enabled);
            }
        });
    }

    /// Switch noise blanker `id` (1 or 2).
    pub fn set_nb_on(&mut self, id: u32, on: bool) -> RxResult<()> {
        self.with_blanker(id, |nb| nb.set_enabled(on))
    }

    pub fn set_nb_threshold(&mut self, id: u32, threshold: f32) -> RxResult<()> {
        self.with_blanker(id, |nb| nb.set_threshold(threshold))
    }

    fn with_blanker(
        &mut self,
        id: u32,
        f: impl FnOnce(&mut crate::demod::nb::NoiseBlanker),
    ) -> RxResult<()> {
        let mut rx = self.rx.lock();
        if !rx.has(Capabilities::NOISE_BLANKER) {
            return Ok(());
        }
        match rx.narrow_mut().and_then(|nb| nb.noise_blanker(id)) {
            Some(blanker) => {
                f(blanker);
                Ok(())
            }
            None => Err(RxError::invalid(format!("no noise blanker {}", id))),
        }
    }

    // Consumer taps.

    fn require_running(&self) -> RxResult<()> {
        if self.runner.is_none() {
            return Err(RxError::NotRunning);
        }
        Ok(())
    }

    fn require_audio_path(&self) -> RxResult<()> {
        if self.state.demod == Demod::Off {
            return Err(RxError::invalid("demodulator is off"));
        }
        Ok(())
    }

    pub fn is_recording_audio(&self) -> bool {
        self.taps.wav_sink.is_some()
    }

    pub fn is_playing_audio(&self) -> bool {
        self.taps.wav_src.is_some()
    }

    pub fn is_recording_iq(&self) -> bool {
        self.taps.iq_sink.is_some()
    }

    pub fn is_udp_streaming(&self) -> bool {
        self.udp.lock().is_streaming()
    }

    pub fn is_sniffing(&self) -> bool {
        self.taps.sniffer_rr.is_some()
    }

    /// Record demodulated audio to a new stereo WAV file.
    pub fn start_audio_recording(&mut self, path: impl AsRef<Path>) -> RxResult<()> {
        self.require_running()?;
        if self.is_recording_audio() {
            return Err(RxError::Busy("audio recording"));
        }
        self.require_audio_path()?;
        let sink = WavSink::create(path.as_ref(), self.state.audio_rate)?;
        self.with_graph(|rx, g| -> RxResult<()> {
            let stage = g.add(sink);
            let id = stage.id();
            rx.taps.wav_sink = Some(stage);
            g.connect(rx.rx.id(), 0, id, 0)?;
            g.connect(rx.rx.id(), 1, id, 1)
        })?;
        tracing::info!("Recording audio to {}", path.as_ref().display());
        Ok(())
    }

    pub fn stop_audio_recording(&mut self) -> RxResult<()> {
        let Some(stage) = self.taps.wav_sink.take() else {
            return Err(RxError::NotActive("audio recording"));
        };
        lock(&self.graph).remove(stage.id());
        let mut sink = stage.lock();
        sink.finish()?;
        tracing::info!(
            "Audio recording stopped after {} frames: {}",
            sink.frames(),
            sink.path().display()
        );
        Ok(())
    }

    /// Play a stereo WAV file at the audio rate in place of demodulated audio.
    pub fn start_audio_playback(&mut self, path: impl AsRef<Path>) -> RxResult<()> {
        self.require_running()?;
        if self.is_playing_audio() {
            return Err(RxError::Busy("audio playback"));
        }
        self.require_audio_path()?;
        let wav = WavSource::open(path.as_ref())?;
        if wav.sample_rate() != self.state.audio_rate {
            return Err(RxError::invalid(format!(
                "cannot play {} S/s audio at {} S/s",
                wav.sample_rate(),
                self.state.audio_rate
            )));
        }
        if wav.channels() != 2 {
            return Err(RxError::invalid(format!(
                "cannot play {} channel audio, need 2",
                wav.channels()
            )));
        }
        self.with_quiesced(|rx| {
            rx.with_graph(|rx, g| -> RxResult<()> {
                let id = rx.rx.id();
                Self::disconnect_edges(g, &rx.audio_fanout(id))?;
                g.connect(id, 0, rx.null0.id(), 0)?;
                g.connect(id, 1, rx.null1.id(), 0)?;
                let stage = g.add(wav);
                let wav_id = stage.id();
                rx.taps.wav_src = Some(stage);
                // Player is clocked by demodulated audio.
                g.connect(id, 0, wav_id, 0)?;
                Self::connect_edges(g, &rx.audio_fanout(wav_id))
            })
        })?;
        tracing::info!("Playing audio from {}", path.as_ref().display());
        Ok(())
    }

    pub fn stop_audio_playback(&mut self) -> RxResult<()> {
        let Some(stage) = self.taps.wav_src.take() else {
            return Err(RxError::NotActive("audio playback"));
        };
        self.with_quiesced(|rx| {
            rx.with_graph(|rx, g| -> RxResult<()> {
                g.remove(stage.id());
                if rx.state.demod == Demod::Off {
                    return Ok(());
                }
                let id = rx.rx.id();
                g.disconnect(id, 0, rx.null0.id(), 0)?;
                g.disconnect(id, 1, rx.null1.id(), 0)?;
                Self::connect_edges(g, &rx.audio_fanout(id))
            })
        })?;
        tracing::info!("Audio playback stopped");
        Ok(())
    }

    /// Record raw I/Q after the decimator and before the swap stage.
    pub fn start_iq_recording(&mut self, path: impl AsRef<Path>) -> RxResult<()> {
        self.require_running()?;
        if self.is_recording_iq() {
            return Err(RxError::Busy("I/Q recording"));
        }
        let sink = RawIqSink::create(path.as_ref())?;
        self.with_graph(|rx, g| -> RxResult<()> {
            let stage = g.add(sink);
            let id = stage.id();
            rx.taps.iq_sink = Some(stage);
            g.connect(rx.head(), 0, id, 0)
        })?;
        tracing::info!("Recording I/Q to {}", path.as_ref().display());
        Ok(())
    }

    pub fn stop_iq_recording(&mut self) -> RxResult<()> {
        let Some(stage) = self.taps.iq_sink.take() else {
            return Err(RxError::NotActive("I/Q recording"));
        };
        lock(&self.graph).remove(stage.id());
        let mut sink = stage.lock();
        sink.finish()?;
        tracing::info!(
            "I/Q recording stopped after {} samples: {}",
            sink.samples(),
            sink.path().display()
        );
        Ok(())
    }

    pub fn start_udp_streaming(&mut self, host: &str, port: u16, stereo: bool) -> RxResult<()> {
        self.require_running()?;
        if self.is_udp_streaming() {
            return Err(RxError::Busy("UDP streaming"));
        }
        self.udp.lock().start(host, port, stereo)?;
        tracing::info!(
            "Streaming {} audio to {}:{}",
            if stereo { "stereo" } else { "mono" },
            host,
            port
        );
        Ok(())
    }

    pub fn stop_udp_streaming(&mut self) -> RxResult<()> {
        let mut udp = self.udp.lock();
        if !udp.is_streaming() {
            return Err(RxError::NotActive("UDP streaming"));
        }
        udp.stop();
        tracing::info!("UDP streaming stopped");
        Ok(())
    }

    /// Capture demodulated audio resampled to `rate` into a ring of
    /// `buffer_size` samples.
    pub fn start_sniffer(&mut self, rate: u32, buffer_size: usize) -> RxResult<()> {
        self.require_running()?;
        if self.is_sniffing() {
            return Err(RxError::Busy("sniffer"));
        }
        self.require_audio_path()?;
        let rr = Resampler::new(rate as f64 / self.state.audio_rate as f64)?;
        self.with_graph(|rx, g| -> RxResult<()> {
            {
                let mut sniffer = rx.sniffer.lock();
                sniffer.set_buffer_size(buffer_size);
                sniffer.take_samples();
            }
            let stage = g.add(rr);
            let id = stage.id();
            rx.taps.sniffer_rr = Some(stage);
            g.connect(rx.rx.id(), 0, id, 0)?;
            g.connect(id, 0, rx.sniffer.id(), 0)
        })?;
        tracing::debug!("Sniffer started at {} S/s, {} samples", rate, buffer_size);
        Ok(())
    }

    pub fn stop_sniffer(&mut self) -> RxResult<()> {
        let Some(rr) = self.taps.sniffer_rr.take() else {
            return Err(RxError::NotActive("sniffer"));
        };
        lock(&self.graph).remove(rr.id());
        tracing::debug!("Sniffer stopped");
        Ok(())
    }

    /// Ratio of the active sniffer resampler.
    pub fn sniffer_ratio(&self) -> Option<f64> {
        self.taps.sniffer_rr.as_ref().map(|rr| rr.lock().ratio())
    }

    /// Drain the sniffer buffer.
    pub fn sniffer_data(&self) -> Vec<f32> {
        self.sniffer.lock().take_samples()
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::Block;
    use trx_core::{AudioSink, DynResult};

    use num_complex::Complex;

    struct Tone {
        rate: f64,
        freq: f64,
        phase: f32,
    }

    impl SampleSource for Tone {
        fn read_into(&mut self, buf: &mut [Complex<f32>]) -> DynResult<usize> {
            for s in buf.iter_mut() {
                *s = Complex::from_polar(0.5, self.phase);
                self.phase = (self.phase + 0.1) % std::f32::consts::TAU;
            }
            Ok(buf.len())
        }

        fn is_throttled(&self) -> bool {
            true
        }

        fn sample_rate(&self) -> f64 {
            self.rate
        }

        fn set_sample_rate(&mut self, rate: f64) -> f64 {
            if rate > 2e6 {
                return 0.0;
            }
            self.rate = rate;
            rate
        }

        fn center_freq(&self) -> f64 {
            self.freq
        }

        fn set_center_freq(&mut self, hz: f64) -> DynResult<f64> {
            self.freq = hz;
            Ok(hz)
        }
    }

    struct Silent;

    impl AudioSink for Silent {
        fn write(&mut self, _left: &[f32], _right: &[f32]) -> DynResult<()> {
            Ok(())
        }

        fn sample_rate(&self) -> u32 {
            DEFAULT_AUDIO_RATE
        }
    }

    struct Devices;

    impl DeviceFactory for Devices {
        fn open_source(&self, spec: &str) -> DynResult<Box<dyn SampleSource>> {
            match spec.strip_prefix("tone=") {
                Some(rate) => Ok(Box::new(Tone {
                    rate: rate.parse()?,
                    freq: 0.0,
                    phase: 0.0,
                })),
                None => Err(format!("no such device '{}'", spec).into()),
            }
        }

        fn fallback_source(&self) -> Box<dyn SampleSource> {
            Box::new(Tone {
                rate: DEFAULT_INPUT_RATE,
                freq: 0.0,
                phase: 0.0,
            })
        }

        fn open_audio_sink(
            &self,
            spec: &str,
            _rate: u32,
            _stereo: bool,
        ) -> DynResult<Box<dyn AudioSink>> {
            if spec == "broken" {
                return Err("audio device busy".into());
            }
            Ok(Box::new(Silent))
        }
    }

    fn receiver(decim: u32) -> Receiver {
        Receiver::new(Arc::new(Devices), "", "", decim).unwrap()
    }

    fn has_link(rx: &Receiver, src: StageKind, dst: StageKind) -> bool {
        rx.topology().iter().any(|l| l.src == src && l.dst == dst)
    }

    #[test]
    fn construction_defaults() {
        let rx = receiver(1);
        let st = rx.state();
        assert_eq!(st.demod, Demod::Nfm);
        assert_eq!(st.input_rate, 96_000.0);
        assert_eq!(st.audio_rate, 48_000);
        assert_eq!(st.quad_rate, 96_000.0);
        assert_eq!(st.af_gain_db, -6.0);
        assert!(!rx.is_running());
        assert!(has_link(&rx, StageKind::Demodulator, StageKind::Gain));
        assert!(has_link(&rx, StageKind::Gain, StageKind::AudioSink));
    }

    #[test]
    fn unsupported_decimation_falls_back_to_one() {
        let mut rx = receiver(3);
        assert_eq!(rx.decimation(), 1);
        assert_eq!(rx.set_input_decimation(6).unwrap(), 1);
        assert_eq!(rx.set_input_decimation(4).unwrap(), 4);
        assert_eq!(rx.quad_rate(), 24_000.0);
        assert!(has_link(&rx, StageKind::Source, StageKind::Decimator));
        assert!(has_link(&rx, StageKind::Decimator, StageKind::Swap));
    }

    #[test]
    fn ddc_increment_follows_offsets() {
        let mut rx = receiver(1);
        rx.set_filter_offset(1000.0);
        assert!((rx.ddc_phase_inc() + TAU * 1000.0 / 96_000.0).abs() < 1e-12);
        rx.set_cw_offset(1000.0);
        assert!(rx.ddc_phase_inc().abs() < 1e-12);
    }

    #[test]
    fn refused_rate_keeps_requested_value() {
        let mut rx = receiver(2);
        assert_eq!(rx.set_input_rate(4e6).unwrap(), 4e6);
        assert_eq!(rx.quad_rate(), 2e6);
        assert!(rx.set_input_rate(0.0).is_err());
        assert!(rx.set_input_rate(f64::NAN).is_err());
    }

    #[test]
    fn rate_change_detection_uses_relative_tolerance() {
        assert!(!rate_changed(96_000.0, 96_000.0));
        assert!(!rate_changed(96_000.0, 96_000.0 * (1.0 + f64::EPSILON / 4.0)));
        assert!(rate_changed(96_000.0, 96_001.0));
    }

    #[test]
    fn failed_output_device_keeps_old_sink() {
        let mut rx = receiver(1);
        let before = rx.topology();
        let err = rx.set_output_device("broken").unwrap_err();
        assert_eq!(err.kind(), trx_core::ErrorKind::Device);
        assert_eq!(rx.topology(), before);
        assert_eq!(rx.state().output_device, "");
    }

    #[test]
    fn output_device_swap_touches_only_sink_edges() {
        let mut rx = receiver(1);
        let before: Vec<Link> = rx
            .topology()
            .into_iter()
            .filter(|l| l.dst != StageKind::AudioSink)
            .collect();
        rx.set_output_device("other").unwrap();
        let after = rx.topology();
        assert_eq!(
            after.iter().filter(|l| l.dst == StageKind::AudioSink).count(),
            2
        );
        let rest: Vec<Link> = after
            .into_iter()
            .filter(|l| l.dst != StageKind::AudioSink)
            .collect();
        assert_eq!(rest, before);
    }

    #[test]
    fn demod_off_removes_audio_path() {
        let mut rx = receiver(1);
        rx.set_demodulator(Demod::Off).unwrap();
        assert!(!rx.topology().iter().any(|l| l.src == StageKind::Rotator));
        assert!(has_link(&rx, StageKind::Swap, StageKind::Spectrum));
        rx.set_output_device("other").unwrap();
        assert!(!has_link(&rx, StageKind::Gain, StageKind::AudioSink));
    }

    #[test]
    fn family_change_replaces_demodulator() {
        let mut rx = receiver(1);
        let narrow = rx.rx.id();
        rx.set_demodulator(Demod::Am).unwrap();
        assert_eq!(rx.rx.id(), narrow);
        rx.set_demodulator(Demod::WfmStereo).unwrap();
        assert_ne!(rx.rx.id(), narrow);
        assert_eq!(rx.rx.lock().family(), trx_core::DemodFamily::Wideband);
        assert!(!lock(&rx.graph).contains(narrow));
    }

    #[test]
    fn dc_cancel_inserts_corrector() {
        let mut rx = receiver(1);
        assert!(!has_link(&rx, StageKind::Swap, StageKind::DcCorrector));
        rx.set_dc_cancel(true).unwrap();
        assert!(has_link(&rx, StageKind::Swap, StageKind::DcCorrector));
        assert!(has_link(&rx, StageKind::DcCorrector, StageKind::Rotator));
        rx.set_dc_cancel(false).unwrap();
        assert!(has_link(&rx, StageKind::Swap, StageKind::Rotator));
    }

    #[test]
    fn unsupported_subcontrols_are_ignored() {
        let mut rx = receiver(1);
        rx.set_demodulator(Demod::WfmMono).unwrap();
        rx.set_agc_on(false);
        rx.set_am_dcr(false);
        assert!(rx.set_nb_on(1, true).is_ok());
        rx.set_demodulator(Demod::Nfm).unwrap();
        assert!(rx.set_nb_on(1, true).is_ok());
        assert!(rx.set_nb_on(7, true).is_err());
    }

    #[test]
    fn taps_require_running() {
        let mut rx = receiver(1);
        let dir = tempfile::tempdir().unwrap();
        let err = rx
            .start_audio_recording(dir.path().join("a.wav"))
            .unwrap_err();
        assert!(matches!(err, RxError::NotRunning));
        assert!(!rx.is_recording_audio());
        assert!(matches!(rx.start_sniffer(8000, 1024), Err(RxError::NotRunning)));
        assert!(matches!(rx.stop_sniffer(), Err(RxError::NotActive(_))));
    }

    #[test]
    fn set_input_device_failure_installs_fallback() {
        let mut rx = receiver(2);
        rx.set_input_device("tone=192000").unwrap();
        assert_eq!(rx.input_rate(), 192_000.0);
        assert_eq!(rx.quad_rate(), 96_000.0);

        let err = rx.set_input_device("nonexistent").unwrap_err();
        assert_eq!(err.kind(), trx_core::ErrorKind::Device);
        assert_eq!(rx.input_rate(), DEFAULT_INPUT_RATE);
        assert_eq!(rx.state().input_device, "");
        assert!(has_link(&rx, StageKind::Source, StageKind::Decimator));
        assert!(lock(&rx.graph).validate().is_ok());
    }

    #[test]
    fn decimation_change_reaches_every_rate_consumer() {
        let mut rx = receiver(2);
        assert_eq!(rx.quad_rate(), 48_000.0);
        assert_eq!(rx.set_input_decimation(1).unwrap(), 1);
        let rates = rx.stage_rates();
        assert_eq!(rates.dc_corrector, 96_000.0);
        assert_eq!(rates.demodulator, 96_000.0);
        assert_eq!(rates.iq_spectrum, 96_000.0);
        rx.set_filter_offset(1000.0);
        assert!((rx.ddc_phase_inc() + TAU * 1000.0 / 96_000.0).abs() < 1e-12);
        assert!(!has_link(&rx, StageKind::Source, StageKind::Decimator));
    }

    #[test]
    fn reapplied_demodulator_keeps_parameters() {
        let mut rx = receiver(1);
        rx.set_demodulator(Demod::Am).unwrap();
        rx.set_filter(-3000.0, 3000.0, FilterShape::Sharp).unwrap();
        rx.set_sql_level(-60.0);
        let filter = rx.filter();
        rx.set_demodulator(Demod::Am).unwrap();
        assert_eq!(rx.filter(), filter);
        assert_eq!(rx.sql_level(), -60.0);
        rx.set_demodulator(Demod::Nfm).unwrap();
        assert_eq!(rx.filter(), filter);
        assert_eq!(rx.sql_level(), -60.0);
    }

    #[test]
    fn failed_input_device_keeps_pipeline_running() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("iq.raw");
        let mut rx = receiver(1);
        rx.start().unwrap();
        assert!(rx.set_input_device("nonexistent").is_err());
        assert!(rx.is_running());
        rx.start_iq_recording(&path).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(100));
        rx.stop_iq_recording().unwrap();
        rx.stop();
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }

    #[test]
    fn playback_leaves_pacing_to_the_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("play.wav");
        {
            let spec = hound::WavSpec {
                channels: 2,
                sample_rate: DEFAULT_AUDIO_RATE,
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            };
            let mut w = hound::WavWriter::create(&path, spec).unwrap();
            for _ in 0..4800 {
                w.write_sample(100_i16).unwrap();
                w.write_sample(100_i16).unwrap();
            }
            w.finalize().unwrap();
        }
        let mut rx = receiver(1);
        rx.start().unwrap();
        rx.start_audio_playback(&path).unwrap();
        rx.stop();
        assert!(rx.is_playing_audio());

        // Fresh source deadline: one 1920-sample block at 96 kS/s is 20 ms.
        rx.src.lock().source_mut();
        let pace = lock(&rx.graph).run_once().unwrap();
        assert!(pace.is_some_and(|p| p <= std::time::Duration::from_millis(20)));
        let wav = rx.taps.wav_src.as_ref().map(|w| w.lock().pace());
        assert_eq!(wav, Some(None));
    }
}
