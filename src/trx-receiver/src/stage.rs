// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Processing stage contract used by the flowgraph.

use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use num_complex::Complex;
use trx_core::{RxError, RxResult};

/// Sample type carried by a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortType {
    Complex,
    Real,
}

pub(crate) const NO_PORTS: &[PortType] = &[];
pub(crate) const COMPLEX_1: &[PortType] = &[PortType::Complex];
pub(crate) const REAL_1: &[PortType] = &[PortType::Real];
pub(crate) const REAL_2: &[PortType] = &[PortType::Real, PortType::Real];

/// One block of samples produced on an output port during a scheduler tick.
#[derive(Debug, Clone, PartialEq)]
pub enum Buffer {
    Complex(Vec<Complex<f32>>),
    Real(Vec<f32>),
}

impl Buffer {
    pub fn port_type(&self) -> PortType {
        match self {
            Buffer::Complex(_) => PortType::Complex,
            Buffer::Real(_) => PortType::Real,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Buffer::Complex(v) => v.len(),
            Buffer::Real(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Identity of a stage; replacing a stage of a different kind means a new stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StageKind {
    Source,
    Decimator,
    Swap,
    DcCorrector,
    Rotator,
    Demodulator,
    Gain,
    AudioSink,
    FileSink,
    FileSource,
    Resampler,
    Sniffer,
    Spectrum,
    NullSink,
    UdpSink,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A processing unit owned by the flowgraph.
///
/// `work` receives exactly one buffer per input port, in port order, and must
/// return exactly one buffer per output port. Stages with no inputs are
/// sources and run first in every tick.
pub trait Block: Send {
    fn kind(&self) -> StageKind;

    fn inputs(&self) -> &'static [PortType];

    fn outputs(&self) -> &'static [PortType];

    fn work(&mut self, inputs: &[&Buffer]) -> RxResult<Vec<Buffer>>;

    /// Time the scheduler should wait before the next tick, for sources that
    /// must be paced to real time.
    fn pace(&self) -> Option<Duration> {
        None
    }

    /// Called once when the receiver stops; file sinks flush here.
    fn stop(&mut self) {}
}

/// Lock a stage, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        tracing::error!("stage mutex poisoned; recovering");
        poisoned.into_inner()
    })
}

pub(crate) fn complex_input<'a>(inputs: &[&'a Buffer], port: usize) -> RxResult<&'a [Complex<f32>]> {
    match inputs.get(port) {
        Some(Buffer::Complex(v)) => Ok(v),
        Some(Buffer::Real(_)) => Err(RxError::Graph(format!(
            "input port {} expected complex samples",
            port
        ))),
        None => Err(RxError::Graph(format!("input port {} missing", port))),
    }
}

pub(crate) fn real_input<'a>(inputs: &[&'a Buffer], port: usize) -> RxResult<&'a [f32]> {
    match inputs.get(port) {
        Some(Buffer::Real(v)) => Ok(v),
        Some(Buffer::Complex(_)) => Err(RxError::Graph(format!(
            "input port {} expected real samples",
            port
        ))),
        None => Err(RxError::Graph(format!("input port {} missing", port))),
    }
}

/// Inert sink that discards real samples.
#[derive(Debug, Default)]
pub struct NullSink {
    consumed: u64,
}

impl NullSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consumed(&self) -> u64 {
        self.consumed
    }
}

impl Block for NullSink {
    fn kind(&self) -> StageKind {
        StageKind::NullSink
    }

    fn inputs(&self) -> &'static [PortType] {
        REAL_1
    }

    fn outputs(&self) -> &'static [PortType] {
        NO_PORTS
    }

    fn work(&mut self, inputs: &[&Buffer]) -> RxResult<Vec<Buffer>> {
        self.consumed += real_input(inputs, 0)?.len() as u64;
        Ok(Vec::new())
    }
}
