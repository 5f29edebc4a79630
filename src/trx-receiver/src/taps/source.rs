// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::time::Duration;

use num_complex::Complex;
use trx_core::{RxResult, SampleSource};

use super::{block_len, Throttle};
use crate::stage::{Block, Buffer, PortType, StageKind, COMPLEX_1, NO_PORTS};

/// Pause after a failed read so a broken device does not spin the scheduler.
const READ_ERROR_PAUSE: Duration = Duration::from_millis(20);

/// Flowgraph head wrapping a [`SampleSource`].
pub struct SourceStage {
    source: Box<dyn SampleSource>,
    buf: Vec<Complex<f32>>,
    throttle: Throttle,
    pace: Option<Duration>,
    read_failed: bool,
}

impl std::fmt::Debug for SourceStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceStage")
            .field("sample_rate", &self.source.sample_rate())
            .field("throttled", &self.source.is_throttled())
            .finish()
    }
}

impl SourceStage {
    pub fn new(source: Box<dyn SampleSource>) -> Self {
        Self {
            source,
            buf: Vec::new(),
            throttle: Throttle::default(),
            pace: None,
            read_failed: false,
        }
    }

    pub fn source(&self) -> &dyn SampleSource {
        self.source.as_ref()
    }

    pub fn source_mut(&mut self) -> &mut dyn SampleSource {
        self.throttle.reset();
        self.source.as_mut()
    }
}

impl Block for SourceStage {
    fn kind(&self) -> StageKind {
        StageKind::Source
    }

    fn inputs(&self) -> &'static [PortType] {
        NO_PORTS
    }

    fn outputs(&self) -> &'static [PortType] {
        COMPLEX_1
    }

    fn work(&mut self, _inputs: &[&Buffer]) -> RxResult<Vec<Buffer>> {
        let rate = self.source.sample_rate();
        self.buf.resize(block_len(rate), Complex::new(0.0, 0.0));
        match self.source.read_into(&mut self.buf) {
            Ok(n) => {
                if self.read_failed {
                    tracing::info!("sample source recovered");
                    self.read_failed = false;
                }
                let n = n.min(self.buf.len());
                self.pace = self
                    .source
                    .is_throttled()
                    .then(|| self.throttle.advance(n, rate));
                Ok(vec![Buffer::Complex(self.buf[..n].to_vec())])
            }
            Err(e) => {
                if !self.read_failed {
                    tracing::warn!("sample source read failed: {}", e);
                    self.read_failed = true;
                }
                self.pace = Some(READ_ERROR_PAUSE);
                Ok(vec![Buffer::Complex(Vec::new())])
            }
        }
    }

    fn pace(&self) -> Option<Duration> {
        self.pace
    }
}
