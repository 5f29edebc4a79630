// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use trx_core::{AudioSink, RxResult};

use crate::stage::{real_input, Block, Buffer, PortType, StageKind, NO_PORTS, REAL_2};

/// Stereo audio output stage; port 0 is left, port 1 is right.
pub struct AudioOut {
    sink: Box<dyn AudioSink>,
    failed: bool,
}

impl AudioOut {
    pub fn new(sink: Box<dyn AudioSink>) -> Self {
        Self {
            sink,
            failed: false,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sink.sample_rate()
    }
}

impl Block for AudioOut {
    fn kind(&self) -> StageKind {
        StageKind::AudioSink
    }

    fn inputs(&self) -> &'static [PortType] {
        REAL_2
    }

    fn outputs(&self) -> &'static [PortType] {
        NO_PORTS
    }

    fn work(&mut self, inputs: &[&Buffer]) -> RxResult<Vec<Buffer>> {
        let left = real_input(inputs, 0)?;
        let right = real_input(inputs, 1)?;
        let n = left.len().min(right.len());
        match self.sink.write(&left[..n], &right[..n]) {
            Ok(()) => self.failed = false,
            Err(e) if !self.failed => {
                tracing::warn!("audio output write failed: {}", e);
                self.failed = true;
            }
            Err(_) => {}
        }
        Ok(Vec::new())
    }
}
