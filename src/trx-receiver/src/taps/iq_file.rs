// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use trx_core::RxResult;

use crate::stage::{complex_input, Block, Buffer, PortType, StageKind, COMPLEX_1, NO_PORTS};

/// Headerless I/Q recorder: interleaved little-endian `f32` I, Q pairs.
pub struct RawIqSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    samples: u64,
}

impl RawIqSink {
    pub fn create(path: impl AsRef<Path>) -> RxResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        Ok(Self {
            path,
            writer: Some(BufWriter::new(file)),
            samples: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn finish(&mut self) -> RxResult<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }
}

impl Block for RawIqSink {
    fn kind(&self) -> StageKind {
        StageKind::FileSink
    }

    fn inputs(&self) -> &'static [PortType] {
        COMPLEX_1
    }

    fn outputs(&self) -> &'static [PortType] {
        NO_PORTS
    }

    fn work(&mut self, inputs: &[&Buffer]) -> RxResult<Vec<Buffer>> {
        let input = complex_input(inputs, 0)?;
        if let Some(writer) = self.writer.as_mut() {
            for s in input {
                writer.write_all(&s.re.to_le_bytes())?;
                writer.write_all(&s.im.to_le_bytes())?;
            }
            self.samples += input.len() as u64;
        }
        Ok(Vec::new())
    }

    fn stop(&mut self) {
        if let Err(e) = self.finish() {
            tracing::warn!("flushing I/Q recording {} failed: {}", self.path.display(), e);
        }
    }
}

impl Drop for RawIqSink {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            tracing::warn!("flushing I/Q recording {} failed: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex;

    #[test]
    fn writes_interleaved_le_floats() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.raw");
        let mut sink = RawIqSink::create(&path).unwrap();
        let buf = Buffer::Complex(vec![Complex::new(1.0, -2.0), Complex::new(0.5, 0.25)]);
        sink.work(&[&buf]).unwrap();
        sink.finish().unwrap();
        assert_eq!(sink.samples(), 2);

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 16);
        let values: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(values, vec![1.0, -2.0, 0.5, 0.25]);
    }
}
