// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use trx_core::{RxError, RxResult};

use crate::stage::{real_input, Block, Buffer, PortType, StageKind, NO_PORTS, REAL_1, REAL_2};

fn wav_err(path: &Path, e: hound::Error) -> RxError {
    match e {
        hound::Error::IoError(io) => RxError::Io(format!("{}: {}", path.display(), io)),
        other => RxError::invalid(format!("{}: {}", path.display(), other)),
    }
}

/// Stereo 16-bit WAV recorder. One instance per recording session.
pub struct WavSink {
    path: PathBuf,
    writer: Option<WavWriter<BufWriter<File>>>,
    frames: u64,
}

impl WavSink {
    pub fn create(path: impl AsRef<Path>, sample_rate: u32) -> RxResult<Self> {
        let path = path.as_ref().to_path_buf();
        let spec = WavSpec {
            channels: 2,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(&path, spec).map_err(|e| wav_err(&path, e))?;
        Ok(Self {
            path,
            writer: Some(writer),
            frames: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Write the header and close the file. Later calls are no-ops.
    pub fn finish(&mut self) -> RxResult<()> {
        match self.writer.take() {
            Some(writer) => writer.finalize().map_err(|e| wav_err(&self.path, e)),
            None => Ok(()),
        }
    }
}

fn to_i16(x: f32) -> i16 {
    (x.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

impl Block for WavSink {
    fn kind(&self) -> StageKind {
        StageKind::FileSink
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
        let Some(writer) = self.writer.as_mut() else {
            return Ok(Vec::new());
        };
        for (&l, &r) in left.iter().zip(right.iter()) {
            writer
                .write_sample(to_i16(l))
                .and_then(|_| writer.write_sample(to_i16(r)))
                .map_err(|e| wav_err(&self.path, e))?;
            self.frames += 1;
        }
        Ok(Vec::new())
    }

    fn stop(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.flush() {
                tracing::warn!("flushing {} failed: {}", self.path.display(), e);
            }
        }
    }
}

impl Drop for WavSink {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            tracing::warn!("closing recording failed: {}", e);
        }
    }
}

/// WAV file player producing left/right audio.
///
/// Input port 0 is a clock: each tick emits as many frames as the clock
/// buffer holds, so playback advances with the demodulator instead of pacing
/// the scheduler. Emits silence once the file is exhausted.
pub struct WavSource {
    reader: WavReader<BufReader<File>>,
    sample_rate: u32,
    channels: u16,
    finished: bool,
}

impl WavSource {
    pub fn open(path: impl AsRef<Path>) -> RxResult<Self> {
        let path = path.as_ref();
        let reader = WavReader::open(path).map_err(|e| wav_err(path, e))?;
        let spec = reader.spec();
        Ok(Self {
            reader,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            finished: false,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn next_frame(&mut self) -> Option<(f32, f32)> {
        let spec = self.reader.spec();
        let mut frame = [0.0_f32; 2];
        for ch in 0..spec.channels as usize {
            let value = match spec.sample_format {
                SampleFormat::Float => self.reader.samples::<f32>().next()?.ok()?,
                SampleFormat::Int => {
                    let raw = self.reader.samples::<i32>().next()?.ok()?;
                    raw as f32 / (1_i64 << (spec.bits_per_sample - 1)) as f32
                }
            };
            if ch < 2 {
                frame[ch] = value;
            }
        }
        Some((frame[0], frame[1]))
    }
}

impl Block for WavSource {
    fn kind(&self) -> StageKind {
        StageKind::FileSource
    }

    fn inputs(&self) -> &'static [PortType] {
        REAL_1
    }

    fn outputs(&self) -> &'static [PortType] {
        REAL_2
    }

    fn work(&mut self, inputs: &[&Buffer]) -> RxResult<Vec<Buffer>> {
        let n = real_input(inputs, 0)?.len();
        let mut left = Vec::with_capacity(n);
        let mut right = Vec::with_capacity(n);
        while left.len() < n {
            let (l, r) = if self.finished {
                (0.0, 0.0)
            } else if let Some(frame) = self.next_frame() {
                frame
            } else {
                tracing::info!("audio playback reached end of file");
                self.finished = true;
                (0.0, 0.0)
            };
            left.push(l);
            right.push(r);
        }
        Ok(vec![Buffer::Real(left), Buffer::Real(right)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorder_writes_stereo_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rec.wav");
        let mut sink = WavSink::create(&path, 48_000).unwrap();
        let l = Buffer::Real(vec![0.5; 100]);
        let r = Buffer::Real(vec![-0.5; 100]);
        sink.work(&[&l, &r]).unwrap();
        sink.finish().unwrap();
        assert_eq!(sink.frames(), 100);

        let reader = WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, 48_000);
        assert_eq!(reader.len(), 200);
    }

    #[test]
    fn recorder_reports_unwritable_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("rec.wav");
        let err = WavSink::create(&path, 48_000).err().unwrap();
        assert_eq!(err.kind(), trx_core::ErrorKind::Device);
    }

    #[test]
    fn player_reads_then_pads_with_silence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("play.wav");
        {
            let spec = WavSpec {
                channels: 2,
                sample_rate: 48_000,
                bits_per_sample: 16,
                sample_format: SampleFormat::Int,
            };
            let mut w = WavWriter::create(&path, spec).unwrap();
            for _ in 0..10 {
                w.write_sample(16_384_i16).unwrap();
                w.write_sample(-16_384_i16).unwrap();
            }
            w.finalize().unwrap();
        }
        let mut src = WavSource::open(&path).unwrap();
        assert_eq!((src.sample_rate(), src.channels()), (48_000, 2));
        let clock = Buffer::Real(vec![0.0; 16]);
        let out = src.work(&[&clock]).unwrap();
        let (Buffer::Real(l), Buffer::Real(r)) = (&out[0], &out[1]) else {
            panic!("expected real buffers");
        };
        assert_eq!(l.len(), 16);
        assert!((l[0] - 0.5).abs() < 1e-3 && (r[0] + 0.5).abs() < 1e-3);
        assert_eq!(l[10], 0.0);
        assert!(src.is_finished());
        assert!(src.pace().is_none());
    }

    #[test]
    fn player_follows_clock_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("long.wav");
        {
            let spec = WavSpec {
                channels: 2,
                sample_rate: 48_000,
                bits_per_sample: 16,
                sample_format: SampleFormat::Int,
            };
            let mut w = WavWriter::create(&path, spec).unwrap();
            for _ in 0..4800 {
                w.write_sample(1000_i16).unwrap();
                w.write_sample(1000_i16).unwrap();
            }
            w.finalize().unwrap();
        }
        let mut src = WavSource::open(&path).unwrap();
        for len in [960, 1, 1024] {
            let clock = Buffer::Real(vec![0.0; len]);
            let out = src.work(&[&clock]).unwrap();
            assert_eq!(out[0].len(), len);
            assert_eq!(out[1].len(), len);
        }
        assert!(!src.is_finished());
    }
}
