// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Playback of raw I/Q recordings (interleaved little-endian `f32`).

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use num_complex::Complex;

use trx_core::{DynResult, SampleSource};

use crate::DeviceSpec;

const DEFAULT_RATE: f64 = 96_000.0;
/// Bytes per complex sample.
const SAMPLE_BYTES: usize = 8;

/// Raw I/Q file source, paced by the receiver.
///
/// After the end of a non-repeating file the source emits silence.
pub struct FileSource {
    path: PathBuf,
    reader: BufReader<File>,
    rate: f64,
    center_hz: f64,
    repeat: bool,
    at_eof: bool,
    scratch: Vec<u8>,
}

impl FileSource {
    pub fn open(path: impl AsRef<Path>, rate: f64, center_hz: f64, repeat: bool) -> DynResult<Self> {
        let path = path.as_ref().to_path_buf();
        if !(rate.is_finite() && rate > 0.0) {
            return Err(format!("file: invalid sample rate {}", rate).into());
        }
        let file = File::open(&path).map_err(|e| format!("file: {}: {}", path.display(), e))?;
        tracing::info!(
            "Opened I/Q file {} ({} S/s{})",
            path.display(),
            rate,
            if repeat { ", repeating" } else { "" }
        );
        Ok(Self {
            path,
            reader: BufReader::new(file),
            rate,
            center_hz,
            repeat,
            at_eof: false,
            scratch: Vec::new(),
        })
    }

    /// `file=<path>` with optional `rate`, `freq` and `repeat`.
    pub fn from_spec(spec: &DeviceSpec) -> DynResult<Self> {
        if spec.value().is_empty() {
            return Err("file: missing path, expected file=<path>".into());
        }
        let rate = spec.get_parsed::<f64>("rate")?.unwrap_or(DEFAULT_RATE);
        let freq = spec.get_parsed::<f64>("freq")?.unwrap_or(0.0);
        Self::open(spec.value(), rate, freq, spec.flag("repeat"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fill `bytes` from the file, rewinding once when repeating.
    fn fill(&mut self, bytes: &mut [u8]) -> DynResult<usize> {
        let mut filled = 0;
        let mut rewound = false;
        while filled < bytes.len() {
            match self.reader.read(&mut bytes[filled..]) {
                Ok(0) if self.repeat && !rewound => {
                    self.reader.seek(SeekFrom::Start(0))?;
                    rewound = true;
                }
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }
}

impl SampleSource for FileSource {
    fn read_into(&mut self, buf: &mut [Complex<f32>]) -> DynResult<usize> {
        let mut bytes = std::mem::take(&mut self.scratch);
        bytes.resize(buf.len() * SAMPLE_BYTES, 0);
        let filled = if self.at_eof { 0 } else { self.fill(&mut bytes)? };
        let whole = filled / SAMPLE_BYTES;

        for (out, chunk) in buf.iter_mut().zip(bytes.chunks_exact(SAMPLE_BYTES)).take(whole) {
            let re = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            let im = f32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
            *out = Complex::new(re, im);
        }
        buf[whole..].fill(Complex::new(0.0, 0.0));
        self.scratch = bytes;

        if whole < buf.len() && !self.at_eof {
            tracing::info!("End of I/Q file {}", self.path.display());
            self.at_eof = true;
        }
        Ok(buf.len())
    }

    fn is_throttled(&self) -> bool {
        true
    }

    fn sample_rate(&self) -> f64 {
        self.rate
    }

    /// The file carries no rate; any positive rate is accepted.
    fn set_sample_rate(&mut self, rate: f64) -> f64 {
        if !(rate.is_finite() && rate > 0.0) {
            return 0.0;
        }
        self.rate = rate;
        rate
    }

    fn center_freq(&self) -> f64 {
        self.center_hz
    }

    fn set_center_freq(&mut self, hz: f64) -> DynResult<f64> {
        self.center_hz = hz;
        Ok(hz)
    }

    fn seek(&mut self, byte_offset: u64) -> DynResult<()> {
        let aligned = byte_offset - byte_offset % SAMPLE_BYTES as u64;
        self.reader.seek(SeekFrom::Start(aligned))?;
        self.at_eof = false;
        tracing::debug!("Seeked {} to byte {}", self.path.display(), aligned);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn capture(samples: &[(f32, f32)]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for (i, q) in samples {
            file.write_all(&i.to_le_bytes()).unwrap();
            file.write_all(&q.to_le_bytes()).unwrap();
        }
        file.flush().unwrap();
        file
    }

    fn read(src: &mut FileSource, n: usize) -> Vec<Complex<f32>> {
        let mut buf = vec![Complex::new(9.0, 9.0); n];
        assert_eq!(src.read_into(&mut buf).unwrap(), n);
        buf
    }

    #[test]
    fn test_reads_interleaved_samples_then_silence() {
        let file = capture(&[(0.5, -0.5), (0.25, 1.0)]);
        let mut src = FileSource::open(file.path(), 48_000.0, 0.0, false).unwrap();
        let buf = read(&mut src, 4);
        assert_eq!(buf[0], Complex::new(0.5, -0.5));
        assert_eq!(buf[1], Complex::new(0.25, 1.0));
        assert_eq!(buf[2], Complex::new(0.0, 0.0));
        assert!(read(&mut src, 2).iter().all(|s| s.norm() == 0.0));
    }

    #[test]
    fn test_repeat_wraps_around() {
        let file = capture(&[(1.0, 0.0), (2.0, 0.0), (3.0, 0.0)]);
        let mut src = FileSource::open(file.path(), 48_000.0, 0.0, true).unwrap();
        let got: Vec<f32> = read(&mut src, 5).iter().map(|s| s.re).collect();
        assert_eq!(got, vec![1.0, 2.0, 3.0, 1.0, 2.0]);
    }

    #[test]
    fn test_seek_aligns_to_sample_and_clears_eof() {
        let file = capture(&[(1.0, 0.0), (2.0, 0.0), (3.0, 0.0)]);
        let mut src = FileSource::open(file.path(), 48_000.0, 0.0, false).unwrap();
        read(&mut src, 8);
        src.seek(13).unwrap();
        assert_eq!(read(&mut src, 1)[0].re, 2.0);
    }

    #[test]
    fn test_spec_requires_path() {
        let spec = DeviceSpec::parse("file,rate=1000").unwrap();
        assert!(FileSource::from_spec(&spec).is_err());
        let spec = DeviceSpec::parse("file=/nonexistent/capture.raw").unwrap();
        assert!(FileSource::from_spec(&spec).is_err());
    }
}
