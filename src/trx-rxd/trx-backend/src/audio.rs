// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Audio output backends.

use trx_core::{AudioSink, DynResult};

/// Discards audio. Used headless and in tests.
#[derive(Debug)]
pub struct NullAudio {
    rate: u32,
    frames: u64,
}

impl NullAudio {
    pub fn new(rate: u32) -> Self {
        Self { rate, frames: 0 }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl AudioSink for NullAudio {
    fn write(&mut self, left: &[f32], right: &[f32]) -> DynResult<()> {
        if left.len() != right.len() {
            return Err(format!(
                "channel length mismatch: {} vs {}",
                left.len(),
                right.len()
            )
            .into());
        }
        self.frames += left.len() as u64;
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.rate
    }
}

#[cfg(feature = "cpal")]
pub use self::cpal_out::CpalAudio;

#[cfg(feature = "cpal")]
mod cpal_out {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};
    use std::thread::JoinHandle;
    use std::time::Duration;

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use tracing::{info, warn};

    use trx_core::{AudioSink, DynResult};

    /// Seconds of audio buffered before the oldest samples are dropped.
    const MAX_BUFFER_SECS: usize = 1;

    type Ring = Arc<Mutex<VecDeque<f32>>>;

    /// Sound card output through cpal.
    ///
    /// The stream lives on its own thread; `write` only appends interleaved
    /// samples to a ring the stream callback drains.
    pub struct CpalAudio {
        rate: u32,
        channels: usize,
        ring: Ring,
        stop: Arc<AtomicBool>,
        thread: Option<JoinHandle<()>>,
    }

    impl CpalAudio {
        pub fn open(device: Option<&str>, rate: u32, stereo: bool) -> DynResult<Self> {
            let channels: usize = if stereo { 2 } else { 1 };
            let ring: Ring = Arc::new(Mutex::new(VecDeque::with_capacity(
                rate as usize * channels * MAX_BUFFER_SECS,
            )));
            let stop = Arc::new(AtomicBool::new(false));
            let (ready_tx, ready_rx) = mpsc::channel::<Result<String, String>>();

            let thread_ring = ring.clone();
            let thread_stop = stop.clone();
            let device = device.map(str::to_string);
            let thread = std::thread::Builder::new()
                .name("rx-audio-out".to_string())
                .spawn(move || {
                    run_stream(
                        device.as_deref(),
                        rate,
                        channels as u16,
                        thread_ring,
                        thread_stop,
                        ready_tx,
                    )
                })?;

            match ready_rx.recv() {
                Ok(Ok(name)) => {
                    info!("Audio output active on '{}' at {} Hz", name, rate);
                    Ok(Self {
                        rate,
                        channels,
                        ring,
                        stop,
                        thread: Some(thread),
                    })
                }
                Ok(Err(e)) => {
                    let _ = thread.join();
                    Err(e.into())
                }
                Err(_) => {
                    let _ = thread.join();
                    Err("audio output thread exited during setup".into())
                }
            }
        }
    }

    fn select_output_device(
        host: &cpal::Host,
        preferred_name: Option<&str>,
    ) -> Result<cpal::Device, String> {
        if let Some(name) = preferred_name {
            let mut devices = host.output_devices().map_err(|e| e.to_string())?;
            return devices
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| format!("output device '{}' not found", name));
        }
        host.default_output_device()
            .ok_or_else(|| "no default output device".to_string())
    }

    fn run_stream(
        device: Option<&str>,
        rate: u32,
        channels: u16,
        ring: Ring,
        stop: Arc<AtomicBool>,
        ready: mpsc::Sender<Result<String, String>>,
    ) {
        let host = cpal::default_host();
        let device = match select_output_device(&host, device) {
            Ok(device) => device,
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };
        let config = cpal::StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let err_stop = stop.clone();
        let stream = device.build_output_stream(
            &config,
            move |data: &mut [f32], _| {
                let mut rb = match ring.lock() {
                    Ok(rb) => rb,
                    Err(poisoned) => poisoned.into_inner(),
                };
                for sample in data.iter_mut() {
                    *sample = rb.pop_front().unwrap_or(0.0);
                }
            },
            move |err| {
                warn!("Audio output stream error: {}", err);
                err_stop.store(true, Ordering::Relaxed);
            },
            None,
        );
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                let _ = ready.send(Err(e.to_string()));
                return;
            }
        };
        if let Err(e) = stream.play() {
            let _ = ready.send(Err(e.to_string()));
            return;
        }
        let name = device.name().unwrap_or_else(|_| "unknown".to_string());
        let _ = ready.send(Ok(name));

        while !stop.load(Ordering::Relaxed) {
            std::thread::sleep(Duration::from_millis(100));
        }
        let _ = stream.pause();
    }

    impl AudioSink for CpalAudio {
        fn write(&mut self, left: &[f32], right: &[f32]) -> DynResult<()> {
            if self.stop.load(Ordering::Relaxed) {
                return Err("audio output stream stopped".into());
            }
            let mut rb = match self.ring.lock() {
                Ok(rb) => rb,
                Err(poisoned) => poisoned.into_inner(),
            };
            for (l, r) in left.iter().zip(right.iter()) {
                rb.push_back(l.clamp(-1.0, 1.0));
                if self.channels == 2 {
                    rb.push_back(r.clamp(-1.0, 1.0));
                }
            }
            let max_len = self.rate as usize * self.channels * MAX_BUFFER_SECS;
            if rb.len() > max_len {
                let drain = rb.len() - max_len;
                rb.drain(..drain);
            }
            Ok(())
        }

        fn sample_rate(&self) -> u32 {
            self.rate
        }
    }

    impl Drop for CpalAudio {
        fn drop(&mut self) {
            self.stop.store(true, Ordering::Relaxed);
            if let Some(thread) = self.thread.take() {
                let _ = thread.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_audio_counts_frames() {
        let mut sink = NullAudio::new(48_000);
        sink.write(&[0.0; 10], &[0.0; 10]).unwrap();
        assert_eq!(sink.frames(), 10);
        assert!(sink.write(&[0.0; 2], &[0.0; 3]).is_err());
        assert_eq!(sink.sample_rate(), 48_000);
    }
}
