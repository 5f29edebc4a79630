// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Device-facing stages: the sample source wrapper, the audio output, and the
//! optional consumer taps (recorders, player, UDP streamer, sniffer).

pub mod audio;
pub mod iq_file;
pub mod sniffer;
pub mod source;
pub mod udp;
pub mod wav;

pub use audio::AudioOut;
pub use iq_file::RawIqSink;
pub use sniffer::Sniffer;
pub use source::SourceStage;
pub use udp::UdpSink;
pub use wav::{WavSink, WavSource};

use std::time::{Duration, Instant};

/// Real-time pacing for stages that produce blocks on their own.
#[derive(Debug, Default)]
pub(crate) struct Throttle {
    deadline: Option<Instant>,
}

impl Throttle {
    /// Account for `samples` produced at `rate` and return how long to wait.
    pub(crate) fn advance(&mut self, samples: usize, rate: f64) -> Duration {
        let now = Instant::now();
        if rate <= 0.0 {
            return Duration::ZERO;
        }
        let block = Duration::from_secs_f64(samples as f64 / rate);
        let deadline = match self.deadline {
            // Do not try to catch up after a long stall.
            Some(d) if d + Duration::from_millis(250) > now => d + block,
            _ => now + block,
        };
        self.deadline = Some(deadline);
        deadline.saturating_duration_since(now)
    }

    pub(crate) fn reset(&mut self) {
        self.deadline = None;
    }
}

/// Block length for a source running at `rate`: about 20 ms of samples.
pub(crate) fn block_len(rate: f64) -> usize {
    ((rate / 50.0) as usize).clamp(1024, 65_536)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_len_is_clamped() {
        assert_eq!(block_len(96_000.0), 1920);
        assert_eq!(block_len(8000.0), 1024);
        assert_eq!(block_len(10e6), 65_536);
    }

    #[test]
    fn throttle_accumulates_deadline() {
        let mut t = Throttle::default();
        let first = t.advance(480, 48_000.0);
        let second = t.advance(480, 48_000.0);
        assert!(first <= Duration::from_millis(10));
        assert!(second > first);
        assert!(second <= Duration::from_millis(20));
        t.reset();
        assert!(t.advance(0, 48_000.0) == Duration::ZERO);
    }
}
