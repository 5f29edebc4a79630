// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::net::UdpSocket;

use trx_core::{RxError, RxResult};

use crate::stage::{real_input, Block, Buffer, PortType, StageKind, NO_PORTS, REAL_2};

/// Frames per datagram.
const FRAMES_PER_PACKET: usize = 512;

struct Target {
    socket: UdpSocket,
    stereo: bool,
}

/// Streams demodulated audio as 16-bit little-endian PCM datagrams.
///
/// The stage stays wired at all times; start/stop only change the target.
/// Mono streams carry the left channel, stereo streams interleave L/R.
#[derive(Default)]
pub struct UdpSink {
    target: Option<Target>,
    send_failed: bool,
}

impl UdpSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, host: &str, port: u16, stereo: bool) -> RxResult<()> {
        if host.is_empty() || port == 0 {
            return Err(RxError::invalid(format!(
                "invalid UDP target {}:{}",
                host, port
            )));
        }
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        socket.connect((host, port))?;
        socket.set_nonblocking(true)?;
        self.target = Some(Target { socket, stereo });
        self.send_failed = false;
        Ok(())
    }

    pub fn stop(&mut self) {
        self.target = None;
    }

    pub fn is_streaming(&self) -> bool {
        self.target.is_some()
    }
}

fn pcm(x: f32) -> [u8; 2] {
    ((x.clamp(-1.0, 1.0) * i16::MAX as f32) as i16).to_le_bytes()
}

impl Block for UdpSink {
    fn kind(&self) -> StageKind {
        StageKind::UdpSink
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
        let Some(target) = self.target.as_ref() else {
            return Ok(Vec::new());
        };
        let frames = left.len().min(right.len());
        let mut start = 0;
        while start < frames {
            let end = (start + FRAMES_PER_PACKET).min(frames);
            let mut packet = Vec::with_capacity((end - start) * 4);
            for i in start..end {
                packet.extend_from_slice(&pcm(left[i]));
                if target.stereo {
                    packet.extend_from_slice(&pcm(right[i]));
                }
            }
            if let Err(e) = target.socket.send(&packet) {
                if !self.send_failed {
                    tracing::warn!("UDP audio send failed: {}", e);
                    self.send_failed = true;
                }
            }
            start = end;
        }
        Ok(Vec::new())
    }
}
