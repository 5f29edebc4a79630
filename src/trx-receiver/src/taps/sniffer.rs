// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::collections::VecDeque;

use trx_core::RxResult;

use crate::stage::{real_input, Block, Buffer, PortType, StageKind, NO_PORTS, REAL_1};

/// Fixed-size circular capture of real samples; oldest samples are dropped.
#[derive(Debug)]
pub struct Sniffer {
    capacity: usize,
    ring: VecDeque<f32>,
}

impl Sniffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            ring: VecDeque::with_capacity(capacity),
        }
    }

    pub fn set_buffer_size(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.ring.len() > self.capacity {
            self.ring.pop_front();
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Return everything captured so far and clear the buffer.
    pub fn take_samples(&mut self) -> Vec<f32> {
        self.ring.drain(..).collect()
    }
}

impl Block for Sniffer {
    fn kind(&self) -> StageKind {
        StageKind::Sniffer
    }

    fn inputs(&self) -> &'static [PortType] {
        REAL_1
    }

    fn outputs(&self) -> &'static [PortType] {
        NO_PORTS
    }

    fn work(&mut self, inputs: &[&Buffer]) -> RxResult<Vec<Buffer>> {
        let input = real_input(inputs, 0)?;
        let skip = input.len().saturating_sub(self.capacity);
        for &x in &input[skip..] {
            if self.ring.len() == self.capacity {
                self.ring.pop_front();
            }
            self.ring.push_back(x);
        }
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_most_recent_samples() {
        let mut sniffer = Sniffer::new(4);
        let buf = Buffer::Real((0..10).map(|x| x as f32).collect());
        sniffer.work(&[&buf]).unwrap();
        assert_eq!(sniffer.take_samples(), vec![6.0, 7.0, 8.0, 9.0]);
        assert!(sniffer.is_empty());
    }

    #[test]
    fn shrinking_drops_oldest() {
        let mut sniffer = Sniffer::new(8);
        sniffer.work(&[&Buffer::Real(vec![1.0, 2.0, 3.0])]).unwrap();
        sniffer.set_buffer_size(2);
        assert_eq!(sniffer.buffer_size(), 2);
        assert_eq!(sniffer.take_samples(), vec![2.0, 3.0]);
    }
}
