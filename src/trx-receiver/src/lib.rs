// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Receive pipeline: the flowgraph, its stages and the [`Receiver`] that
//! owns and rewires them.

pub mod demod;
pub mod dsp;
pub mod graph;
pub mod receiver;
pub mod stage;
pub mod taps;

pub use demod::{Capabilities, ChannelFilter, DemodChain};
pub use dsp::FftWindow;
pub use graph::{Edge, Flowgraph, Runner, Stage, StageId};
pub use receiver::{Link, Receiver, RxState, StageRates};
pub use stage::{Block, Buffer, PortType, StageKind};
