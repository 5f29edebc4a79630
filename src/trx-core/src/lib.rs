// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

pub mod rx;

pub type DynResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

pub use rx::device::{AudioSink, DeviceFactory, SampleSource};
pub use rx::error::{ErrorKind, RxError, RxResult};
pub use rx::{Demod, DemodFamily, FilterShape, FreqRange, GainRange};
