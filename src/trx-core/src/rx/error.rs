// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use thiserror::Error;

/// Coarse classification callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Source/sink construction or rate negotiation failed.
    Device,
    /// The request is not allowed in the current state or has bad arguments.
    InvalidRequest,
    /// The resource is already in use.
    Contention,
}

/// Error type returned by receiver operations.
#[derive(Debug, Error)]
pub enum RxError {
    #[error("device error: {0}")]
    Device(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("operation not supported: {0}")]
    NotSupported(&'static str),

    #[error("receiver is not running")]
    NotRunning,

    #[error("{0} is already active")]
    Busy(&'static str),

    #[error("{0} is not active")]
    NotActive(&'static str),

    #[error("flowgraph error: {0}")]
    Graph(String),
}

pub type RxResult<T> = Result<T, RxError>;

impl RxError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RxError::Device(_) | RxError::Io(_) => ErrorKind::Device,
            RxError::Busy(_) => ErrorKind::Contention,
            RxError::InvalidRequest(_)
            | RxError::NotSupported(_)
            | RxError::NotRunning
            | RxError::NotActive(_)
            | RxError::Graph(_) => ErrorKind::InvalidRequest,
        }
    }

    pub fn device(err: impl std::fmt::Display) -> Self {
        RxError::Device(err.to_string())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        RxError::InvalidRequest(msg.into())
    }
}

impl From<std::io::Error> for RxError {
    fn from(value: std::io::Error) -> Self {
        RxError::Io(value.to_string())
    }
}
