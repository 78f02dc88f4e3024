// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error taxonomy shared by every structure and both execution surfaces.

use thiserror::Error;

use crate::registry::Handle;

/// Errors reported by spatial structures, the handle registry and device contexts.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Error {
    /// Malformed dimensions, counts, or out-of-range indices.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation on an unknown or already destroyed handle.
    #[error("invalid handle: {0:?}")]
    InvalidHandle(Handle),

    /// Host or device memory exhaustion.
    #[error("failed to allocate {bytes} bytes")]
    AllocationFailure {
        /// Size of the rejected request.
        bytes: usize,
    },

    /// An enqueued device job failed; reported at the next synchronization point.
    #[error("device execution failed: {0}")]
    DeviceExecutionFailure(String),
}

impl Error {
    /// Build an [`Error::InvalidArgument`] and log the rejection.
    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        log::warn!("rejected argument: {msg}");
        Self::InvalidArgument(msg)
    }
}

/// Result type for spatial operations.
pub type Result<T, E = Error> = core::result::Result<T, E>;
