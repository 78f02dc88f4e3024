// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tunables for construction and queries.
//!
//! Every field has a default that matches the behavior callers get through
//! the C API, so `Config::default()` is always a valid starting point.

/// Split selection for top-down BVH construction.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SplitHeuristic {
    /// Split the longest axis of the centroid bounds at the median centroid.
    #[default]
    Median,
    /// Surface-area heuristic over centroid-sorted prefixes on all three axes.
    ///
    /// For a split point `k` along a sorted axis we minimize
    /// `area(LB_k) * k + area(RB_k) * (n - k)`.
    Sah,
}

/// BVH construction options.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BvhConfig {
    /// Split heuristic used by the host (top-down) builder.
    ///
    /// The device builder always produces a linear BVH from Morton codes.
    pub split: SplitHeuristic,
}

/// Winding number evaluation options.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WindingConfig {
    /// A subtree is approximated by its dipole when the query point is farther
    /// than `accuracy * radius` from the subtree's centroid.
    pub accuracy: f32,
    /// Points whose winding number exceeds this value are inside.
    pub threshold: f32,
}

impl Default for WindingConfig {
    fn default() -> Self {
        Self {
            accuracy: 2.0,
            threshold: 0.5,
        }
    }
}

/// Simulated device context options.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceConfig {
    /// Upper bound on live device allocations in bytes; `None` is unlimited.
    pub memory_budget: Option<usize>,
    /// Worker threads for parallel launches; `None` uses one per core.
    pub worker_threads: Option<usize>,
}

/// Aggregate configuration used by [`Runtime`](crate::Runtime).
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    /// BVH construction options, also used for mesh BVHs.
    pub bvh: BvhConfig,
    /// Winding number options for meshes.
    pub winding: WindingConfig,
}
