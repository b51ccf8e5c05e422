// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Cache diagnostics
//!
//! Two kinds of numbers come out of the cache:
//!
//! - [`SearchStats`]: per-lookup counters, compiled in only with the `stats`
//!   feature since they add work to the hottest dispatch path.
//! - [`IndexReport`]: a snapshot of hash-index occupancy, always available.
//!   Skewed chain lengths here mean the coarse address-shift key is
//!   colliding too many blocks into too few lines.

/// Lookup counters gathered by [`find`](super::BlockCache::find)
///
/// `fast_find` never touches these; it is the speculative probe on the
/// hottest path. Counters reset after each
/// [`print_statistics`](super::BlockCache::print_statistics).
#[cfg(feature = "stats")]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SearchStats {
    /// Total `find` calls
    pub lookups: u64,
    /// Matches found at the chain head
    pub head_hits: u64,
    /// Matches found by scanning past the head (the entry was raised)
    pub scan_hits: u64,
    /// Lookups that found nothing; the caller will translate
    pub faults: u64,
}

#[cfg(feature = "stats")]
impl SearchStats {
    /// Percentage of `part` over the total lookup count, 0.0 when idle
    pub(crate) fn percent(&self, part: u64) -> f64 {
        if self.lookups == 0 {
            0.0
        } else {
            part as f64 / self.lookups as f64 * 100.0
        }
    }
}

/// Snapshot of hash-index occupancy and chain-length distribution
///
/// Chain statistics are computed over occupied lines only; an empty index
/// reports zero for all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexReport {
    /// Lines with at least one entry
    pub occupied_lines: usize,
    /// Total lines in the index
    pub total_lines: usize,
    /// Shortest chain among occupied lines
    pub min_chain: usize,
    /// Longest chain among occupied lines
    pub max_chain: usize,
    /// Mean chain length over occupied lines (integer, rounded down)
    pub avg_chain: usize,
}
