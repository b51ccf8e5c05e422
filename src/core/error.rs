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

//! Error types for the translation block cache
//!
//! A failed lookup is *not* an error: lookups return `Option` and a miss is
//! the normal signal for the dispatch loop to translate new code. The only
//! failure a caller can observe during normal operation is exhaustion of a
//! bounded allocation strategy, reported as [`CacheError::CacheFull`] so the
//! caller can decide whether to force a [`clear`](crate::core::cache::BlockCache::clear)
//! and retry.

use thiserror::Error;

/// Errors produced by the translation block cache
#[derive(Debug, Error)]
pub enum CacheError {
    /// A bounded allocation strategy has no free block slots left.
    ///
    /// Returned by the insert operations when every slot handed out by the
    /// strategy is still live. The caller decides the recovery policy,
    /// typically a full clear followed by a retry of the insert.
    #[error("block cache full: all {capacity} block slots are live")]
    CacheFull {
        /// Total number of slots the strategy manages
        capacity: usize,
    },

    /// Reading a cache configuration file failed
    #[error("failed to read cache configuration: {0}")]
    ConfigIo(#[from] std::io::Error),

    /// Parsing a cache configuration file failed
    #[error("failed to parse cache configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

/// Convenience alias used by all fallible operations in this crate
pub type Result<T> = std::result::Result<T, CacheError>;
