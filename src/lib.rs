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

//! tbcache: A translation block cache for dynamic CPU emulators
//!
//! This crate provides the cache a dynamic emulator puts between its
//! dispatch loop and its translator: previously decoded basic blocks are
//! kept keyed by guest program counter, so re-executing the same guest code
//! skips re-translation.
//!
//! # Architecture
//!
//! The emulator-facing pieces live in [`core`]:
//!
//! - [`core::cache`]: hash index, bucket chains, active/dormant pool lists,
//!   lookup with raise-on-hit, and byte-precise range invalidation for
//!   self-modifying code
//! - [`core::block`]: what the cache needs from a translated payload, plus
//!   a reference [`BasicBlock`](core::block::BasicBlock) implementation
//! - [`core::cache::alloc`]: pluggable entry-storage strategies (unbounded
//!   heap or bounded pool)
//!
//! # Example
//!
//! ```
//! use tbcache::core::block::BasicBlock;
//! use tbcache::core::cache::BlockCache;
//!
//! let mut cache = BlockCache::new();
//!
//! // Dispatch misses: translate the guest code and cache the block
//! if cache.find(0x8000_0000).is_none() {
//!     cache.insert_active(BasicBlock::new(0x8000_0000, 0x8000_0010))?;
//! }
//!
//! // Next dispatch hits without re-translation
//! assert!(cache.fast_find(0x8000_0000).is_some());
//!
//! // The guest wrote into its own code; drop every affected block
//! cache.clear_range(0x8000_0000, 0x8000_0004);
//! assert!(cache.fast_find(0x8000_0000).is_none());
//! # Ok::<(), tbcache::CacheError>(())
//! ```
//!
//! # Error Handling
//!
//! Lookup misses are `Option::None`, not errors. The only runtime failure
//! is a bounded allocation strategy running out of slots, surfaced as
//! [`CacheError::CacheFull`]; all fallible operations return
//! [`Result<T>`] which is an alias for `Result<T, CacheError>`.
//!
//! # Concurrency
//!
//! The cache is single-threaded by design; every mutating operation takes
//! `&mut self`. Embedders translating on background threads must serialize
//! cache access themselves.

pub mod core;

// Re-export commonly used types
pub use crate::core::error::{CacheError, Result};
