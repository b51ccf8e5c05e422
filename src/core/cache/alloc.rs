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

//! Allocation strategies for block slots
//!
//! The cache is generic over where entry storage comes from. A strategy only
//! deals in slot indices; the cache owns the arena itself and grows it to
//! cover whatever indices the strategy hands out. Two strategies are
//! provided:
//!
//! - [`HeapStrategy`]: unbounded, recycles released slots through a free
//!   list. The default for embedders that flush the cache explicitly.
//! - [`PooledStrategy`]: a fixed number of slots chosen up front. Once every
//!   slot is live, `acquire` fails with
//!   [`CacheError::CacheFull`](crate::CacheError::CacheFull) and the caller
//!   decides whether to clear and retry. This bounds the emulator's
//!   translation memory.

use super::entry::BlockHandle;
use crate::core::config::CacheConfig;
use crate::core::error::{CacheError, Result};

/// Supplies and reclaims entry slots for a block cache
///
/// # Contract
///
/// - `acquire` must never return an index that is currently live (handed out
///   and not yet released).
/// - `release` is only called with indices previously returned by `acquire`
///   on the same strategy, after the cache has unlinked the entry from both
///   of its lists.
pub trait AllocationStrategy {
    /// Hand out a slot for a new entry
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::CacheFull`](crate::CacheError::CacheFull) if the
    /// strategy is bounded and every slot is live.
    fn acquire(&mut self) -> Result<BlockHandle>;

    /// Return a slot for reuse
    fn release(&mut self, handle: BlockHandle);

    /// Number of currently live slots
    fn live(&self) -> usize;
}

/// Unbounded heap-backed strategy
///
/// Hands out fresh indices until a release makes recycling possible; the
/// arena simply grows with the working set.
#[derive(Debug, Default)]
pub struct HeapStrategy {
    /// Next never-used index
    next: u32,
    /// Released indices awaiting reuse
    free: Vec<u32>,
}

impl HeapStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AllocationStrategy for HeapStrategy {
    fn acquire(&mut self) -> Result<BlockHandle> {
        if let Some(index) = self.free.pop() {
            return Ok(BlockHandle(index));
        }
        let index = self.next;
        self.next += 1;
        Ok(BlockHandle(index))
    }

    fn release(&mut self, handle: BlockHandle) {
        debug_assert!(handle.0 < self.next, "released a slot never handed out");
        debug_assert!(
            !self.free.contains(&handle.0),
            "double release of slot {}",
            handle.0
        );
        self.free.push(handle.0);
    }

    fn live(&self) -> usize {
        self.next as usize - self.free.len()
    }
}

/// Bounded pooled strategy
///
/// All slots come from a pool of fixed capacity; indices are bumped until
/// the pool is exhausted, then recycled from the free list. Acquire fails
/// once every slot is live.
///
/// # Example
///
/// ```
/// use tbcache::core::cache::alloc::{AllocationStrategy, PooledStrategy};
///
/// let mut strategy = PooledStrategy::new(2);
/// let a = strategy.acquire().unwrap();
/// let _b = strategy.acquire().unwrap();
/// assert!(strategy.acquire().is_err()); // pool exhausted
///
/// strategy.release(a);
/// assert!(strategy.acquire().is_ok()); // slot recycled
/// ```
#[derive(Debug)]
pub struct PooledStrategy {
    capacity: usize,
    next: u32,
    free: Vec<u32>,
}

impl PooledStrategy {
    /// Create a strategy managing exactly `capacity` slots
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            next: 0,
            free: Vec::new(),
        }
    }

    /// Create a strategy sized from a [`CacheConfig`]
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.block_capacity)
    }

    /// Total number of slots this strategy manages
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for PooledStrategy {
    fn default() -> Self {
        Self::new(CacheConfig::DEFAULT_BLOCK_CAPACITY)
    }
}

impl AllocationStrategy for PooledStrategy {
    fn acquire(&mut self) -> Result<BlockHandle> {
        if let Some(index) = self.free.pop() {
            return Ok(BlockHandle(index));
        }
        if (self.next as usize) < self.capacity {
            let index = self.next;
            self.next += 1;
            return Ok(BlockHandle(index));
        }
        Err(CacheError::CacheFull {
            capacity: self.capacity,
        })
    }

    fn release(&mut self, handle: BlockHandle) {
        debug_assert!(handle.0 < self.next, "released a slot never handed out");
        debug_assert!(
            !self.free.contains(&handle.0),
            "double release of slot {}",
            handle.0
        );
        self.free.push(handle.0);
    }

    fn live(&self) -> usize {
        self.next as usize - self.free.len()
    }
}
