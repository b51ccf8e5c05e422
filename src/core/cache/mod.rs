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

//! Translation block cache
//!
//! This module implements the cache that lets a dynamic CPU emulator reuse
//! previously translated basic blocks instead of decoding the same guest
//! code again on every dispatch.
//!
//! # Organization
//!
//! Every resident block lives in one arena slot and is threaded onto two
//! independent intrusive lists at once:
//!
//! - its **bucket chain**, selected by a hash of the guest program counter,
//!   giving near-O(1) lookup on the dispatch path
//! - one of two **pool lists** (`active` / `dormant`), grouping blocks by
//!   lifecycle so range invalidation can walk exactly the population it is
//!   allowed to destroy
//!
//! ```text
//! Hash key derivation (32-bit guest address):
//! [16:2]  Line (15 bits) - selects one of 32768 bucket chains
//! [1:0]   Always zero for aligned instructions (discarded)
//! ```
//!
//! The key is a window of address bits, not a collision-free hash: distinct
//! blocks can share a line, and range invalidation always confirms with the
//! payload's exact `intersect` test before destroying anything.
//!
//! # Performance Characteristics
//!
//! - **fast_find**: O(1) - head-of-chain probe only
//! - **find**: O(chain length) worst case; a non-head match is raised to the
//!   head so repeated lookups stay O(1)
//! - **insert / remove**: O(1) - back-references make unlinking positional
//! - **clear_range**: O(candidate entries examined)
//! - **clear**: O(resident entries + index size)
//!
//! # Example
//!
//! ```
//! use tbcache::core::block::BasicBlock;
//! use tbcache::core::cache::BlockCache;
//!
//! let mut cache = BlockCache::new();
//! let handle = cache
//!     .insert_active(BasicBlock::new(0x8000_0000, 0x8000_0010))
//!     .unwrap();
//!
//! // Hot dispatch path: speculative head probe
//! assert!(cache.fast_find(0x8000_0000).is_some());
//!
//! // Guest wrote inside the block; overlapping active blocks are destroyed
//! cache.clear_range(0x8000_0008, 0x8000_000C);
//! assert!(cache.find(0x8000_0000).is_none());
//! assert!(cache.get(handle).is_none());
//! ```

mod entry;
mod stats;

pub mod alloc;

pub use self::entry::{BlockHandle, Pool};
pub use self::stats::IndexReport;
#[cfg(feature = "stats")]
pub use self::stats::SearchStats;

use self::alloc::{AllocationStrategy, HeapStrategy};
use self::entry::{Entry, LineSlot, PoolSlot};

use crate::core::error::Result;

/// Capabilities the cache needs from a translated block payload
///
/// The cache never inspects translator output beyond these operations;
/// anything the translator produces can be cached by implementing them.
pub trait CacheableBlock {
    /// Guest address of the block's first instruction
    ///
    /// Must be stable while the block is resident; the hash key is derived
    /// from it once at insertion.
    fn pc(&self) -> u32;

    /// Guest address one past the block's last instruction byte
    ///
    /// Must satisfy `end() > pc()`. The cache keeps the largest span it has
    /// seen so range invalidation knows how far below a modified interval an
    /// overlapping block may begin.
    fn end(&self) -> u32;

    /// Exact test for overlap with the modified guest interval `[start, end)`
    fn intersect(&self, start: u32, end: u32) -> bool;

    /// Called before the block is destroyed by range invalidation
    ///
    /// Lets the payload release translation-specific resources or mark
    /// itself stale for any other referencer.
    fn invalidate(&mut self);
}

/// Cache of translated basic blocks keyed by guest program counter
///
/// Generic over the payload type `B` and the [`AllocationStrategy`] `A`
/// supplying entry storage, so a bounded pool can replace the default heap
/// strategy without touching cache logic.
///
/// The cache is single-threaded by design: every mutating operation takes
/// `&mut self` and runs to completion. Embedders that translate on a
/// background thread must serialize all cache access externally.
pub struct BlockCache<B: CacheableBlock, A: AllocationStrategy = HeapStrategy> {
    /// Arena of entry slots; `None` marks a slot owned by the strategy
    slots: Vec<Option<Entry<B>>>,
    /// Bucket-chain heads, indexed by the derived address key
    index: Vec<Option<BlockHandle>>,
    /// Head of the active pool list
    active: Option<BlockHandle>,
    /// Head of the dormant pool list
    dormant: Option<BlockHandle>,
    /// Largest `end - pc` span of any block inserted since the last clear
    ///
    /// Conservative: removals never shrink it. Bounds the bucket-chain walk
    /// of `clear_range` so blocks starting before the modified interval are
    /// still examined.
    max_span: u32,
    /// Slot provider
    strategy: A,
    /// Lookup counters
    #[cfg(feature = "stats")]
    stats: SearchStats,
}

impl<B: CacheableBlock> BlockCache<B> {
    /// Create a cache backed by the unbounded [`HeapStrategy`]
    pub fn new() -> Self {
        Self::with_strategy(HeapStrategy::new())
    }
}

impl<B: CacheableBlock, A: AllocationStrategy> BlockCache<B, A> {
    /// Width of the derived address key
    const HASH_BITS: u32 = 15;

    /// Number of bucket chains in the hash index
    pub const HASH_SIZE: usize = 1 << Self::HASH_BITS;

    /// Mask selecting the key bits
    const HASH_MASK: u32 = (Self::HASH_SIZE - 1) as u32;

    /// Create a cache backed by an explicit allocation strategy
    ///
    /// # Example
    ///
    /// ```
    /// use tbcache::core::block::BasicBlock;
    /// use tbcache::core::cache::alloc::PooledStrategy;
    /// use tbcache::core::cache::BlockCache;
    ///
    /// let mut cache: BlockCache<BasicBlock, _> =
    ///     BlockCache::with_strategy(PooledStrategy::new(1024));
    /// cache
    ///     .insert_active(BasicBlock::new(0x8000_0000, 0x8000_0004))
    ///     .unwrap();
    /// ```
    pub fn with_strategy(strategy: A) -> Self {
        Self {
            slots: Vec::new(),
            index: vec![None; Self::HASH_SIZE],
            active: None,
            dormant: None,
            max_span: 0,
            strategy,
            #[cfg(feature = "stats")]
            stats: SearchStats::default(),
        }
    }

    /// Derive the hash-index line for a guest address
    ///
    /// Instructions are word-aligned, so the low two address bits carry no
    /// information and are shifted out before masking.
    #[inline(always)]
    fn line(pc: u32) -> usize {
        ((pc >> 2) & Self::HASH_MASK) as usize
    }

    #[inline(always)]
    fn entry(&self, handle: BlockHandle) -> &Entry<B> {
        self.slots[handle.index()]
            .as_ref()
            .expect("handle must reference a resident entry")
    }

    #[inline(always)]
    fn entry_mut(&mut self, handle: BlockHandle) -> &mut Entry<B> {
        self.slots[handle.index()]
            .as_mut()
            .expect("handle must reference a resident entry")
    }

    /// Number of resident blocks across both pools
    pub fn len(&self) -> usize {
        self.strategy.live()
    }

    /// Whether the cache holds no blocks at all
    pub fn is_empty(&self) -> bool {
        self.active.is_none() && self.dormant.is_none()
    }

    /// Insert a block into the active pool
    ///
    /// The block is wired into its bucket chain (at the head) and the active
    /// pool list in one step. Active blocks are eligible for
    /// [`clear_range`](Self::clear_range) invalidation.
    ///
    /// # Errors
    ///
    /// Propagates [`CacheError::CacheFull`](crate::CacheError::CacheFull)
    /// from a bounded strategy.
    pub fn insert_active(&mut self, block: B) -> Result<BlockHandle> {
        self.insert(block, Pool::Active)
    }

    /// Insert a block into the dormant pool
    ///
    /// Dormant blocks are reachable through lookup like any other but are
    /// never destroyed by [`clear_range`](Self::clear_range); only a full
    /// [`clear`](Self::clear) or a direct [`remove`](Self::remove) ends
    /// their residency. Which blocks deserve parking is the caller's policy.
    ///
    /// # Errors
    ///
    /// Propagates [`CacheError::CacheFull`](crate::CacheError::CacheFull)
    /// from a bounded strategy.
    pub fn insert_dormant(&mut self, block: B) -> Result<BlockHandle> {
        self.insert(block, Pool::Dormant)
    }

    fn insert(&mut self, block: B, pool: Pool) -> Result<BlockHandle> {
        let handle = self.strategy.acquire()?;
        let index = handle.index();
        if index >= self.slots.len() {
            self.slots.resize_with(index + 1, || None);
        }
        debug_assert!(
            self.slots[index].is_none(),
            "strategy handed out a live slot"
        );

        let pc = block.pc();
        debug_assert!(block.end() > pc, "block must cover at least one byte");
        self.max_span = self.max_span.max(block.end() - pc);
        self.slots[index] = Some(Entry::new(block, pool));
        self.link_line(handle, pc);
        self.link_pool(handle, pool);

        log::trace!("cached block at 0x{:08X} ({:?} pool)", pc, pool);
        Ok(handle)
    }

    /// Remove a block, returning its payload
    ///
    /// Unlinks the entry from its bucket chain and pool list, then releases
    /// the slot back to the strategy. Returns `None` if the handle no longer
    /// references a resident entry.
    pub fn remove(&mut self, handle: BlockHandle) -> Option<B> {
        if !matches!(self.slots.get(handle.index()), Some(Some(_))) {
            return None;
        }
        self.unlink_line(handle);
        self.unlink_pool(handle);
        let entry = self.slots[handle.index()].take()?;
        self.strategy.release(handle);

        log::trace!("removed block at 0x{:08X}", entry.block.pc());
        Some(entry.block)
    }

    /// Borrow a resident block by handle
    ///
    /// Returns `None` for handles whose entry has been removed. A handle
    /// kept across a removal may observe a different block once the slot is
    /// recycled; treat handles as invalidated by removal.
    pub fn get(&self, handle: BlockHandle) -> Option<&B> {
        self.slots
            .get(handle.index())?
            .as_ref()
            .map(|entry| &entry.block)
    }

    /// Mutably borrow a resident block by handle
    ///
    /// The payload's program counter must not change while resident; a block
    /// whose address changes has to be removed and re-inserted.
    pub fn get_mut(&mut self, handle: BlockHandle) -> Option<&mut B> {
        self.slots
            .get_mut(handle.index())?
            .as_mut()
            .map(|entry| &mut entry.block)
    }

    /// Speculative O(1) probe of the chain head only
    ///
    /// Covers the overwhelming share of dispatches: the most recently
    /// inserted or raised block sits at the head of its chain. Reports a
    /// miss even if a matching block exists deeper in the chain, never
    /// reorders anything, and never counts toward statistics.
    ///
    /// # Example
    ///
    /// ```
    /// use tbcache::core::block::BasicBlock;
    /// use tbcache::core::cache::BlockCache;
    ///
    /// let mut cache = BlockCache::new();
    /// cache
    ///     .insert_active(BasicBlock::new(0x8000_0000, 0x8000_0004))
    ///     .unwrap();
    ///
    /// assert!(cache.fast_find(0x8000_0000).is_some());
    /// assert!(cache.fast_find(0x8000_0004).is_none());
    /// ```
    #[inline(always)]
    pub fn fast_find(&self, pc: u32) -> Option<&B> {
        let head = self.index[Self::line(pc)]?;
        let entry = self.entry(head);
        if entry.block.pc() == pc {
            Some(&entry.block)
        } else {
            None
        }
    }

    /// Full lookup with raise-on-hit
    ///
    /// Checks the chain head first; on a head miss, scans the remainder of
    /// the chain and moves a match to the head so the next
    /// [`fast_find`](Self::fast_find) for the same address succeeds. A miss
    /// means the caller should translate the guest code at `pc` and insert
    /// the result.
    ///
    /// # Example
    ///
    /// ```
    /// use tbcache::core::block::BasicBlock;
    /// use tbcache::core::cache::BlockCache;
    ///
    /// let mut cache = BlockCache::new();
    /// cache
    ///     .insert_active(BasicBlock::new(0x8000_0000, 0x8000_0004))
    ///     .unwrap();
    ///
    /// assert!(cache.find(0x8000_0000).is_some());
    /// assert!(cache.find(0x8000_1000).is_none()); // translate and insert
    /// ```
    pub fn find(&mut self, pc: u32) -> Option<&B> {
        let handle = self.find_handle(pc)?;
        Some(&self.entry(handle).block)
    }

    /// [`find`](Self::find), returning the entry handle instead of the payload
    ///
    /// For callers that need to mutate or remove the matched block.
    pub fn find_handle(&mut self, pc: u32) -> Option<BlockHandle> {
        #[cfg(feature = "stats")]
        {
            self.stats.lookups += 1;
        }

        // Head hit: return immediately (covers more than 95% of dispatches)
        let head = self.index[Self::line(pc)];
        if let Some(handle) = head {
            if self.entry(handle).block.pc() == pc {
                #[cfg(feature = "stats")]
                {
                    self.stats.head_hits += 1;
                }
                return Some(handle);
            }

            // Head miss: scan the rest of the chain, raising a match so the
            // next lookup for this address takes the head-hit path
            let mut cursor = self.entry(handle).line_next;
            while let Some(candidate) = cursor {
                if self.entry(candidate).block.pc() == pc {
                    self.raise_in_line(candidate);
                    #[cfg(feature = "stats")]
                    {
                        self.stats.scan_hits += 1;
                    }
                    return Some(candidate);
                }
                cursor = self.entry(candidate).line_next;
            }
        }

        // Nothing cached for this address; the caller translates
        #[cfg(feature = "stats")]
        {
            self.stats.faults += 1;
        }
        None
    }

    /// Destroy every active block overlapping the guest interval `[start, end)`
    ///
    /// Called when guest memory is written: any cached block whose
    /// instruction range overlaps the write may now decode differently and
    /// must go. Each doomed block's `invalidate` hook runs before it is
    /// unlinked from both lists and its slot released.
    ///
    /// Dormant blocks are never touched, regardless of overlap; callers
    /// wanting them invalidated must move them to the active pool first.
    ///
    /// When the interval spans more than one hash line, only the bucket
    /// chains an overlapping block can be keyed to are walked: an
    /// overlapping block begins no further than the largest resident span
    /// below `start`, so the walk starts that many lines early. Intervals
    /// the key cannot narrow fall back to scanning the whole active pool.
    /// The key only approximates address locality either way, so candidates
    /// from both walks are confirmed with the payload's exact `intersect`
    /// test before anything is destroyed.
    ///
    /// # Example
    ///
    /// ```
    /// use tbcache::core::block::BasicBlock;
    /// use tbcache::core::cache::BlockCache;
    ///
    /// let mut cache = BlockCache::new();
    /// cache.insert_active(BasicBlock::new(0x1000, 0x1008)).unwrap();
    /// cache.insert_active(BasicBlock::new(0x2000, 0x2008)).unwrap();
    ///
    /// cache.clear_range(0x1004, 0x1006);
    ///
    /// assert!(cache.find(0x1000).is_none());
    /// assert!(cache.find(0x2000).is_some());
    /// ```
    pub fn clear_range(&mut self, start: u32, end: u32) {
        if start >= end || self.active.is_none() {
            return;
        }

        // A block overlapping [start, end) begins at or after this address
        let lowest = start.saturating_sub(self.max_span.saturating_sub(1));
        let first = Self::line(lowest);
        let last = Self::line(end - 1);
        let mut dropped = 0usize;

        // The contiguous line walk is only meaningful when the candidate
        // byte interval maps to an increasing run of lines that does not
        // wrap the index
        let narrow = first < last && ((end - 1 - lowest) >> 2) < Self::HASH_SIZE as u32;

        if narrow {
            // Short range: walk only the bucket chains the range maps to
            for line in first..=last {
                let mut cursor = self.index[line];
                while let Some(handle) = cursor {
                    cursor = self.entry(handle).line_next;
                    let entry = self.entry(handle);
                    if entry.pool == Pool::Active && entry.block.intersect(start, end) {
                        self.destroy(handle);
                        dropped += 1;
                    }
                }
            }
        } else {
            // The key cannot narrow this range; scan the whole active pool
            let mut cursor = self.active;
            while let Some(handle) = cursor {
                cursor = self.entry(handle).pool_next;
                if self.entry(handle).block.intersect(start, end) {
                    self.destroy(handle);
                    dropped += 1;
                }
            }
        }

        if dropped > 0 {
            log::debug!(
                "invalidated {} block(s) in 0x{:08X}..0x{:08X}",
                dropped,
                start,
                end
            );
        }
    }

    /// Invalidate, unlink from both lists, release the slot
    fn destroy(&mut self, handle: BlockHandle) {
        self.entry_mut(handle).block.invalidate();
        self.unlink_line(handle);
        self.unlink_pool(handle);
        self.slots[handle.index()] = None;
        self.strategy.release(handle);
    }

    /// Destroy every resident block and reset the index
    ///
    /// Both pools are drained unconditionally (no overlap test, no
    /// `invalidate` hook) and every bucket-chain head is reset, leaving the
    /// cache indistinguishable from a freshly constructed one. Calling
    /// `clear` on an empty cache is a no-op; slots are released exactly once
    /// no matter how often it runs.
    pub fn clear(&mut self) {
        let mut dropped = 0usize;

        let mut cursor = self.active.take();
        while let Some(handle) = cursor {
            cursor = self.entry(handle).pool_next;
            self.slots[handle.index()] = None;
            self.strategy.release(handle);
            dropped += 1;
        }

        let mut cursor = self.dormant.take();
        while let Some(handle) = cursor {
            cursor = self.entry(handle).pool_next;
            self.slots[handle.index()] = None;
            self.strategy.release(handle);
            dropped += 1;
        }

        // The chains just died with their entries; reset the heads so no
        // line references a released slot
        for head in self.index.iter_mut() {
            *head = None;
        }
        self.max_span = 0;

        if dropped > 0 {
            log::debug!("cleared {} cached block(s)", dropped);
        }
    }

    /// Snapshot of the lookup counters
    ///
    /// Counters accumulate across [`find`](Self::find) calls and reset on
    /// [`print_statistics`](Self::print_statistics).
    #[cfg(feature = "stats")]
    pub fn search_stats(&self) -> SearchStats {
        self.stats
    }

    /// Compute hash-index occupancy and chain-length distribution
    ///
    /// Useful for spotting key skew: a low occupied count with a high
    /// maximum chain length means too many blocks collide in too few lines.
    pub fn index_report(&self) -> IndexReport {
        let mut occupied = 0usize;
        let mut total = 0usize;
        let mut min = usize::MAX;
        let mut max = 0usize;

        for line in 0..Self::HASH_SIZE {
            let mut length = 0usize;
            let mut cursor = self.index[line];
            while let Some(handle) = cursor {
                length += 1;
                cursor = self.entry(handle).line_next;
            }
            if length > 0 {
                occupied += 1;
                total += length;
                min = min.min(length);
                max = max.max(length);
            }
        }

        IndexReport {
            occupied_lines: occupied,
            total_lines: Self::HASH_SIZE,
            min_chain: if occupied == 0 { 0 } else { min },
            max_chain: max,
            avg_chain: if occupied == 0 { 0 } else { total / occupied },
        }
    }

    /// Log lookup counters and index occupancy, then reset the counters
    pub fn print_statistics(&mut self) {
        #[cfg(feature = "stats")]
        {
            let stats = self.stats;
            log::info!(
                "[block cache] {} lookups: {} head hits, {} scan hits, {} faults",
                stats.lookups,
                stats.head_hits,
                stats.scan_hits,
                stats.faults
            );
            log::info!(
                "[block cache] hit rates: {:.2}% head, {:.2}% scan, {:.2}% fault",
                stats.percent(stats.head_hits),
                stats.percent(stats.scan_hits),
                stats.percent(stats.faults)
            );
            self.stats = SearchStats::default();
        }

        let report = self.index_report();
        log::info!(
            "[block cache] {} of {} cache lines contain data",
            report.occupied_lines,
            report.total_lines
        );
        log::info!(
            "[block cache] chain length min: {}, max: {}, avg: {}",
            report.min_chain,
            report.max_chain,
            report.avg_chain
        );
    }

    /// Wire an entry in at the head of its bucket chain
    fn link_line(&mut self, handle: BlockHandle, pc: u32) {
        let line = Self::line(pc);
        let old_head = self.index[line];
        if let Some(next) = old_head {
            self.entry_mut(next).line_prev = Some(LineSlot::Entry(handle));
        }
        let entry = self.entry_mut(handle);
        entry.line_next = old_head;
        entry.line_prev = Some(LineSlot::Head(line));
        self.index[line] = Some(handle);
    }

    /// Unlink an entry from its bucket chain in O(1)
    ///
    /// The back-reference names the slot pointing at this entry, so no
    /// traversal is needed. A no-op for entries not currently linked.
    fn unlink_line(&mut self, handle: BlockHandle) {
        let entry = self.entry_mut(handle);
        let prev = entry.line_prev.take();
        let next = entry.line_next.take();
        let Some(prev) = prev else {
            debug_assert!(next.is_none(), "linked entry missing its back-reference");
            return;
        };
        match prev {
            LineSlot::Head(line) => self.index[line] = next,
            LineSlot::Entry(predecessor) => self.entry_mut(predecessor).line_next = next,
        }
        if let Some(successor) = next {
            self.entry_mut(successor).line_prev = Some(prev);
        }
    }

    /// Move a chain entry to the head of its line
    ///
    /// Approximates recency-of-use within a bucket: a block matched past the
    /// head becomes the head, keeping frequently dispatched blocks on the
    /// O(1) path.
    fn raise_in_line(&mut self, handle: BlockHandle) {
        let pc = self.entry(handle).block.pc();
        self.unlink_line(handle);
        self.link_line(handle, pc);
    }

    /// Wire an entry in at the head of its pool list
    fn link_pool(&mut self, handle: BlockHandle, pool: Pool) {
        let (old_head, head_slot) = match pool {
            Pool::Active => (self.active, PoolSlot::ActiveHead),
            Pool::Dormant => (self.dormant, PoolSlot::DormantHead),
        };
        if let Some(next) = old_head {
            self.entry_mut(next).pool_prev = Some(PoolSlot::Entry(handle));
        }
        let entry = self.entry_mut(handle);
        entry.pool_next = old_head;
        entry.pool_prev = Some(head_slot);
        match pool {
            Pool::Active => self.active = Some(handle),
            Pool::Dormant => self.dormant = Some(handle),
        }
    }

    /// Unlink an entry from whichever pool list holds it, in O(1)
    fn unlink_pool(&mut self, handle: BlockHandle) {
        let entry = self.entry_mut(handle);
        let prev = entry.pool_prev.take();
        let next = entry.pool_next.take();
        let Some(prev) = prev else {
            debug_assert!(next.is_none(), "linked entry missing its back-reference");
            return;
        };
        match prev {
            PoolSlot::ActiveHead => self.active = next,
            PoolSlot::DormantHead => self.dormant = next,
            PoolSlot::Entry(predecessor) => self.entry_mut(predecessor).pool_next = next,
        }
        if let Some(successor) = next {
            self.entry_mut(successor).pool_prev = Some(prev);
        }
    }
}

impl<B: CacheableBlock, A: AllocationStrategy + Default> Default for BlockCache<B, A> {
    fn default() -> Self {
        Self::with_strategy(A::default())
    }
}

#[cfg(test)]
mod tests {
    use super::alloc::PooledStrategy;
    use super::*;
    use crate::core::block::BasicBlock;
    use crate::CacheError;
    use proptest::prelude::*;

    /// Two aligned addresses collide in the index when they differ by a
    /// multiple of 1 << (HASH_BITS + 2)
    const LINE_STRIDE: u32 = 1 << 17;

    fn block(pc: u32) -> BasicBlock {
        BasicBlock::new(pc, pc + 16)
    }

    #[test]
    fn test_empty_cache() {
        let cache: BlockCache<BasicBlock> = BlockCache::new();
        assert!(cache.is_empty());
        assert_eq!(cache.len(), 0);
        assert!(cache.fast_find(0x8000_0000).is_none());
    }

    #[test]
    fn test_insert_and_find_roundtrip() {
        let mut cache = BlockCache::new();
        let handle = cache.insert_active(block(0x8000_0000)).unwrap();

        assert_eq!(cache.len(), 1);
        assert!(!cache.is_empty());
        assert_eq!(cache.find(0x8000_0000).map(|b| b.pc()), Some(0x8000_0000));
        assert_eq!(cache.find_handle(0x8000_0000), Some(handle));
        assert_eq!(cache.get(handle).map(|b| b.pc()), Some(0x8000_0000));
    }

    #[test]
    fn test_remove_makes_block_unreachable() {
        let mut cache = BlockCache::new();
        let handle = cache.insert_active(block(0x8000_0000)).unwrap();

        let removed = cache.remove(handle).unwrap();
        assert_eq!(removed.pc(), 0x8000_0000);

        assert!(cache.fast_find(0x8000_0000).is_none());
        assert!(cache.find(0x8000_0000).is_none());
        assert!(cache.get(handle).is_none());
        assert!(cache.is_empty());

        // A second remove through the same handle finds nothing
        assert!(cache.remove(handle).is_none());
    }

    #[test]
    fn test_fast_find_checks_head_only() {
        let mut cache = BlockCache::new();
        let pc_a = 0x8000_0000;
        let pc_b = pc_a + LINE_STRIDE;

        cache.insert_active(block(pc_a)).unwrap();
        cache.insert_active(block(pc_b)).unwrap();

        // B was inserted last, so B is the head; A is deeper in the chain
        assert!(cache.fast_find(pc_b).is_some());
        assert!(cache.fast_find(pc_a).is_none());

        // The full lookup still reaches A
        assert_eq!(cache.find(pc_a).map(|b| b.pc()), Some(pc_a));
    }

    #[test]
    fn test_find_raises_match_to_head() {
        let mut cache = BlockCache::new();
        let pc_a = 0x8000_0000;
        let pc_b = pc_a + LINE_STRIDE;
        let pc_c = pc_a + 2 * LINE_STRIDE;

        cache.insert_active(block(pc_a)).unwrap();
        cache.insert_active(block(pc_b)).unwrap();
        cache.insert_active(block(pc_c)).unwrap();

        // C is the head; a find for A scans the chain and raises A
        assert_eq!(cache.find(pc_a).map(|b| b.pc()), Some(pc_a));
        assert!(cache.fast_find(pc_a).is_some());

        // The others are still reachable through the full lookup
        assert_eq!(cache.find(pc_b).map(|b| b.pc()), Some(pc_b));
        assert_eq!(cache.find(pc_c).map(|b| b.pc()), Some(pc_c));
    }

    #[test]
    fn test_find_head_hit_does_not_reorder() {
        let mut cache = BlockCache::new();
        let pc_a = 0x8000_0000;
        let pc_b = pc_a + LINE_STRIDE;

        cache.insert_active(block(pc_a)).unwrap();
        cache.insert_active(block(pc_b)).unwrap();

        // Head hit on B leaves the chain as it was
        assert!(cache.find(pc_b).is_some());
        assert!(cache.fast_find(pc_b).is_some());
        assert!(cache.fast_find(pc_a).is_none());
    }

    #[test]
    fn test_clear_range_precision() {
        let mut cache = BlockCache::new();
        let a = cache.insert_active(BasicBlock::new(0, 10)).unwrap();
        let b = cache.insert_active(BasicBlock::new(20, 30)).unwrap();
        let c = cache.insert_active(BasicBlock::new(40, 50)).unwrap();

        // Dormant twins of the doomed blocks must survive untouched
        let d = cache.insert_dormant(BasicBlock::new(20, 30)).unwrap();
        let e = cache.insert_dormant(BasicBlock::new(40, 50)).unwrap();

        cache.clear_range(25, 45);

        assert!(cache.get(a).is_some()); // [0,10) does not overlap
        assert!(cache.get(b).is_none()); // [20,30) overlaps
        assert!(cache.get(c).is_none()); // [40,50) overlaps
        assert!(cache.get(d).is_some());
        assert!(cache.get(e).is_some());
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_clear_range_touching_boundaries_survive() {
        let mut cache = BlockCache::new();
        let before = cache.insert_active(BasicBlock::new(0x0FF8, 0x1000)).unwrap();
        let after = cache.insert_active(BasicBlock::new(0x1100, 0x1108)).unwrap();

        // [0x1000, 0x1100) touches both blocks without overlapping either
        cache.clear_range(0x1000, 0x1100);

        assert!(cache.get(before).is_some());
        assert!(cache.get(after).is_some());
    }

    #[test]
    fn test_clear_range_single_line_uses_active_scan() {
        let mut cache = BlockCache::new();
        let doomed = cache
            .insert_active(BasicBlock::new(0x2000_0000, 0x2000_0010))
            .unwrap();
        let survivor = cache
            .insert_active(BasicBlock::new(0x3000_0000, 0x3000_0010))
            .unwrap();

        // A one-word interval the index cannot narrow: the pool-scan branch runs
        cache.clear_range(0x2000_0000, 0x2000_0004);

        assert!(cache.get(doomed).is_none());
        assert!(cache.get(survivor).is_some());
    }

    #[test]
    fn test_clear_range_empty_interval_is_noop() {
        let mut cache = BlockCache::new();
        let handle = cache.insert_active(block(0x8000_0000)).unwrap();

        cache.clear_range(0x8000_0008, 0x8000_0008);
        cache.clear_range(0x8000_0008, 0x8000_0004);

        assert!(cache.get(handle).is_some());
    }

    /// Payload that records how often its invalidation hook ran
    #[derive(Clone)]
    struct HookedBlock {
        pc: u32,
        end: u32,
        invalidations: std::rc::Rc<std::cell::Cell<usize>>,
    }

    impl HookedBlock {
        fn new(pc: u32, end: u32) -> Self {
            Self {
                pc,
                end,
                invalidations: std::rc::Rc::new(std::cell::Cell::new(0)),
            }
        }
    }

    impl CacheableBlock for HookedBlock {
        fn pc(&self) -> u32 {
            self.pc
        }

        fn end(&self) -> u32 {
            self.end
        }

        fn intersect(&self, start: u32, end: u32) -> bool {
            self.pc < end && start < self.end
        }

        fn invalidate(&mut self) {
            self.invalidations.set(self.invalidations.get() + 1);
        }
    }

    #[test]
    fn test_clear_range_runs_invalidate_hook() {
        let mut cache = BlockCache::new();
        let doomed = HookedBlock::new(0x1000, 0x1010);
        let survivor = HookedBlock::new(0x4000, 0x4010);
        let doomed_count = doomed.invalidations.clone();
        let survivor_count = survivor.invalidations.clone();

        cache.insert_active(doomed).unwrap();
        cache.insert_active(survivor).unwrap();

        cache.clear_range(0x1000, 0x2000);

        assert_eq!(doomed_count.get(), 1);
        assert_eq!(survivor_count.get(), 0);
    }

    #[test]
    fn test_remove_and_clear_skip_invalidate_hook() {
        let mut cache = BlockCache::new();
        let first = HookedBlock::new(0x1000, 0x1010);
        let second = HookedBlock::new(0x2000, 0x2010);
        let first_count = first.invalidations.clone();
        let second_count = second.invalidations.clone();

        let handle = cache.insert_active(first).unwrap();
        cache.insert_active(second).unwrap();

        cache.remove(handle);
        cache.clear();

        assert_eq!(first_count.get(), 0);
        assert_eq!(second_count.get(), 0);
    }

    #[test]
    fn test_clear_range_catches_block_starting_before_range() {
        let mut cache = BlockCache::new();

        // A long block whose start is keyed well below the modified range
        let long = cache
            .insert_active(BasicBlock::new(0x1000, 0x1100))
            .unwrap();

        cache.clear_range(0x10F0, 0x1200);

        assert!(cache.get(long).is_none());
        assert!(cache.find(0x1000).is_none());
    }

    #[test]
    fn test_dormant_survives_any_clear_range() {
        let mut cache = BlockCache::new();
        let parked = cache
            .insert_dormant(BasicBlock::new(0x1000, 0x1010))
            .unwrap();

        // Full overlap, partial overlap, whole address space
        cache.clear_range(0x1000, 0x1010);
        cache.clear_range(0x1008, 0x100C);
        cache.clear_range(0, u32::MAX);

        assert!(cache.get(parked).is_some());
        assert_eq!(cache.find(0x1000).map(|b| b.pc()), Some(0x1000));
    }

    #[test]
    fn test_dormant_skipped_in_bucket_chain_walk() {
        let mut cache = BlockCache::new();

        // Same line, same range: one active, one dormant. The multi-line
        // branch walks this chain and must only destroy the active twin.
        let parked = cache
            .insert_dormant(BasicBlock::new(0x1000, 0x1010))
            .unwrap();
        let doomed = cache
            .insert_active(BasicBlock::new(0x1000, 0x1010))
            .unwrap();

        // Spans many lines, so the bucket-chain branch runs
        cache.clear_range(0x0800, 0x1800);

        assert!(cache.get(doomed).is_none());
        assert!(cache.get(parked).is_some());
    }

    #[test]
    fn test_clear_destroys_both_pools_and_resets_index() {
        let mut cache = BlockCache::new();
        let a = cache.insert_active(block(0x8000_0000)).unwrap();
        let d = cache.insert_dormant(block(0x8000_0100)).unwrap();

        cache.clear();

        assert!(cache.is_empty());
        assert_eq!(cache.len(), 0);
        assert!(cache.get(a).is_none());
        assert!(cache.get(d).is_none());

        // Index heads were reset; lookups walk nothing stale
        assert!(cache.fast_find(0x8000_0000).is_none());
        assert!(cache.find(0x8000_0100).is_none());
        assert_eq!(cache.index_report().occupied_lines, 0);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let mut cache: BlockCache<BasicBlock, PooledStrategy> =
            BlockCache::with_strategy(PooledStrategy::new(4));

        // Clearing an empty cache is a no-op
        cache.clear();
        assert!(cache.is_empty());

        cache.insert_active(block(0x8000_0000)).unwrap();
        cache.insert_dormant(block(0x8000_0100)).unwrap();

        cache.clear();
        cache.clear(); // no double release

        // All four slots are available again
        for offset in 0..4u32 {
            cache.insert_active(block(0x8000_0000 + offset * 16)).unwrap();
        }
        assert_eq!(cache.len(), 4);
    }

    #[test]
    fn test_cache_behaves_after_clear() {
        let mut cache = BlockCache::new();
        cache.insert_active(block(0x8000_0000)).unwrap();
        cache.clear();

        let handle = cache.insert_active(block(0x8000_0000)).unwrap();
        assert_eq!(cache.find(0x8000_0000).map(|b| b.pc()), Some(0x8000_0000));
        assert!(cache.get(handle).is_some());
    }

    #[test]
    fn test_pooled_strategy_exhaustion_and_recovery() {
        let mut cache: BlockCache<BasicBlock, PooledStrategy> =
            BlockCache::with_strategy(PooledStrategy::new(2));

        let a = cache.insert_active(block(0x8000_0000)).unwrap();
        cache.insert_active(block(0x8000_0010)).unwrap();

        let err = cache.insert_active(block(0x8000_0020)).unwrap_err();
        assert!(matches!(err, CacheError::CacheFull { capacity: 2 }));

        // Removing one block frees a slot for the retry
        cache.remove(a);
        cache.insert_active(block(0x8000_0020)).unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_collision_scenario() {
        let _ = env_logger::builder().is_test(true).try_init();

        let mut cache = BlockCache::new();
        let near = cache
            .insert_active(BasicBlock::new(0x1000, 0x1008))
            .unwrap();
        let neighbor = cache
            .insert_active(BasicBlock::new(0x1004, 0x100C))
            .unwrap();
        // Collides with the 0x1000 line
        let far = cache
            .insert_active(BasicBlock::new(0x1000 + LINE_STRIDE, 0x1008 + LINE_STRIDE))
            .unwrap();

        assert!(cache.find(0x1000).is_some());
        assert!(cache.find(0x1004).is_some());
        assert!(cache.find(0x1000 + LINE_STRIDE).is_some());

        // Guest modified [0x1000, 0x1008): both overlapping blocks go, the
        // colliding far block stays because its exact range does not overlap
        cache.clear_range(0x1000, 0x1008);

        assert!(cache.get(near).is_none());
        assert!(cache.get(neighbor).is_none());
        assert!(cache.get(far).is_some());
        assert_eq!(
            cache.find(0x1000 + LINE_STRIDE).map(|b| b.pc()),
            Some(0x1000 + LINE_STRIDE)
        );
    }

    #[test]
    fn test_get_mut() {
        let mut cache = BlockCache::new();
        let handle = cache.insert_active(block(0x8000_0000)).unwrap();

        cache.get_mut(handle).unwrap().invalidate();
        assert!(cache.get(handle).unwrap().is_stale());
    }

    #[test]
    fn test_index_report_chain_lengths() {
        let mut cache = BlockCache::new();

        // Three blocks in one line, one block alone in another
        cache.insert_active(block(0x8000_0000)).unwrap();
        cache.insert_active(block(0x8000_0000 + LINE_STRIDE)).unwrap();
        cache
            .insert_active(block(0x8000_0000 + 2 * LINE_STRIDE))
            .unwrap();
        cache.insert_active(block(0x8000_0040)).unwrap();

        let report = cache.index_report();
        assert_eq!(report.occupied_lines, 2);
        assert_eq!(report.min_chain, 1);
        assert_eq!(report.max_chain, 3);
        assert_eq!(report.avg_chain, 2);
    }

    #[test]
    fn test_index_report_empty() {
        let cache: BlockCache<BasicBlock> = BlockCache::new();
        let report = cache.index_report();

        assert_eq!(report.occupied_lines, 0);
        assert_eq!(report.min_chain, 0);
        assert_eq!(report.max_chain, 0);
        assert_eq!(report.avg_chain, 0);
    }

    #[test]
    fn test_print_statistics_smoke() {
        let _ = env_logger::builder().is_test(true).try_init();

        let mut cache = BlockCache::new();
        cache.insert_active(block(0x8000_0000)).unwrap();
        cache.find(0x8000_0000);
        cache.find(0x9000_0000);
        cache.print_statistics();
    }

    #[cfg(feature = "stats")]
    #[test]
    fn test_fault_counting() {
        let mut cache: BlockCache<BasicBlock> = BlockCache::new();

        for offset in 0..10u32 {
            assert!(cache.find(0x8000_0000 + offset * 4).is_none());
        }

        let stats = cache.search_stats();
        assert_eq!(stats.lookups, 10);
        assert_eq!(stats.faults, 10);
        assert_eq!(stats.head_hits, 0);
        assert_eq!(stats.scan_hits, 0);
    }

    #[cfg(feature = "stats")]
    #[test]
    fn test_hit_counting_by_kind() {
        let mut cache = BlockCache::new();
        let pc_a = 0x8000_0000;
        let pc_b = pc_a + LINE_STRIDE;

        cache.insert_active(block(pc_a)).unwrap();
        cache.insert_active(block(pc_b)).unwrap();

        cache.find(pc_b); // head hit
        cache.find(pc_a); // scan hit, raised
        cache.find(pc_a); // head hit after the raise
        cache.find(0x4000_0000); // fault

        let stats = cache.search_stats();
        assert_eq!(stats.lookups, 4);
        assert_eq!(stats.head_hits, 2);
        assert_eq!(stats.scan_hits, 1);
        assert_eq!(stats.faults, 1);
    }

    #[cfg(feature = "stats")]
    #[test]
    fn test_fast_find_does_not_count() {
        let mut cache = BlockCache::new();
        cache.insert_active(block(0x8000_0000)).unwrap();

        cache.fast_find(0x8000_0000);
        cache.fast_find(0x9000_0000);

        assert_eq!(cache.search_stats().lookups, 0);
    }

    #[cfg(feature = "stats")]
    #[test]
    fn test_print_statistics_resets_counters() {
        let mut cache = BlockCache::new();
        cache.insert_active(block(0x8000_0000)).unwrap();
        cache.find(0x8000_0000);

        cache.print_statistics();
        assert_eq!(cache.search_stats(), SearchStats::default());
    }

    proptest! {
        #[test]
        fn prop_every_inserted_block_is_found(
            offsets in proptest::collection::hash_set(0u32..4096, 1..64)
        ) {
            let mut cache = BlockCache::new();
            let pcs: Vec<u32> = offsets
                .into_iter()
                .map(|offset| 0x8000_0000 + offset * 4)
                .collect();

            for &pc in &pcs {
                cache.insert_active(BasicBlock::new(pc, pc + 4)).unwrap();
            }
            for &pc in &pcs {
                prop_assert_eq!(cache.find(pc).map(|b| b.pc()), Some(pc));
            }
            prop_assert_eq!(cache.len(), pcs.len());
        }

        #[test]
        fn prop_raise_makes_fast_find_succeed(
            offsets in proptest::collection::hash_set(0u32..16, 2..8)
        ) {
            // All blocks collide in one line (stride = line count * 4)
            let mut cache = BlockCache::new();
            let pcs: Vec<u32> = offsets
                .into_iter()
                .map(|offset| 0x1000 + offset * (1 << 17))
                .collect();

            for &pc in &pcs {
                cache.insert_active(BasicBlock::new(pc, pc + 4)).unwrap();
            }
            for &pc in &pcs {
                prop_assert!(cache.find(pc).is_some());
                prop_assert!(cache.fast_find(pc).is_some());
            }
        }

        #[test]
        fn prop_clear_range_matches_naive_model(
            offsets in proptest::collection::hash_set(0u32..1024, 1..48),
            write_start in 0u32..5000,
            write_len in 1u32..512,
        ) {
            let mut cache = BlockCache::new();
            let write_end = write_start + write_len;

            let mut handles = Vec::new();
            for offset in offsets {
                let pc = offset * 4;
                let blk = BasicBlock::new(pc, pc + 16);
                let handle = cache.insert_active(blk.clone()).unwrap();
                handles.push((handle, blk));
            }

            cache.clear_range(write_start, write_end);

            for (handle, blk) in handles {
                let overlaps = blk.pc() < write_end && write_start < blk.end();
                prop_assert_eq!(
                    cache.get(handle).is_none(),
                    overlaps,
                    "block 0x{:X}..0x{:X} vs write 0x{:X}..0x{:X}",
                    blk.pc(), blk.end(), write_start, write_end
                );
            }
        }

        #[test]
        fn prop_dormant_pool_is_isolated(
            offsets in proptest::collection::hash_set(0u32..1024, 1..32),
            write_start in 0u32..5000,
            write_len in 1u32..512,
        ) {
            let mut cache = BlockCache::new();
            let mut handles = Vec::new();
            for offset in offsets {
                let pc = offset * 4;
                let handle = cache
                    .insert_dormant(BasicBlock::new(pc, pc + 16))
                    .unwrap();
                handles.push(handle);
            }
            // A live active block so the invalidation walk actually runs
            cache
                .insert_active(BasicBlock::new(0x0100_0000, 0x0100_0010))
                .unwrap();

            cache.clear_range(write_start, write_start + write_len);

            for handle in &handles {
                prop_assert!(cache.get(*handle).is_some());
            }
            cache.clear();
            for handle in &handles {
                prop_assert!(cache.get(*handle).is_none());
            }
        }
    }
}
