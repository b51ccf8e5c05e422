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

//! Basic block payloads
//!
//! The cache stores whatever the translator produces; it only needs three
//! capabilities from a payload, captured by [`CacheableBlock`]:
//!
//! - a starting guest program counter, used to derive the hash key
//! - an exact range-overlap test against a modified guest memory interval
//! - an invalidation hook, called before a block is destroyed by range
//!   invalidation so the payload can release translation resources or mark
//!   itself stale for any other referencer
//!
//! [`BasicBlock`] is the reference payload used by the tests, benchmarks and
//! embedders that do not carry translator state of their own.

use crate::core::cache::CacheableBlock;

bitflags::bitflags! {
    /// Attributes the translator records about a basic block
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BlockFlags: u32 {
        /// Block ends with a branch or jump instruction
        const ENDS_IN_BRANCH = 1 << 0;
        /// Block contains a system call or trap instruction
        const HAS_SYSCALL = 1 << 1;
        /// Block lies in memory that has been observed to be written at runtime
        const SELF_MODIFY_WATCH = 1 << 2;
    }
}

/// A translated run of guest instructions
///
/// Covers the half-open guest address interval `[pc, end)`. Instructions are
/// word-sized, so `(end - pc) / 4` is the instruction count.
///
/// # Example
///
/// ```
/// use tbcache::core::block::BasicBlock;
///
/// let block = BasicBlock::new(0x8000_0000, 0x8000_0010);
/// assert_eq!(block.pc(), 0x8000_0000);
/// assert_eq!(block.instruction_count(), 4);
/// assert!(!block.is_stale());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    /// Guest address of the first instruction
    pc: u32,
    /// Guest address one past the last instruction byte
    end: u32,
    /// Translator-recorded attributes
    flags: BlockFlags,
    /// Set once the block has been invalidated
    stale: bool,
}

impl BasicBlock {
    /// Bytes per guest instruction (fixed-width ISA)
    const INSTRUCTION_SIZE: u32 = 4;

    /// Create a block covering `[pc, end)`
    ///
    /// `end` must be strictly greater than `pc`; a block always contains at
    /// least one instruction.
    pub fn new(pc: u32, end: u32) -> Self {
        debug_assert!(end > pc, "basic block must cover at least one byte");
        Self {
            pc,
            end,
            flags: BlockFlags::empty(),
            stale: false,
        }
    }

    /// Create a block with translator-recorded attributes
    pub fn with_flags(pc: u32, end: u32, flags: BlockFlags) -> Self {
        let mut block = Self::new(pc, end);
        block.flags = flags;
        block
    }

    /// Guest address of the first instruction
    #[inline(always)]
    pub fn pc(&self) -> u32 {
        self.pc
    }

    /// Guest address one past the end of the block
    #[inline(always)]
    pub fn end(&self) -> u32 {
        self.end
    }

    /// Number of guest instructions covered by this block
    pub fn instruction_count(&self) -> u32 {
        (self.end - self.pc) / Self::INSTRUCTION_SIZE
    }

    /// Translator-recorded attributes
    pub fn flags(&self) -> BlockFlags {
        self.flags
    }

    /// Whether the block has been invalidated
    ///
    /// A stale block must not be dispatched; the guest memory it was
    /// translated from has been modified.
    pub fn is_stale(&self) -> bool {
        self.stale
    }
}

impl CacheableBlock for BasicBlock {
    #[inline(always)]
    fn pc(&self) -> u32 {
        self.pc
    }

    #[inline(always)]
    fn end(&self) -> u32 {
        self.end
    }

    /// Exact overlap test between `[self.pc, self.end)` and `[start, end)`
    #[inline(always)]
    fn intersect(&self, start: u32, end: u32) -> bool {
        self.pc < end && start < self.end
    }

    fn invalidate(&mut self) {
        log::trace!(
            "invalidating block 0x{:08X}..0x{:08X}",
            self.pc,
            self.end
        );
        self.stale = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_new() {
        let block = BasicBlock::new(0x8000_0000, 0x8000_0020);
        assert_eq!(block.pc(), 0x8000_0000);
        assert_eq!(block.end(), 0x8000_0020);
        assert_eq!(block.instruction_count(), 8);
        assert_eq!(block.flags(), BlockFlags::empty());
        assert!(!block.is_stale());
    }

    #[test]
    fn test_block_with_flags() {
        let block = BasicBlock::with_flags(
            0x8000_0000,
            0x8000_0008,
            BlockFlags::ENDS_IN_BRANCH | BlockFlags::HAS_SYSCALL,
        );
        assert!(block.flags().contains(BlockFlags::ENDS_IN_BRANCH));
        assert!(block.flags().contains(BlockFlags::HAS_SYSCALL));
        assert!(!block.flags().contains(BlockFlags::SELF_MODIFY_WATCH));
    }

    #[test]
    fn test_intersect_overlapping() {
        let block = BasicBlock::new(20, 30);

        // Partial overlap from either side
        assert!(block.intersect(25, 45));
        assert!(block.intersect(10, 25));

        // Fully contained / fully containing
        assert!(block.intersect(22, 28));
        assert!(block.intersect(0, 100));
    }

    #[test]
    fn test_intersect_disjoint() {
        let block = BasicBlock::new(20, 30);

        assert!(!block.intersect(0, 10));
        assert!(!block.intersect(40, 50));

        // Half-open intervals: touching ranges do not overlap
        assert!(!block.intersect(30, 40));
        assert!(!block.intersect(10, 20));
    }

    #[test]
    fn test_intersect_single_byte_write() {
        let block = BasicBlock::new(0x1000, 0x1008);

        assert!(block.intersect(0x1000, 0x1001));
        assert!(block.intersect(0x1007, 0x1008));
        assert!(!block.intersect(0x1008, 0x1009));
    }

    #[test]
    fn test_invalidate_marks_stale() {
        let mut block = BasicBlock::new(0x8000_0000, 0x8000_0004);
        assert!(!block.is_stale());

        block.invalidate();
        assert!(block.is_stale());
    }
}
