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

//! Arena entries and intrusive link bookkeeping
//!
//! Every resident block occupies one arena slot and belongs to exactly one
//! hash-index bucket chain and exactly one pool list. Both memberships use
//! the same discipline: a forward handle to the next entry plus a
//! back-reference naming the *slot* that points at this entry (a list head
//! or a predecessor's forward field). Unlinking rewrites that slot directly,
//! so removal never traverses a chain.

/// Stable arena index identifying one resident cache entry
///
/// Handles are returned by the insert operations and stay valid until the
/// entry is removed, range-invalidated, or the cache is cleared. Using a
/// handle after that point is a caller bug; accessors treat stale handles as
/// absent entries rather than touching recycled storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockHandle(pub(crate) u32);

impl BlockHandle {
    #[inline(always)]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Lifecycle pool a block was inserted into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pool {
    /// Normal pool; eligible for range invalidation
    Active,
    /// Parked pool; only destroyed by a full clear or direct removal
    Dormant,
}

/// The slot referencing an entry from within its bucket chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LineSlot {
    /// Head slot of the given hash-index line
    Head(usize),
    /// `line_next` field of a predecessor entry
    Entry(BlockHandle),
}

/// The slot referencing an entry from within its pool list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PoolSlot {
    /// Head of the active pool list
    ActiveHead,
    /// Head of the dormant pool list
    DormantHead,
    /// `pool_next` field of a predecessor entry
    Entry(BlockHandle),
}

/// One arena slot: the payload plus both sets of intrusive links
///
/// `None` link fields mean "not linked on this axis". A freshly created
/// entry is unlinked on both axes until the cache wires it in.
pub(crate) struct Entry<B> {
    pub(crate) block: B,
    pub(crate) pool: Pool,
    pub(crate) line_next: Option<BlockHandle>,
    pub(crate) line_prev: Option<LineSlot>,
    pub(crate) pool_next: Option<BlockHandle>,
    pub(crate) pool_prev: Option<PoolSlot>,
}

impl<B> Entry<B> {
    pub(crate) fn new(block: B, pool: Pool) -> Self {
        Self {
            block,
            pool,
            line_next: None,
            line_prev: None,
            pool_next: None,
            pool_prev: None,
        }
    }
}
