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

//! Cache configuration
//!
//! Embedders usually hard-code their cache sizing, but interactive frontends
//! want it in the same TOML file as the rest of their emulator settings, so
//! the configuration is a plain serde type loadable from disk.
//!
//! # Example
//!
//! ```
//! use tbcache::core::config::CacheConfig;
//!
//! let config: CacheConfig = toml::from_str("block_capacity = 8192").unwrap();
//! assert_eq!(config.block_capacity, 8192);
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core::error::Result;

/// Sizing knobs for a translation block cache
///
/// Only the bounded [`PooledStrategy`](crate::core::cache::alloc::PooledStrategy)
/// consumes the capacity; the unbounded heap strategy ignores configuration
/// entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of simultaneously live blocks for pooled strategies
    pub block_capacity: usize,
}

impl CacheConfig {
    /// Default pooled-strategy capacity (16K blocks)
    ///
    /// Sized for a full guest program working set; a typical interpreter
    /// touches a few thousand distinct basic blocks between flushes.
    pub const DEFAULT_BLOCK_CAPACITY: usize = 16 * 1024;

    /// Load a configuration from a TOML file
    ///
    /// Missing fields fall back to their defaults, so a partial (or empty)
    /// file is valid.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::ConfigIo`](crate::CacheError::ConfigIo) if the
    /// file cannot be read and [`CacheError::ConfigParse`](crate::CacheError::ConfigParse)
    /// if it is not valid TOML for this type.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = toml::from_str(&text)?;
        Ok(config)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            block_capacity: Self::DEFAULT_BLOCK_CAPACITY,
        }
    }
}
