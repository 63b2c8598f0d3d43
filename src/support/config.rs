//-
// Copyright (c) 2020, Jason Lingle
//
// This file is part of Mailcache.
//
// Mailcache is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Mailcache is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for
// more details.
//
// You should have received a copy of the GNU General Public License along
// with Mailcache. If not, see <http://www.gnu.org/licenses/>.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::support::compression::Compression;
use crate::support::error::Error;

/// Tunables for the message-metadata cache.
///
/// This is normally embedded in the application's configuration file. Every
/// field has a usable default, so an empty TOML table is a valid
/// configuration.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// The number of messages stored per cache slice.
    ///
    /// Smaller slices reduce the amount of data moved per cache access at
    /// the cost of more keys in the backing store. Backends with small
    /// value-size limits (memcached slabs, for example) want something on
    /// the order of 25.
    pub slice_size: u32,
    /// Slices (other than the one currently being filled) holding fewer
    /// than this many live records after deletions are merged into the
    /// newest slice instead of being rewritten in place.
    pub compaction_threshold: usize,
    /// Lifetime, in seconds, for entries written to the backing store. 0
    /// means entries do not expire on their own.
    pub lifetime: u64,
    /// The compression scheme applied to each record within a slice.
    pub compression: Compression,
    /// Hard cap on the length, in characters, of cached preview text. 0
    /// defers entirely to the preference source.
    pub preview_length: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            slice_size: 100,
            compaction_threshold: 5,
            lifetime: 0,
            compression: Compression::DEFAULT_FOR_RECORDS,
            preview_length: 0,
        }
    }
}

impl CacheConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, Error> {
        Ok(toml::from_str(text)?)
    }

    /// The store lifetime as a `Duration`, if entries expire at all.
    pub fn store_lifetime(&self) -> Option<Duration> {
        if 0 == self.lifetime {
            None
        } else {
            Some(Duration::from_secs(self.lifetime))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_table_is_a_valid_config() {
        let config = CacheConfig::from_toml("").unwrap();
        assert_eq!(100, config.slice_size);
        assert_eq!(5, config.compaction_threshold);
        assert_eq!(None, config.store_lifetime());
        assert_eq!(Compression::Zstd, config.compression);
    }

    #[test]
    fn overrides_parse() {
        let config =
            CacheConfig::from_toml("slice_size = 25\nlifetime = 86400\n")
                .unwrap();
        assert_eq!(25, config.slice_size);
        assert_eq!(Some(Duration::from_secs(86400)), config.store_lifetime());
    }
}
