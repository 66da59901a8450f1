use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::primitives::pager::PagerOptions;
use crate::storage::index::SplitScheme;
use crate::types::page::{MAX_PAGE_SIZE, MIN_PAGE_SIZE};
use crate::types::{Limits, Result, TraceError};

/// Settings of a trace database.
///
/// Every field has a default, so a TOML file only needs the keys it
/// changes. Page size, node id, limits and split schemes are persisted and
/// must match when a file is reopened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// Size of every page in bytes.
    pub page_size: u32,
    /// Memory budget of the page cache.
    pub cache_bytes: usize,
    /// Events held back by the reordering buffer.
    pub reorder_capacity: usize,
    /// Storage node id embedded in internal pointers.
    pub node_id: u32,
    /// Id-space widths.
    pub limits: Limits,
    /// How object ids are split across indexes.
    pub object_split: SplitScheme,
    /// How array indexes are split across indexes.
    pub array_index_split: SplitScheme,
    /// Entries kept by the range-count cache; 0 disables it.
    pub count_cache_entries: usize,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            page_size: crate::types::page::DEFAULT_PAGE_SIZE,
            cache_bytes: 64 << 20,
            reorder_capacity: 1024,
            node_id: 0,
            limits: Limits::default(),
            object_split: SplitScheme::Interleave { parts: 2 },
            array_index_split: SplitScheme::Mask { bits: 16, parts: 2 },
            count_cache_entries: 256,
        }
    }
}

impl DbConfig {
    /// Tiny pages and cache; every structure crosses pages quickly.
    pub fn small_pages() -> Self {
        Self {
            page_size: 512,
            cache_bytes: 64 * 512,
            reorder_capacity: 64,
            ..Self::default()
        }
    }

    /// Large pages, a large cache and a wide reordering window for bulk
    /// loads.
    pub fn bulk() -> Self {
        Self {
            page_size: 16 * 1024,
            cache_bytes: 512 << 20,
            reorder_capacity: 16 * 1024,
            count_cache_entries: 4096,
            ..Self::default()
        }
    }

    /// Sets the page size in bytes.
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Sets the page cache budget.
    pub fn cache_bytes(mut self, cache_bytes: usize) -> Self {
        self.cache_bytes = cache_bytes;
        self
    }

    /// Sets the reordering window.
    pub fn reorder_capacity(mut self, capacity: usize) -> Self {
        self.reorder_capacity = capacity;
        self
    }

    /// Sets the storage node id used in external pointers.
    pub fn node_id(mut self, node_id: u32) -> Self {
        self.node_id = node_id;
        self
    }

    /// Sets the on-disk field widths.
    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Sets how object ids are split across indexes.
    pub fn object_split(mut self, scheme: SplitScheme) -> Self {
        self.object_split = scheme;
        self
    }

    /// Sets how array indexes are split across indexes.
    pub fn array_index_split(mut self, scheme: SplitScheme) -> Self {
        self.array_index_split = scheme;
        self
    }

    /// Sets the number of cached counts; 0 disables the cache.
    pub fn count_cache_entries(mut self, entries: usize) -> Self {
        self.count_cache_entries = entries;
        self
    }

    /// Parses a TOML document and validates the result.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|err| TraceError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|err| TraceError::Config(format!("failed to read {}: {err}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Renders the settings as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|err| TraceError::Config(err.to_string()))
    }

    /// Checks page size bounds, limit widths and split schemes.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&self.page_size) || !self.page_size.is_power_of_two() {
            return Err(TraceError::Config(format!(
                "page size {} must be a power of two within {MIN_PAGE_SIZE}..={MAX_PAGE_SIZE}",
                self.page_size
            )));
        }
        if u64::from(self.page_size) > 1u64 << self.limits.slot_bits.min(63) {
            // a page can hold at most one record per byte
            return Err(TraceError::Config(format!(
                "slot width of {} bits cannot address a {}-byte page",
                self.limits.slot_bits, self.page_size
            )));
        }
        self.limits.validate()?;
        self.object_split.validate()?;
        self.array_index_split.validate()?;
        if self.reorder_capacity == 0 {
            return Err(TraceError::Config("reorder capacity must be positive".into()));
        }
        Ok(())
    }

    pub(crate) fn pager_options(&self) -> PagerOptions {
        PagerOptions::default()
            .page_size(self.page_size)
            .cache_bytes(self.cache_bytes)
            .limits(self.limits)
            .node_id(self.node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_validate() {
        for config in [DbConfig::default(), DbConfig::small_pages(), DbConfig::bulk()] {
            assert!(config.validate().is_ok(), "{config:?}");
        }
    }

    #[test]
    fn partial_toml_keeps_defaults() -> Result<()> {
        let config = DbConfig::from_toml_str(
            r#"
            page_size = 1024
            reorder_capacity = 50

            [limits]
            thread_bits = 20

            [object_split]
            scheme = "mask"
            bits = 24
            parts = 2
            "#,
        )?;
        assert_eq!(config.page_size, 1024);
        assert_eq!(config.reorder_capacity, 50);
        assert_eq!(config.limits.thread_bits, 20);
        assert_eq!(config.limits.behavior_bits, Limits::default().behavior_bits);
        assert_eq!(config.object_split, SplitScheme::Mask { bits: 24, parts: 2 });
        assert_eq!(config.node_id, 0);
        Ok(())
    }

    #[test]
    fn toml_roundtrip() -> Result<()> {
        let config = DbConfig::small_pages().node_id(3).count_cache_entries(0);
        let text = config.to_toml_string()?;
        assert_eq!(DbConfig::from_toml_str(&text)?, config);
        Ok(())
    }

    #[test]
    fn bad_settings_are_rejected() {
        assert!(DbConfig::default().page_size(1000).validate().is_err());
        assert!(DbConfig::default().page_size(128).validate().is_err());
        assert!(DbConfig::default().reorder_capacity(0).validate().is_err());
        assert!(DbConfig::default()
            .object_split(SplitScheme::Mask { bits: 40, parts: 2 })
            .validate()
            .is_err());
        assert!(DbConfig::default()
            .limits(Limits::default().with_slot_bits(4))
            .validate()
            .is_err());
        assert!(DbConfig::from_toml_str("page_size = \"big\"").is_err());
    }
}
