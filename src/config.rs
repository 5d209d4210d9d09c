//! Typed configuration lookup (`spec.md` §6 "Configuration keys consulted").
//!
//! The source keeps configuration as a flat, process-wide key-value table
//! with the partition/column name folded into the key itself (e.g.
//! `orders.price.index`). This crate keeps that shape instead of inventing
//! a hierarchical config type, and adds one typed accessor per key
//! `spec.md` §6 names so callers never touch raw strings.

use std::collections::HashMap;

/// Flat key-value configuration, consulted by [`crate::factory::create`]
/// for backing-store preference and default index specs.
#[derive(Debug, Clone, Default)]
pub struct Config {
    entries: HashMap<String, String>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|s| s.as_str())
    }

    fn get_bool(&self, key: &str) -> bool {
        matches!(self.get(key), Some("1") | Some("true") | Some("yes") | Some("on"))
    }

    /// `<column>.preferMMapIndex`.
    pub fn prefer_mmap_index(&self, column: &str) -> bool {
        self.get_bool(&format!("{column}.preferMMapIndex"))
    }

    /// `<column>.preferReadIndex`.
    pub fn prefer_read_index(&self, column: &str) -> bool {
        self.get_bool(&format!("{column}.preferReadIndex"))
    }

    /// `<column>.index`.
    pub fn column_index_spec(&self, column: &str) -> Option<&str> {
        self.get(&format!("{column}.index"))
    }

    /// `<partition>.indexSpec`.
    pub fn partition_index_spec(&self, partition: &str) -> Option<&str> {
        self.get(&format!("{partition}.indexSpec"))
    }

    /// `uncompressAll`.
    pub fn uncompress_all(&self) -> bool {
        self.get_bool("uncompressAll")
    }

    /// `uncompressLargeBitvector`: decompress bitvectors with
    /// `bytes() > N/24`.
    pub fn uncompress_large_bitvector(&self) -> bool {
        self.get_bool("uncompressLargeBitvector")
    }

    /// Resolves an index spec with `spec.md` §4.7 step 2 precedence:
    /// per-column, then per-partition, then the process default passed by
    /// the caller.
    pub fn resolve_index_spec<'a>(&'a self, partition: &str, column: &str, process_default: &'a str) -> &'a str {
        self.column_index_spec(column)
            .or_else(|| self.partition_index_spec(partition))
            .unwrap_or(process_default)
    }
}
