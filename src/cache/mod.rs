//! Persistent install cache
//!
//! A content-addressed store keeping the last installed compiler binary.
//! The installer uses a single fixed key; the entry metadata records which
//! `<version>-<os>-<arch>` the binary belongs to, so a version change is a
//! metadata mismatch rather than a different key.

pub mod store;

pub use store::{CacheStore, EntryMetadata, FsCacheStore, IndexEntry, VerifyStats};

/// Key the installed binary is stored under
pub const CACHE_KEY: &str = "purs-install:binary";

/// Format bytes as human-readable size (e.g., "1.5 MB")
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
