//! Directory listing entries
//!
//! A [`FileEntry`] is one row of a directory listing from either the
//! canonical tree or the mirror tree. Entries are never persisted; every
//! reconciliation walk recomputes them from a live listing.
//!
//! Name comparison is NFC-normalized: macOS-backed mirrors report decomposed
//! (NFD) names while the canonical store keeps whatever the author typed, so
//! visually-identical names must compare equal or every walk would re-upload
//! unchanged files.

use chrono::{DateTime, Utc};
use unicode_normalization::UnicodeNormalization;

/// One entry of a directory listing (canonical or mirror side).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Entry name within its directory (no path separators)
    pub name: String,
    /// Size in bytes (0 for directories)
    pub size: u64,
    /// Whether the entry is a directory
    pub is_directory: bool,
    /// Last modification time, when the lister could produce one
    pub mtime: Option<DateTime<Utc>>,
}

impl FileEntry {
    /// Creates a file entry.
    pub fn file(name: impl Into<String>, size: u64, mtime: Option<DateTime<Utc>>) -> Self {
        Self {
            name: name.into(),
            size,
            is_directory: false,
            mtime,
        }
    }

    /// Creates a directory entry.
    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: 0,
            is_directory: true,
            mtime: None,
        }
    }

    /// The entry name in NFC form, used as the comparison key between trees.
    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }

    /// Returns true when `other` names the same entry (NFC comparison).
    pub fn same_name(&self, other: &FileEntry) -> bool {
        self.normalized_name() == other.normalized_name()
    }
}

/// NFC-normalizes an entry name for cross-filesystem comparison.
pub fn normalize_name(name: &str) -> String {
    name.nfc().collect()
}
