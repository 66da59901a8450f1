//! Low-level building blocks of the storage engine.
//!
//! Includes typed byte codecs, positioned file I/O and the paged file.

/// Typed field codecs and the delta key code.
pub mod bytes;

/// Positioned file I/O backends.
pub mod io;

/// Fixed-size pages, the page cache and the page cursor.
pub mod pager;
