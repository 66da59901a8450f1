#![forbid(unsafe_code)]
//! Fixed-size page storage with a bounded write-back cache.

mod meta;
mod pager;
mod stream;

pub use meta::{Meta, META_LEN};
pub use pager::{Page, PagedFile, PagerOptions, PagerStats};
pub use stream::PageIOStream;
