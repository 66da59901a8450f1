#![forbid(unsafe_code)]

//! Trace database facade: configuration, ingestion and queries over one
//! storage node.

mod config;
mod tracedb;

#[cfg(test)]
mod tests;

pub use config::DbConfig;
pub use tracedb::{DbStats, TraceDb};
