//! # Remusys conditional elimination
//!
//! A sea-of-nodes graph with scoped mutation tracking, and the phase that
//! drives dominator-based conditional elimination to a fixed point.
//!
//! Copyright (c) 2025 Medi H.B.T.

pub mod ir;
pub mod opt;
pub mod testing;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const AUTHOR: &str = env!("CARGO_PKG_AUTHORS");
