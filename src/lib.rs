#![forbid(unsafe_code)]

//! Library crate backing the reelfolio binaries: a small gallery API for a
//! videographer portfolio site plus the matching client-side data adapter.

pub mod client;
pub mod config;
pub mod service;
pub mod store;
