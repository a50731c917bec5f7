//! Tessera Core
//!
//! Collections, logging and profiling shared by the tessera crates.

pub mod alloc;
pub mod logging;
pub mod profiling;
