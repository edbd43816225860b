//! Crawl run lifecycle and post-run evaluation
//!
//! This module handles:
//! - The per-run resources shared by cache and scheduler (`RunContext`)
//! - Run counters (`RunStats`)
//! - Deciding whether a finished run is acceptable (`evaluate`)

mod context;
mod evaluate;
mod stats;

pub use context::RunContext;
pub use evaluate::{evaluate, PolicyError};
pub use stats::{RunStats, FINISHED, MISSING_REQUIRED_FIELDS};
