//! Integration tests for stagehand.
//!
//! These tests exercise the public API end to end:
//! - Resolution: ordering, cycles, phantom dependencies and subsets
//! - Parallel loading: group ordering, concurrency bounds, failure containment
//! - Orchestration: lifecycle, fallback mode and the shared activation cache
//! - On-disk projects: registry files, directory scans and manifest commands

mod orchestration;
mod parallel_loading;
mod resolution;
