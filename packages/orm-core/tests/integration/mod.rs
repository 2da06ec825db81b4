//! Integration test suite.
//!
//! Sections:
//! 1. Unit of work scenarios over the in-memory driver
//! 2. Lifecycle hook ordering
//! 3. Lazy loading and batch fetch round-trips
//! 4. Concurrent sessions
//! 5. Configuration and schema files

pub mod concurrency_tests;
pub mod config_tests;
pub mod helpers;
pub mod lazy_batch_tests;
pub mod lifecycle_tests;
pub mod scenario_tests;
