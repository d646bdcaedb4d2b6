//! Analytical store access
//!
//! SQLite connection pools (read-only for serving, writable for seeding)
//! and the demo data generator.

pub mod connection;
pub mod seed;

pub use connection::{init_pool, init_read_only_pool, DbPool};
pub use seed::{seed_example_data, SeedSummary};
