pub mod catalog;
pub mod config;
pub mod error;
pub mod llm;
pub mod logging;
pub mod pipeline;
pub mod prompt;
pub mod query_runner;
pub mod safety;
pub mod schema_rag;
pub mod server;
pub mod sql_extractor;

// Database module for SQLite
pub mod db;

pub use error::{GenerationError, Nl2SqlError, Result};
