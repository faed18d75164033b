pub mod backend;
pub mod config;
pub mod error;
pub mod event;
pub mod git;
pub mod session;
pub mod usage;
pub mod workspace;

// Re-export common error type
pub use error::{AionError, Result};
