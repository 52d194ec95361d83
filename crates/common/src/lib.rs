//! Attendance Common Library
//!
//! Shared code for the attendance engine and gateway including:
//! - Database models, the store boundary and its backends
//! - Error types and handling
//! - Configuration management
//! - Authentication utilities
//! - Metrics and observability
//! - A swappable clock

pub mod auth;
pub mod clock;
pub mod config;
pub mod db;
pub mod errors;
pub mod metrics;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AppConfig;
pub use db::{AttendanceStore, MemoryStore, Repository};
pub use errors::{AppError, Result};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
