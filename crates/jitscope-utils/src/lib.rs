//! # jitscope utilities
//!
//! Shared logging setup for the jitscope binaries.
//!
//! The library crate (`jitscope-core`) only emits `tracing` events; binaries
//! call one of the initialisers here to decide where those events go.

pub mod logging;

// Re-export commonly used logging functions for convenience
pub use logging::{
    init_logging, init_logging_to_file, init_logging_with_level, LogFormat, LogLevel, LoggingError, LoggingGuard,
};
pub use tracing::{debug, error, info, trace, warn};
