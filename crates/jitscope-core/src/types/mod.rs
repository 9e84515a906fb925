//! # Types
//!
//! Platform-agnostic types used throughout jitscope.
//!
//! These types let the scanner, register files and memory views talk about
//! "process ID", "address" and "architecture" without caring whether the
//! debuggee is the current process or a remote one.

pub mod address;
pub mod process;

// Re-export all public types
pub use address::Address;
pub use process::{Architecture, ProcessId};
