//! # jitscope-core
//!
//! Discovery of dynamically generated code in live processes.
//!
//! Runtimes that JIT-compile code advertise the resulting ELF images through
//! a global debug descriptor. This crate finds that descriptor, walks it
//! coherently while the runtime keeps changing it, and hands out buffered,
//! validated copies of the images, together with the pieces an unwinder needs
//! around them:
//!
//! - Memory views over the current process, a remote process, or a buffer
//! - Process control (attach, quiesce, detach, wait)
//! - Register files for x86, x86_64, arm, arm64 and riscv64, including
//!   signal frame recognition
//! - Symbol demangling and descriptor symbol lookup
//!
//! ## Platform Support
//!
//! - **Linux / Android**: `ptrace`, `process_vm_readv` and `/proc`
//! - Buffer-backed memory views, demangling and descriptor decoding work on
//!   any host
//!
//! ## Why unsafe code is needed
//!
//! Reading registers with `PTRACE_GETREGSET`, `PTRACE_LISTEN` (which `nix`
//! does not wrap) and direct loads from proven-mapped local memory go through
//! raw system interfaces. Each use is wrapped in a safe function.

#![allow(unsafe_code)] // Required for ptrace requests nix does not wrap

pub mod error;
pub mod global_debug;
pub mod loaded;
pub mod maps;
pub mod memory;
pub mod prelude;
pub mod process;
pub mod registers;
pub mod symbols;
pub mod types;

// Re-export commonly used types
pub use error::{JitscopeError, Result};
pub use global_debug::{GlobalDebugScanner, RefreshStatus, ScannerConfig};
pub use loaded::LoadedObject;
pub use memory::MemoryView;
pub use types::{Address, Architecture, ProcessId};
