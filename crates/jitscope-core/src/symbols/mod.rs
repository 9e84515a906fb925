//! # Symbols
//!
//! Name handling for the debuggee's code:
//!
//! - [`demangle`]: readable names for C++, Rust and linker stub symbols
//! - [`SymbolResolver`]: where a named symbol lives in the debuggee, used to
//!   find the global debug descriptor
//!
//! Full symbolication (addresses to function names and source lines) is out
//! of scope; callers combine [`LoadedObject`](crate::loaded::LoadedObject)
//! images with their own DWARF tooling for that.

mod demangle;
mod resolver;

pub use demangle::{demangle, LINKER_PREFIX};
pub use resolver::{ElfFileResolver, SymbolResolver};
