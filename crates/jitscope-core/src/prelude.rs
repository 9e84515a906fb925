//! Common module for library exports

pub use crate::error::{JitscopeError, Result};
pub use crate::global_debug::{
    DescriptorLocator, FixedLocation, GlobalDebugScanner, MapsLocator, RefreshStats, RefreshStatus, ScannerConfig,
};
pub use crate::loaded::LoadedObject;
pub use crate::maps::{Maps, ProcMaps};
pub use crate::memory::{LocalMemory, MemoryView, RemoteMemory, Snapshot};
pub use crate::process::{ControlTimeouts, PidRun, ProcessControl, ProcessState};
pub use crate::registers::RegisterFile;
pub use crate::symbols::demangle;
pub use crate::types::address::Address;
pub use crate::types::process::{Architecture, ProcessId};
