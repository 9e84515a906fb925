//! # Maps
//!
//! Loaded modules of a debuggee, as needed to find the descriptor symbol.
//!
//! Raw mappings come from `/proc/<pid>/maps` (through `procfs`) or from a
//! caller-supplied list. Consecutive file-backed mappings of the same file
//! are grouped into one [`Module`]:
//!
//! ```text
//! 7f00000000-7f00010000 r--p 00000000  /apex/com.android.art/lib64/libart.so
//! 7f00010000-7f00400000 r-xp 00010000  /apex/com.android.art/lib64/libart.so   } one Module
//! 7f00400000-7f00410000 rw-p 00400000  /apex/com.android.art/lib64/libart.so
//! 7f00410000-7f00420000 rw-p 00000000  [anon:.bss]
//! ```
//!
//! ## Library filters
//!
//! A module matches a library filter when the final component of its path
//! equals one of the filter strings exactly (`libart.so` matches
//! `/apex/.../libart.so`, but not `libart.so.1` or `libartd.so`). An empty
//! filter matches every file-backed module.

use std::fmt;
use std::path::{Path, PathBuf};

use procfs::process::{MMPermissions, MMapPath, Process};
use smallvec::SmallVec;
use tracing::trace;

use crate::error::{JitscopeError, Result};
use crate::types::ProcessId;

/// Access bits of a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Permissions
{
    pub read: bool,
    pub write: bool,
    pub execute: bool,
}

impl Permissions
{
    pub const R: Self = Self { read: true, write: false, execute: false };
    pub const RX: Self = Self { read: true, write: false, execute: true };
    pub const RW: Self = Self { read: true, write: true, execute: false };
}

impl fmt::Display for Permissions
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(
            f,
            "{}{}{}",
            if self.read { 'r' } else { '-' },
            if self.write { 'w' } else { '-' },
            if self.execute { 'x' } else { '-' }
        )
    }
}

/// One line of a maps listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapInfo
{
    pub start: u64,
    pub end: u64,
    /// Offset into the backing file
    pub offset: u64,
    pub perms: Permissions,
    /// Backing file, `None` for anonymous and special (`[stack]`, `[vdso]`) mappings
    pub path: Option<PathBuf>,
}

impl MapInfo
{
    pub fn new(start: u64, end: u64, offset: u64, perms: Permissions, path: Option<PathBuf>) -> Self
    {
        Self { start, end, offset, perms, path }
    }

    pub fn size(&self) -> u64
    {
        self.end.saturating_sub(self.start)
    }

    pub fn contains(&self, addr: u64) -> bool
    {
        (self.start..self.end).contains(&addr)
    }
}

/// A file mapped into the debuggee, possibly over several mappings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module
{
    pub path: PathBuf,
    pub mappings: SmallVec<[MapInfo; 4]>,
}

impl Module
{
    /// Lowest mapped address.
    pub fn base(&self) -> u64
    {
        self.mappings.first().map_or(0, |m| m.start)
    }

    /// Span from the lowest to the highest mapped address.
    pub fn size(&self) -> u64
    {
        self.mappings.last().map_or(0, |m| m.end).saturating_sub(self.base())
    }

    /// Final path component.
    pub fn basename(&self) -> Option<&str>
    {
        self.path.file_name().and_then(|name| name.to_str())
    }

    /// Whether this module passes `libs` (exact basename match, empty passes all).
    pub fn matches_library<S: AsRef<str>>(&self, libs: &[S]) -> bool
    {
        if libs.is_empty() {
            return true;
        }
        self.basename().is_some_and(|base| libs.iter().any(|lib| lib.as_ref() == base))
    }

    /// The mapping that holds file offset `offset`.
    pub fn mapping_for_offset(&self, offset: u64) -> Option<&MapInfo>
    {
        self.mappings.iter().find(|m| (m.offset..m.offset.saturating_add(m.size())).contains(&offset))
    }
}

/// Group consecutive mappings of the same file into modules.
pub fn group_modules<I: IntoIterator<Item = MapInfo>>(maps: I) -> Vec<Module>
{
    let mut modules: Vec<Module> = Vec::new();
    for map in maps {
        let Some(path) = map.path.clone() else {
            continue;
        };
        match modules.last_mut() {
            Some(last) if last.path == path && last.mappings.last().is_some_and(|prev| prev.end <= map.start) => {
                last.mappings.push(map);
            }
            _ => modules.push(Module { path, mappings: SmallVec::from_elem(map, 1) }),
        }
    }
    modules
}

/// Source of a debuggee's mappings.
pub trait Maps
{
    /// Every mapping, in ascending address order.
    fn maps(&self) -> Result<Vec<MapInfo>>;

    /// File-backed modules.
    fn modules(&self) -> Result<Vec<Module>>
    {
        Ok(group_modules(self.maps()?))
    }

    /// Directory under which module paths should be opened.
    ///
    /// Remote processes may live in a different mount namespace; their
    /// files are reachable through `/proc/<pid>/root`.
    fn root(&self) -> Option<&Path>
    {
        None
    }
}

/// Mappings of a live process, read from `/proc/<pid>/maps`.
#[derive(Debug, Clone)]
pub struct ProcMaps
{
    pid: ProcessId,
    root: PathBuf,
}

impl ProcMaps
{
    pub fn new(pid: ProcessId) -> Self
    {
        Self { pid, root: PathBuf::from(format!("/proc/{}/root", pid.0)) }
    }

    pub fn pid(&self) -> ProcessId
    {
        self.pid
    }
}

impl Maps for ProcMaps
{
    fn maps(&self) -> Result<Vec<MapInfo>>
    {
        let pid = i32::try_from(self.pid.0)
            .map_err(|_| JitscopeError::InvalidArgument(format!("pid {} out of range", self.pid)))?;
        let maps = Process::new(pid)?.maps()?;

        let infos: Vec<MapInfo> = maps
            .into_iter()
            .map(|map| {
                let path = match map.pathname {
                    MMapPath::Path(path) => Some(path),
                    _ => None,
                };
                let perms = Permissions {
                    read: map.perms.contains(MMPermissions::READ),
                    write: map.perms.contains(MMPermissions::WRITE),
                    execute: map.perms.contains(MMPermissions::EXECUTE),
                };
                MapInfo::new(map.address.0, map.address.1, map.offset, perms, path)
            })
            .collect();
        trace!(pid = self.pid.0, count = infos.len(), "read maps");
        Ok(infos)
    }

    fn root(&self) -> Option<&Path>
    {
        Some(&self.root)
    }
}

impl Maps for Vec<MapInfo>
{
    fn maps(&self) -> Result<Vec<MapInfo>>
    {
        Ok(self.clone())
    }
}

impl Maps for [MapInfo]
{
    fn maps(&self) -> Result<Vec<MapInfo>>
    {
        Ok(self.to_vec())
    }
}
