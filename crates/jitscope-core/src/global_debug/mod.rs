//! # Global Debug Descriptor Scanner
//!
//! Runtimes that generate code at run time (ART's JIT, for instance) publish
//! it to debuggers through a global descriptor: a header exported under a
//! well-known symbol that heads a linked list of in-memory ELF images. The
//! [`GlobalDebugScanner`] finds that descriptor in a debuggee, walks the list
//! coherently while the debuggee keeps mutating it, and keeps an ordered cache
//! of [`LoadedObject`]s.
//!
//! ## Refresh
//!
//! Each [`refresh`](GlobalDebugScanner::refresh):
//!
//! 1. locates the descriptor (once found, the address is kept)
//! 2. reads the header; an unchanged seqlock means the cache is current
//! 3. walks the list, copying each new image and reusing cached ones
//! 4. re-reads the seqlock; a change means the walk raced with the debuggee
//!    and is restarted, up to the configured retry budget
//! 5. swaps the new map in
//!
//! Anything that goes wrong leaves the previous cache in place and is reported
//! through [`RefreshStatus`], never as an error. A debuggee that has exited
//! puts the scanner into a terminal empty state.
//!
//! ## Example
//!
//! ```rust,no_run
//! use jitscope_core::global_debug::{GlobalDebugScanner, MapsLocator, ScannerConfig};
//! use jitscope_core::maps::ProcMaps;
//! use jitscope_core::memory::RemoteMemory;
//! use jitscope_core::types::{Architecture, ProcessId};
//!
//! let pid = ProcessId(1234);
//! let memory = RemoteMemory::new(pid);
//! let locator = MapsLocator::new(ProcMaps::new(pid));
//! let mut scanner =
//!     GlobalDebugScanner::create(Architecture::Arm64, &memory, Box::new(locator), ScannerConfig::default())?;
//!
//! scanner.refresh();
//! scanner.for_each(|object| println!("{} {:#x}", object.base(), object.size()));
//! # Ok::<(), jitscope_core::error::JitscopeError>(())
//! ```

mod config;
mod layout;

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

pub use config::{
    ScannerConfig, DEFAULT_DESCRIPTOR_SYMBOL, DEFAULT_MAX_ENTRIES, DEFAULT_MAX_RETRIES, DEFAULT_SEARCH_LIBS,
};
use layout::{Descriptor, HeaderError, Layout};
use tracing::{debug, trace, warn};

use crate::error::{JitscopeError, Result};
use crate::loaded::LoadedObject;
use crate::maps::Maps;
use crate::memory::{MemoryView, Snapshot};
use crate::symbols::{ElfFileResolver, SymbolResolver};
use crate::types::{Address, Architecture};

/// Finds the descriptor in the debuggee.
pub trait DescriptorLocator
{
    /// Address of `symbol` in the first module passing `search_libs`, if any.
    fn locate(&self, symbol: &str, search_libs: &[String]) -> Result<Option<Address>>;
}

/// Looks the descriptor symbol up in the debuggee's mapped modules.
///
/// Modules are visited in address order; the first one that defines the
/// symbol wins. Modules whose files cannot be read or parsed are skipped.
pub struct MapsLocator<M: Maps, R: SymbolResolver = ElfFileResolver>
{
    maps: M,
    resolver: R,
}

impl<M: Maps> MapsLocator<M, ElfFileResolver>
{
    /// Resolve through the module files on disk, under the maps' root if it has one.
    pub fn new(maps: M) -> Self
    {
        let resolver = match maps.root() {
            Some(root) => ElfFileResolver::new().with_root(root),
            None => ElfFileResolver::new(),
        };
        Self { maps, resolver }
    }
}

impl<M: Maps, R: SymbolResolver> MapsLocator<M, R>
{
    pub fn with_resolver(maps: M, resolver: R) -> Self
    {
        Self { maps, resolver }
    }
}

impl<M: Maps, R: SymbolResolver> DescriptorLocator for MapsLocator<M, R>
{
    fn locate(&self, symbol: &str, search_libs: &[String]) -> Result<Option<Address>>
    {
        for module in self.maps.modules()?.iter().filter(|m| m.matches_library(search_libs)) {
            match self.resolver.resolve(module, symbol) {
                Ok(Some(addr)) => {
                    debug!(module = %module.path.display(), addr = %Address::new(addr), symbol, "found descriptor");
                    return Ok(Some(Address::new(addr)));
                }
                Ok(None) => {}
                Err(err) => debug!(module = %module.path.display(), %err, "skipping module"),
            }
        }
        Ok(None)
    }
}

/// A descriptor address known up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedLocation(pub Address);

impl DescriptorLocator for FixedLocation
{
    fn locate(&self, _symbol: &str, _search_libs: &[String]) -> Result<Option<Address>>
    {
        Ok(Some(self.0))
    }
}

/// Outcome of one [`GlobalDebugScanner::refresh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshStatus
{
    /// A coherent walk completed and replaced the cache
    Updated,
    /// The seqlock matched the last walk; the cache is current
    Unchanged,
    /// No module defines the descriptor (yet)
    NotFound,
    /// The header or an entry could not be read; the cache was kept
    ReadFailed,
    /// The descriptor has a version or extension this reader cannot decode
    Unsupported,
    /// The debuggee kept mutating the list past the retry budget; the cache was kept
    Stale,
    /// The debuggee is gone; the cache is empty for good
    Exited,
}

impl RefreshStatus
{
    /// Whether the cache reflects the debuggee after this refresh.
    pub fn is_current(self) -> bool
    {
        matches!(self, Self::Updated | Self::Unchanged)
    }
}

impl fmt::Display for RefreshStatus
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let text = match self {
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
            Self::NotFound => "descriptor not found",
            Self::ReadFailed => "read failed",
            Self::Unsupported => "unsupported descriptor",
            Self::Stale => "stale",
            Self::Exited => "process exited",
        };
        f.write_str(text)
    }
}

/// Counters from the most recent refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshStats
{
    /// Entries read, across all attempts
    pub entries_seen: usize,
    /// Entries whose image exceeded the size cap
    pub skipped_oversize: usize,
    /// Entries with a null address or zero size
    pub skipped_invalid: usize,
    /// Entries the debuggee was in the middle of removing
    pub skipped_torn: usize,
    /// Walks cut short by a repeated entry address
    pub cycles: usize,
    /// Walks restarted because the seqlock moved
    pub retries: u32,
}

enum Walk
{
    Done(BTreeMap<Address, Arc<LoadedObject>>),
    Raced,
    ReadFailed,
}

/// Cached view of the code objects a debuggee advertises through its global
/// debug descriptor.
///
/// The scanner borrows its memory view and never writes through it. It is
/// single-threaded; scanners over different debuggees can run on separate
/// threads.
pub struct GlobalDebugScanner<'a, M: MemoryView + ?Sized>
{
    arch: Architecture,
    memory: &'a M,
    locator: Box<dyn DescriptorLocator + 'a>,
    config: ScannerConfig,
    layout: Layout,
    descriptor: Option<Address>,
    last_seqlock: Option<u32>,
    objects: BTreeMap<Address, Arc<LoadedObject>>,
    stats: RefreshStats,
    exited: bool,
}

impl<'a, M: MemoryView + ?Sized> GlobalDebugScanner<'a, M>
{
    /// Create a scanner for a debuggee of architecture `arch`.
    ///
    /// Nothing is read until the first [`refresh`](Self::refresh).
    ///
    /// ## Errors
    ///
    /// - [`JitscopeError::UnsupportedArchitecture`] for `Architecture::Unknown`
    /// - [`JitscopeError::InvalidArgument`] for an empty symbol name or a zero
    ///   list length bound
    pub fn create(
        arch: Architecture,
        memory: &'a M,
        locator: Box<dyn DescriptorLocator + 'a>,
        config: ScannerConfig,
    ) -> Result<Self>
    {
        let layout = Layout::for_arch(arch).ok_or_else(|| JitscopeError::UnsupportedArchitecture(arch.to_string()))?;
        if config.symbol().is_empty() {
            return Err(JitscopeError::InvalidArgument("descriptor symbol name is empty".to_string()));
        }
        if config.max_entries() == 0 {
            return Err(JitscopeError::InvalidArgument("max_entries must be at least 1".to_string()));
        }

        Ok(Self {
            arch,
            memory,
            locator,
            config,
            layout,
            descriptor: None,
            last_seqlock: None,
            objects: BTreeMap::new(),
            stats: RefreshStats::default(),
            exited: false,
        })
    }

    /// Scanner over the modules in `maps`, resolving symbols from their files.
    pub fn with_maps<P: Maps + 'a>(arch: Architecture, memory: &'a M, maps: P, config: ScannerConfig) -> Result<Self>
    {
        Self::create(arch, memory, Box::new(MapsLocator::new(maps)), config)
    }

    pub fn architecture(&self) -> Architecture
    {
        self.arch
    }

    pub fn config(&self) -> &ScannerConfig
    {
        &self.config
    }

    /// Descriptor address, once a refresh has located it.
    pub fn descriptor_address(&self) -> Option<Address>
    {
        self.descriptor
    }

    pub fn stats(&self) -> RefreshStats
    {
        self.stats
    }

    pub fn is_exited(&self) -> bool
    {
        self.exited
    }

    /// Number of cached objects, valid or not.
    pub fn len(&self) -> usize
    {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.objects.is_empty()
    }

    /// Visit cached objects in ascending base address order.
    pub fn for_each<F: FnMut(&LoadedObject)>(&self, mut f: F)
    {
        for object in self.objects.values() {
            f(object);
        }
    }

    /// Cached objects in ascending base address order.
    pub fn objects(&self) -> impl Iterator<Item = &LoadedObject> + '_
    {
        self.objects.values().map(|object| &**object)
    }

    /// The valid object whose loadable segments span `pc`.
    pub fn find(&self, pc: u64) -> Option<&LoadedObject>
    {
        self.objects().find(|object| object.contains_pc(pc))
    }

    /// Enter the terminal exited state: the cache is dropped and every later
    /// refresh returns [`RefreshStatus::Exited`].
    pub fn mark_exited(&mut self)
    {
        if !self.exited {
            debug!(objects = self.objects.len(), "debuggee exited; dropping cache");
        }
        self.exited = true;
        self.objects.clear();
        self.last_seqlock = None;
    }

    /// Bring the cache up to date with the debuggee.
    pub fn refresh(&mut self) -> RefreshStatus
    {
        self.stats = RefreshStats::default();
        if self.exited {
            return RefreshStatus::Exited;
        }

        let Some(descriptor) = self.locate() else {
            return RefreshStatus::NotFound;
        };

        let mut stats = RefreshStats::default();
        let status = self.refresh_at(descriptor.value(), &mut stats);
        self.stats = stats;
        status
    }

    fn locate(&mut self) -> Option<Address>
    {
        if self.descriptor.is_none() {
            match self.locator.locate(self.config.symbol(), self.config.search_libs()) {
                Ok(Some(addr)) => self.descriptor = Some(addr),
                Ok(None) => debug!(symbol = self.config.symbol(), "descriptor symbol not found"),
                Err(err) => debug!(symbol = self.config.symbol(), %err, "descriptor lookup failed"),
            }
        }
        self.descriptor
    }

    fn refresh_at(&mut self, addr: u64, stats: &mut RefreshStats) -> RefreshStatus
    {
        loop {
            let header = match self.layout.read_descriptor(self.memory, addr) {
                Ok(header) => header,
                Err(HeaderError::ShortRead) => return self.read_failed("descriptor header"),
                Err(HeaderError::Unsupported(reason)) => {
                    debug!(addr = %Address::new(addr), reason, "cannot decode descriptor");
                    return RefreshStatus::Unsupported;
                }
            };
            trace!(version = header.version, action = header.action, seqlock = ?header.seqlock, "read descriptor");

            if header.seqlock.is_some() && header.seqlock == self.last_seqlock {
                return RefreshStatus::Unchanged;
            }

            let raced = match self.walk(addr, &header, stats) {
                Walk::Done(objects) => match header.seqlock {
                    None => return self.commit(objects, None, stats),
                    Some(seq) => match self.layout.read_seqlock(self.memory, addr) {
                        Some(now) if now == seq => return self.commit(objects, Some(seq), stats),
                        Some(_) => true,
                        None => return self.read_failed("descriptor seqlock"),
                    },
                },
                Walk::Raced => true,
                Walk::ReadFailed => return self.read_failed("descriptor entry"),
            };

            if raced {
                if stats.retries >= self.config.max_retries() {
                    warn!(retries = stats.retries, "descriptor kept changing during walk; keeping previous objects");
                    return RefreshStatus::Stale;
                }
                stats.retries += 1;
                trace!(retry = stats.retries, "descriptor changed during walk; restarting");
            }
        }
    }

    fn walk(&self, addr: u64, header: &Descriptor, stats: &mut RefreshStats) -> Walk
    {
        let cap = self.config.max_entry_size();
        let mut objects = BTreeMap::new();
        let mut visited = HashSet::new();
        let mut next = header.first_entry;

        while next != 0 {
            if !visited.insert(next) {
                stats.cycles += 1;
                debug!(entry = %Address::new(next), "descriptor list loops back; stopping walk");
                break;
            }
            if visited.len() > self.config.max_entries() {
                warn!(max = self.config.max_entries(), "descriptor list too long; truncating");
                break;
            }

            let Some(entry) = self.layout.read_entry(self.memory, next, header.is_android()) else {
                // An unreadable entry is expected if it was freed under us.
                let moved = header.seqlock.is_some() && self.layout.read_seqlock(self.memory, addr) != header.seqlock;
                return if moved { Walk::Raced } else { Walk::ReadFailed };
            };
            stats.entries_seen += 1;
            let entry_addr = next;
            next = entry.next;

            if entry.is_torn() {
                stats.skipped_torn += 1;
                trace!(entry = %Address::new(entry_addr), "skipping entry being removed");
                continue;
            }
            if entry.symfile_addr == 0 || entry.symfile_size == 0 {
                stats.skipped_invalid += 1;
                debug!(
                    entry = %Address::new(entry_addr),
                    symfile_addr = %Address::new(entry.symfile_addr),
                    symfile_size = entry.symfile_size,
                    "skipping empty entry"
                );
                continue;
            }
            if entry.symfile_size > cap {
                stats.skipped_oversize += 1;
                debug!(
                    entry = %Address::new(entry_addr),
                    symfile_size = entry.symfile_size,
                    cap,
                    "skipping oversized entry"
                );
                continue;
            }

            let base = Address::new(entry.symfile_addr);
            // Plain descriptors carry no timestamp, so a recycled address looks identical.
            let reusable = |cached: &LoadedObject| {
                header.is_android() && cached.is_valid() && cached.same_entry(base, entry.symfile_size, entry.timestamp)
            };
            let object = match self.objects.get(&base) {
                Some(cached) if reusable(cached) => Arc::clone(cached),
                _ => {
                    let image = Snapshot::capture_with_cap(self.memory, base, entry.symfile_size, cap);
                    Arc::new(LoadedObject::new(self.arch, base, entry.symfile_size, entry.timestamp, image))
                }
            };
            objects.insert(base, object);
        }

        Walk::Done(objects)
    }

    fn commit(
        &mut self,
        objects: BTreeMap<Address, Arc<LoadedObject>>,
        seqlock: Option<u32>,
        stats: &RefreshStats,
    ) -> RefreshStatus
    {
        debug!(objects = objects.len(), retries = stats.retries, seqlock = ?seqlock, "descriptor refreshed");
        self.objects = objects;
        self.last_seqlock = seqlock;
        RefreshStatus::Updated
    }

    fn read_failed(&mut self, what: &'static str) -> RefreshStatus
    {
        if self.memory.target_exited() {
            self.mark_exited();
            return RefreshStatus::Exited;
        }
        debug!(what, "short read; keeping previous objects");
        RefreshStatus::ReadFailed
    }
}

impl<M: MemoryView + ?Sized> fmt::Debug for GlobalDebugScanner<'_, M>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("GlobalDebugScanner")
            .field("arch", &self.arch)
            .field("descriptor", &self.descriptor)
            .field("objects", &self.objects.len())
            .field("last_seqlock", &self.last_seqlock)
            .field("exited", &self.exited)
            .finish_non_exhaustive()
    }
}
