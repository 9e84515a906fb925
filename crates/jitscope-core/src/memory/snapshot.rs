//! Owned, size-bounded copies of a memory range.

use std::fmt;

use tracing::debug;

use super::{read_from_slice, MemoryView};
use crate::types::Address;

/// Hard ceiling on the size of a single snapshot (10 MiB).
///
/// A descriptor entry is debuggee-controlled data; the cap keeps a corrupt
/// size field from turning into an arbitrarily large allocation.
pub const MAX_SNAPSHOT_SIZE: u64 = 10 * 1024 * 1024;

/// An immutable copy of `len` bytes taken from a [`MemoryView`].
///
/// After construction the snapshot is itself a [`MemoryView`] whose
/// addresses are offsets from zero, which decouples ELF parsing from the
/// volatile source. A snapshot is either complete or empty: any allocation
/// failure, oversize request or short read produces an empty snapshot.
///
/// ## Example
///
/// ```rust
/// use jitscope_core::memory::{MemoryView, Snapshot};
/// use jitscope_core::types::Address;
///
/// let snapshot = Snapshot::from_bytes(Address::from(0x4000), vec![1, 2, 3, 4]);
/// let mut buf = [0u8; 8];
/// assert_eq!(snapshot.read(2, &mut buf), 2);
/// assert_eq!(&buf[..2], &[3, 4]);
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Snapshot
{
    source: Address,
    data: Box<[u8]>,
}

impl Snapshot
{
    /// Copy `size` bytes at `source` out of `memory`, bounded by [`MAX_SNAPSHOT_SIZE`].
    pub fn capture<M: MemoryView + ?Sized>(memory: &M, source: Address, size: u64) -> Self
    {
        Self::capture_with_cap(memory, source, size, MAX_SNAPSHOT_SIZE)
    }

    /// Copy `size` bytes at `source` out of `memory` with an explicit cap.
    pub fn capture_with_cap<M: MemoryView + ?Sized>(memory: &M, source: Address, size: u64, cap: u64) -> Self
    {
        let cap = cap.min(MAX_SNAPSHOT_SIZE);
        if size > cap {
            debug!(%source, size, cap, "snapshot request exceeds cap");
            return Self::empty(source);
        }
        let Ok(len) = usize::try_from(size) else {
            return Self::empty(source);
        };

        let mut data = Vec::new();
        if data.try_reserve_exact(len).is_err() {
            debug!(%source, size, "snapshot allocation failed");
            return Self::empty(source);
        }
        data.resize(len, 0);

        if !memory.read_fully(source.value(), &mut data) {
            debug!(%source, size, "short read while capturing snapshot");
            return Self::empty(source);
        }

        Self { source, data: data.into_boxed_slice() }
    }

    /// Wrap bytes that were obtained some other way.
    ///
    /// Buffers larger than [`MAX_SNAPSHOT_SIZE`] produce an empty snapshot.
    pub fn from_bytes(source: Address, bytes: Vec<u8>) -> Self
    {
        if bytes.len() as u64 > MAX_SNAPSHOT_SIZE {
            return Self::empty(source);
        }
        Self { source, data: bytes.into_boxed_slice() }
    }

    fn empty(source: Address) -> Self
    {
        Self { source, data: Box::default() }
    }

    /// Debuggee address the bytes were copied from.
    pub fn source_address(&self) -> Address
    {
        self.source
    }

    pub fn len(&self) -> usize
    {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8]
    {
        &self.data
    }
}

impl MemoryView for Snapshot
{
    fn read(&self, addr: u64, dst: &mut [u8]) -> usize
    {
        read_from_slice(&self.data, addr, dst)
    }

    fn ptr(&self, offset: u64) -> Option<&[u8]>
    {
        let start = usize::try_from(offset).ok()?;
        self.data.get(start..).filter(|rest| !rest.is_empty())
    }

    fn size(&self) -> Option<u64>
    {
        Some(self.data.len() as u64)
    }
}

impl fmt::Debug for Snapshot
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("Snapshot").field("source", &self.source).field("len", &self.data.len()).finish()
    }
}
