//! # Memory Views
//!
//! Byte-addressable, best-effort reads over an address space.
//!
//! Every consumer in the crate (descriptor scanner, register files, loaded
//! objects) goes through [`MemoryView`], so the same code drives an
//! in-process debuggee, a remote one, or a buffered copy of either:
//!
//! - [`LocalMemory`]: the calling process, read through `process_vm_readv`
//!   so unmapped addresses produce short reads instead of faults
//! - [`UncheckedLocalMemory`]: direct loads for ranges the caller has already
//!   proven mapped
//! - [`RemoteMemory`]: another process via `process_vm_readv` with a
//!   `/proc/<pid>/mem` fallback
//! - [`Snapshot`]: an owned copy whose addresses are offsets from zero
//!
//! ## Failure reporting
//!
//! Reads never return errors. They return how many bytes were copied; a
//! fault part-way through yields the valid prefix length, a fault on the
//! first byte yields zero.

mod local;
mod remote;
mod snapshot;

use gimli::{Endianity, RunTimeEndian};
pub use local::{LocalMemory, UncheckedLocalMemory};
pub use remote::RemoteMemory;
pub use snapshot::{Snapshot, MAX_SNAPSHOT_SIZE};

use crate::types::Architecture;

/// Best-effort read access to an address space.
pub trait MemoryView
{
    /// Copy up to `dst.len()` bytes starting at `addr` into `dst`.
    ///
    /// Returns the number of bytes copied, which is the length of the
    /// readable prefix of the requested range.
    fn read(&self, addr: u64, dst: &mut [u8]) -> usize;

    /// Read exactly `dst.len()` bytes or report failure.
    fn read_fully(&self, addr: u64, dst: &mut [u8]) -> bool
    {
        self.read(addr, dst) == dst.len()
    }

    /// Borrow the bytes starting at `offset` without copying.
    ///
    /// Only buffer-backed views can answer this; everything else returns `None`.
    fn ptr(&self, _offset: u64) -> Option<&[u8]>
    {
        None
    }

    /// Total size of the view when it is bounded.
    fn size(&self) -> Option<u64>
    {
        None
    }

    /// Whether the address space behind this view has gone away for good.
    ///
    /// Remote views answer from `/proc`; local and buffered views never exit.
    fn target_exited(&self) -> bool
    {
        false
    }

    /// Read a 32-bit value in the given byte order.
    fn read_u32(&self, addr: u64, endian: RunTimeEndian) -> Option<u32>
    {
        let mut buf = [0u8; 4];
        self.read_fully(addr, &mut buf).then(|| endian.read_u32(&buf))
    }

    /// Read a 64-bit value in the given byte order.
    fn read_u64(&self, addr: u64, endian: RunTimeEndian) -> Option<u64>
    {
        let mut buf = [0u8; 8];
        self.read_fully(addr, &mut buf).then(|| endian.read_u64(&buf))
    }

    /// Read a pointer-sized value for `arch`, widened to `u64`.
    fn read_word(&self, addr: u64, arch: Architecture) -> Option<u64>
    {
        if arch.is_64_bit() {
            self.read_u64(addr, arch.endian())
        } else {
            self.read_u32(addr, arch.endian()).map(u64::from)
        }
    }
}

impl<T: MemoryView + ?Sized> MemoryView for &T
{
    fn read(&self, addr: u64, dst: &mut [u8]) -> usize
    {
        (**self).read(addr, dst)
    }

    fn ptr(&self, offset: u64) -> Option<&[u8]>
    {
        (**self).ptr(offset)
    }

    fn size(&self) -> Option<u64>
    {
        (**self).size()
    }

    fn target_exited(&self) -> bool
    {
        (**self).target_exited()
    }
}

impl<T: MemoryView + ?Sized> MemoryView for Box<T>
{
    fn read(&self, addr: u64, dst: &mut [u8]) -> usize
    {
        (**self).read(addr, dst)
    }

    fn ptr(&self, offset: u64) -> Option<&[u8]>
    {
        (**self).ptr(offset)
    }

    fn size(&self) -> Option<u64>
    {
        (**self).size()
    }

    fn target_exited(&self) -> bool
    {
        (**self).target_exited()
    }
}

/// Copy from a flat buffer where `addr` is an offset into `bytes`.
///
/// Shared by every buffer-backed view: reads past the end copy nothing.
pub(crate) fn read_from_slice(bytes: &[u8], addr: u64, dst: &mut [u8]) -> usize
{
    let Ok(start) = usize::try_from(addr) else {
        return 0;
    };
    if start >= bytes.len() {
        return 0;
    }
    let count = dst.len().min(bytes.len() - start);
    dst[..count].copy_from_slice(&bytes[start..start + count]);
    count
}
