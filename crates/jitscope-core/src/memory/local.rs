//! In-process memory views.

use super::{MemoryView, RemoteMemory};
use crate::types::ProcessId;

/// Reads from the calling process without risking a fault.
///
/// Reads go through the same kernel copy paths as a remote view pointed at
/// our own PID, so an unmapped address produces a short read instead of a
/// `SIGSEGV`.
#[derive(Debug)]
pub struct LocalMemory
{
    inner: RemoteMemory,
}

impl LocalMemory
{
    pub fn new() -> Self
    {
        Self { inner: RemoteMemory::new(ProcessId::current()) }
    }
}

impl Default for LocalMemory
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl MemoryView for LocalMemory
{
    fn read(&self, addr: u64, dst: &mut [u8]) -> usize
    {
        self.inner.read(addr, dst)
    }
}

/// Direct loads from the calling process.
///
/// There is no fault handling at all: reading an unmapped byte crashes the
/// process. It exists for hot paths whose caller has already established
/// that the whole range is mapped, for example a range taken from an object
/// the caller holds a reference to.
#[derive(Debug, Clone, Copy)]
pub struct UncheckedLocalMemory
{
    _private: (),
}

impl UncheckedLocalMemory
{
    /// Create an unchecked view.
    ///
    /// # Safety
    ///
    /// Every address later passed to [`MemoryView::read`] must be mapped and
    /// readable for the full requested length.
    pub unsafe fn new() -> Self
    {
        Self { _private: () }
    }
}

impl MemoryView for UncheckedLocalMemory
{
    fn read(&self, addr: u64, dst: &mut [u8]) -> usize
    {
        let Ok(src) = usize::try_from(addr) else {
            return 0;
        };
        if src.checked_add(dst.len()).is_none() {
            return 0;
        }
        // SAFETY: the constructor contract makes the caller vouch for the range.
        unsafe {
            std::ptr::copy_nonoverlapping(src as *const u8, dst.as_mut_ptr(), dst.len());
        }
        dst.len()
    }
}
