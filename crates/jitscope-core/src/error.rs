//! # Error Types
//!
//! General error handling for jitscope.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages.
//!
//! Only the fallible setup paths return these errors: process control, maps
//! parsing, symbol lookup, register capture and scanner construction. Memory
//! reads and descriptor refreshes report outcomes through byte counts and
//! [`RefreshStatus`](crate::global_debug::RefreshStatus) instead.

use thiserror::Error;

use crate::process::ProcessState;

/// Main error type for jitscope operations
///
/// ## Error Categories
///
/// 1. **Process errors**: ProcessNotFound, AttachFailed, ProcessExited
/// 2. **State errors**: InvalidState, Timeout
/// 3. **Permission errors**: PermissionDenied
/// 4. **Decoding errors**: ReadRegistersFailed, UnsupportedArchitecture, Object
/// 5. **Platform errors**: Errno (ptrace and friends), Procfs
/// 6. **I/O errors**: Io (for file operations, etc.)
#[derive(Error, Debug)]
pub enum JitscopeError
{
    /// The process with the given PID doesn't exist
    ///
    /// This happens when:
    /// - You provide an invalid PID
    /// - The process exited between when you got its PID and when you tried to attach
    #[error("Process not found: PID {0}")]
    ProcessNotFound(u32),

    /// Insufficient permissions to trace the target process
    ///
    /// On Linux this is usually `EPERM` from `PTRACE_ATTACH`: either the
    /// caller lacks `CAP_SYS_PTRACE` or `kernel.yama.ptrace_scope` forbids it.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Invalid argument passed to a jitscope function
    ///
    /// Examples:
    /// - Empty descriptor symbol name
    /// - Malformed register blob
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Failed to attach to a process
    #[error("Failed to attach to process {pid}: {reason}")]
    AttachFailed
    {
        /// Target process
        pid: u32,
        /// What went wrong
        reason: String,
    },

    /// The operation is not allowed in the handle's current state
    ///
    /// For example calling `quiesce()` before `attach()`.
    #[error("Cannot {operation} while process is {state}")]
    InvalidState
    {
        /// Operation that was attempted
        operation: &'static str,
        /// State the handle was in
        state: ProcessState,
    },

    /// The target process has exited; the handle is terminal
    #[error("Process {0} has exited")]
    ProcessExited(u32),

    /// A bounded polling loop ran out of time
    #[error("Timed out after {millis} ms waiting to {operation}")]
    Timeout
    {
        /// Operation that was being waited on
        operation: &'static str,
        /// Budget that was exhausted
        millis: u128,
    },

    /// Failed to read registers from the target process
    #[error("Failed to read registers: {operation}: {details}")]
    ReadRegistersFailed
    {
        /// Description of the operation that failed
        operation: String,
        /// Additional error details
        details: String,
    },

    /// The requested architecture is not one of the supported register files
    #[error("Unsupported architecture: {0}")]
    UnsupportedArchitecture(String),

    /// Raw errno from a ptrace/wait/uio call
    #[error("System call failed: {0}")]
    Errno(#[from] nix::errno::Errno),

    /// Failure reading `/proc`
    #[error("procfs error: {0}")]
    Procfs(#[from] procfs::ProcError),

    /// Failure parsing an ELF image
    #[error("ELF parse error: {0}")]
    Object(#[from] object::read::Error),

    /// I/O error (for file operations, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for `Result<T, JitscopeError>`
///
/// ```rust
/// use jitscope_core::error::Result;
/// fn foo() -> Result<()>
/// {
///     Ok(())
/// }
/// ```
pub type Result<T> = std::result::Result<T, JitscopeError>;
