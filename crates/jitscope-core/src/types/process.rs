//! Process identifiers and target architectures.

use std::fmt;
use std::str::FromStr;

use gimli::RunTimeEndian;
use nix::unistd::Pid;
use object::elf;

use crate::error::JitscopeError;

/// Process identifier (PID)
///
/// A PID is a unique number assigned to each running process by the operating
/// system. On Linux, PIDs are positive 32-bit integers.
///
/// ## Example
///
/// ```rust
/// use jitscope_core::types::ProcessId;
///
/// let pid = ProcessId::from(12345);
/// assert_eq!(pid.0, 12345);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(pub u32);

impl ProcessId
{
    /// The calling process.
    pub fn current() -> Self
    {
        ProcessId(std::process::id())
    }

    /// Convert to the `nix` PID type used by the ptrace/wait wrappers.
    #[allow(clippy::cast_possible_wrap)]
    pub fn as_pid(self) -> Pid
    {
        Pid::from_raw(self.0 as i32)
    }
}

impl From<u32> for ProcessId
{
    fn from(pid: u32) -> Self
    {
        ProcessId(pid)
    }
}

impl From<ProcessId> for u32
{
    fn from(pid: ProcessId) -> Self
    {
        pid.0
    }
}

impl fmt::Display for ProcessId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

/// CPU architecture of the debuggee
///
/// The architecture tag decides three things for the rest of the crate:
/// the word size used to decode descriptor fields, the byte order, and which
/// register file layout applies. Decoding always switches on this tag, never
/// on properties of the host.
///
/// ## Example
///
/// ```rust
/// use jitscope_core::types::Architecture;
///
/// let arch: Architecture = "riscv64".parse().unwrap();
/// assert_eq!(arch.pointer_size_bytes(), 8);
/// assert!(arch.is_64_bit());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture
{
    /// 32-bit x86 (i386 and later)
    X86,
    /// 64-bit x86 (Intel/AMD)
    X86_64,
    /// 32-bit ARM (ARMv7 and earlier, including Thumb)
    Arm,
    /// 64-bit ARM (AArch64)
    Arm64,
    /// 64-bit RISC-V (RV64GC, optionally with the V extension)
    Riscv64,
    /// Any other architecture
    ///
    /// The `&'static str` contains the architecture name (e.g. "powerpc64").
    /// No register file or descriptor layout exists for these.
    Unknown(&'static str),
}

impl Architecture
{
    /// Every architecture with a register file and descriptor layout.
    pub const SUPPORTED: [Architecture; 5] = [
        Architecture::X86,
        Architecture::X86_64,
        Architecture::Arm,
        Architecture::Arm64,
        Architecture::Riscv64,
    ];

    /// Get the architecture jitscope itself was compiled for
    ///
    /// Useful as a default target when the debuggee is the local process or a
    /// process of the same ABI.
    pub const fn current() -> Self
    {
        #[cfg(target_arch = "x86")]
        {
            Architecture::X86
        }

        #[cfg(target_arch = "x86_64")]
        {
            Architecture::X86_64
        }

        #[cfg(target_arch = "arm")]
        {
            Architecture::Arm
        }

        #[cfg(target_arch = "aarch64")]
        {
            Architecture::Arm64
        }

        #[cfg(target_arch = "riscv64")]
        {
            Architecture::Riscv64
        }

        #[cfg(not(any(
            target_arch = "x86",
            target_arch = "x86_64",
            target_arch = "arm",
            target_arch = "aarch64",
            target_arch = "riscv64"
        )))]
        {
            Architecture::Unknown(std::env::consts::ARCH)
        }
    }

    /// Whether a register file and descriptor layout exist for this architecture.
    pub const fn is_supported(self) -> bool
    {
        !matches!(self, Architecture::Unknown(_))
    }

    /// Size of a pointer (and of a general purpose register) in bytes.
    pub const fn pointer_size_bytes(self) -> u8
    {
        match self {
            Architecture::X86 | Architecture::Arm => 4,
            Architecture::X86_64 | Architecture::Arm64 | Architecture::Riscv64 => 8,
            Architecture::Unknown(_) => 8,
        }
    }

    /// Whether this is an LP64 target.
    pub const fn is_64_bit(self) -> bool
    {
        self.pointer_size_bytes() == 8
    }

    /// Byte order of the debuggee.
    ///
    /// Every supported target runs little-endian on Linux.
    pub const fn endian(self) -> RunTimeEndian
    {
        RunTimeEndian::Little
    }

    /// ELF `e_machine` value for images built for this architecture.
    pub const fn elf_machine(self) -> Option<u16>
    {
        match self {
            Architecture::X86 => Some(elf::EM_386),
            Architecture::X86_64 => Some(elf::EM_X86_64),
            Architecture::Arm => Some(elf::EM_ARM),
            Architecture::Arm64 => Some(elf::EM_AARCH64),
            Architecture::Riscv64 => Some(elf::EM_RISCV),
            Architecture::Unknown(_) => None,
        }
    }
}

impl fmt::Display for Architecture
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Architecture::X86 => write!(f, "x86"),
            Architecture::X86_64 => write!(f, "x86_64"),
            Architecture::Arm => write!(f, "arm"),
            Architecture::Arm64 => write!(f, "arm64"),
            Architecture::Riscv64 => write!(f, "riscv64"),
            Architecture::Unknown(name) => write!(f, "{name}"),
        }
    }
}

impl FromStr for Architecture
{
    type Err = JitscopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "x86" | "i386" | "i686" => Ok(Architecture::X86),
            "x86_64" | "x86-64" | "amd64" => Ok(Architecture::X86_64),
            "arm" | "armv7" | "arm32" => Ok(Architecture::Arm),
            "arm64" | "aarch64" => Ok(Architecture::Arm64),
            "riscv64" | "riscv" => Ok(Architecture::Riscv64),
            _ => Err(JitscopeError::UnsupportedArchitecture(s.to_string())),
        }
    }
}
