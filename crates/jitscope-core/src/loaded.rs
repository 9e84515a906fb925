//! # Loaded Objects
//!
//! Identity of one code object advertised by the debuggee: where it lives,
//! how big it is, and a buffered copy of its ELF image.
//!
//! Construction validates just enough of the image to trust it later:
//!
//! 1. ELF magic
//! 2. class (32/64-bit) matching the target's word size
//! 3. `e_machine` matching the target architecture
//! 4. the program header table lying entirely inside the image
//!
//! A record that fails any check is kept as an invalid placeholder with no
//! image, so the scanner still accounts for the entry without re-reading it.

use std::fmt;
use std::ops::Range;

use object::elf::{self, FileHeader32, FileHeader64, PT_LOAD};
use object::read::elf::{FileHeader, ProgramHeader};
use object::Endianness;
use tracing::debug;

use crate::memory::{MemoryView, Snapshot};
use crate::types::{Address, Architecture};

/// Length of `e_ident`.
const EI_NIDENT: usize = 16;
/// Index of the class byte in `e_ident`.
const EI_CLASS: usize = 4;

/// One code object, immutable after construction.
#[derive(Clone, PartialEq, Eq)]
pub struct LoadedObject
{
    base: Address,
    size: u64,
    arch: Architecture,
    timestamp: u64,
    image: Option<Snapshot>,
    load_range: Option<Range<u64>>,
}

impl LoadedObject
{
    /// Build a record for the image at `base` from its buffered copy.
    ///
    /// `size` and `timestamp` are the values the descriptor entry declared;
    /// they are kept as-is even when the image turns out to be invalid.
    pub fn new(arch: Architecture, base: Address, size: u64, timestamp: u64, image: Snapshot) -> Self
    {
        let validated = if image.is_empty() || image.len() as u64 != size {
            Err("image could not be copied")
        } else {
            validate(arch, image.as_bytes())
        };

        match validated {
            Ok(load_range) => Self { base, size, arch, timestamp, image: Some(image), load_range },
            Err(reason) => {
                debug!(%base, size, %arch, reason, "invalid code object");
                Self::invalid(arch, base, size, timestamp)
            }
        }
    }

    /// A placeholder for an entry whose image is unusable.
    pub fn invalid(arch: Architecture, base: Address, size: u64, timestamp: u64) -> Self
    {
        Self { base, size, arch, timestamp, image: None, load_range: None }
    }

    pub fn base(&self) -> Address
    {
        self.base
    }

    pub fn size(&self) -> u64
    {
        self.size
    }

    pub fn architecture(&self) -> Architecture
    {
        self.arch
    }

    /// Registration timestamp from the descriptor entry (0 when absent).
    pub fn timestamp(&self) -> u64
    {
        self.timestamp
    }

    pub fn is_valid(&self) -> bool
    {
        self.image.is_some()
    }

    /// The buffered ELF image, for valid records.
    pub fn image(&self) -> Option<&Snapshot>
    {
        self.image.as_ref()
    }

    /// The image as a memory view whose addresses are offsets into the ELF file.
    pub fn memory(&self) -> Option<&dyn MemoryView>
    {
        self.image.as_ref().map(|image| image as &dyn MemoryView)
    }

    /// Virtual address span covered by the image's `PT_LOAD` segments.
    pub fn load_range(&self) -> Option<Range<u64>>
    {
        self.load_range.clone()
    }

    /// Whether `pc` falls inside one of this object's loadable segments' span.
    pub fn contains_pc(&self, pc: u64) -> bool
    {
        self.load_range.as_ref().is_some_and(|range| range.contains(&pc))
    }

    /// Whether this record describes the same entry payload.
    pub(crate) fn same_entry(&self, base: Address, size: u64, timestamp: u64) -> bool
    {
        self.base == base && self.size == size && self.timestamp == timestamp
    }
}

impl fmt::Debug for LoadedObject
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("LoadedObject")
            .field("base", &self.base)
            .field("size", &self.size)
            .field("arch", &self.arch)
            .field("valid", &self.is_valid())
            .field("load_range", &self.load_range)
            .finish()
    }
}

/// Check the image and compute its load span.
fn validate(arch: Architecture, data: &[u8]) -> Result<Option<Range<u64>>, &'static str>
{
    let machine = arch.elf_machine().ok_or("unsupported architecture")?;
    let ident = data.get(..EI_NIDENT).ok_or("image shorter than e_ident")?;
    if ident[..4] != elf::ELFMAG {
        return Err("bad ELF magic");
    }

    let class = ident[EI_CLASS];
    match (class, arch.is_64_bit()) {
        (elf::ELFCLASS64, true) => load_range::<FileHeader64<Endianness>>(data, machine),
        (elf::ELFCLASS32, false) => load_range::<FileHeader32<Endianness>>(data, machine),
        (elf::ELFCLASS32 | elf::ELFCLASS64, _) => Err("ELF class does not match architecture"),
        _ => Err("unknown ELF class"),
    }
}

fn load_range<Elf>(data: &[u8], machine: u16) -> Result<Option<Range<u64>>, &'static str>
where
    Elf: FileHeader<Endian = Endianness>,
{
    let header = Elf::parse(data).map_err(|_| "truncated ELF header")?;
    let endian = header.endian().map_err(|_| "bad ELF data encoding")?;
    if header.e_machine(endian) != machine {
        return Err("e_machine does not match architecture");
    }
    let phdrs = header.program_headers(endian, data).map_err(|_| "program headers outside image")?;

    let range = phdrs
        .iter()
        .filter(|phdr| phdr.p_type(endian) == PT_LOAD)
        .map(|phdr| {
            let start: u64 = phdr.p_vaddr(endian).into();
            let len: u64 = phdr.p_memsz(endian).into();
            start..start.saturating_add(len)
        })
        .reduce(|acc, seg| acc.start.min(seg.start)..acc.end.max(seg.end));
    Ok(range)
}

#[cfg(test)]
mod tests
{
    use super::*;

    /// ELF64 header plus one `PT_LOAD` covering the whole file.
    fn elf64(machine: u16, vaddr: u64, len: usize) -> Vec<u8>
    {
        let mut data = vec![0u8; len];
        data[..4].copy_from_slice(&elf::ELFMAG);
        data[4] = elf::ELFCLASS64;
        data[5] = elf::ELFDATA2LSB;
        data[6] = elf::EV_CURRENT;
        data[16..18].copy_from_slice(&elf::ET_DYN.to_le_bytes());
        data[18..20].copy_from_slice(&machine.to_le_bytes());
        data[20..24].copy_from_slice(&1u32.to_le_bytes());
        data[32..40].copy_from_slice(&64u64.to_le_bytes()); // e_phoff
        data[52..54].copy_from_slice(&64u16.to_le_bytes()); // e_ehsize
        data[54..56].copy_from_slice(&56u16.to_le_bytes()); // e_phentsize
        data[56..58].copy_from_slice(&1u16.to_le_bytes()); // e_phnum

        let ph = &mut data[64..120];
        ph[0..4].copy_from_slice(&PT_LOAD.to_le_bytes());
        ph[4..8].copy_from_slice(&5u32.to_le_bytes());
        ph[16..24].copy_from_slice(&vaddr.to_le_bytes());
        ph[24..32].copy_from_slice(&vaddr.to_le_bytes());
        ph[32..40].copy_from_slice(&(len as u64).to_le_bytes());
        ph[40..48].copy_from_slice(&(len as u64).to_le_bytes());
        data
    }

    fn object(arch: Architecture, bytes: Vec<u8>) -> LoadedObject
    {
        let base = Address::from(0x4000_0000);
        let size = bytes.len() as u64;
        LoadedObject::new(arch, base, size, 0, Snapshot::from_bytes(base, bytes))
    }

    #[test]
    fn valid_image_exposes_load_range()
    {
        let obj = object(Architecture::X86_64, elf64(elf::EM_X86_64, 0x4000_0000, 4096));
        assert!(obj.is_valid());
        assert_eq!(obj.base(), Address::from(0x4000_0000));
        assert_eq!(obj.size(), 4096);
        assert_eq!(obj.load_range(), Some(0x4000_0000..0x4000_1000));
        assert!(obj.contains_pc(0x4000_0ff0));
        assert!(!obj.contains_pc(0x4000_1000));
        assert!(obj.memory().is_some());
    }

    #[test]
    fn machine_mismatch_is_invalid()
    {
        let obj = object(Architecture::Arm64, elf64(elf::EM_X86_64, 0, 4096));
        assert!(!obj.is_valid());
        assert!(obj.image().is_none());
        assert_eq!(obj.size(), 4096);
    }

    #[test]
    fn class_mismatch_is_invalid()
    {
        let obj = object(Architecture::Arm, elf64(elf::EM_ARM, 0, 4096));
        assert!(!obj.is_valid());
    }

    #[test]
    fn program_headers_past_end_are_invalid()
    {
        let mut bytes = elf64(elf::EM_AARCH64, 0, 4096);
        bytes[56..58].copy_from_slice(&100u16.to_le_bytes());
        assert!(!object(Architecture::Arm64, bytes).is_valid());
    }

    #[test]
    fn image_shorter_than_ident_is_invalid()
    {
        let bytes = elf64(elf::EM_X86_64, 0, 4096)[..EI_NIDENT - 1].to_vec();
        assert!(!object(Architecture::X86_64, bytes).is_valid());
    }

    #[test]
    fn unknown_class_byte_is_invalid()
    {
        let mut bytes = elf64(elf::EM_X86_64, 0, 4096);
        bytes[EI_CLASS] = 7;
        assert!(!object(Architecture::X86_64, bytes).is_valid());
    }

    #[test]
    fn bad_magic_and_empty_images_are_invalid()
    {
        let mut bytes = elf64(elf::EM_RISCV, 0, 4096);
        bytes[0] = 0;
        assert!(!object(Architecture::Riscv64, bytes).is_valid());

        let base = Address::from(0x1000);
        let obj = LoadedObject::new(Architecture::Riscv64, base, 64, 0, Snapshot::from_bytes(base, Vec::new()));
        assert!(!obj.is_valid());
        assert_eq!(obj.size(), 64);
    }
}
