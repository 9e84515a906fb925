//! Register files through the architecture-independent factory API.

use jitscope_core::error::JitscopeError;
use jitscope_core::memory::Snapshot;
use jitscope_core::registers;
use jitscope_core::types::{Address, Architecture, ProcessId};

#[test]
fn every_supported_arch_has_a_register_file()
{
    for arch in Architecture::SUPPORTED {
        let regs = registers::create(arch).unwrap();
        assert_eq!(regs.architecture(), arch);
        assert_eq!(regs.names().len(), regs.total_regs(), "{arch}");
        assert_eq!(regs.pc(), 0);
        assert_eq!(regs.sp(), 0);

        let mut seen = 0;
        regs.iterate(&mut |_, _| seen += 1);
        assert_eq!(seen, regs.total_regs(), "{arch}");
    }
}

#[test]
fn pc_and_sp_roundtrip()
{
    for arch in Architecture::SUPPORTED {
        let mut regs = registers::create(arch).unwrap();
        regs.set_pc(0x1234_5678);
        regs.set_sp(0x7fff_0000);
        assert_eq!(regs.pc(), 0x1234_5678, "{arch}");
        assert_eq!(regs.sp(), 0x7fff_0000, "{arch}");

        let copy = regs.clone();
        assert_eq!(copy.pc(), regs.pc());
        assert!(!regs.set(regs.total_regs(), 1));
        assert_eq!(regs.get(regs.total_regs()), None);
    }
}

#[test]
fn thirty_two_bit_files_truncate()
{
    for arch in [Architecture::X86, Architecture::Arm] {
        let mut regs = registers::create(arch).unwrap();
        regs.set_pc(0x1_0000_1000);
        assert_eq!(regs.pc(), 0x1000, "{arch}");
    }
}

#[test]
fn short_blobs_are_rejected()
{
    for arch in Architecture::SUPPORTED {
        let ptrace = registers::from_ptrace(arch, &[0u8; 8], ProcessId::current());
        assert!(matches!(ptrace, Err(JitscopeError::ReadRegistersFailed { .. })), "{arch}");

        let ucontext = registers::from_ucontext(arch, &[0u8; 8]);
        assert!(matches!(ucontext, Err(JitscopeError::ReadRegistersFailed { .. })), "{arch}");
    }
}

#[test]
fn unknown_arch_is_unsupported()
{
    let arch = Architecture::Unknown("sparc");
    assert!(matches!(registers::create(arch), Err(JitscopeError::UnsupportedArchitecture(_))));
    assert!(matches!(registers::from_ucontext(arch, &[0u8; 512]), Err(JitscopeError::UnsupportedArchitecture(_))));
}

#[test]
fn non_trampoline_code_is_not_a_signal_frame()
{
    let code = Snapshot::from_bytes(Address::ZERO, vec![0x90; 64]);
    let stack = Snapshot::from_bytes(Address::ZERO, vec![0xaa; 4096]);
    for arch in Architecture::SUPPORTED {
        let mut regs = registers::create(arch).unwrap();
        regs.set_pc(0x10);
        assert!(!regs.step_if_signal_handler(0, &code, &stack), "{arch}");
        assert_eq!(regs.pc(), 0x10);
    }
}

#[test]
fn link_register_architectures_return_through_lr()
{
    let memory = Snapshot::from_bytes(Address::ZERO, Vec::new());
    for (arch, lr) in [(Architecture::Arm, 14), (Architecture::Arm64, 30), (Architecture::Riscv64, 1)] {
        let mut regs = registers::create(arch).unwrap();
        regs.set_pc(0x1000);
        assert!(regs.set(lr, 0x2000));
        assert!(regs.set_pc_from_return_address(&memory), "{arch}");
        assert_eq!(regs.pc(), 0x2000);
        assert!(!regs.set_pc_from_return_address(&memory), "{arch}");
    }
}

#[test]
fn x86_64_returns_through_the_stack()
{
    let mut stack = vec![0u8; 16];
    stack[8..16].copy_from_slice(&0x5555_0000u64.to_le_bytes());
    let memory = Snapshot::from_bytes(Address::ZERO, stack);

    let mut regs = registers::create(Architecture::X86_64).unwrap();
    regs.set_sp(8);
    assert!(regs.set_pc_from_return_address(&memory));
    assert_eq!(regs.pc(), 0x5555_0000);
    assert_eq!(regs.sp(), 16);
}
