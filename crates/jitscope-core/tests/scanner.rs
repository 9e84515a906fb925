//! End-to-end descriptor scanning against an in-memory debuggee.

mod common;

use std::cell::Cell;
use std::path::PathBuf;
use std::rc::Rc;

use common::{FakeMemory, Jit, DESCRIPTOR};
use jitscope_core::error::Result;
use jitscope_core::global_debug::{FixedLocation, GlobalDebugScanner, MapsLocator, RefreshStatus, ScannerConfig};
use jitscope_core::maps::{MapInfo, Module, Permissions};
use jitscope_core::symbols::SymbolResolver;
use jitscope_core::types::{Address, Architecture};
use jitscope_core::LoadedObject;

const ENTRY_A: u64 = 0x2000;
const ENTRY_B: u64 = 0x3000;
const ENTRY_C: u64 = 0x4000;
const IMAGE_A: u64 = 0x4000_0000;
const IMAGE_B: u64 = 0x5000_0000;

fn scanner(memory: &FakeMemory, arch: Architecture) -> GlobalDebugScanner<'_, FakeMemory>
{
    scanner_with(memory, arch, ScannerConfig::default())
}

fn scanner_with(memory: &FakeMemory, arch: Architecture, config: ScannerConfig) -> GlobalDebugScanner<'_, FakeMemory>
{
    GlobalDebugScanner::create(arch, memory, Box::new(FixedLocation(Address::new(DESCRIPTOR))), config).unwrap()
}

fn listing(scanner: &GlobalDebugScanner<'_, FakeMemory>) -> Vec<(u64, u64, bool)>
{
    let mut out = Vec::new();
    scanner.for_each(|o: &LoadedObject| out.push((o.base().value(), o.size(), o.is_valid())));
    out
}

/// Two-entry list with valid images at `IMAGE_A` (4096 bytes) and `IMAGE_B` (8192 bytes).
fn two_objects(arch: Architecture) -> (FakeMemory, Jit)
{
    let memory = FakeMemory::new();
    let jit = Jit::new(arch);
    jit.descriptor(&memory, ENTRY_A, 2);
    jit.entry(&memory, ENTRY_A, ENTRY_B, IMAGE_B, 8192);
    jit.entry(&memory, ENTRY_B, 0, IMAGE_A, 4096);
    memory.write(IMAGE_A, &jit.image(IMAGE_A, 4096));
    memory.write(IMAGE_B, &jit.image(IMAGE_B, 8192));
    (memory, jit)
}

#[test]
fn empty_descriptor_yields_no_objects()
{
    let memory = FakeMemory::new();
    Jit::new(Architecture::X86_64).descriptor(&memory, 0, 1);

    let mut scanner = scanner(&memory, Architecture::X86_64);
    assert_eq!(scanner.refresh(), RefreshStatus::Updated);
    assert!(scanner.is_empty());
    assert_eq!(scanner.descriptor_address(), Some(Address::new(DESCRIPTOR)));
}

#[test]
fn single_entry_becomes_valid_object()
{
    let memory = FakeMemory::new();
    let jit = Jit::new(Architecture::Arm64);
    jit.descriptor(&memory, ENTRY_A, 2);
    jit.entry(&memory, ENTRY_A, 0, IMAGE_A, 4096);
    memory.write(IMAGE_A, &jit.image(IMAGE_A, 4096));

    let mut scanner = scanner(&memory, Architecture::Arm64);
    assert_eq!(scanner.refresh(), RefreshStatus::Updated);
    assert_eq!(listing(&scanner), vec![(IMAGE_A, 4096, true)]);

    let object = scanner.objects().next().unwrap();
    assert_eq!(object.architecture(), Architecture::Arm64);
    assert_eq!(object.image().map(|image| image.len()), Some(4096));
}

#[test]
fn objects_are_ordered_by_base_and_match_entries()
{
    for arch in Architecture::SUPPORTED {
        let (memory, _jit) = two_objects(arch);
        let mut scanner = scanner(&memory, arch);
        assert_eq!(scanner.refresh(), RefreshStatus::Updated, "{arch}");
        assert_eq!(listing(&scanner), vec![(IMAGE_A, 4096, true), (IMAGE_B, 8192, true)], "{arch}");
        assert_eq!(scanner.stats().entries_seen, 2);
    }
}

#[test]
fn oversize_entry_is_skipped_but_walk_continues()
{
    let memory = FakeMemory::new();
    let jit = Jit::new(Architecture::X86_64);
    jit.descriptor(&memory, ENTRY_A, 2);
    jit.entry(&memory, ENTRY_A, ENTRY_B, 0x6000_0000, 20_000_000);
    jit.entry(&memory, ENTRY_B, 0, IMAGE_B, 8192);
    memory.write(IMAGE_B, &jit.image(IMAGE_B, 8192));

    let mut scanner = scanner(&memory, Architecture::X86_64);
    assert_eq!(scanner.refresh(), RefreshStatus::Updated);
    assert_eq!(listing(&scanner), vec![(IMAGE_B, 8192, true)]);
    assert_eq!(scanner.stats().skipped_oversize, 1);
}

#[test]
fn configured_cap_is_honoured()
{
    let (memory, _jit) = two_objects(Architecture::X86_64);
    let mut scanner = scanner_with(&memory, Architecture::X86_64, ScannerConfig::new().with_max_entry_size(4096));
    assert_eq!(scanner.refresh(), RefreshStatus::Updated);
    assert_eq!(listing(&scanner), vec![(IMAGE_A, 4096, true)]);
    assert_eq!(scanner.stats().skipped_oversize, 1);
}

#[test]
fn seqlock_race_is_retried_until_stable()
{
    let memory = FakeMemory::new();
    let jit = Jit::new(Architecture::X86_64);
    jit.descriptor(&memory, ENTRY_A, 2);
    jit.entry(&memory, ENTRY_A, 0, IMAGE_A, 4096);
    memory.write(IMAGE_A, &jit.image(IMAGE_A, 4096));

    // Bump the seqlock on the first two reads of the first entry.
    let bumps = Rc::new(Cell::new(0));
    let seqlock_addr = jit.seqlock_addr();
    let counter = Rc::clone(&bumps);
    memory.on_read(move |addr, mem| {
        if addr == ENTRY_A && counter.get() < 2 {
            counter.set(counter.get() + 1);
            let seq = mem.read_u32_le(seqlock_addr);
            mem.write_u32(seqlock_addr, seq + 2);
        }
    });

    let mut scanner = scanner(&memory, Architecture::X86_64);
    assert_eq!(scanner.refresh(), RefreshStatus::Updated);
    assert_eq!(bumps.get(), 2);
    assert_eq!(scanner.stats().retries, 2);
    assert_eq!(listing(&scanner), vec![(IMAGE_A, 4096, true)]);

    memory.clear_hook();
    assert_eq!(scanner.refresh(), RefreshStatus::Unchanged);
}

#[test]
fn perpetual_race_keeps_previous_cache()
{
    let (memory, jit) = two_objects(Architecture::Arm64);
    let mut scanner = scanner(&memory, Architecture::Arm64);
    assert_eq!(scanner.refresh(), RefreshStatus::Updated);
    let before = listing(&scanner);

    // The runtime drops an entry, then never lets the list settle.
    jit.descriptor(&memory, ENTRY_B, 4);
    let seqlock_addr = jit.seqlock_addr();
    memory.on_read(move |addr, mem| {
        if addr == ENTRY_B {
            let seq = mem.read_u32_le(seqlock_addr);
            mem.write_u32(seqlock_addr, seq + 2);
        }
    });

    assert_eq!(scanner.refresh(), RefreshStatus::Stale);
    assert_eq!(scanner.stats().retries, 3);
    assert_eq!(listing(&scanner), before);
}

#[test]
fn unchanged_seqlock_skips_the_walk()
{
    let (memory, jit) = two_objects(Architecture::X86);
    let mut scanner = scanner(&memory, Architecture::X86);
    assert_eq!(scanner.refresh(), RefreshStatus::Updated);
    let first = listing(&scanner);

    // A list change the runtime has not published yet is not observed.
    jit.descriptor(&memory, 0, 2);
    assert_eq!(scanner.refresh(), RefreshStatus::Unchanged);
    assert_eq!(listing(&scanner), first);
    assert_eq!(scanner.stats().entries_seen, 0);

    jit.set_seqlock(&memory, 4);
    assert_eq!(scanner.refresh(), RefreshStatus::Updated);
    assert!(scanner.is_empty());
}

#[test]
fn identical_state_gives_identical_listings()
{
    let (memory, jit) = two_objects(Architecture::Riscv64);
    let mut scanner = scanner(&memory, Architecture::Riscv64);
    scanner.refresh();
    let first = listing(&scanner);

    jit.set_seqlock(&memory, jit.seqlock(&memory) + 2);
    assert_eq!(scanner.refresh(), RefreshStatus::Updated);
    assert_eq!(listing(&scanner), first);
}

#[test]
fn plain_descriptor_is_rewalked_every_refresh()
{
    let memory = FakeMemory::new();
    let jit = Jit::new(Architecture::Arm);
    jit.plain_descriptor(&memory, ENTRY_A);
    jit.entry(&memory, ENTRY_A, 0, IMAGE_A, 4096);
    memory.write(IMAGE_A, &jit.image(IMAGE_A, 4096));

    let mut scanner = scanner(&memory, Architecture::Arm);
    assert_eq!(scanner.refresh(), RefreshStatus::Updated);
    assert_eq!(scanner.refresh(), RefreshStatus::Updated);
    assert_eq!(listing(&scanner), vec![(IMAGE_A, 4096, true)]);

    jit.plain_descriptor(&memory, 0);
    assert_eq!(scanner.refresh(), RefreshStatus::Updated);
    assert!(scanner.is_empty());
}

#[test]
fn removed_entries_are_evicted()
{
    let (memory, jit) = two_objects(Architecture::X86_64);
    let mut scanner = scanner(&memory, Architecture::X86_64);
    scanner.refresh();
    assert_eq!(scanner.len(), 2);

    jit.descriptor(&memory, ENTRY_B, 4);
    assert_eq!(scanner.refresh(), RefreshStatus::Updated);
    assert_eq!(listing(&scanner), vec![(IMAGE_A, 4096, true)]);
}

#[test]
fn cached_objects_are_reused()
{
    let (memory, jit) = two_objects(Architecture::X86_64);
    let mut scanner = scanner(&memory, Architecture::X86_64);
    scanner.refresh();

    // Corrupt the image in place; an unchanged entry must not be copied again.
    memory.write(IMAGE_A, &[0u8; 16]);
    jit.set_seqlock(&memory, 4);
    assert_eq!(scanner.refresh(), RefreshStatus::Updated);
    assert_eq!(listing(&scanner), vec![(IMAGE_A, 4096, true), (IMAGE_B, 8192, true)]);

    // A new registration timestamp means a new object.
    jit.entry_with(&memory, ENTRY_B, 0, IMAGE_A, 4096, 9, 0);
    jit.set_seqlock(&memory, 6);
    assert_eq!(scanner.refresh(), RefreshStatus::Updated);
    assert_eq!(listing(&scanner), vec![(IMAGE_A, 4096, false), (IMAGE_B, 8192, true)]);
}

#[test]
fn invalid_objects_are_captured_again()
{
    let memory = FakeMemory::new();
    let jit = Jit::new(Architecture::X86_64);
    jit.descriptor(&memory, ENTRY_A, 2);
    jit.entry(&memory, ENTRY_A, 0, IMAGE_A, 4096);

    let mut scanner = scanner(&memory, Architecture::X86_64);
    assert_eq!(scanner.refresh(), RefreshStatus::Updated);
    assert_eq!(listing(&scanner), vec![(IMAGE_A, 4096, false)]);

    // Same entry, but the image is readable now.
    memory.write(IMAGE_A, &jit.image(IMAGE_A, 4096));
    jit.set_seqlock(&memory, 4);
    assert_eq!(scanner.refresh(), RefreshStatus::Updated);
    assert_eq!(listing(&scanner), vec![(IMAGE_A, 4096, true)]);
}

#[test]
fn plain_descriptor_images_are_captured_every_refresh()
{
    let memory = FakeMemory::new();
    let jit = Jit::new(Architecture::Arm);
    jit.plain_descriptor(&memory, ENTRY_A);
    jit.entry(&memory, ENTRY_A, 0, IMAGE_A, 4096);
    memory.write(IMAGE_A, &jit.image(IMAGE_A, 4096));

    let mut scanner = scanner(&memory, Architecture::Arm);
    assert_eq!(scanner.refresh(), RefreshStatus::Updated);
    assert_eq!(listing(&scanner), vec![(IMAGE_A, 4096, true)]);

    // Address and size recycled for different contents.
    memory.write(IMAGE_A, &[0u8; 4096]);
    assert_eq!(scanner.refresh(), RefreshStatus::Updated);
    assert_eq!(listing(&scanner), vec![(IMAGE_A, 4096, false)]);
}

#[test]
fn later_entry_wins_on_base_collision()
{
    let memory = FakeMemory::new();
    let jit = Jit::new(Architecture::Arm64);
    jit.descriptor(&memory, ENTRY_A, 2);
    jit.entry(&memory, ENTRY_A, ENTRY_B, IMAGE_A, 4096);
    jit.entry(&memory, ENTRY_B, 0, IMAGE_A, 8192);
    memory.write(IMAGE_A, &jit.image(IMAGE_A, 8192));

    let mut scanner = scanner(&memory, Architecture::Arm64);
    scanner.refresh();
    assert_eq!(listing(&scanner), vec![(IMAGE_A, 8192, true)]);
}

#[test]
fn invalid_entries_are_counted_and_skipped()
{
    let memory = FakeMemory::new();
    let jit = Jit::new(Architecture::X86_64);
    jit.descriptor(&memory, ENTRY_A, 2);
    jit.entry(&memory, ENTRY_A, ENTRY_B, 0, 4096);
    jit.entry(&memory, ENTRY_B, ENTRY_C, IMAGE_B, 0);
    jit.entry_with(&memory, ENTRY_C, 0, IMAGE_A, 4096, 0, 1);
    memory.write(IMAGE_A, &jit.image(IMAGE_A, 4096));

    let mut scanner = scanner(&memory, Architecture::X86_64);
    assert_eq!(scanner.refresh(), RefreshStatus::Updated);
    assert!(scanner.is_empty());
    let stats = scanner.stats();
    assert_eq!(stats.entries_seen, 3);
    assert_eq!(stats.skipped_invalid, 2);
    assert_eq!(stats.skipped_torn, 1);
}

#[test]
fn unreadable_image_gives_invalid_object()
{
    let memory = FakeMemory::new();
    let jit = Jit::new(Architecture::X86_64);
    jit.descriptor(&memory, ENTRY_A, 2);
    jit.entry(&memory, ENTRY_A, 0, IMAGE_A, 4096);

    let mut scanner = scanner(&memory, Architecture::X86_64);
    assert_eq!(scanner.refresh(), RefreshStatus::Updated);
    assert_eq!(listing(&scanner), vec![(IMAGE_A, 4096, false)]);
    assert!(scanner.find(IMAGE_A).is_none());
}

#[test]
fn cyclic_list_terminates()
{
    let memory = FakeMemory::new();
    let jit = Jit::new(Architecture::X86_64);
    jit.descriptor(&memory, ENTRY_A, 2);
    jit.entry(&memory, ENTRY_A, ENTRY_B, IMAGE_A, 4096);
    jit.entry(&memory, ENTRY_B, ENTRY_A, IMAGE_B, 8192);
    memory.write(IMAGE_A, &jit.image(IMAGE_A, 4096));
    memory.write(IMAGE_B, &jit.image(IMAGE_B, 8192));

    let mut scanner = scanner(&memory, Architecture::X86_64);
    assert_eq!(scanner.refresh(), RefreshStatus::Updated);
    assert_eq!(scanner.len(), 2);
    assert_eq!(scanner.stats().cycles, 1);
}

#[test]
fn list_length_is_bounded()
{
    let (memory, _jit) = two_objects(Architecture::X86_64);
    let mut scanner = scanner_with(&memory, Architecture::X86_64, ScannerConfig::new().with_max_entries(1));
    assert_eq!(scanner.refresh(), RefreshStatus::Updated);
    assert_eq!(listing(&scanner), vec![(IMAGE_B, 8192, true)]);
}

#[test]
fn unreadable_entry_keeps_previous_cache()
{
    let (memory, jit) = two_objects(Architecture::X86_64);
    let mut scanner = scanner(&memory, Architecture::X86_64);
    scanner.refresh();

    jit.descriptor(&memory, 0xdead_0000, 4);
    assert_eq!(scanner.refresh(), RefreshStatus::ReadFailed);
    assert_eq!(scanner.len(), 2);
}

#[test]
fn unknown_version_is_unsupported()
{
    let (memory, jit) = two_objects(Architecture::X86_64);
    jit.set_version(&memory, 2);
    let mut scanner = scanner(&memory, Architecture::X86_64);
    assert_eq!(scanner.refresh(), RefreshStatus::Unsupported);
    assert!(scanner.is_empty());
}

#[test]
fn process_exit_empties_the_scanner()
{
    let (memory, _jit) = two_objects(Architecture::Arm64);
    let mut scanner = scanner(&memory, Architecture::Arm64);
    assert_eq!(scanner.refresh(), RefreshStatus::Updated);
    assert_eq!(scanner.len(), 2);

    memory.exit();
    assert_eq!(scanner.refresh(), RefreshStatus::Exited);
    assert!(scanner.is_exited());
    assert_eq!(scanner.objects().count(), 0);
    assert_eq!(scanner.refresh(), RefreshStatus::Exited);
}

#[test]
fn find_by_pc()
{
    let (memory, _jit) = two_objects(Architecture::Arm);
    let mut scanner = scanner(&memory, Architecture::Arm);
    scanner.refresh();

    assert_eq!(scanner.find(IMAGE_A + 0x10).map(|o| o.base().value()), Some(IMAGE_A));
    assert_eq!(scanner.find(IMAGE_B + 8191).map(|o| o.base().value()), Some(IMAGE_B));
    assert!(scanner.find(IMAGE_A + 4096).is_none());
}

#[test]
fn machine_mismatch_is_kept_as_invalid()
{
    let (memory, _jit) = two_objects(Architecture::Arm64);
    let mut scanner = scanner(&memory, Architecture::Riscv64);
    assert_eq!(scanner.refresh(), RefreshStatus::Updated);
    assert_eq!(listing(&scanner), vec![(IMAGE_A, 4096, false), (IMAGE_B, 8192, false)]);
}

/// Resolves the descriptor symbol only in modules named `libart.so`.
struct ArtResolver;

impl SymbolResolver for ArtResolver
{
    fn resolve(&self, module: &Module, symbol: &str) -> Result<Option<u64>>
    {
        let defines = module.basename() == Some("libart.so") && symbol == "__jit_debug_descriptor";
        Ok(defines.then_some(DESCRIPTOR))
    }
}

fn art_maps(name: &str) -> Vec<MapInfo>
{
    vec![
        MapInfo::new(0x7000_0000, 0x7001_0000, 0, Permissions::R, Some(PathBuf::from("/system/lib64/libc.so"))),
        MapInfo::new(0x7100_0000, 0x7101_0000, 0, Permissions::RX, Some(PathBuf::from(name))),
    ]
}

#[test]
fn maps_locator_finds_descriptor_in_search_libs()
{
    let (memory, _jit) = two_objects(Architecture::X86_64);
    let locator = MapsLocator::with_resolver(art_maps("/apex/com.android.art/lib64/libart.so"), ArtResolver);
    let mut scanner =
        GlobalDebugScanner::create(Architecture::X86_64, &memory, Box::new(locator), ScannerConfig::default()).unwrap();

    assert_eq!(scanner.refresh(), RefreshStatus::Updated);
    assert_eq!(scanner.descriptor_address(), Some(Address::new(DESCRIPTOR)));
    assert_eq!(scanner.len(), 2);
}

#[test]
fn maps_locator_ignores_modules_outside_filter()
{
    let (memory, _jit) = two_objects(Architecture::X86_64);
    let config = ScannerConfig::new().with_search_libs(["libartd.so"]);
    let locator = MapsLocator::with_resolver(art_maps("/apex/com.android.art/lib64/libart.so"), ArtResolver);
    let mut scanner = GlobalDebugScanner::create(Architecture::X86_64, &memory, Box::new(locator), config).unwrap();

    assert_eq!(scanner.refresh(), RefreshStatus::NotFound);
    assert!(scanner.is_empty());
}

#[test]
fn maps_locator_with_empty_filter_searches_everything()
{
    let (memory, _jit) = two_objects(Architecture::X86_64);
    let config = ScannerConfig::new().all_libraries();
    let locator = MapsLocator::with_resolver(art_maps("/apex/com.android.art/lib64/libart.so"), ArtResolver);
    let mut scanner = GlobalDebugScanner::create(Architecture::X86_64, &memory, Box::new(locator), config).unwrap();
    assert_eq!(scanner.refresh(), RefreshStatus::Updated);
}
