//! Symbol lookup in mapped ELF modules.

use std::fs;
use std::path::{Path, PathBuf};

use object::{Object, ObjectSegment, ObjectSymbol};
use tracing::{debug, trace};

use crate::error::Result;
use crate::maps::Module;

/// Resolves a symbol name to its address inside the debuggee.
pub trait SymbolResolver
{
    /// Runtime address of `symbol` in `module`, or `None` if it is not defined there.
    fn resolve(&self, module: &Module, symbol: &str) -> Result<Option<u64>>;
}

/// Reads the module's file from disk and relocates the symbol by the load bias.
///
/// The dynamic symbol table is searched first, then the static one. The load
/// bias comes from the first `PT_LOAD` segment whose file offset falls in one
/// of the module's mappings.
#[derive(Debug, Clone, Default)]
pub struct ElfFileResolver
{
    root: Option<PathBuf>,
}

impl ElfFileResolver
{
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Open module paths relative to `root` (e.g. `/proc/<pid>/root`).
    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self
    {
        self.root = Some(root.into());
        self
    }

    fn file_path(&self, module_path: &Path) -> PathBuf
    {
        match &self.root {
            Some(root) => root.join(module_path.strip_prefix("/").unwrap_or(module_path)),
            None => module_path.to_path_buf(),
        }
    }
}

impl SymbolResolver for ElfFileResolver
{
    fn resolve(&self, module: &Module, symbol: &str) -> Result<Option<u64>>
    {
        let path = self.file_path(&module.path);
        let bytes = fs::read(&path)?;
        let file = object::File::parse(&*bytes)?;

        let Some(link_address) = find_symbol(&file, symbol) else {
            trace!(path = %path.display(), symbol, "symbol not defined in module");
            return Ok(None);
        };

        let Some(bias) = load_bias(&file, module) else {
            debug!(path = %path.display(), "no PT_LOAD segment matches the module's mappings");
            return Ok(None);
        };

        Ok(Some(link_address.wrapping_add(bias)))
    }
}

fn find_symbol(file: &object::File<'_>, name: &str) -> Option<u64>
{
    let defined = |sym: &object::Symbol<'_, '_>| !sym.is_undefined() && sym.name().is_ok_and(|n| n == name);
    file.dynamic_symbols()
        .find(defined)
        .or_else(|| file.symbols().find(defined))
        .map(|sym| sym.address())
}

/// Difference between runtime and link-time addresses for `module`.
fn load_bias(file: &object::File<'_>, module: &Module) -> Option<u64>
{
    file.segments().find_map(|segment| {
        let (file_offset, _) = segment.file_range();
        let mapping = module.mapping_for_offset(file_offset)?;
        let runtime = mapping.start.wrapping_add(file_offset - mapping.offset);
        Some(runtime.wrapping_sub(segment.address()))
    })
}
