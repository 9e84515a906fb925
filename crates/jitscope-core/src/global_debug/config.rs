//! Scanner configuration.

use crate::memory::MAX_SNAPSHOT_SIZE;

/// Symbol the runtime exports its JIT descriptor under.
pub const DEFAULT_DESCRIPTOR_SYMBOL: &str = "__jit_debug_descriptor";

/// Libraries that define the descriptor on Android.
pub const DEFAULT_SEARCH_LIBS: [&str; 2] = ["libart.so", "libartd.so"];

/// Upper bound on list length before the walk gives up.
pub const DEFAULT_MAX_ENTRIES: usize = 4096;

/// Restarts allowed when the debuggee mutates the list mid-walk.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Where to find the descriptor and how far to trust it.
///
/// ## Example
///
/// ```rust
/// use jitscope_core::global_debug::ScannerConfig;
///
/// let config = ScannerConfig::new()
///     .with_symbol("__dex_debug_descriptor")
///     .with_search_libs(["libart.so"])
///     .with_max_entries(128);
/// assert_eq!(config.symbol(), "__dex_debug_descriptor");
/// assert_eq!(config.max_retries(), 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannerConfig
{
    symbol: String,
    search_libs: Vec<String>,
    max_entries: usize,
    max_entry_size: u64,
    max_retries: u32,
}

impl Default for ScannerConfig
{
    fn default() -> Self
    {
        Self {
            symbol: DEFAULT_DESCRIPTOR_SYMBOL.to_string(),
            search_libs: DEFAULT_SEARCH_LIBS.iter().map(|lib| lib.to_string()).collect(),
            max_entries: DEFAULT_MAX_ENTRIES,
            max_entry_size: MAX_SNAPSHOT_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl ScannerConfig
{
    pub fn new() -> Self
    {
        Self::default()
    }

    #[must_use]
    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self
    {
        self.symbol = symbol.into();
        self
    }

    /// Restrict the descriptor search to modules with these basenames.
    #[must_use]
    pub fn with_search_libs<I, S>(mut self, libs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.search_libs = libs.into_iter().map(Into::into).collect();
        self
    }

    /// Search every file-backed module.
    #[must_use]
    pub fn all_libraries(mut self) -> Self
    {
        self.search_libs.clear();
        self
    }

    #[must_use]
    pub fn with_max_entries(mut self, max_entries: usize) -> Self
    {
        self.max_entries = max_entries;
        self
    }

    /// Per-entry size cap, never above [`MAX_SNAPSHOT_SIZE`].
    #[must_use]
    pub fn with_max_entry_size(mut self, size: u64) -> Self
    {
        self.max_entry_size = size.min(MAX_SNAPSHOT_SIZE);
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self
    {
        self.max_retries = retries;
        self
    }

    pub fn symbol(&self) -> &str
    {
        &self.symbol
    }

    /// Empty means every module.
    pub fn search_libs(&self) -> &[String]
    {
        &self.search_libs
    }

    pub fn max_entries(&self) -> usize
    {
        self.max_entries
    }

    pub fn max_entry_size(&self) -> u64
    {
        self.max_entry_size
    }

    pub fn max_retries(&self) -> u32
    {
        self.max_retries
    }
}
