//! Symbol demangling.
//!
//! Compilers "mangle" symbol names to encode type information and namespaces.
//! [`demangle`] turns the schemes found in JIT and linker generated code back
//! into readable names:
//!
//! - **C++**: Itanium ABI mangling (`_Z...`), via `cpp_demangle`
//! - **Rust**: v0 mangling (`_R...`), via `rustc-demangle`
//! - **Linker stubs**: the dynamic linker exports its own copies of libc
//!   helpers under a `__dl_` prefix; the prefix is kept and the rest is
//!   demangled
//!
//! Everything else, and anything a demangler rejects, is returned verbatim.

use cpp_demangle::{BorrowedSymbol, DemangleOptions, ParseOptions};
use rustc_demangle::try_demangle;

/// Prefix the dynamic linker puts in front of its private symbols.
pub const LINKER_PREFIX: &str = "__dl_";

/// Guard against pathological nesting in hostile symbol tables.
const RECURSION_LIMIT: u32 = 1000;

/// Demangle `name`, returning it unchanged when it is not mangled.
///
/// ## Example
///
/// ```rust
/// use jitscope_core::symbols::demangle;
///
/// assert_eq!(demangle("_Z4fakeb"), "fake(bool)");
/// assert_eq!(demangle("__dl__Z4fakeb"), "__dl_fake(bool)");
/// assert_eq!(demangle("_RNvCs4VPobU5SDH_12profcollectd4main"), "profcollectd::main");
/// assert_eq!(demangle("plain_symbol"), "plain_symbol");
/// ```
pub fn demangle(name: &str) -> String
{
    match name.strip_prefix(LINKER_PREFIX) {
        Some(rest) => format!("{LINKER_PREFIX}{}", demangle_unprefixed(rest)),
        None => demangle_unprefixed(name),
    }
}

fn demangle_unprefixed(name: &str) -> String
{
    let demangled = if name.starts_with("_Z") {
        demangle_itanium(name)
    } else if name.starts_with("_R") {
        demangle_rust_v0(name)
    } else {
        None
    };
    match demangled {
        Some(text) if !looks_mangled(&text) => text,
        _ => name.to_string(),
    }
}

/// Whether [`demangle`] would transform `text` again.
///
/// A name whose demangled form is itself mangled (`_Z8_Z4fakeb` is the data
/// symbol `_Z4fakeb`) stays verbatim so that demangling is idempotent.
fn looks_mangled(text: &str) -> bool
{
    text.starts_with("_Z") || text.starts_with("_R") || text.starts_with(LINKER_PREFIX)
}

fn demangle_itanium(name: &str) -> Option<String>
{
    let parse = ParseOptions::default().recursion_limit(RECURSION_LIMIT);
    let symbol = BorrowedSymbol::new_with_options(name.as_bytes(), &parse).ok()?;
    symbol.demangle(&DemangleOptions::default().recursion_limit(RECURSION_LIMIT)).ok()
}

fn demangle_rust_v0(name: &str) -> Option<String>
{
    // `{:#}` drops the crate disambiguator hash.
    try_demangle(name).ok().map(|symbol| format!("{symbol:#}"))
}
