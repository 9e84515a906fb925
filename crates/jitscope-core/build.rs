//! Build script for jitscope-core
//!
//! This script checks system requirements before compilation:
//! - Minimum Rust version
//! - Target platform (process inspection needs Linux or Android)
//!
//! ## Requirements
//!
//! - **Rust**: 1.70.0 or newer (`Option::is_some_and`, `Result::is_ok_and`)
//! - **Linux / Android**: `process_vm_readv` (kernel 3.2+) and `PTRACE_LISTEN` (kernel 3.4+)

fn main()
{
    if let Ok(rustc_version) = rustc_version::version() {
        let min_rust_version = rustc_version::Version::new(1, 70, 0);

        if rustc_version < min_rust_version {
            panic!("jitscope-core requires Rust {} or newer, found {}", min_rust_version, rustc_version);
        }
    } else {
        // If we can't get version (e.g., in some build environments), just warn
        println!("cargo:warning=could not verify Rust version");
    }

    // CARGO_CFG_TARGET_OS describes the target, not the host running this script
    let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    if target_os != "linux" && target_os != "android" {
        println!(
            "cargo:warning=jitscope-core targets Linux and Android; process control and remote memory will not work on {}",
            target_os
        );
    }
}
