use std::io::{self, BufRead};
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use jitscope_core::global_debug::{GlobalDebugScanner, RefreshStatus, ScannerConfig};
use jitscope_core::maps::ProcMaps;
use jitscope_core::memory::RemoteMemory;
use jitscope_core::process::ProcessControl;
use jitscope_core::registers::{self, RegisterFile};
use jitscope_core::symbols::demangle;
use jitscope_core::types::{Architecture, ProcessId};
use jitscope_core::LoadedObject;
use jitscope_utils::{
    debug, info, init_logging, init_logging_to_file, init_logging_with_level, warn, LogFormat, LogLevel, LoggingGuard,
};

/// List JIT-compiled code objects registered by a running process.
#[derive(Parser, Debug)]
#[command(name = "jitscope")]
#[command(version)]
#[command(about = "List JIT-compiled code objects registered by a running process", long_about = None)]
struct Cli
{
    #[command(flatten)]
    logging: LoggingArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct LoggingArgs
{
    /// Log level (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,
    /// Log format: pretty or json
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,
    /// Write logs to this file instead of the console
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ScanArgs
{
    /// Process ID (PID) to inspect
    pid: u32,
    /// Target architecture (defaults to the host's)
    #[arg(long)]
    arch: Option<Architecture>,
    /// Descriptor symbol name
    #[arg(long, default_value = jitscope_core::global_debug::DEFAULT_DESCRIPTOR_SYMBOL)]
    symbol: String,
    /// Library basename to search for the descriptor (repeatable)
    #[arg(long = "lib")]
    libs: Vec<String>,
    /// Search every mapped library
    #[arg(long, conflicts_with = "libs")]
    all_libs: bool,
    /// Maximum number of list entries to walk
    #[arg(long, default_value_t = jitscope_core::global_debug::DEFAULT_MAX_ENTRIES)]
    max_entries: usize,
    /// Stop the process while reading the descriptor
    #[arg(long, default_value_t = false)]
    stop: bool,
}

impl ScanArgs
{
    fn config(&self) -> ScannerConfig
    {
        let config = ScannerConfig::new().with_symbol(self.symbol.clone()).with_max_entries(self.max_entries);
        if self.all_libs {
            config.all_libraries()
        } else if self.libs.is_empty() {
            config
        } else {
            config.with_search_libs(self.libs.iter().cloned())
        }
    }

    fn arch(&self) -> Architecture
    {
        self.arch.unwrap_or_else(Architecture::current)
    }
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// Read the JIT descriptor once and list its code objects
    Scan(ScanArgs),
    /// Re-read the descriptor periodically and report changes until Ctrl-C
    Watch
    {
        #[command(flatten)]
        scan: ScanArgs,
        /// Milliseconds between refreshes
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
    },
    /// Stop a process and print its registers
    Regs
    {
        /// Process ID (PID) to inspect
        pid: u32,
    },
    /// Demangle symbol names (reads stdin when none are given)
    Demangle
    {
        names: Vec<String>,
    },
}

fn main()
{
    let cli = Cli::parse();

    let _guard = match init_cli_logging(&cli.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = run_command(cli.command) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn init_cli_logging(args: &LoggingArgs) -> Result<LoggingGuard, jitscope_utils::LoggingError>
{
    let format = args.log_format.unwrap_or_default();
    match (&args.log_file, args.log_level) {
        (Some(path), level) => init_logging_to_file(path, format, level),
        (None, Some(level)) => init_logging_with_level(level, format),
        (None, None) => init_logging(),
    }
}

fn run_command(command: Commands) -> Result<(), Box<dyn std::error::Error>>
{
    match command {
        Commands::Scan(args) => scan(&args),
        Commands::Watch { scan, interval_ms } => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(watch(&scan, Duration::from_millis(interval_ms.max(1))))
        }
        Commands::Regs { pid } => regs(ProcessId::from(pid)),
        Commands::Demangle { names } => {
            if names.is_empty() {
                for line in io::stdin().lock().lines() {
                    println!("{}", demangle(line?.trim()));
                }
            } else {
                for name in names {
                    println!("{}", demangle(&name));
                }
            }
            Ok(())
        }
    }
}

fn scan(args: &ScanArgs) -> Result<(), Box<dyn std::error::Error>>
{
    let pid = ProcessId::from(args.pid);
    let memory = RemoteMemory::new(pid);
    let mut scanner = GlobalDebugScanner::with_maps(args.arch(), &memory, ProcMaps::new(pid), args.config())?;

    let status = if args.stop {
        let mut control = ProcessControl::new(pid);
        control.attach()?;
        control.quiesce()?;
        let status = scanner.refresh();
        control.detach()?;
        status
    } else {
        scanner.refresh()
    };

    info!(pid = pid.0, %status, "scan finished");
    report(&scanner, status);
    Ok(())
}

async fn watch(args: &ScanArgs, interval: Duration) -> Result<(), Box<dyn std::error::Error>>
{
    let pid = ProcessId::from(args.pid);
    let memory = RemoteMemory::new(pid);
    let mut scanner = GlobalDebugScanner::with_maps(args.arch(), &memory, ProcMaps::new(pid), args.config())?;
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let before: Vec<(u64, u64)> = scanner.objects().map(|o| (o.base().value(), o.size())).collect();
                match scanner.refresh() {
                    RefreshStatus::Updated => {
                        let after: Vec<(u64, u64)> = scanner.objects().map(|o| (o.base().value(), o.size())).collect();
                        if before != after {
                            report(&scanner, RefreshStatus::Updated);
                        }
                    }
                    RefreshStatus::Exited => {
                        println!("Process {} exited", pid);
                        return Ok(());
                    }
                    RefreshStatus::Stale => warn!(pid = pid.0, "descriptor kept changing; will retry"),
                    status => debug!(pid = pid.0, %status, "refresh"),
                }
            }
            result = tokio::signal::ctrl_c() => {
                result?;
                info!(pid = pid.0, "interrupted");
                return Ok(());
            }
        }
    }
}

fn regs(pid: ProcessId) -> Result<(), Box<dyn std::error::Error>>
{
    let mut control = ProcessControl::new(pid);
    control.attach()?;
    control.quiesce()?;
    let regs = registers::remote_get(pid);
    control.detach()?;
    print_registers(&*regs?);
    Ok(())
}

fn report<M: jitscope_core::MemoryView + ?Sized>(scanner: &GlobalDebugScanner<'_, M>, status: RefreshStatus)
{
    let stats = scanner.stats();
    let descriptor = scanner.descriptor_address().map_or_else(|| "not found".to_string(), |a| a.to_string());
    println!("\nDescriptor: {} ({})", descriptor, status);
    println!("  Objects: {}", scanner.len());
    println!(
        "  Entries seen: {}  skipped: {} oversize, {} invalid, {} torn  cycles: {}  retries: {}",
        stats.entries_seen,
        stats.skipped_oversize,
        stats.skipped_invalid,
        stats.skipped_torn,
        stats.cycles,
        stats.retries
    );
    scanner.for_each(print_object);
}

fn print_object(object: &LoadedObject)
{
    let range = match object.load_range() {
        Some(range) => format!("{:#x}-{:#x}", range.start, range.end),
        None => "-".to_string(),
    };
    let validity = if object.is_valid() { "valid" } else { "invalid" };
    println!("  {}  {:>10}  {:<8}  {}", object.base(), object.size(), validity, range);
}

fn print_registers(regs: &dyn RegisterFile)
{
    println!("\nRegisters ({}):", regs.architecture());
    regs.iterate(&mut |name, value| println!("  {:>6}: {:#018x}", name, value));
}
