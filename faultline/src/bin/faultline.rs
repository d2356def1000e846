use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::Parser;
use slog::{Logger, error, info, warn};

use faultline::campaign::{Campaign, CampaignOptions, remove_campaign_files};
use faultline::logging::{self, LogOptions};
use faultline::runner::ForkRunner;
use faultline::shim;
use faultline::symbolize::Addr2Line;
use faultline::target;
use faultline_protocol::ops::{Op, OpSet};

/// Fault-injection testing of allocation and file-I/O failure handling.
///
/// Profiles the target to find every call site of the enabled
/// operations, then re-runs it once per site with that single call
/// forced to fail, reporting which failures the target survives.
#[derive(Parser, Debug)]
#[command(name = "faultline", version, arg_required_else_help = true)]
struct Cli {
    /// List the operations that can be enabled or disabled
    #[arg(long)]
    list_ops: bool,

    /// Enable every operation
    #[arg(long)]
    all: bool,

    /// Disable every operation
    #[arg(long)]
    none: bool,

    /// Enable an operation (repeatable)
    #[arg(long, value_name = "OP")]
    enable: Vec<String>,

    /// Disable an operation (repeatable)
    #[arg(long, value_name = "OP")]
    disable: Vec<String>,

    /// Disable all memory-allocation operations
    #[arg(long)]
    no_memory: bool,

    /// Enable all file-I/O operations
    #[arg(long)]
    file_io: bool,

    /// Only do the profile step, no fault injection
    #[arg(long)]
    profile_only: bool,

    /// Only do the injection step, reusing an existing call-site table
    #[arg(long, conflicts_with = "profile_only")]
    inject_only: bool,

    /// Trace heap allocations and report memory leaks
    #[arg(long)]
    trace_heap: bool,

    /// Run the target under valgrind
    #[arg(long)]
    valgrind: bool,

    /// Colorize console output
    #[arg(long)]
    colorlog: bool,

    /// Do not output anything on the console
    #[arg(long)]
    silent: bool,

    /// Log file name
    #[arg(long, value_name = "FILE", default_value = "log.txt")]
    logfile: PathBuf,

    /// Disable the log file
    #[arg(long)]
    no_logfile: bool,

    /// Target binary and its arguments
    #[arg(value_name = "TARGET", trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let log_options = LogOptions {
        console: !cli.silent,
        color: cli.colorlog,
        file: (!cli.no_logfile).then(|| cli.logfile.clone()),
    };
    let log = match logging::create_logger(&log_options) {
        Ok(log) => log,
        Err(err) => {
            eprintln!("faultline: {err:#}");
            return ExitCode::FAILURE;
        }
    };
    match run(cli, &log) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(log, "{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli, log: &Logger) -> Result<()> {
    if cli.list_ops {
        info!(log, "Available operations:");
        for op in Op::ALL.into_iter().skip(1) {
            info!(log, " > {op}");
        }
        return Ok(());
    }

    let operations = operations(&cli)?;
    let Some((target_path, target_args)) = cli.command.split_first() else {
        bail!("no target binary given; see --help");
    };

    info!(log, "Starting, version {}", env!("CARGO_PKG_VERSION"));

    let target_info =
        target::inspect(Path::new(target_path)).context("target verification failed")?;
    info!(log, "Binary: {target_path} ({})", target_info.bitness);
    for (index, arg) in target_args.iter().enumerate() {
        info!(log, " Param {:2}: {arg}", index + 1);
    }
    if !target_info.has_debug_info {
        warn!(log, "Could not find debugging info! Did you compile with -g?");
    }
    for op in operations.iter() {
        info!(log, "Activate operation '{op}'");
    }

    let staged = shim::stage(Path::new(".")).context("could not stage the interception runtime")?;
    info!(log, "Interception runtime staged at {}", staged.display());

    // Recorded call-site addresses must stay valid across every later
    // injection run, so a fixed load base is structural, not cosmetic.
    match target::disable_aslr() {
        Ok(()) => info!(log, "ASLR turned off successfully"),
        Err(err) => warn!(log, "Could not turn off ASLR: {err:#}"),
    }

    // An interrupted campaign still removes its protocol files.
    ctrlc::set_handler(move || {
        remove_campaign_files(Path::new("."));
        std::process::exit(130);
    })
    .context("could not install the interrupt handler")?;

    let wrapper = cli.valgrind.then_some("valgrind");
    let runner = ForkRunner::new(target_path, target_args, wrapper)?;
    let options = CampaignOptions {
        operations,
        trace_heap: cli.trace_heap,
        profile_only: cli.profile_only,
        inject_only: cli.inject_only,
    };
    let mut campaign = Campaign::new(
        ".",
        target_path.as_str(),
        options,
        runner,
        Addr2Line,
        log.clone(),
    );
    let result = campaign.run();
    remove_campaign_files(Path::new("."));
    result?;

    info!(log, "finished successfully!");
    Ok(())
}

fn operations(cli: &Cli) -> Result<OpSet> {
    let mut set = OpSet::default_set();
    if cli.all {
        set = OpSet::all();
    }
    if cli.none {
        set = OpSet::EMPTY;
    }
    if cli.no_memory {
        set.disable_group(&Op::MEMORY);
    }
    if cli.file_io {
        set.enable_group(&Op::FILE_IO);
    }
    for name in &cli.enable {
        set.enable(named(name)?);
    }
    for name in &cli.disable {
        set.disable(named(name)?);
    }
    Ok(set)
}

fn named(name: &str) -> Result<Op> {
    Op::from_name(name).with_context(|| format!("unknown operation '{name}'; see --list-ops"))
}
