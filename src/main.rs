//! kdwalk - Kernel structure walkers
//!
//! Entry point that handles CLI argument parsing, target loading and
//! dispatch between one-shot commands and the interactive shell.

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;

use kdwalk::core::PauseGuard;
use kdwalk::debug::{DebugTarget, ProfileTarget};
use kdwalk::samples;
use kdwalk::ui::cli::run_cli;
use kdwalk::ui::commands::{execute_command, parse_address, ParsedCommand};

/// kdwalk: walk kernel object directories and service tables
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Snapshot (profile + memory) to replay
    #[arg(short, long, conflicts_with = "pid")]
    snapshot: Option<PathBuf>,

    /// Live process to read
    #[arg(short, long, requires = "profile")]
    pid: Option<u32>,

    /// Symbol/type profile for --pid
    #[arg(long)]
    profile: Option<PathBuf>,

    /// Keep the live process stopped while commands run
    #[arg(long, default_value_t = false, requires = "pid")]
    pause: bool,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the bundled samples
    Samples,
    /// Run a sample
    Run {
        name: String,
        args: Vec<String>,
    },
    /// Print a sample's source
    Source { name: String },
    /// Resolve an object path such as \Driver\afd
    Obj { path: String },
    /// List an object directory
    Ls { path: Option<String> },
    /// Dump the system service table
    Ssdt,
    /// Print a driver's major function table
    Drv { name: String },
    /// Find the symbol nearest an address
    Ln { address: String },
    /// Interactive shell
    Shell,
}

impl Command {
    /// Commands that do not touch a target
    fn is_offline(&self) -> bool {
        matches!(self, Command::Samples | Command::Source { .. })
    }

    fn into_parsed(self) -> Result<ParsedCommand> {
        Ok(match self {
            Command::Samples => ParsedCommand::Samples,
            Command::Run { name, args } => ParsedCommand::Run(name, args),
            Command::Source { name } => ParsedCommand::Source(name),
            Command::Obj { path } => ParsedCommand::Object(path),
            Command::Ls { path } => ParsedCommand::List(path),
            Command::Ssdt => ParsedCommand::Ssdt,
            Command::Drv { name } => ParsedCommand::Driver(name),
            Command::Ln { address } => ParsedCommand::Symbol(
                parse_address(&address).with_context(|| format!("bad address '{}'", address))?,
            ),
            Command::Shell => unreachable!("shell is dispatched before parsing"),
        })
    }
}

fn main() -> ExitCode {
    // 1. Parse command line arguments
    let args = Args::parse();

    // 2. Initialize logger with verbosity level
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(
        match args.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        },
    ))
    .init();

    log::debug!("Arguments: {:?}", args);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "[!]".red(), e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let mut stdout = io::stdout().lock();

    if args.command.is_offline() {
        return match args.command {
            Command::Samples => Ok(samples::list(&mut stdout)?),
            Command::Source { name } => samples::source(&name, &mut stdout),
            _ => unreachable!(),
        };
    }

    // 3. Stop a live target first, then load it
    let _pause = match (args.pause, args.pid) {
        (true, Some(pid)) => {
            let guard = PauseGuard::pause(pid)?;
            log::info!("Process {:?} paused", guard.pid());
            Some(guard)
        }
        _ => None,
    };

    let target: Box<dyn DebugTarget> = match (&args.snapshot, args.pid, &args.profile) {
        (Some(path), _, _) => Box::new(
            ProfileTarget::from_snapshot(path)
                .with_context(|| format!("{} - load failed", path.display()))?,
        ),
        (None, Some(pid), Some(profile)) => Box::new(
            ProfileTarget::attach_process(pid, profile)
                .with_context(|| format!("process {} - load failed", pid))?,
        ),
        _ => return Err(anyhow!("no target: pass --snapshot or --pid with --profile")),
    };

    log::info!(
        "Target ready ({}-bit, kernel: {})",
        target.pointer_size() * 8,
        target.is_kernel_debugging()
    );

    // 4. Branch based on execution mode
    if let Command::Shell = args.command {
        drop(stdout);
        return run_cli(target.as_ref());
    }

    execute_command(args.command.into_parsed()?, target.as_ref(), &mut stdout)?;
    Ok(())
}
