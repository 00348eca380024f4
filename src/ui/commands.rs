//! Command processing
//!
//! Shared command definitions used by both the one-shot CLI and the REPL.

use std::io::Write;

use anyhow::{bail, Result};
use colored::Colorize;

use crate::debug::DebugTarget;
use crate::kernel::driver::print_major_table;
use crate::kernel::objdir::{Lookup, Resolver};
use crate::kernel::object::{KernelObjects, ObjectNamespace};
use crate::kernel::ssdt::ServiceTable;
use crate::samples;

/// Default byte count for `db`
const DEFAULT_DUMP_LEN: usize = 0x40;

/// Largest `db` we allow in one go
const MAX_DUMP_LEN: usize = 0x10000;

/// Command parsing result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedCommand {
    /// List samples: samples
    Samples,
    /// Run a sample: run <name> [args..]
    Run(String, Vec<String>),
    /// Show sample source: source <name>
    Source(String),
    /// Resolve an object path: obj <path>
    Object(String),
    /// List a directory: ls [path]
    List(Option<String>),
    /// Dump the service table: ssdt
    Ssdt,
    /// Print a driver dispatch table: drv <name>
    Driver(String),
    /// Symbol for an address: ln <addr>
    Symbol(u64),
    /// Hex dump: db <addr> [len]
    Dump(u64, usize),
    /// Help: ? or help
    Help,
    /// Quit: q or exit
    Quit,
    /// Unknown command
    Unknown(String),
}

/// What the caller should do after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Parse a command string into a structured command
pub fn parse_command(input: &str) -> ParsedCommand {
    let input = input.trim();
    let mut words = input.split_whitespace();
    let cmd = words.next().unwrap_or("");
    let args: Vec<String> = words.map(str::to_string).collect();
    let arg = args.first().cloned();

    match cmd {
        "samples" | "list" => ParsedCommand::Samples,
        "run" => match args.split_first() {
            Some((name, rest)) => ParsedCommand::Run(name.clone(), rest.to_vec()),
            None => ParsedCommand::Unknown(input.to_string()),
        },
        "source" | "src" => match arg {
            Some(name) => ParsedCommand::Source(name),
            None => ParsedCommand::Unknown(input.to_string()),
        },
        "obj" | "object" => match arg {
            Some(path) => ParsedCommand::Object(path),
            None => ParsedCommand::Unknown(input.to_string()),
        },
        "ls" | "dir" => ParsedCommand::List(arg),
        "ssdt" => ParsedCommand::Ssdt,
        "drv" | "drvobj" => match arg {
            Some(name) => ParsedCommand::Driver(name),
            None => ParsedCommand::Unknown(input.to_string()),
        },
        "ln" => match arg.as_deref().map(parse_address) {
            Some(Ok(addr)) => ParsedCommand::Symbol(addr),
            _ => ParsedCommand::Unknown(input.to_string()),
        },
        "db" => {
            let addr = arg.as_deref().map(parse_address);
            let len = match args.get(1) {
                Some(len) => parse_address(len).ok().and_then(|l| usize::try_from(l).ok()),
                None => Some(DEFAULT_DUMP_LEN),
            };
            match (addr, len) {
                (Some(Ok(addr)), Some(len)) => ParsedCommand::Dump(addr, len),
                _ => ParsedCommand::Unknown(input.to_string()),
            }
        }
        "?" | "help" => ParsedCommand::Help,
        "q" | "quit" | "exit" => ParsedCommand::Quit,
        _ => ParsedCommand::Unknown(input.to_string()),
    }
}

/// Parse an address string: `0x` prefix, bare hex longer than 4 digits,
/// or decimal. WinDbg's backtick separator is ignored.
pub fn parse_address(s: &str) -> Result<u64, std::num::ParseIntError> {
    let s = s.trim().replace('`', "");
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else if s.len() > 4 && s.chars().all(|c| c.is_ascii_hexdigit()) {
        u64::from_str_radix(&s, 16)
    } else {
        s.parse()
    }
}

/// Print the help message
pub fn print_help(out: &mut dyn Write) -> std::io::Result<()> {
    writeln!(out, "{}", "kdwalk Commands".bold().cyan())?;
    writeln!(out, "{}", "═".repeat(50).cyan())?;

    writeln!(out, "\n{}", "Samples:".bold().yellow())?;
    writeln!(out, "  {}              List samples", "samples".green())?;
    writeln!(out, "  {}  Run a sample", "run <name> [args]".green())?;
    writeln!(out, "  {}        Show sample source", "source <name>".green())?;

    writeln!(out, "\n{}", "Objects:".bold().yellow())?;
    writeln!(out, "  {}           Resolve an object path", "obj <path>".green())?;
    writeln!(out, "  {}            List a directory", "ls [path]".green())?;
    writeln!(out, "  {}           Driver dispatch table", "drv <name>".green())?;
    writeln!(out, "  {}                 System service table", "ssdt".green())?;

    writeln!(out, "\n{}", "Memory:".bold().yellow())?;
    writeln!(out, "  {}            Nearest symbol", "ln <addr>".green())?;
    writeln!(out, "  {}     Hex dump", "db <addr> [len]".green())?;

    writeln!(out, "\n{}", "Other:".bold().yellow())?;
    writeln!(out, "  {}                    Show this help", "?".green())?;
    writeln!(out, "  {}                    Quit", "q".green())
}

/// Execute a parsed command against `target`
pub fn execute_command(
    cmd: ParsedCommand,
    target: &dyn DebugTarget,
    out: &mut dyn Write,
) -> Result<Flow> {
    match cmd {
        ParsedCommand::Samples => samples::list(out)?,
        ParsedCommand::Run(name, args) => samples::run(&name, target, out, &args)?,
        ParsedCommand::Source(name) => samples::source(&name, out)?,
        ParsedCommand::Object(path) => {
            let objects = KernelObjects::new(target)?;
            match Resolver::new(&objects).lookup(&path)? {
                Lookup::Found(handle) => {
                    let header = objects.read_header(handle)?;
                    let kind = if objects.is_directory_type(header.type_ref)? {
                        " <Directory>"
                    } else {
                        ""
                    };
                    writeln!(out, "{} {:x}{}", path, handle, kind)?;
                }
                Lookup::NotFound => writeln!(out, "object not found")?,
            }
        }
        ParsedCommand::List(path) => {
            let objects = KernelObjects::new(target)?;
            let resolver = Resolver::new(&objects);
            let path = path.unwrap_or_else(|| "\\".to_string());

            let directory = if path == "\\" {
                objects.root_directory()?
            } else {
                match resolver.lookup(&path)? {
                    Lookup::Found(handle) => handle,
                    Lookup::NotFound => {
                        writeln!(out, "object not found")?;
                        return Ok(Flow::Continue);
                    }
                }
            };

            let header = objects.read_header(directory)?;
            if !objects.is_directory_type(header.type_ref)? {
                bail!("{} is not a directory", path);
            }

            writeln!(out, "Directory {} {:x}", path, directory)?;
            for row in resolver.list(directory)? {
                let kind = if row.is_directory { "<Directory>" } else { "" };
                writeln!(
                    out,
                    "  [{:2}] {:016x} {} {}",
                    row.bucket,
                    row.object.0,
                    row.name,
                    kind
                )?;
            }
        }
        ParsedCommand::Ssdt => {
            ServiceTable::read(target)?.print(target, out)?;
        }
        ParsedCommand::Driver(name) => {
            let objects = KernelObjects::new(target)?;
            print_major_table(&objects, out, &name)?;
        }
        ParsedCommand::Symbol(addr) => {
            writeln!(out, "{:x} {}", addr, target.find_symbol(addr))?;
        }
        ParsedCommand::Dump(addr, len) => {
            if len > MAX_DUMP_LEN {
                bail!("dump length {:#x} exceeds {:#x}", len, MAX_DUMP_LEN);
            }
            let mut bytes = vec![0u8; len];
            target.read(addr, &mut bytes)?;
            for (i, line) in bytes.chunks(16).enumerate() {
                writeln!(
                    out,
                    "{:016x}  {}",
                    addr.wrapping_add((i * 16) as u64),
                    hex_line(line)
                )?;
            }
        }
        ParsedCommand::Help => print_help(out)?,
        ParsedCommand::Quit => return Ok(Flow::Quit),
        ParsedCommand::Unknown(input) => {
            writeln!(out, "{} Unknown command: '{}'", "[!]".red(), input)?;
            writeln!(out, "    Type '?' for help")?;
        }
    }
    Ok(Flow::Continue)
}

/// `de ad be ef` style byte group
fn hex_line(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| hex::encode([*b]))
        .collect::<Vec<_>>()
        .join(" ")
}
