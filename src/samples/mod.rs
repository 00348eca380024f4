//! Samples - small walkers runnable by name
//!
//! Each sample ships with its own source so `source <name>` can show what
//! `run <name>` does.

pub mod drvobj;
pub mod ssdt;

use std::io::Write;

use anyhow::Result;
use colored::Colorize;
use thiserror::Error;

use crate::debug::DebugTarget;

#[derive(Error, Debug)]
pub enum SampleError {
    #[error("Unknown sample: {0}")]
    UnknownSample(String),
}

/// Which kind of target a sample needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    KernelMode,
}

type RunFn = fn(&dyn DebugTarget, &mut dyn Write, &[String]) -> Result<()>;

/// A runnable sample
pub struct Sample {
    pub name: &'static str,
    pub section: Section,
    pub description: &'static str,
    pub source: &'static str,
    run: RunFn,
}

pub static SAMPLES: &[Sample] = &[
    Sample {
        name: "km.ssdt",
        section: Section::KernelMode,
        description: "Get kernel service",
        source: include_str!("ssdt.rs"),
        run: ssdt::run,
    },
    Sample {
        name: "km.drvobj",
        section: Section::KernelMode,
        description: "Get driver object",
        source: include_str!("drvobj.rs"),
        run: drvobj::run,
    },
];

pub fn find(name: &str) -> Result<&'static Sample, SampleError> {
    SAMPLES
        .iter()
        .find(|s| s.name == name)
        .ok_or_else(|| SampleError::UnknownSample(name.to_string()))
}

/// Print the sample catalogue
pub fn list(out: &mut dyn Write) -> std::io::Result<()> {
    writeln!(out, "{}", "Kernel mode".bold())?;
    for sample in SAMPLES.iter().filter(|s| s.section == Section::KernelMode) {
        writeln!(
            out,
            "  {:<28} run: {}  source: {}",
            sample.description,
            format!("kdwalk run {}", sample.name).green(),
            format!("kdwalk source {}", sample.name).green()
        )?;
    }
    writeln!(out)
}

/// Run a sample against `target`
pub fn run(
    name: &str,
    target: &dyn DebugTarget,
    out: &mut dyn Write,
    args: &[String],
) -> Result<()> {
    let sample = find(name)?;

    if sample.section == Section::KernelMode && !target.is_kernel_debugging() {
        writeln!(out, "not a kernel debugging")?;
        return Ok(());
    }

    log::info!("Running sample {}", sample.name);
    (sample.run)(target, out, args)
}

/// Print a sample's source
pub fn source(name: &str, out: &mut dyn Write) -> Result<()> {
    let sample = find(name)?;
    out.write_all(sample.source.as_bytes())?;
    Ok(())
}
