//! Print the IRP dispatch table of named drivers.
//!
//! Usage: `run km.drvobj [driver ...]` (defaults to `afd` and `ntfs`)

use std::io::Write;

use anyhow::Result;

use crate::debug::DebugTarget;
use crate::kernel::driver::print_major_table;
use crate::kernel::object::KernelObjects;

const DEFAULT_DRIVERS: [&str; 2] = ["afd", "ntfs"];

pub fn run(target: &dyn DebugTarget, out: &mut dyn Write, args: &[String]) -> Result<()> {
    let objects = KernelObjects::new(target)?;

    if args.is_empty() {
        for name in DEFAULT_DRIVERS {
            print_major_table(&objects, out, name)?;
        }
    } else {
        for name in args {
            print_major_table(&objects, out, name)?;
        }
    }
    Ok(())
}
