//! Dump the kernel system service table with symbols.

use std::io::Write;

use anyhow::Result;

use crate::debug::DebugTarget;
use crate::kernel::ssdt::ServiceTable;

pub fn run(target: &dyn DebugTarget, out: &mut dyn Write, _args: &[String]) -> Result<()> {
    let table = ServiceTable::read(target)?;
    table.print(target, out)?;
    Ok(())
}
