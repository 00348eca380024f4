//! `_DRIVER_OBJECT` dispatch tables.

use std::io::Write;

use anyhow::Result;

use super::object::KernelObjects;
use super::objdir::{Lookup, Resolver};
use crate::debug::{DebugTarget, TargetError};

pub const DRIVER_OBJECT: &str = "nt!_DRIVER_OBJECT";

/// `IRP_MJ_MAXIMUM_FUNCTION + 1`
pub const MAJOR_FUNCTION_COUNT: usize = 28;

/// Dispatch routines of one driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverObject {
    pub address: u64,
    pub major_functions: Vec<u64>,
}

impl DriverObject {
    pub fn read(target: &dyn DebugTarget, address: u64) -> Result<Self, TargetError> {
        let table = target.require_field(DRIVER_OBJECT, "MajorFunction")?;
        let major_functions = target.read_ptrs(address + table, MAJOR_FUNCTION_COUNT)?;
        Ok(Self {
            address,
            major_functions,
        })
    }
}

/// Print the major function table of `\Driver\<name>`
pub fn print_major_table(
    objects: &KernelObjects<'_>,
    out: &mut dyn Write,
    name: &str,
) -> Result<()> {
    let path = format!("\\Driver\\{}", name);
    let handle = match Resolver::new(objects).lookup(&path)? {
        Lookup::Found(handle) => handle,
        Lookup::NotFound => {
            writeln!(out, "object not found")?;
            return Ok(());
        }
    };

    writeln!(out, "{} {:x}", path, handle)?;

    let target = objects.target();
    let driver = DriverObject::read(target, handle.0)?;
    for (i, routine) in driver.major_functions.iter().enumerate() {
        writeln!(out, "MajorFunction[{}] = {}", i, target.find_symbol(*routine))?;
    }
    Ok(())
}
