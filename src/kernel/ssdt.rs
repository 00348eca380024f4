//! System service dispatch table decoding.
//!
//! On 64-bit kernels `KiServiceTable` holds signed 32-bit offsets relative
//! to the table start: the low four bits carry the stack argument count,
//! so Vista and later shift right by four while Server 2003 (build 3790)
//! only masks them off. 32-bit kernels store absolute pointers.

use std::io::Write;

use thiserror::Error;

use crate::core::memory::MemoryError;
use crate::debug::{DebugTarget, TargetError};

/// Upper bound on the service count we are willing to read
pub const MAX_SERVICES: u64 = 4096;

/// Server 2003 / XP x64 build number
pub const BUILD_2K3: u16 = 3790;

#[derive(Error, Debug)]
pub enum SsdtError {
    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Target(#[from] TargetError),

    #[error("Service count {0:#x} is implausible")]
    ImplausibleCount(u64),
}

/// Decoded service table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceTable {
    pub start: u64,
    /// Routine address per service number
    pub routines: Vec<u64>,
    pub wide: bool,
}

impl ServiceTable {
    pub fn read(target: &dyn DebugTarget) -> Result<Self, SsdtError> {
        let descriptor = target.symbol("nt!KeServiceDescriptorTable")?;

        if target.pointer_size() == 8 {
            let header = target.read_u64s(descriptor, 4)?;
            let (start, count) = (header[0], header[2]);
            let count = checked_count(count)?;

            let build = target.read_u16(target.symbol("nt!NtBuildNumber")?)?;
            let decode: fn(u64, i32) -> u64 = if build == BUILD_2K3 {
                |start, offset| start.wrapping_add_signed(i64::from(offset & !0xf))
            } else {
                |start, offset| start.wrapping_add_signed(i64::from(offset >> 4))
            };

            let routines = target
                .read_i32s(start, count)?
                .into_iter()
                .map(|offset| decode(start, offset))
                .collect();

            Ok(Self {
                start,
                routines,
                wide: true,
            })
        } else {
            let header = target.read_u32s(descriptor, 4)?;
            let start = u64::from(header[0]);
            let count = checked_count(u64::from(header[2]))?;

            Ok(Self {
                start,
                routines: target.read_ptrs(start, count)?,
                wide: false,
            })
        }
    }

    pub fn print(&self, target: &dyn DebugTarget, out: &mut dyn Write) -> std::io::Result<()> {
        writeln!(
            out,
            "ServiceTable  start: {:x}  count: {:x}",
            self.start,
            self.routines.len()
        )?;

        for (i, routine) in self.routines.iter().enumerate() {
            if self.wide {
                writeln!(out, "[{}] {} ({:x})", i, target.find_symbol(*routine), routine)?;
            } else {
                writeln!(out, "[{}] {}", i, target.find_symbol(*routine))?;
            }
        }
        Ok(())
    }
}

fn checked_count(count: u64) -> Result<usize, SsdtError> {
    if count > MAX_SERVICES {
        return Err(SsdtError::ImplausibleCount(count));
    }
    Ok(count as usize)
}
