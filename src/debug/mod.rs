//! Debug module - The host binding that walkers read targets through.
//!
//! Provides:
//! - Raw and typed memory reads
//! - Symbol lookup in both directions
//! - Structure field offsets
//!
//! Every walker takes a `&dyn DebugTarget` explicitly; there is no
//! process-wide "current target".

pub mod types;

use std::collections::BTreeMap;
use std::path::Path;

use thiserror::Error;

use crate::core::memory::{MemoryError, MemoryManager, MemorySource, SnapshotMemory};
use types::{Profile, ProfileError, Snapshot, TypeLayout};

/// Longest UNICODE_STRING we decode, in bytes
const MAX_UNICODE_BYTES: usize = 0xFFFF;

/// Target binding errors
#[derive(Error, Debug)]
pub enum TargetError {
    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("Unknown type: {0}")]
    UnknownType(String),

    #[error("Type {ty} has no field {field}")]
    MissingField { ty: String, field: String },
}

/// Platform-agnostic view of a debug target
pub trait DebugTarget {
    /// Read exactly `buffer.len()` bytes at `address`
    fn read(&self, address: u64, buffer: &mut [u8]) -> Result<(), MemoryError>;

    /// Pointer width in bytes
    fn pointer_size(&self) -> usize;

    /// Whether this target is an OS kernel
    fn is_kernel_debugging(&self) -> bool;

    /// Address of a module-qualified symbol such as `nt!NtBuildNumber`
    fn symbol(&self, name: &str) -> Result<u64, TargetError>;

    fn has_symbol(&self, name: &str) -> bool {
        self.symbol(name).is_ok()
    }

    /// Offset of `field` within `ty`, or `None` if the type lacks it
    fn field_offset(&self, ty: &str, field: &str) -> Result<Option<u64>, TargetError>;

    fn type_size(&self, ty: &str) -> Result<u64, TargetError>;

    /// Nearest symbol at or below `address`, as `name` or `name+0x10`
    fn find_symbol(&self, address: u64) -> String;

    fn read_u8(&self, address: u64) -> Result<u8, MemoryError> {
        let mut buf = [0u8; 1];
        self.read(address, &mut buf)?;
        Ok(buf[0])
    }

    fn read_u16(&self, address: u64) -> Result<u16, MemoryError> {
        let mut buf = [0u8; 2];
        self.read(address, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn read_u32(&self, address: u64) -> Result<u32, MemoryError> {
        let mut buf = [0u8; 4];
        self.read(address, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_i32(&self, address: u64) -> Result<i32, MemoryError> {
        Ok(self.read_u32(address)? as i32)
    }

    fn read_u64(&self, address: u64) -> Result<u64, MemoryError> {
        let mut buf = [0u8; 8];
        self.read(address, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Read a pointer-sized value, zero-extended
    fn read_ptr(&self, address: u64) -> Result<u64, MemoryError> {
        match self.pointer_size() {
            4 => Ok(u64::from(self.read_u32(address)?)),
            _ => self.read_u64(address),
        }
    }

    fn read_u32s(&self, address: u64, count: usize) -> Result<Vec<u32>, MemoryError> {
        let mut buf = vec![0u8; count * 4];
        self.read(address, &mut buf)?;
        Ok(buf
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    fn read_i32s(&self, address: u64, count: usize) -> Result<Vec<i32>, MemoryError> {
        Ok(self
            .read_u32s(address, count)?
            .into_iter()
            .map(|v| v as i32)
            .collect())
    }

    fn read_u64s(&self, address: u64, count: usize) -> Result<Vec<u64>, MemoryError> {
        let mut buf = vec![0u8; count * 8];
        self.read(address, &mut buf)?;
        Ok(buf
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect())
    }

    fn read_ptrs(&self, address: u64, count: usize) -> Result<Vec<u64>, MemoryError> {
        match self.pointer_size() {
            4 => Ok(self
                .read_u32s(address, count)?
                .into_iter()
                .map(u64::from)
                .collect()),
            _ => self.read_u64s(address, count),
        }
    }

    /// Decode a `UNICODE_STRING` at `address`
    fn read_unicode_string(&self, address: u64) -> Result<String, MemoryError> {
        let length = usize::from(self.read_u16(address)?).min(MAX_UNICODE_BYTES) & !1;
        let buffer = self.read_ptr(address + self.pointer_size() as u64)?;
        if length == 0 || buffer == 0 {
            return Ok(String::new());
        }

        let mut raw = vec![0u8; length];
        self.read(buffer, &mut raw)?;
        let units: Vec<u16> = raw
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        Ok(String::from_utf16_lossy(&units))
    }

    /// Address of the `ty` record whose `field` lives at `address`
    fn containing_record(&self, address: u64, ty: &str, field: &str) -> Result<u64, TargetError> {
        let offset = self
            .field_offset(ty, field)?
            .ok_or_else(|| TargetError::MissingField {
                ty: ty.to_string(),
                field: field.to_string(),
            })?;
        Ok(address.wrapping_sub(offset))
    }

    /// Offset of a field that must exist
    fn require_field(&self, ty: &str, field: &str) -> Result<u64, TargetError> {
        self.field_offset(ty, field)?
            .ok_or_else(|| TargetError::MissingField {
                ty: ty.to_string(),
                field: field.to_string(),
            })
    }
}

/// A target described by a [`Profile`] over any memory source
pub struct ProfileTarget<M> {
    profile: Profile,
    memory: M,
    /// Reverse symbol index for `find_symbol`
    by_address: BTreeMap<u64, String>,
}

impl<M: MemorySource> ProfileTarget<M> {
    pub fn new(profile: Profile, memory: M) -> Self {
        let by_address = profile
            .symbols
            .iter()
            .map(|(name, address)| (*address, name.clone()))
            .collect();

        Self {
            profile,
            memory,
            by_address,
        }
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn memory(&self) -> &M {
        &self.memory
    }

    fn layout(&self, ty: &str) -> Result<&TypeLayout, TargetError> {
        self.profile
            .types
            .get(ty)
            .ok_or_else(|| TargetError::UnknownType(ty.to_string()))
    }
}

impl ProfileTarget<SnapshotMemory> {
    /// Load a replayable target from a snapshot file
    pub fn from_snapshot<P: AsRef<Path>>(path: P) -> Result<Self, ProfileError> {
        let snapshot = Snapshot::from_file(path.as_ref())?;
        let memory = snapshot.memory()?;
        log::info!(
            "Loaded snapshot {} ({} symbols, {} types)",
            path.as_ref().display(),
            snapshot.profile.symbols.len(),
            snapshot.profile.types.len()
        );
        Ok(Self::new(snapshot.profile, memory))
    }
}

impl ProfileTarget<MemoryManager> {
    /// Read a live process described by a profile file
    pub fn attach_process<P: AsRef<Path>>(pid: u32, profile: P) -> Result<Self, ProfileError> {
        let profile = Profile::from_file(profile)?;
        let mut memory = MemoryManager::new();
        memory.open_process(pid)?;
        Ok(Self::new(profile, memory))
    }
}

impl<M: MemorySource> DebugTarget for ProfileTarget<M> {
    fn read(&self, address: u64, buffer: &mut [u8]) -> Result<(), MemoryError> {
        self.memory.read_exact(address, buffer)
    }

    fn pointer_size(&self) -> usize {
        self.profile.pointer_size
    }

    fn is_kernel_debugging(&self) -> bool {
        self.profile.kernel
    }

    fn symbol(&self, name: &str) -> Result<u64, TargetError> {
        self.profile
            .symbols
            .get(name)
            .copied()
            .ok_or_else(|| TargetError::UnknownSymbol(name.to_string()))
    }

    fn field_offset(&self, ty: &str, field: &str) -> Result<Option<u64>, TargetError> {
        Ok(self.layout(ty)?.fields.get(field).copied())
    }

    fn type_size(&self, ty: &str) -> Result<u64, TargetError> {
        Ok(self.layout(ty)?.size)
    }

    fn find_symbol(&self, address: u64) -> String {
        match self.by_address.range(..=address).next_back() {
            Some((base, name)) if *base == address => name.clone(),
            Some((base, name)) => format!("{}+{:#x}", name, address - base),
            None => format!("{:x}", address),
        }
    }
}
