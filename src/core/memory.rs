//! Memory - Target memory sources
//!
//! Provides a unified read interface over a live process and over a
//! captured snapshot image.

use std::collections::BTreeMap;

use thiserror::Error;

/// Memory operation errors
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Failed to read memory at {address:#x}: {reason}")]
    ReadFailed { address: u64, reason: String },

    #[error("Short read at {address:#x}: wanted {wanted} bytes, got {got}")]
    ShortRead {
        address: u64,
        wanted: usize,
        got: usize,
    },

    #[error("Address {address:#x} is not mapped")]
    Unmapped { address: u64 },

    #[error("Overlapping region at {base:#x}")]
    Overlap { base: u64 },

    #[error("Region at {base:#x} of {len:#x} bytes wraps the address space")]
    Wraps { base: u64, len: usize },

    #[error("Failed to open process {pid}: {reason}")]
    OpenFailed { pid: u32, reason: String },

    #[error("No process attached")]
    NoProcess,
}

/// Anything that can serve reads of target virtual memory.
pub trait MemorySource {
    /// Fill `buffer` from `address`. Partial reads are errors.
    fn read_exact(&self, address: u64, buffer: &mut [u8]) -> Result<(), MemoryError>;
}

/// Memory manager for reading live process memory
pub struct MemoryManager {
    /// Target process handle
    #[cfg(target_os = "windows")]
    process_handle: Option<windows::Win32::Foundation::HANDLE>,

    #[cfg(target_os = "linux")]
    target_pid: Option<u32>,
}

impl MemoryManager {
    /// Create a new memory manager
    pub fn new() -> Self {
        Self {
            #[cfg(target_os = "windows")]
            process_handle: None,
            #[cfg(target_os = "linux")]
            target_pid: None,
        }
    }

    /// Open a process for memory operations
    #[cfg(target_os = "windows")]
    pub fn open_process(&mut self, pid: u32) -> Result<(), MemoryError> {
        use windows::Win32::System::Threading::{
            OpenProcess, PROCESS_QUERY_INFORMATION, PROCESS_VM_READ,
        };

        let handle = unsafe {
            OpenProcess(PROCESS_QUERY_INFORMATION | PROCESS_VM_READ, false, pid).map_err(
                |e| MemoryError::OpenFailed {
                    pid,
                    reason: e.to_string(),
                },
            )?
        };

        self.process_handle = Some(handle);
        log::info!("Opened process {} for reading", pid);
        Ok(())
    }

    #[cfg(target_os = "linux")]
    pub fn open_process(&mut self, pid: u32) -> Result<(), MemoryError> {
        let mem_path = format!("/proc/{}/mem", pid);
        std::fs::metadata(&mem_path).map_err(|e| MemoryError::OpenFailed {
            pid,
            reason: e.to_string(),
        })?;

        self.target_pid = Some(pid);
        log::info!("Opened process {} for reading", pid);
        Ok(())
    }

    /// Read memory into an existing buffer, returning the number of bytes read
    pub fn read_into(&self, address: u64, buffer: &mut [u8]) -> Result<usize, MemoryError> {
        #[cfg(target_os = "windows")]
        {
            self.read_windows(address, buffer)
        }

        #[cfg(target_os = "linux")]
        {
            self.read_linux(address, buffer)
        }

        #[cfg(not(any(target_os = "windows", target_os = "linux")))]
        {
            let _ = (address, buffer);
            Err(MemoryError::NoProcess)
        }
    }
}

impl MemorySource for MemoryManager {
    fn read_exact(&self, address: u64, buffer: &mut [u8]) -> Result<(), MemoryError> {
        let got = self.read_into(address, buffer)?;
        if got != buffer.len() {
            return Err(MemoryError::ShortRead {
                address,
                wanted: buffer.len(),
                got,
            });
        }
        Ok(())
    }
}

// Windows-specific implementations
#[cfg(target_os = "windows")]
impl MemoryManager {
    fn read_windows(&self, address: u64, buffer: &mut [u8]) -> Result<usize, MemoryError> {
        use windows::Win32::System::Diagnostics::Debug::ReadProcessMemory;

        let handle = self.process_handle.ok_or(MemoryError::NoProcess)?;
        let mut bytes_read = 0usize;

        unsafe {
            ReadProcessMemory(
                handle,
                address as *const std::ffi::c_void,
                buffer.as_mut_ptr() as *mut std::ffi::c_void,
                buffer.len(),
                Some(&mut bytes_read as *mut usize),
            )
            .map_err(|e| MemoryError::ReadFailed {
                address,
                reason: e.to_string(),
            })?;
        }

        Ok(bytes_read)
    }
}

#[cfg(target_os = "windows")]
impl Drop for MemoryManager {
    fn drop(&mut self) {
        use windows::Win32::Foundation::CloseHandle;

        if let Some(handle) = self.process_handle.take() {
            unsafe {
                let _ = CloseHandle(handle);
            }
        }
    }
}

// Linux-specific implementations
#[cfg(target_os = "linux")]
impl MemoryManager {
    fn read_linux(&self, address: u64, buffer: &mut [u8]) -> Result<usize, MemoryError> {
        use std::fs::File;
        use std::io::{Read, Seek, SeekFrom};

        let pid = self.target_pid.ok_or(MemoryError::NoProcess)?;
        let mem_path = format!("/proc/{}/mem", pid);

        let mut file = File::open(&mem_path).map_err(|e| MemoryError::ReadFailed {
            address,
            reason: e.to_string(),
        })?;

        file.seek(SeekFrom::Start(address))
            .map_err(|e| MemoryError::ReadFailed {
                address,
                reason: e.to_string(),
            })?;

        let bytes_read = file.read(buffer).map_err(|e| MemoryError::ReadFailed {
            address,
            reason: e.to_string(),
        })?;

        Ok(bytes_read)
    }
}

impl Default for MemoryManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Sparse memory image made of non-overlapping regions
#[derive(Debug, Clone, Default)]
pub struct SnapshotMemory {
    /// Regions keyed by base address
    regions: BTreeMap<u64, Vec<u8>>,
}

impl SnapshotMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `bytes` at `base`. Regions may not overlap or wrap past the
    /// top of the address space.
    pub fn map(&mut self, base: u64, bytes: Vec<u8>) -> Result<(), MemoryError> {
        let end = base
            .checked_add(bytes.len() as u64)
            .ok_or(MemoryError::Wraps {
                base,
                len: bytes.len(),
            })?;

        if let Some((&prev, data)) = self.regions.range(..=base).next_back() {
            let prev_end = prev
                .checked_add(data.len() as u64)
                .ok_or(MemoryError::Overlap { base })?;
            if prev_end > base {
                return Err(MemoryError::Overlap { base });
            }
        }
        if let Some((&next, _)) = self.regions.range(base..).next() {
            if next < end {
                return Err(MemoryError::Overlap { base });
            }
        }

        self.regions.insert(base, bytes);
        Ok(())
    }

    /// Overwrite bytes inside an already mapped region
    pub fn write(&mut self, address: u64, data: &[u8]) -> Result<(), MemoryError> {
        let (base, region) = self
            .regions
            .range_mut(..=address)
            .next_back()
            .ok_or(MemoryError::Unmapped { address })?;

        let start = (address - *base) as usize;
        let end = start + data.len();
        if end > region.len() {
            return Err(MemoryError::Unmapped {
                address: *base + region.len() as u64,
            });
        }

        region[start..end].copy_from_slice(data);
        Ok(())
    }

    /// Iterate over `(base, bytes)` pairs in address order
    pub fn regions(&self) -> impl Iterator<Item = (u64, &[u8])> {
        self.regions.iter().map(|(base, data)| (*base, data.as_slice()))
    }
}

impl MemorySource for SnapshotMemory {
    fn read_exact(&self, address: u64, buffer: &mut [u8]) -> Result<(), MemoryError> {
        let (base, region) = self
            .regions
            .range(..=address)
            .next_back()
            .ok_or(MemoryError::Unmapped { address })?;

        let start = (address - base) as usize;
        if start >= region.len() {
            return Err(MemoryError::Unmapped { address });
        }

        let available = region.len() - start;
        if available < buffer.len() {
            return Err(MemoryError::ShortRead {
                address,
                wanted: buffer.len(),
                got: available,
            });
        }

        buffer.copy_from_slice(&region[start..start + buffer.len()]);
        Ok(())
    }
}
