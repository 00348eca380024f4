//! Core module - Live target access and low-level operations
//!
//! This module contains the platform-specific process pausing and
//! memory source implementations.

pub mod debugger;
pub mod memory;

// Re-export common types
pub use debugger::{DebugError, Debugger, PauseGuard};
pub use memory::{MemoryError, MemoryManager, MemorySource, SnapshotMemory};
