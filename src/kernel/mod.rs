//! Kernel module - Windows kernel structure walkers
//!
//! Everything here reads through a [`crate::debug::DebugTarget`] and never
//! writes to the target.

pub mod driver;
pub mod objdir;
pub mod object;
pub mod ssdt;

pub use objdir::{DirectoryListing, Lookup, Resolver};
pub use object::{KernelObjects, ObjectError, ObjectHandle, ObjectNamespace};
