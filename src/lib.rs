//! kdwalk - Kernel structure walkers over a debugger target binding
//!
//! The library side holds the target binding ([`debug`]), the memory
//! sources behind it ([`core`]), the kernel walkers ([`kernel`]) and the
//! runnable [`samples`]. The binary adds the command line and REPL.

pub mod core;
pub mod debug;
pub mod kernel;
pub mod samples;
pub mod ui;
