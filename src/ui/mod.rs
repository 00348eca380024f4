//! UI module - command surface over a loaded target

pub mod cli;
pub mod commands;
