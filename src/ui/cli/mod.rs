//! CLI - reedline-based REPL interface
//!
//! Provides an interactive shell with history over a loaded target.

use anyhow::Result;
use colored::Colorize;
use reedline::{Prompt, PromptHistorySearch, PromptHistorySearchStatus, Reedline, Signal};
use std::borrow::Cow;
use std::io::{self, Write};

use super::commands::{execute_command, parse_command, Flow};
use crate::debug::DebugTarget;

/// Custom prompt for the kdwalk shell
pub struct KdPrompt {
    /// `kd` for kernel targets, `ud` otherwise
    mode: &'static str,
    pointer_bits: usize,
}

impl KdPrompt {
    pub fn new(target: &dyn DebugTarget) -> Self {
        Self {
            mode: if target.is_kernel_debugging() { "kd" } else { "ud" },
            pointer_bits: target.pointer_size() * 8,
        }
    }
}

impl Prompt for KdPrompt {
    fn render_prompt_left(&self) -> Cow<'_, str> {
        Cow::Owned(format!("[{}:{}]", self.mode, self.pointer_bits))
    }

    fn render_prompt_right(&self) -> Cow<'_, str> {
        Cow::Borrowed("")
    }

    fn render_prompt_indicator(&self, _prompt_mode: reedline::PromptEditMode) -> Cow<'_, str> {
        Cow::Borrowed("> ")
    }

    fn render_prompt_multiline_indicator(&self) -> Cow<'_, str> {
        Cow::Borrowed("... ")
    }

    fn render_prompt_history_search_indicator(
        &self,
        history_search: PromptHistorySearch,
    ) -> Cow<'_, str> {
        let prefix = match history_search.status {
            PromptHistorySearchStatus::Passing => "",
            PromptHistorySearchStatus::Failing => "(failed) ",
        };
        Cow::Owned(format!("(search: {}{}) ", prefix, history_search.term))
    }
}

/// Run the CLI REPL
pub fn run_cli(target: &dyn DebugTarget) -> Result<()> {
    let mut line_editor = Reedline::create();
    let prompt = KdPrompt::new(target);

    println!(
        "{}",
        "kdwalk shell - Type '?' for help, 'q' to quit".cyan()
    );

    let stdout = io::stdout();
    loop {
        let sig = line_editor.read_line(&prompt)?;
        match sig {
            Signal::Success(buffer) => {
                let input = buffer.trim();
                if input.is_empty() {
                    continue;
                }

                let cmd = parse_command(input);
                let mut out = stdout.lock();
                match execute_command(cmd, target, &mut out) {
                    Ok(Flow::Quit) => {
                        writeln!(out, "[*] Shutting down...")?;
                        break;
                    }
                    Ok(Flow::Continue) => {}
                    Err(e) => {
                        log::debug!("Command failed: {:?}", e);
                        writeln!(out, "{} {:#}", "[!]".red(), e)?;
                    }
                }
            }
            Signal::CtrlD | Signal::CtrlC => {
                println!("\n[*] Interrupted");
                break;
            }
        }
    }

    Ok(())
}
