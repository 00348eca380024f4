//! Debugger - OS Debug API Wrapper
//!
//! Attaches to a live process so that it stays stopped while kernel or
//! process structures are walked. Windows uses the Debug API (windows-rs),
//! Linux uses ptrace (nix).

use thiserror::Error;

/// Debugger-specific errors
#[derive(Error, Debug)]
pub enum DebugError {
    #[error("Failed to attach to process {pid}: {reason}")]
    AttachFailed { pid: u32, reason: String },

    #[error("Failed to detach from process {pid}: {reason}")]
    DetachFailed { pid: u32, reason: String },

    #[error("Not attached to any process")]
    NotAttached,

    #[error("Process pausing is not supported on this platform")]
    Unsupported,
}

/// Attach/detach state for a single target process
pub struct Debugger {
    /// Target process ID
    target_pid: Option<u32>,
}

impl Debugger {
    /// Create a new debugger instance
    pub fn new() -> Self {
        Self { target_pid: None }
    }

    /// Attach to an existing process by PID, stopping it
    pub fn attach(&mut self, pid: u32) -> Result<(), DebugError> {
        log::info!("Attaching to process {}", pid);

        #[cfg(target_os = "windows")]
        {
            self.attach_windows(pid)?;
        }

        #[cfg(target_os = "linux")]
        {
            self.attach_linux(pid)?;
        }

        #[cfg(not(any(target_os = "windows", target_os = "linux")))]
        {
            return Err(DebugError::Unsupported);
        }

        self.target_pid = Some(pid);
        log::info!("Successfully attached to process {}", pid);
        Ok(())
    }

    /// Detach from the current process, letting it run again
    pub fn detach(&mut self) -> Result<(), DebugError> {
        let pid = self.target_pid.ok_or(DebugError::NotAttached)?;
        log::info!("Detaching from process {}", pid);

        #[cfg(target_os = "windows")]
        {
            self.detach_windows(pid)?;
        }

        #[cfg(target_os = "linux")]
        {
            self.detach_linux(pid)?;
        }

        self.target_pid = None;

        log::info!("Successfully detached from process {}", pid);
        Ok(())
    }

    /// Get current target PID
    pub fn target_pid(&self) -> Option<u32> {
        self.target_pid
    }

    /// Check if debugger is attached
    pub fn is_active(&self) -> bool {
        self.target_pid.is_some()
    }
}

// Windows-specific implementations
#[cfg(target_os = "windows")]
impl Debugger {
    fn attach_windows(&mut self, pid: u32) -> Result<(), DebugError> {
        use windows::Win32::System::Diagnostics::Debug::DebugActiveProcess;

        unsafe {
            DebugActiveProcess(pid).map_err(|e| DebugError::AttachFailed {
                pid,
                reason: e.to_string(),
            })?;
        }

        Ok(())
    }

    fn detach_windows(&mut self, pid: u32) -> Result<(), DebugError> {
        use windows::Win32::System::Diagnostics::Debug::DebugActiveProcessStop;

        unsafe {
            DebugActiveProcessStop(pid).map_err(|e| DebugError::DetachFailed {
                pid,
                reason: e.to_string(),
            })?;
        }

        Ok(())
    }
}

// Linux-specific implementations
#[cfg(target_os = "linux")]
impl Debugger {
    fn attach_linux(&mut self, pid: u32) -> Result<(), DebugError> {
        use nix::sys::ptrace;
        use nix::sys::wait::waitpid;
        use nix::unistd::Pid;

        let target = Pid::from_raw(pid as i32);
        ptrace::attach(target).map_err(|e| DebugError::AttachFailed {
            pid,
            reason: e.to_string(),
        })?;

        // PTRACE_ATTACH delivers SIGSTOP; reap it so the tracee is really stopped
        waitpid(target, None).map_err(|e| DebugError::AttachFailed {
            pid,
            reason: e.to_string(),
        })?;

        Ok(())
    }

    fn detach_linux(&mut self, pid: u32) -> Result<(), DebugError> {
        use nix::sys::ptrace;
        use nix::unistd::Pid;

        ptrace::detach(Pid::from_raw(pid as i32), None).map_err(|e| DebugError::DetachFailed {
            pid,
            reason: e.to_string(),
        })?;

        Ok(())
    }
}

impl Default for Debugger {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps a process stopped for as long as it is alive
pub struct PauseGuard {
    debugger: Debugger,
}

impl PauseGuard {
    /// Stop `pid` until the guard is dropped
    pub fn pause(pid: u32) -> Result<Self, DebugError> {
        let mut debugger = Debugger::new();
        debugger.attach(pid)?;
        Ok(Self { debugger })
    }

    pub fn pid(&self) -> Option<u32> {
        self.debugger.target_pid()
    }
}

impl Drop for PauseGuard {
    fn drop(&mut self) {
        if self.debugger.is_active() {
            if let Err(e) = self.debugger.detach() {
                log::warn!("Failed to resume target: {}", e);
            }
        }
    }
}
