use std::fmt;
use std::io;

use crate::constants::Pid;

/// Everything the VM manager can fail with
#[derive(Debug)]
pub enum VmError {
    /// No frame can be handed out: every candidate is shared or protected
    OutOfFrames,
    /// Frame pool exhausted and the machine runs without a replacement policy
    NoReplacementPolicy,
    ExecutableNotFound(String),
    BadExecutable(String),
    Io(io::Error),
    AddressOutOfRange { vaddr: usize, limit: usize },
    ReadOnly(usize),
    NoSuchProcess(Pid),
    NoCurrentProcess,
    TooManyProcesses,
    /// A shared allocation asked for no pages
    EmptyAllocation,
    Parse(String),
}

pub type VmResult<T> = Result<T, VmError>;

impl VmError {
    /// Status written back to user code by the syscall layer
    pub fn status(&self) -> i32 {
        -1
    }

    /// Conditions after which the affected process cannot make progress
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VmError::OutOfFrames
                | VmError::NoReplacementPolicy
                | VmError::ExecutableNotFound(_)
                | VmError::BadExecutable(_)
                | VmError::Io(_)
        )
    }
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmError::OutOfFrames => write!(f, "no evictable physical frame available"),
            VmError::NoReplacementPolicy => {
                write!(f, "physical memory exhausted and no replacement policy configured")
            }
            VmError::ExecutableNotFound(name) => write!(f, "unable to open file {}", name),
            VmError::BadExecutable(reason) => write!(f, "malformed executable: {}", reason),
            VmError::Io(e) => write!(f, "I/O error: {}", e),
            VmError::AddressOutOfRange { vaddr, limit } => {
                write!(f, "virtual address {} outside address space of {} bytes", vaddr, limit)
            }
            VmError::ReadOnly(vaddr) => write!(f, "write to read-only address {}", vaddr),
            VmError::NoSuchProcess(pid) => write!(f, "no process with pid {}", pid),
            VmError::NoCurrentProcess => write!(f, "no process is currently scheduled"),
            VmError::TooManyProcesses => write!(f, "process table is full"),
            VmError::EmptyAllocation => write!(f, "shared allocation of zero pages"),
            VmError::Parse(reason) => write!(f, "{}", reason),
        }
    }
}

impl std::error::Error for VmError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            VmError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for VmError {
    fn from(e: io::Error) -> Self {
        VmError::Io(e)
    }
}
