use std::fs;
use std::path::Path;

use crate::constants::Pid;
use crate::error::{VmError, VmResult};

/// One step of a trace replayed against the VM manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceOp {
    /// `R vaddr`: read a byte
    Read(usize),
    /// `W vaddr value`: write a byte
    Write(usize, u8),
    /// `A vaddr`: physical address, without faulting
    PhysAddr(usize),
    /// `F`: fork the running process
    Fork,
    /// `S pid`: switch to a process
    Switch(Pid),
    /// `M pages`: allocate shared pages in the running process
    Shared(usize),
    /// `X pid`: terminate a process
    Exit(Pid),
}

impl TraceOp {
    /// Whether this step contributes a value to the output file
    pub fn produces_output(&self) -> bool {
        matches!(
            self,
            TraceOp::Read(_) | TraceOp::PhysAddr(_) | TraceOp::Fork | TraceOp::Shared(_)
        )
    }
}

pub fn read_trace<P: AsRef<Path>>(path: P) -> VmResult<Vec<TraceOp>> {
    let content = fs::read_to_string(path.as_ref())
        .map_err(|e| VmError::Parse(format!("Failed to read trace file: {}", e)))?;
    parse_trace(&content)
}

/// Parse a trace, one operation per line; `#` starts a comment
pub fn parse_trace(content: &str) -> VmResult<Vec<TraceOp>> {
    let mut ops = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let op = parse_op(&tokens).map_err(|e| VmError::Parse(format!("line {}: {}", lineno + 1, e)))?;
        ops.push(op);
    }
    Ok(ops)
}

fn parse_op(tokens: &[&str]) -> Result<TraceOp, String> {
    let arity = |n: usize| {
        if tokens.len() == n + 1 {
            Ok(())
        } else {
            Err(format!("'{}' takes {} argument(s), got {}", tokens[0], n, tokens.len() - 1))
        }
    };
    let num = |i: usize| -> Result<usize, String> {
        let t = tokens[i];
        let parsed = match t.strip_prefix("0x") {
            Some(hex) => usize::from_str_radix(hex, 16),
            None => t.parse(),
        };
        parsed.map_err(|_| format!("Invalid number: {}", t))
    };

    match tokens[0].to_ascii_uppercase().as_str() {
        "R" => {
            arity(1)?;
            Ok(TraceOp::Read(num(1)?))
        }
        "W" => {
            arity(2)?;
            let value = u8::try_from(num(2)?).map_err(|_| format!("Byte out of range: {}", tokens[2]))?;
            Ok(TraceOp::Write(num(1)?, value))
        }
        "A" => {
            arity(1)?;
            Ok(TraceOp::PhysAddr(num(1)?))
        }
        "F" => {
            arity(0)?;
            Ok(TraceOp::Fork)
        }
        "S" => {
            arity(1)?;
            Ok(TraceOp::Switch(num(1)?))
        }
        "M" => {
            arity(1)?;
            Ok(TraceOp::Shared(num(1)?))
        }
        "X" => {
            arity(1)?;
            Ok(TraceOp::Exit(num(1)?))
        }
        other => Err(format!("Unknown operation: {}", other)),
    }
}

pub fn write_results<P: AsRef<Path>>(path: P, results: &[i64]) -> VmResult<()> {
    let output: Vec<String> = results.iter().map(|r| r.to_string()).collect();
    let content = output.join(" ");
    fs::write(path.as_ref(), content)
        .map_err(|e| VmError::Parse(format!("Failed to write output file: {}", e)))
}
