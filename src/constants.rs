pub const PAGE_SIZE: usize = 128;
pub const NUM_PHYS_PAGES: usize = 32;
pub const USER_STACK_SIZE: usize = 1024;

pub const NOFF_MAGIC: u32 = 0x00ba_dfad;
pub const NOFF_HEADER_SIZE: usize = 40;

pub const MAX_PROCESSES: usize = 1000;

pub const INVALID_ADDRESS: i32 = -1;

/// Bytes reserved below the top of the address space for the initial stack pointer
pub const STACK_GUARD: usize = 16;

/// Process id, used as an index into the process table
pub type Pid = usize;

#[inline]
pub fn div_round_up(n: usize, size: usize) -> usize {
    n.div_ceil(size)
}
