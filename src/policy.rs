//! Page replacement policies.
//!
//! Only consulted once every frame has been handed out; before that the VM
//! manager takes frames straight from the pool. Each policy keeps just its
//! own bookkeeping and reads the frame table for the shared bit.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use log::trace;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{VmError, VmResult};
use crate::memory::FrameTable;

/// Which replacement algorithm the machine runs with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PolicyKind {
    /// Run without replacement; exhausting memory is fatal
    None,
    Random,
    #[default]
    Fifo,
    Lru,
    Clock,
}

impl FromStr for PolicyKind {
    type Err = VmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "0" | "none" => Ok(PolicyKind::None),
            "1" | "random" => Ok(PolicyKind::Random),
            "2" | "fifo" => Ok(PolicyKind::Fifo),
            "3" | "lru" => Ok(PolicyKind::Lru),
            "4" | "clock" => Ok(PolicyKind::Clock),
            other => Err(VmError::Parse(format!("Unknown replacement policy: {}", other))),
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PolicyKind::None => "none",
            PolicyKind::Random => "random",
            PolicyKind::Fifo => "fifo",
            PolicyKind::Lru => "lru",
            PolicyKind::Clock => "clock",
        };
        f.write_str(name)
    }
}

/// Victim selection plus the hooks that keep a policy's state current.
///
/// The VM manager never passes shared frames to the hooks.
pub trait ReplacementPolicy {
    /// Choose an occupied frame to reuse, never `ignore` and never a shared frame.
    fn select_victim(&mut self, frames: &FrameTable, ignore: Option<usize>) -> VmResult<usize>;

    /// A frame was just given a new private page
    fn on_allocate(&mut self, _frame: usize) {}

    /// A private frame was referenced
    fn notify_access(&mut self, _frame: usize) {}

    /// A frame went back to the pool
    fn forget(&mut self, _frame: usize) {}
}

pub struct NoReplacement;

impl ReplacementPolicy for NoReplacement {
    fn select_victim(&mut self, _frames: &FrameTable, _ignore: Option<usize>) -> VmResult<usize> {
        Err(VmError::NoReplacementPolicy)
    }
}

pub struct RandomPolicy {
    rng: StdRng,
}

impl RandomPolicy {
    pub fn new(seed: u64) -> Self {
        RandomPolicy {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl ReplacementPolicy for RandomPolicy {
    fn select_victim(&mut self, frames: &FrameTable, ignore: Option<usize>) -> VmResult<usize> {
        let eligible = |f: usize| Some(f) != ignore && !frames.is_shared(f);
        if !(0..frames.len()).any(|f| eligible(f)) {
            return Err(VmError::OutOfFrames);
        }
        loop {
            let frame = self.rng.gen_range(0..frames.len());
            if eligible(frame) {
                return Ok(frame);
            }
        }
    }
}

/// Evicts in allocation order
#[derive(Default)]
pub struct FifoPolicy {
    queue: VecDeque<usize>,
}

impl FifoPolicy {
    pub fn queue(&self) -> &VecDeque<usize> {
        &self.queue
    }

    fn push_if_absent(&mut self, frame: usize) {
        if !self.queue.contains(&frame) {
            self.queue.push_back(frame);
        }
    }
}

impl ReplacementPolicy for FifoPolicy {
    fn select_victim(&mut self, frames: &FrameTable, ignore: Option<usize>) -> VmResult<usize> {
        for _ in 0..self.queue.len() {
            let Some(frame) = self.queue.pop_front() else { break };
            if Some(frame) != ignore && !frames.is_shared(frame) {
                return Ok(frame);
            }
            trace!("fifo: requeue protected frame {}", frame);
            self.queue.push_back(frame);
        }
        Err(VmError::OutOfFrames)
    }

    fn on_allocate(&mut self, frame: usize) {
        self.push_if_absent(frame);
    }

    fn notify_access(&mut self, frame: usize) {
        self.push_if_absent(frame);
    }

    fn forget(&mut self, frame: usize) {
        self.queue.retain(|&f| f != frame);
    }
}

/// Evicts the least recently used frame; the front of `recency` is the oldest.
#[derive(Default)]
pub struct LruPolicy {
    recency: VecDeque<usize>,
}

impl LruPolicy {
    pub fn recency(&self) -> &VecDeque<usize> {
        &self.recency
    }

    fn touch(&mut self, frame: usize) {
        if let Some(pos) = self.recency.iter().position(|&f| f == frame) {
            self.recency.remove(pos);
        }
        self.recency.push_back(frame);
    }
}

impl ReplacementPolicy for LruPolicy {
    fn select_victim(&mut self, frames: &FrameTable, ignore: Option<usize>) -> VmResult<usize> {
        for _ in 0..self.recency.len() {
            let Some(frame) = self.recency.pop_front() else { break };
            // The victim is about to hold the faulting page, so it becomes the most recent.
            self.recency.push_back(frame);
            if Some(frame) != ignore && !frames.is_shared(frame) {
                return Ok(frame);
            }
            trace!("lru: skip protected frame {}", frame);
        }
        Err(VmError::OutOfFrames)
    }

    fn on_allocate(&mut self, frame: usize) {
        self.touch(frame);
    }

    fn notify_access(&mut self, frame: usize) {
        self.touch(frame);
    }

    fn forget(&mut self, frame: usize) {
        self.recency.retain(|&f| f != frame);
    }
}

/// Second chance: a circular sweep over per-frame reference bits
pub struct ClockPolicy {
    ref_bits: Vec<bool>,
    head: usize,
}

impl ClockPolicy {
    pub fn new(num_frames: usize) -> Self {
        ClockPolicy {
            ref_bits: vec![false; num_frames],
            head: 0,
        }
    }

    pub fn head(&self) -> usize {
        self.head
    }

    pub fn is_referenced(&self, frame: usize) -> bool {
        self.ref_bits[frame]
    }
}

impl ReplacementPolicy for ClockPolicy {
    fn select_victim(&mut self, frames: &FrameTable, ignore: Option<usize>) -> VmResult<usize> {
        let n = self.ref_bits.len();
        if n == 0 {
            return Err(VmError::OutOfFrames);
        }
        // Two full sweeps clear every bit; anything left standing is shared or ignored.
        for _ in 0..=2 * n {
            let head = self.head;
            let protected = Some(head) == ignore;
            if self.ref_bits[head] || frames.is_shared(head) || protected {
                self.ref_bits[head] = protected;
                self.head = (head + 1) % n;
                continue;
            }
            self.ref_bits[head] = true;
            self.head = (head + 1) % n;
            return Ok(head);
        }
        Err(VmError::OutOfFrames)
    }

    fn notify_access(&mut self, frame: usize) {
        self.ref_bits[frame] = true;
    }

    fn forget(&mut self, frame: usize) {
        self.ref_bits[frame] = false;
    }
}

/// The policy selected at startup
pub enum Policy {
    None(NoReplacement),
    Random(RandomPolicy),
    Fifo(FifoPolicy),
    Lru(LruPolicy),
    Clock(ClockPolicy),
}

impl Policy {
    pub fn new(kind: PolicyKind, num_frames: usize, seed: u64) -> Self {
        match kind {
            PolicyKind::None => Policy::None(NoReplacement),
            PolicyKind::Random => Policy::Random(RandomPolicy::new(seed)),
            PolicyKind::Fifo => Policy::Fifo(FifoPolicy::default()),
            PolicyKind::Lru => Policy::Lru(LruPolicy::default()),
            PolicyKind::Clock => Policy::Clock(ClockPolicy::new(num_frames)),
        }
    }

    pub fn kind(&self) -> PolicyKind {
        match self {
            Policy::None(_) => PolicyKind::None,
            Policy::Random(_) => PolicyKind::Random,
            Policy::Fifo(_) => PolicyKind::Fifo,
            Policy::Lru(_) => PolicyKind::Lru,
            Policy::Clock(_) => PolicyKind::Clock,
        }
    }

    fn inner(&mut self) -> &mut dyn ReplacementPolicy {
        match self {
            Policy::None(p) => p,
            Policy::Random(p) => p,
            Policy::Fifo(p) => p,
            Policy::Lru(p) => p,
            Policy::Clock(p) => p,
        }
    }
}

impl ReplacementPolicy for Policy {
    fn select_victim(&mut self, frames: &FrameTable, ignore: Option<usize>) -> VmResult<usize> {
        self.inner().select_victim(frames, ignore)
    }

    fn on_allocate(&mut self, frame: usize) {
        self.inner().on_allocate(frame)
    }

    fn notify_access(&mut self, frame: usize) {
        self.inner().notify_access(frame)
    }

    fn forget(&mut self, frame: usize) {
        self.inner().forget(frame)
    }
}
