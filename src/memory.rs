use crate::constants::*;

/// Simulated main memory: a flat byte arena addressed by frame number
pub struct PhysicalMemory {
    data: Vec<u8>,
}

impl PhysicalMemory {
    /// Create physical memory of `num_frames` frames, all zero
    pub fn new(num_frames: usize) -> Self {
        PhysicalMemory {
            data: vec![0u8; num_frames * PAGE_SIZE],
        }
    }

    /// Read a byte at a physical address
    #[inline]
    pub fn read(&self, address: usize) -> u8 {
        self.data[address]
    }

    /// Write a byte at a physical address
    #[inline]
    pub fn write(&mut self, address: usize, value: u8) {
        self.data[address] = value;
    }

    /// Calculate the starting address of a frame
    #[inline]
    pub fn frame_to_address(frame: usize) -> usize {
        frame * PAGE_SIZE
    }

    pub fn frame(&self, frame: usize) -> &[u8] {
        let start = Self::frame_to_address(frame);
        &self.data[start..start + PAGE_SIZE]
    }

    pub fn frame_mut(&mut self, frame: usize) -> &mut [u8] {
        let start = Self::frame_to_address(frame);
        &mut self.data[start..start + PAGE_SIZE]
    }

    /// Byte-for-byte copy of one frame into another
    pub fn copy_frame(&mut self, src: usize, dst: usize) {
        let start = Self::frame_to_address(src);
        self.data
            .copy_within(start..start + PAGE_SIZE, Self::frame_to_address(dst));
    }

    pub fn zero_frame(&mut self, frame: usize) {
        self.frame_mut(frame).fill(0);
    }
}

/// Per-process swap area: one page-sized slot per virtual page.
///
/// Never shrinks; it is dropped wholesale with its address space.
#[derive(Clone)]
pub struct SwapStore {
    data: Vec<u8>,
    /// Slots that hold a written-back image
    holds: Vec<bool>,
}

impl SwapStore {
    pub fn new(num_pages: usize) -> Self {
        SwapStore {
            data: vec![0u8; num_pages * PAGE_SIZE],
            holds: vec![false; num_pages],
        }
    }

    pub fn num_pages(&self) -> usize {
        self.holds.len()
    }

    pub fn slot(&self, vpn: usize) -> &[u8] {
        let start = vpn * PAGE_SIZE;
        &self.data[start..start + PAGE_SIZE]
    }

    /// Write back a full page image into the slot for `vpn`
    pub fn store(&mut self, vpn: usize, page: &[u8]) {
        let start = vpn * PAGE_SIZE;
        self.data[start..start + PAGE_SIZE].copy_from_slice(&page[..PAGE_SIZE]);
        self.holds[vpn] = true;
    }

    pub fn holds(&self, vpn: usize) -> bool {
        self.holds.get(vpn).copied().unwrap_or(false)
    }

    pub fn grow(&mut self, extra_pages: usize) {
        self.data.resize(self.data.len() + extra_pages * PAGE_SIZE, 0);
        self.holds.resize(self.holds.len() + extra_pages, false);
    }

    pub fn truncate(&mut self, num_pages: usize) {
        self.data.truncate(num_pages * PAGE_SIZE);
        self.holds.truncate(num_pages);
    }
}

/// Ownership record for one physical frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameEntry {
    pub owner: Option<Pid>,
    pub vpn: usize,
    pub shared: bool,
    pub empty: bool,
}

impl Default for FrameEntry {
    fn default() -> Self {
        FrameEntry {
            owner: None,
            vpn: 0,
            shared: false,
            empty: true,
        }
    }
}

/// Global frame ownership table plus the count of frames handed out
pub struct FrameTable {
    entries: Vec<FrameEntry>,
    allocated: usize,
}

impl FrameTable {
    pub fn new(num_frames: usize) -> Self {
        FrameTable {
            entries: vec![FrameEntry::default(); num_frames],
            allocated: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Frames currently pulled from the unallocated pool
    pub fn allocated(&self) -> usize {
        self.allocated
    }

    pub fn is_full(&self) -> bool {
        self.allocated >= self.entries.len()
    }

    pub fn get(&self, frame: usize) -> &FrameEntry {
        &self.entries[frame]
    }

    #[inline]
    pub fn is_shared(&self, frame: usize) -> bool {
        self.entries[frame].shared
    }

    pub fn iter(&self) -> impl Iterator<Item = &FrameEntry> {
        self.entries.iter()
    }

    /// Take the lowest-numbered unused, unshared frame from the pool.
    ///
    /// Returns `None` once every frame has been handed out.
    pub fn claim_free(&mut self) -> Option<usize> {
        if self.is_full() {
            return None;
        }
        let frame = self.entries.iter().position(|e| e.empty && !e.shared)?;
        self.entries[frame].empty = false;
        self.allocated += 1;
        Some(frame)
    }

    /// Record `(pid, vpn)` as the occupant of `frame`
    pub fn assign(&mut self, frame: usize, pid: Pid, vpn: usize, shared: bool) {
        self.entries[frame] = FrameEntry {
            owner: Some(pid),
            vpn,
            shared,
            empty: false,
        };
    }

    /// Return a single frame to the pool
    pub fn release(&mut self, frame: usize) {
        if !self.entries[frame].empty {
            self.entries[frame] = FrameEntry::default();
            self.allocated -= 1;
        }
    }

    /// Return every private frame owned by `pid` to the pool; shared frames stay.
    pub fn release_owned_by(&mut self, pid: Pid) -> Vec<usize> {
        let freed: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.owner == Some(pid) && !e.shared && !e.empty)
            .map(|(frame, _)| frame)
            .collect();
        for &frame in &freed {
            self.release(frame);
        }
        freed
    }
}
