use std::fmt;

use log::{debug, info, trace};

use crate::address_space::AddressSpace;
use crate::constants::*;
use crate::error::{VmError, VmResult};
use crate::executable::{FileSystem, NoffHeader};
use crate::memory::{FrameEntry, FrameTable, PhysicalMemory};
use crate::policy::{Policy, PolicyKind, ReplacementPolicy};
use crate::translation::{self, EntryFlags, TranslationEntry, TranslationResult, VirtualAddress};

/// Machine parameters fixed at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineConfig {
    pub num_frames: usize,
    pub policy: PolicyKind,
    /// Seed for the random policy
    pub seed: u64,
}

impl Default for MachineConfig {
    fn default() -> Self {
        MachineConfig {
            num_frames: NUM_PHYS_PAGES,
            policy: PolicyKind::default(),
            seed: 0,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Statistics {
    pub page_faults: u64,
    pub evictions: u64,
    pub swap_outs: u64,
    pub swap_ins: u64,
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Paging: faults {}, evictions {}, swap-outs {}, swap-ins {}",
            self.page_faults, self.evictions, self.swap_outs, self.swap_ins
        )
    }
}

/// Owns every piece of process-wide paging state: physical memory, the frame
/// table, the replacement policy and the table of address spaces indexed by pid.
///
/// Operations run to completion on the single simulated CPU, so nothing here
/// is locked.
pub struct VmManager {
    memory: PhysicalMemory,
    frames: FrameTable,
    policy: Policy,
    spaces: Vec<Option<AddressSpace>>,
    current: Option<Pid>,
    fs: Box<dyn FileSystem>,
    stats: Statistics,
}

impl VmManager {
    pub fn new(config: MachineConfig, fs: impl FileSystem + 'static) -> Self {
        VmManager {
            memory: PhysicalMemory::new(config.num_frames),
            frames: FrameTable::new(config.num_frames),
            policy: Policy::new(config.policy, config.num_frames, config.seed),
            spaces: Vec::new(),
            current: None,
            fs: Box::new(fs),
            stats: Statistics::default(),
        }
    }

    pub fn memory(&self) -> &PhysicalMemory {
        &self.memory
    }

    pub fn frames(&self) -> &FrameTable {
        &self.frames
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn stats(&self) -> Statistics {
        self.stats
    }

    pub fn current_pid(&self) -> Option<Pid> {
        self.current
    }

    pub fn address_space(&self, pid: Pid) -> Option<&AddressSpace> {
        self.spaces.get(pid).and_then(Option::as_ref)
    }

    /// Pids of every live process
    pub fn pids(&self) -> impl Iterator<Item = Pid> + '_ {
        self.spaces
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_some())
            .map(|(pid, _)| pid)
    }

    fn space(&self, pid: Pid) -> VmResult<&AddressSpace> {
        self.address_space(pid).ok_or(VmError::NoSuchProcess(pid))
    }

    fn space_mut(&mut self, pid: Pid) -> VmResult<&mut AddressSpace> {
        self.spaces
            .get_mut(pid)
            .and_then(Option::as_mut)
            .ok_or(VmError::NoSuchProcess(pid))
    }

    fn insert_space(&mut self, space: AddressSpace) -> VmResult<Pid> {
        if let Some(pid) = self.spaces.iter().position(Option::is_none) {
            self.spaces[pid] = Some(space);
            return Ok(pid);
        }
        if self.spaces.len() >= MAX_PROCESSES {
            return Err(VmError::TooManyProcesses);
        }
        self.spaces.push(Some(space));
        Ok(self.spaces.len() - 1)
    }

    /// Build a fresh, fully unmapped address space for `executable`.
    pub fn create_process(&mut self, executable: &str) -> VmResult<Pid> {
        let mut file = self.fs.open(executable)?;
        let header = NoffHeader::read_from(file.as_mut())?;
        let space = AddressSpace::new(executable, header);

        info!(
            "{}: {} pages, {} bytes, {} frames allocated",
            executable,
            space.num_pages(),
            space.size(),
            self.frames.allocated()
        );
        debug!(
            "code {:?}, init data {:?}, uninit data {:?}",
            header.code, header.init_data, header.uninit_data
        );
        self.insert_space(space)
    }

    /// Make `pid` the running process; its page table becomes the one the MMU walks.
    pub fn switch_to(&mut self, pid: Pid) -> VmResult<()> {
        self.space(pid)?;
        self.current = Some(pid);
        Ok(())
    }

    /// The running process's page table
    pub fn page_table(&self) -> VmResult<&[TranslationEntry]> {
        let pid = self.current.ok_or(VmError::NoCurrentProcess)?;
        Ok(self.space(pid)?.page_table())
    }

    /// Find a frame for a new page, evicting one if the pool is used up.
    ///
    /// `ignore` names a frame that must survive, e.g. one being copied from.
    pub(crate) fn select_victim(&mut self, ignore: Option<usize>) -> VmResult<usize> {
        if let Some(frame) = self.frames.claim_free() {
            trace!(
                "frame {} from pool, {} of {} allocated",
                frame,
                self.frames.allocated(),
                self.frames.len()
            );
            return Ok(frame);
        }
        let frame = self.policy.select_victim(&self.frames, ignore)?;
        self.evict(frame);
        Ok(frame)
    }

    /// Unmap whatever page lives in `frame`, writing it to swap if dirty
    fn evict(&mut self, frame: usize) {
        let FrameEntry { owner, vpn, .. } = *self.frames.get(frame);
        let Some(owner) = owner else { return };
        let Some(space) = self.spaces.get_mut(owner).and_then(Option::as_mut) else {
            return;
        };
        let (page_table, swap) = space.split_mut();
        let Some(entry) = page_table.get_mut(vpn) else { return };
        if !entry.is_valid() || entry.physical_page != frame {
            return;
        }

        entry.flags.remove(EntryFlags::VALID);
        self.stats.evictions += 1;
        if entry.is_dirty() {
            swap.store(vpn, self.memory.frame(frame));
            entry.flags.insert(EntryFlags::SWAPPED);
            self.stats.swap_outs += 1;
            debug!("evict frame {}: pid {} page {} written to swap", frame, owner, vpn);
        } else if swap.holds(vpn) {
            // Unmodified since it came back from swap; the old image is still good.
            entry.flags.insert(EntryFlags::SWAPPED);
            debug!("evict frame {}: pid {} page {} clean, swap image kept", frame, owner, vpn);
        } else {
            debug!("evict frame {}: pid {} page {} clean", frame, owner, vpn);
        }
    }

    /// Tell the policy a frame was referenced
    pub fn notify_access(&mut self, frame: usize) {
        if !self.frames.is_shared(frame) {
            self.policy.notify_access(frame);
        }
    }

    /// Service a page fault for `vpn` of the running process.
    ///
    /// Content comes from swap if the page was written back, otherwise from
    /// the executable. Returns the frame the page now occupies.
    pub fn load_page(&mut self, vpn: usize) -> VmResult<usize> {
        let pid = self.current.ok_or(VmError::NoCurrentProcess)?;
        let (swapped, offset, executable) = {
            let space = self.space(pid)?;
            if vpn >= space.num_pages() {
                return Err(VmError::AddressOutOfRange {
                    vaddr: vpn * PAGE_SIZE,
                    limit: space.size(),
                });
            }
            let entry = space.entry(vpn);
            if entry.is_valid() {
                return Ok(entry.physical_page);
            }
            (
                entry.is_swapped(),
                space.header().page_file_offset(vpn),
                space.executable().to_string(),
            )
        };

        // Fetch before taking a frame so a failed read leaves the frame table untouched.
        let mut page = [0u8; PAGE_SIZE];
        if swapped {
            page.copy_from_slice(self.space(pid)?.swap().slot(vpn));
            self.stats.swap_ins += 1;
        } else {
            // A short read past the end of the file leaves the rest of the page zero.
            let mut file = self.fs.open(&executable)?;
            file.read_at(&mut page, offset)?;
        }

        let frame = self.select_victim(None)?;
        self.memory.frame_mut(frame).copy_from_slice(&page);

        let entry = self.space_mut(pid)?.entry_mut(vpn);
        entry.physical_page = frame;
        entry.flags.insert(EntryFlags::VALID | EntryFlags::USE);
        entry
            .flags
            .remove(EntryFlags::SWAPPED | EntryFlags::DIRTY | EntryFlags::SHARED);
        self.frames.assign(frame, pid, vpn, false);
        self.policy.on_allocate(frame);
        self.stats.page_faults += 1;

        debug!(
            "pid {} page {} -> frame {} from {}",
            pid,
            vpn,
            frame,
            if swapped { "swap" } else { "executable" }
        );
        Ok(frame)
    }

    /// Resolve a virtual address of the running process, faulting the page in
    /// if needed. Sets the use bit, and the dirty bit on writes.
    pub fn translate(&mut self, vaddr: usize, writing: bool) -> VmResult<usize> {
        let pid = self.current.ok_or(VmError::NoCurrentProcess)?;
        let va = VirtualAddress::from_raw(vaddr);
        let space = self.space(pid)?;
        if va.vpn >= space.num_pages() {
            return Err(VmError::AddressOutOfRange {
                vaddr,
                limit: space.size(),
            });
        }
        let entry = *space.entry(va.vpn);
        if writing && entry.is_read_only() {
            return Err(VmError::ReadOnly(vaddr));
        }
        if !entry.is_valid() {
            trace!("page fault: pid {} {}", pid, va);
            self.load_page(va.vpn)?;
        }

        let entry = self.space_mut(pid)?.entry_mut(va.vpn);
        entry.flags.insert(EntryFlags::USE);
        if writing {
            entry.flags.insert(EntryFlags::DIRTY);
        }
        let frame = entry.physical_page;
        self.notify_access(frame);
        Ok(PhysicalMemory::frame_to_address(frame) + va.offset)
    }

    pub fn read_byte(&mut self, vaddr: usize) -> VmResult<u8> {
        let pa = self.translate(vaddr, false)?;
        Ok(self.memory.read(pa))
    }

    pub fn write_byte(&mut self, vaddr: usize, value: u8) -> VmResult<()> {
        let pa = self.translate(vaddr, true)?;
        self.memory.write(pa, value);
        Ok(())
    }

    /// Physical address of `vaddr` in the running process, without faulting.
    pub fn physical_address(&self, vaddr: usize) -> VmResult<TranslationResult> {
        let page_table = self.page_table()?;
        Ok(translation::translate(
            &VirtualAddress::from_raw(vaddr),
            page_table,
            self.frames.len(),
        ))
    }

    /// Duplicate `parent` into a new process.
    ///
    /// Every resident private page gets its own frame and a byte copy; shared
    /// pages are mapped by reference. Swap images travel with their pages.
    pub fn fork(&mut self, parent: Pid) -> VmResult<Pid> {
        let shell = AddressSpace::shell_of(self.space(parent)?);
        let child = self.insert_space(shell)?;
        if let Err(e) = self.copy_pages(parent, child) {
            self.release_process(child);
            return Err(e);
        }
        info!(
            "pid {} forked from pid {}, {} frames allocated",
            child,
            parent,
            self.frames.allocated()
        );
        Ok(child)
    }

    fn copy_pages(&mut self, parent: Pid, child: Pid) -> VmResult<()> {
        let num_pages = self.space(parent)?.num_pages();
        for vpn in 0..num_pages {
            // Re-read each entry: finding a frame for an earlier page may have evicted this one.
            let source = *self.space(parent)?.entry(vpn);
            let mut copy = source;

            if source.is_shared() {
                copy.flags.remove(EntryFlags::SWAPPED);
                *self.space_mut(child)?.entry_mut(vpn) = copy;
                continue;
            }

            if source.is_valid() {
                let frame = self.select_victim(Some(source.physical_page))?;
                self.memory.copy_frame(source.physical_page, frame);
                self.frames.assign(frame, child, vpn, false);
                self.policy.on_allocate(frame);
                copy.physical_page = frame;
                trace!("fork: page {} frame {} -> frame {}", vpn, source.physical_page, frame);
            }

            let image = {
                let swap = self.space(parent)?.swap();
                swap.holds(vpn).then(|| swap.slot(vpn).to_vec())
            };
            let child_space = self.space_mut(child)?;
            *child_space.entry_mut(vpn) = copy;
            if let Some(image) = image {
                child_space.swap_mut().store(vpn, &image);
            }
        }
        Ok(())
    }

    /// Append `pages` zero-filled shared pages to `pid`'s address space.
    ///
    /// Returns the virtual address of the first new page.
    pub fn allocate_shared(&mut self, pid: Pid, pages: usize) -> VmResult<usize> {
        if pages == 0 {
            return Err(VmError::EmptyAllocation);
        }
        let first = self.space_mut(pid)?.grow(pages);
        let mut taken = Vec::with_capacity(pages);

        for vpn in first..first + pages {
            let frame = match self.select_victim(None) {
                Ok(frame) => frame,
                Err(e) => {
                    for &frame in &taken {
                        self.frames.release(frame);
                    }
                    self.space_mut(pid)?.truncate(first);
                    return Err(e);
                }
            };
            self.memory.zero_frame(frame);
            self.frames.assign(frame, pid, vpn, true);
            self.policy.forget(frame);
            taken.push(frame);

            let entry = self.space_mut(pid)?.entry_mut(vpn);
            entry.physical_page = frame;
            entry.flags = EntryFlags::VALID | EntryFlags::SHARED;
        }

        let vaddr = first * PAGE_SIZE;
        info!("pid {}: {} shared pages at {:#x} in frames {:?}", pid, pages, vaddr, taken);
        Ok(vaddr)
    }

    /// Return every private frame owned by `pid` to the pool.
    ///
    /// Shared frames stay where they are. Returns the number of frames freed.
    pub fn free_pages(&mut self, pid: Pid) -> usize {
        let freed = self.frames.release_owned_by(pid);
        for &frame in &freed {
            self.policy.forget(frame);
        }
        debug!("pid {}: freed frames {:?}", pid, freed);
        freed.len()
    }

    fn release_process(&mut self, pid: Pid) {
        self.free_pages(pid);
        if let Some(slot) = self.spaces.get_mut(pid) {
            *slot = None;
        }
        if self.current == Some(pid) {
            self.current = None;
        }
    }

    /// Tear down `pid`: free its frames, then release its slot for reuse.
    pub fn exit_process(&mut self, pid: Pid) -> VmResult<()> {
        self.space(pid)?;
        self.release_process(pid);
        info!("pid {} exited, {} frames allocated", pid, self.frames.allocated());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::executable::{MemFileSystem, noff_image};

    /// Code bytes are `(i % 251)` so every page has recognisable content
    fn code(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn setup(num_frames: usize, policy: PolicyKind) -> (VmManager, Rc<MemFileSystem>) {
        let fs = Rc::new(MemFileSystem::new());
        fs.insert("prog", noff_image(&code(6 * PAGE_SIZE), &[], 0));
        let config = MachineConfig {
            num_frames,
            policy,
            seed: 1,
        };
        (VmManager::new(config, fs.clone()), fs)
    }

    fn start(vm: &mut VmManager) -> Pid {
        let pid = vm.create_process("prog").unwrap();
        vm.switch_to(pid).unwrap();
        pid
    }

    #[test]
    fn test_create_process_is_lazy() {
        let (mut vm, _) = setup(4, PolicyKind::Fifo);
        let pid = start(&mut vm);

        let space = vm.address_space(pid).unwrap();
        assert_eq!(space.num_pages(), div_round_up(6 * PAGE_SIZE + USER_STACK_SIZE, PAGE_SIZE));
        assert!(space.page_table().iter().all(|e| !e.is_valid()));
        assert_eq!(vm.frames().allocated(), 0);
    }

    #[test]
    fn test_create_process_missing_executable() {
        let (mut vm, _) = setup(4, PolicyKind::Fifo);
        assert!(matches!(
            vm.create_process("nope"),
            Err(VmError::ExecutableNotFound(_))
        ));
        assert_eq!(vm.pids().count(), 0);
    }

    #[test]
    fn test_load_page_from_executable() {
        let (mut vm, _) = setup(4, PolicyKind::Fifo);
        let pid = start(&mut vm);

        let frame = vm.load_page(2).unwrap();
        let entry = *vm.address_space(pid).unwrap().entry(2);
        assert!(entry.is_valid());
        assert!(entry.is_used());
        assert!(!entry.is_dirty() && !entry.is_swapped() && !entry.is_shared());
        assert_eq!(entry.physical_page, frame);
        assert_eq!(vm.memory().frame(frame), &code(6 * PAGE_SIZE)[2 * PAGE_SIZE..3 * PAGE_SIZE]);

        let owner = vm.frames().get(frame);
        assert_eq!((owner.owner, owner.vpn, owner.shared, owner.empty), (Some(pid), 2, false, false));
        assert_eq!(vm.stats().page_faults, 1);
    }

    #[test]
    fn test_stack_pages_read_as_zero() {
        let (mut vm, _) = setup(1, PolicyKind::Fifo);
        start(&mut vm);
        // Dirty the only frame, then reuse it for a page past the end of the file
        vm.write_byte(0, 0xff).unwrap();
        let last = vm.address_space(0).unwrap().num_pages() - 1;
        vm.load_page(last).unwrap();
        assert!(vm.memory().frame(vm.page_table().unwrap()[last].physical_page).iter().all(|&b| b == 0));
    }

    #[test]
    fn test_translate_sets_use_and_dirty() {
        let (mut vm, _) = setup(4, PolicyKind::Fifo);
        let pid = start(&mut vm);

        assert_eq!(vm.read_byte(PAGE_SIZE + 3).unwrap(), (PAGE_SIZE + 3) as u8);
        assert!(!vm.address_space(pid).unwrap().entry(1).is_dirty());

        vm.write_byte(PAGE_SIZE + 3, 99).unwrap();
        assert!(vm.address_space(pid).unwrap().entry(1).is_dirty());
        assert_eq!(vm.read_byte(PAGE_SIZE + 3).unwrap(), 99);
        assert_eq!(vm.stats().page_faults, 1);
    }

    #[test]
    fn test_translate_out_of_range() {
        let (mut vm, _) = setup(4, PolicyKind::Fifo);
        let pid = start(&mut vm);
        let size = vm.address_space(pid).unwrap().size();
        assert!(matches!(
            vm.read_byte(size),
            Err(VmError::AddressOutOfRange { limit, .. }) if limit == size
        ));
    }

    #[test]
    fn test_translate_without_current_process() {
        let (mut vm, _) = setup(4, PolicyKind::Fifo);
        assert!(matches!(vm.read_byte(0), Err(VmError::NoCurrentProcess)));
    }

    #[test]
    fn test_fifo_evicts_first_loaded_page_to_swap() {
        let (mut vm, _) = setup(4, PolicyKind::Fifo);
        let pid = start(&mut vm);

        vm.write_byte(5, 42).unwrap();
        for vpn in 1..4 {
            vm.read_byte(vpn * PAGE_SIZE).unwrap();
        }
        assert_eq!(vm.frames().allocated(), 4);
        let page0 = vm.memory().frame(vm.page_table().unwrap()[0].physical_page).to_vec();

        vm.read_byte(4 * PAGE_SIZE).unwrap();
        let space = vm.address_space(pid).unwrap();
        assert!(!space.entry(0).is_valid());
        assert!(space.entry(0).is_swapped());
        assert_eq!(space.swap().slot(0), &page0[..]);
        assert_eq!(space.entry(4).physical_page, 0);
        assert_eq!(vm.frames().allocated(), 4);
        assert_eq!(vm.stats().swap_outs, 1);
    }

    #[test]
    fn test_swap_round_trip() {
        let (mut vm, _) = setup(2, PolicyKind::Fifo);
        start(&mut vm);

        vm.write_byte(7, 200).unwrap();
        vm.read_byte(PAGE_SIZE).unwrap();
        vm.read_byte(2 * PAGE_SIZE).unwrap(); // evicts page 0
        assert_eq!(vm.read_byte(7).unwrap(), 200);
        assert_eq!(vm.stats().swap_ins, 1);
        let entry = vm.page_table().unwrap()[0];
        assert!(entry.is_valid() && !entry.is_swapped() && !entry.is_dirty());
    }

    #[test]
    fn test_clean_page_from_swap_survives_second_eviction() {
        let (mut vm, _) = setup(2, PolicyKind::Fifo);
        start(&mut vm);

        vm.write_byte(7, 200).unwrap();
        vm.read_byte(PAGE_SIZE).unwrap();
        vm.read_byte(2 * PAGE_SIZE).unwrap(); // page 0 out, dirty
        assert_eq!(vm.read_byte(7).unwrap(), 200); // back in, clean
        vm.read_byte(3 * PAGE_SIZE).unwrap();
        vm.read_byte(4 * PAGE_SIZE).unwrap(); // page 0 out again, clean
        assert!(!vm.page_table().unwrap()[0].is_valid());
        assert_eq!(vm.read_byte(7).unwrap(), 200);
    }

    #[test]
    fn test_no_policy_exhaustion_is_fatal() {
        let (mut vm, _) = setup(2, PolicyKind::None);
        start(&mut vm);
        vm.read_byte(0).unwrap();
        vm.read_byte(PAGE_SIZE).unwrap();
        assert!(matches!(
            vm.read_byte(2 * PAGE_SIZE),
            Err(VmError::NoReplacementPolicy)
        ));
        assert_eq!(vm.frames().allocated(), 2);
    }

    #[test]
    fn test_missing_executable_on_fault() {
        let (mut vm, fs) = setup(4, PolicyKind::Fifo);
        start(&mut vm);
        fs.remove("prog");

        let err = vm.read_byte(0).unwrap_err();
        assert!(matches!(err, VmError::ExecutableNotFound(_)));
        assert!(err.is_fatal());
        assert_eq!(vm.frames().allocated(), 0);
    }

    #[test]
    fn test_physical_address_does_not_fault() {
        let (mut vm, _) = setup(4, PolicyKind::Fifo);
        start(&mut vm);

        assert_eq!(vm.physical_address(10).unwrap(), TranslationResult::NotResident);
        let pa = vm.translate(10, false).unwrap();
        assert_eq!(vm.physical_address(10).unwrap(), TranslationResult::Success(pa));
        assert_eq!(vm.physical_address(1 << 20).unwrap().to_output(), INVALID_ADDRESS);
    }

    #[test]
    fn test_fork_copies_private_pages() {
        let (mut vm, _) = setup(8, PolicyKind::Fifo);
        let parent = start(&mut vm);
        vm.write_byte(3, 77).unwrap();
        vm.read_byte(PAGE_SIZE).unwrap();

        let child = vm.fork(parent).unwrap();
        assert_eq!(vm.frames().allocated(), 4);

        let p = vm.address_space(parent).unwrap().entry(0).physical_page;
        let c = *vm.address_space(child).unwrap().entry(0);
        assert!(c.is_valid() && c.is_dirty());
        assert_ne!(c.physical_page, p);
        assert_eq!(vm.memory().frame(c.physical_page), vm.memory().frame(p));
        assert_eq!(vm.frames().get(c.physical_page).owner, Some(child));
        assert!(!vm.address_space(child).unwrap().entry(2).is_valid());
    }

    #[test]
    fn test_fork_isolation() {
        let (mut vm, _) = setup(8, PolicyKind::Lru);
        let parent = start(&mut vm);
        vm.write_byte(3, 1).unwrap();

        let child = vm.fork(parent).unwrap();
        vm.switch_to(child).unwrap();
        vm.write_byte(3, 2).unwrap();
        vm.switch_to(parent).unwrap();
        assert_eq!(vm.read_byte(3).unwrap(), 1);
        vm.write_byte(3, 5).unwrap();
        vm.switch_to(child).unwrap();
        assert_eq!(vm.read_byte(3).unwrap(), 2);
    }

    #[test]
    fn test_fork_never_steals_the_page_being_copied() {
        // One frame per resident parent page and nothing free: every copy must evict
        let (mut vm, _) = setup(3, PolicyKind::Fifo);
        let parent = start(&mut vm);
        for vpn in 0..3 {
            vm.write_byte(vpn * PAGE_SIZE, vpn as u8 + 10).unwrap();
        }

        let child = vm.fork(parent).unwrap();
        assert!(vm.frames().allocated() <= 3);
        vm.switch_to(child).unwrap();
        for vpn in 0..3 {
            assert_eq!(vm.read_byte(vpn * PAGE_SIZE).unwrap(), vpn as u8 + 10);
        }
        vm.switch_to(parent).unwrap();
        for vpn in 0..3 {
            assert_eq!(vm.read_byte(vpn * PAGE_SIZE).unwrap(), vpn as u8 + 10);
        }
    }

    #[test]
    fn test_shared_pages_visible_to_both() {
        let (mut vm, _) = setup(8, PolicyKind::Clock);
        let parent = start(&mut vm);
        let before = vm.address_space(parent).unwrap().num_pages();

        let vaddr = vm.allocate_shared(parent, 2).unwrap();
        assert_eq!(vaddr, before * PAGE_SIZE);
        assert_eq!(vaddr % PAGE_SIZE, 0);
        assert_eq!(vm.read_byte(vaddr + PAGE_SIZE).unwrap(), 0);

        let child = vm.fork(parent).unwrap();
        vm.write_byte(vaddr + 1, 9).unwrap();
        vm.switch_to(child).unwrap();
        assert_eq!(vm.read_byte(vaddr + 1).unwrap(), 9);
        vm.write_byte(vaddr + 2, 8).unwrap();
        vm.switch_to(parent).unwrap();
        assert_eq!(vm.read_byte(vaddr + 2).unwrap(), 8);

        let p = vm.address_space(parent).unwrap().entry(before).physical_page;
        let c = vm.address_space(child).unwrap().entry(before).physical_page;
        assert_eq!(p, c);
        assert!(vm.frames().is_shared(p));
    }

    #[test]
    fn test_shared_frames_survive_pressure() {
        let (mut vm, _) = setup(3, PolicyKind::Fifo);
        let pid = start(&mut vm);
        let vaddr = vm.allocate_shared(pid, 1).unwrap();
        vm.write_byte(vaddr, 55).unwrap();

        for vpn in 0..6 {
            vm.read_byte(vpn * PAGE_SIZE).unwrap();
        }
        let entry = vm.page_table().unwrap()[vaddr / PAGE_SIZE];
        assert!(entry.is_valid());
        assert_eq!(vm.read_byte(vaddr).unwrap(), 55);
    }

    #[test]
    fn test_allocate_shared_all_frames_shared() {
        let (mut vm, _) = setup(2, PolicyKind::Fifo);
        let pid = start(&mut vm);
        let pages = vm.address_space(pid).unwrap().num_pages();

        vm.allocate_shared(pid, 2).unwrap();
        assert!(matches!(vm.allocate_shared(pid, 1), Err(VmError::OutOfFrames)));
        assert_eq!(vm.address_space(pid).unwrap().num_pages(), pages + 2);
        assert!(matches!(vm.read_byte(0), Err(VmError::OutOfFrames)));
    }

    #[test]
    fn test_select_victim_prefers_pool() {
        let (mut vm, _) = setup(2, PolicyKind::Fifo);
        start(&mut vm);
        vm.read_byte(0).unwrap();

        assert_eq!(vm.select_victim(None).unwrap(), 1);
        assert_eq!(vm.frames().allocated(), 2);
        assert!(vm.page_table().unwrap()[0].is_valid());
    }

    #[test]
    fn test_allocate_shared_zero_pages() {
        let (mut vm, _) = setup(4, PolicyKind::Fifo);
        let pid = start(&mut vm);
        let pages = vm.address_space(pid).unwrap().num_pages();

        assert!(matches!(vm.allocate_shared(pid, 0), Err(VmError::EmptyAllocation)));
        assert_eq!(vm.address_space(pid).unwrap().num_pages(), pages);
        assert_eq!(vm.frames().allocated(), 0);
    }

    #[test]
    fn test_create_process_rejects_oversized_segment() {
        let (mut vm, fs) = setup(4, PolicyKind::Fifo);
        let mut image = noff_image(&code(PAGE_SIZE), &[], 0);
        let mut header = NoffHeader::parse(&image).unwrap();
        header.code.size = u32::MAX;
        image[..NOFF_HEADER_SIZE].copy_from_slice(&header.to_bytes());
        fs.insert("huge", image);

        assert!(matches!(vm.create_process("huge"), Err(VmError::BadExecutable(_))));
        assert_eq!(vm.pids().count(), 0);
    }

    #[test]
    fn test_exit_frees_private_frames_only() {
        let (mut vm, _) = setup(8, PolicyKind::Fifo);
        let parent = start(&mut vm);
        vm.read_byte(0).unwrap();
        let vaddr = vm.allocate_shared(parent, 1).unwrap();
        let child = vm.fork(parent).unwrap();
        assert_eq!(vm.frames().allocated(), 3);

        vm.exit_process(parent).unwrap();
        assert_eq!(vm.frames().allocated(), 2);
        assert_eq!(vm.current_pid(), None);

        vm.switch_to(child).unwrap();
        assert_eq!(vm.read_byte(vaddr).unwrap(), 0);
        assert!(vm.address_space(parent).is_none());
    }

    #[test]
    fn test_pid_slot_reused_after_exit() {
        let (mut vm, _) = setup(4, PolicyKind::Fifo);
        let a = vm.create_process("prog").unwrap();
        let b = vm.create_process("prog").unwrap();
        vm.exit_process(a).unwrap();
        assert_eq!(vm.create_process("prog").unwrap(), a);
        assert_ne!(a, b);
        assert!(matches!(vm.exit_process(9), Err(VmError::NoSuchProcess(9))));
    }
}
