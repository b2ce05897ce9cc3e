#![allow(dead_code)]

use std::rc::Rc;

use demand_pager::executable::{MemFileSystem, noff_image};
use demand_pager::{MachineConfig, PAGE_SIZE, Pid, PolicyKind, USER_STACK_SIZE, VmManager};

pub const CODE_PAGES: usize = 6;
pub const PROGRAM: &str = "prog";

/// Recognisable code bytes: byte `i` of the code segment is `i % 251`
pub fn code() -> Vec<u8> {
    (0..CODE_PAGES * PAGE_SIZE).map(|i| (i % 251) as u8).collect()
}

/// Pages in a freshly created address space for `PROGRAM`
pub fn base_pages() -> usize {
    (CODE_PAGES * PAGE_SIZE + USER_STACK_SIZE).div_ceil(PAGE_SIZE)
}

/// Expected initial content of the whole address space
pub fn initial_image() -> Vec<u8> {
    let mut image = code();
    image.resize(base_pages() * PAGE_SIZE, 0);
    image
}

pub fn machine(num_frames: usize, policy: PolicyKind, seed: u64) -> (VmManager, Rc<MemFileSystem>) {
    let fs = Rc::new(MemFileSystem::new());
    fs.insert(PROGRAM, noff_image(&code(), &[], 0));
    let config = MachineConfig {
        num_frames,
        policy,
        seed,
    };
    (VmManager::new(config, fs.clone()), fs)
}

/// Create a process for `PROGRAM` and make it current
pub fn spawn(vm: &mut VmManager) -> Pid {
    let pid = vm.create_process(PROGRAM).unwrap();
    vm.switch_to(pid).unwrap();
    pid
}

/// Frame currently holding `vpn` of the running process
pub fn frame_of(vm: &VmManager, vpn: usize) -> usize {
    let entry = vm.page_table().unwrap()[vpn];
    assert!(entry.is_valid(), "page {} not resident", vpn);
    entry.physical_page
}

/// Check the cross-structure invariants that must hold after every operation
pub fn check_invariants(vm: &VmManager) {
    let frames = vm.frames();
    assert!(frames.allocated() <= frames.len());
    assert_eq!(frames.iter().filter(|e| !e.empty).count(), frames.allocated());

    for pid in vm.pids() {
        let space = vm.address_space(pid).unwrap();
        for (vpn, entry) in space.page_table().iter().enumerate() {
            if entry.is_valid() {
                let owner = frames.get(entry.physical_page);
                if entry.is_shared() {
                    assert!(owner.shared, "pid {} page {} maps unshared frame", pid, vpn);
                } else {
                    assert_eq!(
                        (owner.owner, owner.vpn, owner.shared),
                        (Some(pid), vpn, false),
                        "frame {} does not record pid {} page {}",
                        entry.physical_page,
                        pid,
                        vpn
                    );
                }
            } else if entry.is_swapped() {
                assert!(space.swap().holds(vpn), "pid {} page {} swapped without image", pid, vpn);
            }
        }
    }
}
