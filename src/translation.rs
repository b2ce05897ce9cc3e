use bitflags::bitflags;

use crate::constants::*;

bitflags! {
    /// Status bits of a translation entry
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EntryFlags: u8 {
        /// Content is resident in `physical_page`
        const VALID = 1 << 0;
        /// Referenced since the policy last looked
        const USE = 1 << 1;
        /// Modified since loaded
        const DIRTY = 1 << 2;
        const READ_ONLY = 1 << 3;
        /// Frame is referenced by several processes and never evicted
        const SHARED = 1 << 4;
        /// A consistent private copy lives in the owner's swap store
        const SWAPPED = 1 << 5;
    }
}

/// One virtual-to-physical mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslationEntry {
    pub virtual_page: usize,
    /// Meaningful only while `VALID` is set
    pub physical_page: usize,
    pub flags: EntryFlags,
}

impl TranslationEntry {
    pub fn new(virtual_page: usize) -> Self {
        TranslationEntry {
            virtual_page,
            physical_page: 0,
            flags: EntryFlags::empty(),
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.flags.contains(EntryFlags::VALID)
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.flags.contains(EntryFlags::DIRTY)
    }

    #[inline]
    pub fn is_shared(&self) -> bool {
        self.flags.contains(EntryFlags::SHARED)
    }

    #[inline]
    pub fn is_swapped(&self) -> bool {
        self.flags.contains(EntryFlags::SWAPPED)
    }

    #[inline]
    pub fn is_read_only(&self) -> bool {
        self.flags.contains(EntryFlags::READ_ONLY)
    }

    #[inline]
    pub fn is_used(&self) -> bool {
        self.flags.contains(EntryFlags::USE)
    }
}

/// Represents the decomposed components of a Virtual Address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualAddress {
    pub va: usize,
    pub vpn: usize,
    pub offset: usize,
}

impl VirtualAddress {
    /// Decompose a raw VA into page number and offset
    pub fn from_raw(va: usize) -> Self {
        VirtualAddress {
            va,
            vpn: va / PAGE_SIZE,
            offset: va % PAGE_SIZE,
        }
    }
}

impl std::fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VA({}) = (vpn={}, offset={})", self.va, self.vpn, self.offset)
    }
}

/// Result of a non-faulting address translation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslationResult {
    Success(usize),
    PageOutOfRange,
    NotResident,
    InvalidFrame,
}

impl TranslationResult {
    /// Convert to the output format (-1 for errors, PA otherwise)
    pub fn to_output(&self) -> i32 {
        match self {
            TranslationResult::Success(pa) => *pa as i32,
            _ => INVALID_ADDRESS,
        }
    }
}

/// Translate a virtual address without servicing page faults.
///
/// A page that is not resident is reported, not loaded.
pub fn translate(
    va: &VirtualAddress,
    page_table: &[TranslationEntry],
    num_frames: usize,
) -> TranslationResult {
    let Some(entry) = page_table.get(va.vpn) else {
        return TranslationResult::PageOutOfRange;
    };
    if !entry.is_valid() {
        return TranslationResult::NotResident;
    }
    if entry.physical_page >= num_frames {
        return TranslationResult::InvalidFrame;
    }
    TranslationResult::Success(entry.physical_page * PAGE_SIZE + va.offset)
}
