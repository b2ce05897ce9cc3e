use crate::constants::*;
use crate::executable::NoffHeader;
use crate::memory::SwapStore;
use crate::translation::TranslationEntry;

/// A process's page table, its swap area and the executable backing it.
///
/// Frames are never touched here; anything that needs one goes through the
/// VM manager, which owns the frame table and the replacement policy.
pub struct AddressSpace {
    page_table: Vec<TranslationEntry>,
    swap: SwapStore,
    executable: String,
    header: NoffHeader,
}

impl AddressSpace {
    /// Lay out an address space for `executable` without loading anything.
    pub fn new(executable: &str, header: NoffHeader) -> Self {
        let num_pages = header.num_pages();
        AddressSpace {
            page_table: (0..num_pages).map(TranslationEntry::new).collect(),
            swap: SwapStore::new(num_pages),
            executable: executable.to_string(),
            header,
        }
    }

    /// An empty mapping with the same shape and backing file as `parent`
    pub fn shell_of(parent: &AddressSpace) -> Self {
        let num_pages = parent.num_pages();
        AddressSpace {
            page_table: (0..num_pages).map(TranslationEntry::new).collect(),
            swap: SwapStore::new(num_pages),
            executable: parent.executable.clone(),
            header: parent.header,
        }
    }

    pub fn num_pages(&self) -> usize {
        self.page_table.len()
    }

    /// Size of the address space in bytes
    pub fn size(&self) -> usize {
        self.num_pages() * PAGE_SIZE
    }

    pub fn page_table(&self) -> &[TranslationEntry] {
        &self.page_table
    }

    pub fn entry(&self, vpn: usize) -> &TranslationEntry {
        &self.page_table[vpn]
    }

    pub fn entry_mut(&mut self, vpn: usize) -> &mut TranslationEntry {
        &mut self.page_table[vpn]
    }

    pub fn swap(&self) -> &SwapStore {
        &self.swap
    }

    pub fn swap_mut(&mut self) -> &mut SwapStore {
        &mut self.swap
    }

    /// Page table and swap store borrowed together
    pub fn split_mut(&mut self) -> (&mut [TranslationEntry], &mut SwapStore) {
        (&mut self.page_table, &mut self.swap)
    }

    pub fn executable(&self) -> &str {
        &self.executable
    }

    pub fn header(&self) -> &NoffHeader {
        &self.header
    }

    /// Append `pages` unmapped entries; returns the first new page number.
    pub fn grow(&mut self, pages: usize) -> usize {
        let first = self.num_pages();
        self.page_table
            .extend((first..first + pages).map(TranslationEntry::new));
        self.swap.grow(pages);
        first
    }

    pub fn truncate(&mut self, num_pages: usize) {
        self.page_table.truncate(num_pages);
        self.swap.truncate(num_pages);
    }

    /// Initial user stack pointer: the top of the address space, less a small guard
    pub fn initial_stack_pointer(&self) -> usize {
        self.size() - STACK_GUARD
    }
}
