//! Supplemental page table.
//!
//! The hardware page table only knows about resident pages. The
//! supplemental page table (SPT) knows about *every* page of an address
//! space, resident or not, and keeps the [`Page`] descriptor that tells the
//! fault handler how to bring it in.
//!
//! Descriptors are keyed by their page-aligned address, so any address
//! within a page finds the page's descriptor.

use crate::{Vm, page::Page};
use alloc::{collections::BTreeMap, sync::Arc, vec::Vec};
use keos::{KernelError, addressing::Va, spinlock::SpinLock};

/// The supplemental page table of an address space.
#[derive(Default)]
pub struct SupplementalPageTable {
    pages: BTreeMap<Va, Arc<SpinLock<Page>>>,
}

impl SupplementalPageTable {
    /// Creates an empty table.
    pub const fn new() -> Self {
        Self {
            pages: BTreeMap::new(),
        }
    }

    /// Finds the descriptor of the page containing `va`.
    pub fn find(&self, va: Va) -> Option<&Arc<SpinLock<Page>>> {
        self.pages.get(&va.page_down())
    }

    /// Takes ownership of `page`.
    ///
    /// Fails with [`KernelError::InvalidArgument`] if the address already
    /// has a descriptor; the existing descriptor is left untouched.
    pub fn insert(&mut self, page: Page) -> Result<Arc<SpinLock<Page>>, KernelError> {
        let va = page.va();
        if self.pages.contains_key(&va) {
            return Err(KernelError::InvalidArgument);
        }
        let page = Arc::new(SpinLock::new(page));
        self.pages.insert(va, page.clone());
        Ok(page)
    }

    /// Removes the descriptor of the page containing `va` and destroys it.
    ///
    /// The page is destroyed even if writing it back fails; the error is
    /// reported afterwards.
    pub fn remove(&mut self, va: Va, vm: &Vm) -> Result<(), KernelError> {
        let page = self
            .pages
            .remove(&va.page_down())
            .ok_or(KernelError::NoSuchEntry)?;
        let mut guard = page.lock();
        let result = guard.destroy(vm);
        guard.unlock();
        result
    }

    /// Number of pages.
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Iterates over the pages in address order.
    pub fn iter(&self) -> impl Iterator<Item = (&Va, &Arc<SpinLock<Page>>)> {
        self.pages.iter()
    }

    /// Destroys every page.
    pub(crate) fn destroy(&mut self, vm: &Vm) {
        let vas: Vec<Va> = self.pages.keys().copied().collect();
        for va in vas {
            if let Err(e) = self.remove(va, vm) {
                log::warn!("spt: destroying {:?} failed: {:?}", va, e);
            }
        }
    }
}
