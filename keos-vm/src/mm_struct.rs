//! Memory state of a process.
//!
//! [`MmStruct`] ties together everything that makes up an address space: the
//! hardware [`PageTable`] the cpu walks, the [`SupplementalPageTable`] that
//! describes every page, and the shared [`Vm`] that provides frames and swap.
//!
//! Pages enter an address space in two steps:
//!
//! 1. **Allocation** records a descriptor in the SPT without touching
//!    physical memory ([`MmStruct::alloc_page_with_initializer`]). This is
//!    how the loader stages executable segments.
//! 2. **Claiming** gives the page a frame, installs the mapping and
//!    populates the frame ([`MmStruct::claim_page`]). This normally happens
//!    from the page fault handler on first touch.

use crate::{
    Vm,
    anon::AnonPage,
    frame::Frame,
    page::{Page, PageKind, VmType},
    spt::SupplementalPageTable,
    uninit::{Initializer, UninitPage},
};
use alloc::sync::Arc;
use core::ops::Range;
use keos::{
    KernelError,
    addressing::{PAGE_SIZE, Va},
    mm::page_table::PageTable,
    spinlock::SpinLock,
};

/// The memory state of a process.
pub struct MmStruct {
    pub(crate) vm: Arc<Vm>,
    pub(crate) page_table: Arc<dyn PageTable>,
    pub(crate) spt: SupplementalPageTable,
}

impl MmStruct {
    /// Creates an empty address space over `page_table`.
    pub fn new(vm: Arc<Vm>, page_table: Arc<dyn PageTable>) -> Self {
        Self {
            vm,
            page_table,
            spt: SupplementalPageTable::new(),
        }
    }

    /// The virtual memory subsystem.
    #[inline]
    pub fn vm(&self) -> &Arc<Vm> {
        &self.vm
    }

    /// The hardware page table.
    #[inline]
    pub fn page_table(&self) -> &Arc<dyn PageTable> {
        &self.page_table
    }

    /// The supplemental page table.
    #[inline]
    pub fn spt(&self) -> &SupplementalPageTable {
        &self.spt
    }

    /// Stages a zero-filled page of type `ty` at `va`.
    pub fn alloc_page(&mut self, ty: VmType, va: Va, writable: bool) -> Result<(), KernelError> {
        self.alloc_page_with_initializer(ty, va, writable, Initializer::Zero)
    }

    /// Stages a page at `va` that is populated by `init` on its first fault.
    ///
    /// # Errors
    /// - [`KernelError::BadAddress`]: `va` is not a user address.
    /// - [`KernelError::InvalidArgument`]: the address already has a page,
    ///   or `init` can not produce a page of type `ty`.
    pub fn alloc_page_with_initializer(
        &mut self,
        ty: VmType,
        va: Va,
        writable: bool,
        init: Initializer,
    ) -> Result<(), KernelError> {
        if !self.vm.config().is_user_va(va) {
            return Err(KernelError::BadAddress);
        }
        let uninit = UninitPage::new(ty, init)?;
        let page = Page::new(va, writable, PageKind::Uninit(uninit), self.page_table.clone());
        self.spt.insert(page).map(|_| ())
    }

    /// Removes the page containing `va` from the address space.
    pub fn remove_page(&mut self, va: Va) -> Result<(), KernelError> {
        self.spt.remove(va, &self.vm)
    }

    /// Makes the page at `va` resident.
    pub fn claim_page(&mut self, va: Va) -> Result<(), KernelError> {
        let page = self
            .spt
            .find(va)
            .cloned()
            .ok_or(KernelError::BadAddress)?;
        self.do_claim_page(&page)
    }

    /// Obtains a frame for `page` and installs it.
    pub(crate) fn do_claim_page(&self, page: &Arc<SpinLock<Page>>) -> Result<(), KernelError> {
        let frame = self.vm.get_frame()?;
        self.install_frame(page, frame)
    }

    /// Installs `frame` into `page`, unless the page became resident in the
    /// meantime, and registers the frame for eviction.
    pub(crate) fn install_frame(
        &self,
        page: &Arc<SpinLock<Page>>,
        frame: Frame,
    ) -> Result<(), KernelError> {
        let pa = frame.pa();
        let mut guard = page.lock();
        let va = guard.va();
        let result = if guard.is_resident() {
            Ok(false)
        } else {
            guard.claim(frame, self.vm.swap()).map(|_| true)
        };
        guard.unlock();
        match result {
            Ok(true) => {
                log::debug!("claim: {:?} -> {:?}", va, pa);
                self.vm.register_frame(pa, page);
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Installs the first page of the user stack.
    ///
    /// Returns the initial stack pointer.
    pub fn setup_stack(&mut self) -> Result<Va, KernelError> {
        let top = self.vm.config().stack_top();
        self.add_stack_page(top - PAGE_SIZE)?;
        Ok(top)
    }

    /// Adds a resident stack page at `va`.
    pub(crate) fn add_stack_page(&mut self, va: Va) -> Result<(), KernelError> {
        let page = Page::new(
            va,
            true,
            PageKind::Stack(AnonPage::new()),
            self.page_table.clone(),
        );
        let page = self.spt.insert(page)?;
        if let Err(e) = self.do_claim_page(&page) {
            let _ = self.spt.remove(va, &self.vm);
            return Err(e);
        }
        Ok(())
    }

    /// Checks whether every page of `addr` is part of the address space, and
    /// writable if `is_write`. Does not populate any page.
    pub fn access_ok(&self, addr: Range<Va>, is_write: bool) -> bool {
        if addr.start.into_usize() == 0 || addr.start > addr.end {
            return false;
        }
        let mut va = addr.start.page_down();
        while va < addr.end {
            let Some(page) = self.spt.find(va) else {
                return false;
            };
            let guard = page.lock();
            let writable = guard.writable();
            guard.unlock();
            if is_write && !writable {
                return false;
            }
            va += PAGE_SIZE;
        }
        true
    }
}

impl Drop for MmStruct {
    fn drop(&mut self) {
        self.spt.destroy(&self.vm);
    }
}
