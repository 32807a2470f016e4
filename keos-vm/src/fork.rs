//! # Duplicating an address space for `fork`.
//!
//! `fork` creates a child whose memory is an exact, private copy of the
//! parent's. The copy is made page by page, according to the state of each
//! parent page:
//!
//! - **Uninitialized**: the child gets its own uninitialized page with the
//!   same initializer. Files it loads from are reopened, so parent and child
//!   never share a handle. Nothing is read; the child faults the page in by
//!   itself.
//! - **Anonymous or stack**: the child gets a resident page right away,
//!   filled with the parent's bytes. If the parent's page is swapped out,
//!   its slot is read directly, without bringing the parent's page back in.
//! - **Memory-mapped file**: not inherited. A child that wants the mapping
//!   calls `mmap` itself.
//!
//! Parent and child share no frame after the fork.

use crate::{
    anon::AnonPage,
    frame::Frame,
    mm_struct::MmStruct,
    page::{Page, PageKind, VmType},
    uninit::UninitPage,
};
use alloc::sync::Arc;
use keos::{KernelError, addressing::Va, mm::page_table::PageTable, spinlock::SpinLock};

enum CopyPlan {
    Skip,
    Lazy(UninitPage),
    Eager(VmType, Frame),
}

impl MmStruct {
    /// Creates a copy of this address space over the child's `page_table`.
    ///
    /// On failure the partially built child is torn down.
    pub fn fork(&self, page_table: Arc<dyn PageTable>) -> Result<MmStruct, KernelError> {
        let mut child = MmStruct::new(self.vm.clone(), page_table);
        child.copy_from(self)?;
        log::debug!("fork: copied {} pages", child.spt.len());
        Ok(child)
    }

    /// Copies every page of `src` into this address space.
    pub fn copy_from(&mut self, src: &MmStruct) -> Result<(), KernelError> {
        for (va, page) in src.spt.iter() {
            self.copy_page(*va, page)?;
        }
        Ok(())
    }

    fn copy_page(&mut self, va: Va, src: &Arc<SpinLock<Page>>) -> Result<(), KernelError> {
        let guard = src.lock();
        let writable = guard.writable();
        let plan = match guard.kind() {
            PageKind::Uninit(uninit) => uninit
                .duplicate()
                .map(|dup| dup.map_or(CopyPlan::Skip, CopyPlan::Lazy)),
            PageKind::File(_) => Ok(CopyPlan::Skip),
            PageKind::Anon(_) | PageKind::Stack(_) => self.vm.get_frame().and_then(|mut frame| {
                guard
                    .copy_contents(&mut frame, self.vm.swap())
                    .map(|_| CopyPlan::Eager(guard.vm_type(), frame))
            }),
        };
        guard.unlock();

        match plan? {
            CopyPlan::Skip => Ok(()),
            CopyPlan::Lazy(uninit) => {
                let page = Page::new(
                    va,
                    writable,
                    PageKind::Uninit(uninit),
                    self.page_table.clone(),
                );
                self.spt.insert(page).map(|_| ())
            }
            CopyPlan::Eager(ty, frame) => {
                let kind = match ty {
                    VmType::Stack => PageKind::Stack(AnonPage::new()),
                    _ => PageKind::Anon(AnonPage::new()),
                };
                let page = Page::new(va, writable, kind, self.page_table.clone());
                let page = self.spt.insert(page)?;
                self.install_frame(&page, frame)
            }
        }
    }
}
