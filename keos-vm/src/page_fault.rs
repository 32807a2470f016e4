//! Page fault resolution.
//!
//! Every access to a page that is not in the hardware page table traps into
//! the kernel. With demand paging, most of these faults are not errors: the
//! page is part of the address space, it just has not been brought in yet.
//! [`MmStruct::handle_page_fault`] decides which case applies:
//!
//! 1. The page was present: this is a protection violation (e.g. a write to
//!    a read-only page). Fail.
//! 2. The page has a descriptor in the SPT:
//!    - already resident: another fault got there first; nothing to do.
//!    - a write to a read-only page: fail.
//!    - otherwise claim it: obtain a frame, map it and fill it from the
//!      page's initializer, swap slot or file.
//! 3. There is no descriptor, but the access looks like a push below the
//!    current stack pointer, within the stack limit: grow the stack by one
//!    page.
//! 4. Anything else is an invalid access. Fail.
//!
//! A failure is returned to the caller, which terminates the faulting
//! process (see [`crate::process::Process`]).

use crate::{mm_struct::MmStruct, page::Page};
use alloc::sync::Arc;
use keos::{
    KernelError,
    addressing::{PAGE_SIZE, Va},
    spinlock::SpinLock,
    task::PFErrorCode,
};

/// A decoded page fault: where it happened and what kind of access caused it.
#[derive(Debug, Clone, Copy)]
pub struct PageFaultReason {
    /// Faulting address, as read from `cr2`.
    pub fault_addr: Va,
    /// The access was a write.
    pub is_write_access: bool,
    /// The page was mapped, so this is a protection fault.
    pub is_present: bool,
    /// The access came from user mode. When clear, the kernel faulted on a
    /// user address (e.g. while copying system call arguments) and the trap
    /// frame's stack pointer is the kernel's.
    pub is_user: bool,
}

impl PageFaultReason {
    /// Decodes the error code the cpu pushed for a fault at `cr2`.
    pub fn new(ec: PFErrorCode, cr2: Va) -> Self {
        PageFaultReason {
            fault_addr: cr2,
            is_write_access: ec.contains(PFErrorCode::WRITE_ACCESS),
            is_present: ec.contains(PFErrorCode::PRESENT),
            is_user: ec.contains(PFErrorCode::USER),
        }
    }

    /// Returns `true` if the fault is due to **demand paging**, that is, the
    /// page was not present.
    #[inline]
    pub fn is_demand_paging_fault(&self) -> bool {
        !self.is_present
    }
}

impl MmStruct {
    /// Resolves a page fault.
    ///
    /// `rsp` is the user stack pointer at the time of the fault: the one in
    /// the trap frame for a fault from user mode, the one saved on kernel
    /// entry for a fault raised by the kernel while accessing user memory.
    ///
    /// # Errors
    /// - [`KernelError::InvalidAccess`]: protection violation, or write to a
    ///   read-only page.
    /// - [`KernelError::BadAddress`]: the address is not part of the address
    ///   space and not a valid stack access.
    /// - Any error from obtaining or filling a frame, such as
    ///   [`KernelError::NoMemory`], [`KernelError::NoSpace`] or
    ///   [`KernelError::IOError`].
    pub fn handle_page_fault(
        &mut self,
        reason: &PageFaultReason,
        rsp: Va,
    ) -> Result<(), KernelError> {
        if !reason.is_demand_paging_fault() {
            return Err(KernelError::InvalidAccess);
        }
        let va = reason.fault_addr.page_down();
        match self.spt.find(va).cloned() {
            Some(page) => self.do_lazy_load(&page, reason),
            None if self.is_stack_access(reason.fault_addr, rsp) => self.grow_stack(va),
            None => Err(KernelError::BadAddress),
        }
    }

    fn do_lazy_load(
        &self,
        page: &Arc<SpinLock<Page>>,
        reason: &PageFaultReason,
    ) -> Result<(), KernelError> {
        let guard = page.lock();
        let (resident, writable) = (guard.is_resident(), guard.writable());
        guard.unlock();
        if resident {
            return Ok(());
        }
        if reason.is_write_access && !writable {
            return Err(KernelError::InvalidAccess);
        }
        self.do_claim_page(page)
    }

    /// Whether a fault at `addr` with stack pointer `rsp` should grow the
    /// stack.
    ///
    /// The address must be below the stack top and above the stack limit,
    /// and no more than a page below `rsp`, but at least the slack of a
    /// `push` below it.
    pub fn is_stack_access(&self, addr: Va, rsp: Va) -> bool {
        let config = self.vm.config();
        let top = config.stack_top();
        let Some(floor) = top.checked_sub(config.max_stack_size()) else {
            return false;
        };
        let Some(highest) = rsp.checked_sub(config.stack_slack()) else {
            return false;
        };
        let above_rsp_window = match rsp.checked_sub(PAGE_SIZE) {
            Some(lowest) => addr > lowest,
            None => true,
        };
        addr < top
            && addr > floor
            && config.is_user_va(addr)
            && addr <= highest
            && above_rsp_window
    }

    fn grow_stack(&mut self, va: Va) -> Result<(), KernelError> {
        self.add_stack_page(va)?;
        log::debug!("stack: grown to {:?}", va);
        Ok(())
    }
}
