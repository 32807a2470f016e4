//! A user process, as far as its memory is concerned.

use crate::{mm_struct::MmStruct, page_fault::PageFaultReason};
use alloc::sync::Arc;
use keos::{
    KernelError,
    addressing::Va,
    mm::page_table::PageTable,
    task::{PFErrorCode, Task, Thread, TrapFrame},
};

/// A process: its address space and the thread running it.
pub struct Process {
    /// The address space.
    pub mm_struct: MmStruct,
    thread: Arc<dyn Thread>,
}

impl Process {
    /// Creates a process running `thread` in `mm_struct`.
    pub fn new(mm_struct: MmStruct, thread: Arc<dyn Thread>) -> Self {
        Self { mm_struct, thread }
    }

    /// Creates the child of a `fork`, run by `thread` over `page_table`.
    pub fn fork(
        &self,
        thread: Arc<dyn Thread>,
        page_table: Arc<dyn PageTable>,
    ) -> Result<Process, KernelError> {
        Ok(Process::new(self.mm_struct.fork(page_table)?, thread))
    }
}

impl Task for Process {
    /// Handles a page fault.
    ///
    /// Faults that can not be resolved terminate the process with `-1`.
    fn page_fault(&mut self, ec: PFErrorCode, cr2: Va, frame: &TrapFrame) {
        let reason = PageFaultReason::new(ec, cr2);
        let rsp = if reason.is_user {
            Va::new(frame.rsp)
        } else {
            Some(self.thread.kernel_rsp())
        };
        let result = match rsp {
            Some(rsp) => self.mm_struct.handle_page_fault(&reason, rsp),
            None => Err(KernelError::BadAddress),
        };
        if let Err(e) = result {
            log::warn!(
                "page fault at {:?} (rip {:#x}, {:?}): {:?}, killing process",
                cr2,
                frame.rip,
                ec,
                e
            );
            self.thread.exit(-1);
        }
    }
}
