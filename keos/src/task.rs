//! Task trait for interact with user process.

use crate::addressing::Va;

bitflags::bitflags! {
    /// Error code pushed by the cpu on a page fault.
    pub struct PFErrorCode: usize {
        /// The fault was caused by a page-level protection violation; if
        /// clear, by a non-present page.
        const PRESENT = 1 << 0;
        /// The access causing the fault was a write.
        const WRITE_ACCESS = 1 << 1;
        /// The access causing the fault originated in user mode.
        const USER = 1 << 2;
    }
}

/// Registers saved on the kernel stack when the cpu traps.
#[derive(Debug, Clone, Copy)]
pub struct TrapFrame {
    /// Instruction pointer at the time of the trap.
    pub rip: usize,
    /// Stack pointer at the time of the trap.
    pub rsp: usize,
}

/// The thread that is currently running on this cpu.
pub trait Thread
where
    Self: Send + Sync,
{
    /// User stack pointer saved when the thread last entered the kernel.
    ///
    /// Used to decide stack growth for faults raised while the kernel is
    /// accessing user memory on behalf of the thread.
    fn kernel_rsp(&self) -> Va;

    /// Terminates the current process with `status`.
    fn exit(&self, status: i32);
}

/// Represents a **task** executed by a thread.
pub trait Task {
    /// Handles a **page fault**.
    ///
    /// - `ec` provides information about the cause of the page fault.
    /// - `cr2` is the faulting address.
    /// - `frame` holds the registers saved at the trap.
    fn page_fault(&mut self, ec: PFErrorCode, cr2: Va, frame: &TrapFrame);
}
