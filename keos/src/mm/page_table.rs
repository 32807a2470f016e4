//! Hardware address translation.
//!
//! The x86_64 MMU walks a 4-level page table to translate a virtual address
//! into a physical one. The paging engine does not walk the table itself;
//! it consumes the operations of the [`PageTable`] trait, which is
//! implemented over the real table by the architecture layer.
//!
//! Besides the translation, the MMU maintains two bits per entry that the
//! engine relies on:
//! - [`PteFlags::A`] (accessed): set by the hardware whenever the entry is
//!   used for a translation. Cleared by software to detect references.
//! - [`PteFlags::D`] (dirty): set by the hardware on a write through the
//!   entry.

use crate::addressing::{Pa, Va};

bitflags::bitflags! {
    /// Flags for pte.
    pub struct PteFlags: usize {
        /// Present; must be 1 to map a 4-KByte page.
        const P = 1 << 0;
        /// Read/write; if 0, writes may not be allowed to the 4-KByte page referenced by this entry.
        const RW = 1 << 1;
        /// User/supervisor; if 0, user-mode accesses are not allowed to the 4-KByte page referenced by this entry.
        const US = 1 << 2;
        /// Accessed; indicates whether software has accessed the 4-KByte page referenced by this entry.
        const A = 1 << 5;
        /// Dirty; indicates whether software has written to the 4-KByte page referenced by this entry.
        const D = 1 << 6;
        /// If IA32_EFER.NXE = 1, execute-disable.
        const XD = 1 << 63;
    }
}

bitflags::bitflags! {
    /// Possible memory permissions for a page.
    pub struct Permission: usize {
        /// Page is readable.
        const READ = 1 << 0;
        /// Page is writable.
        const WRITE = 1 << 1;
        /// Page is executable.
        const EXECUTABLE = 1 << 2;
        /// Page can be referred by user application.
        const USER = 1 << 3;
    }
}

impl Permission {
    /// Permission of a user page.
    pub fn user(writable: bool) -> Self {
        if writable {
            Permission::READ | Permission::WRITE | Permission::USER
        } else {
            Permission::READ | Permission::USER
        }
    }

    /// Converts the permission into the flags of a present entry.
    pub fn into_pte_flags(self) -> PteFlags {
        let mut flags = PteFlags::P;
        if self.contains(Permission::WRITE) {
            flags |= PteFlags::RW;
        }
        if self.contains(Permission::USER) {
            flags |= PteFlags::US;
        }
        if !self.contains(Permission::EXECUTABLE) {
            flags |= PteFlags::XD;
        }
        flags
    }
}

/// Errors of page table operations.
#[derive(Debug, PartialEq, Eq)]
pub enum PageTableMappingError {
    /// The address is not page aligned.
    Unaligned,
    /// The requested entry does not exist.
    NotExist,
    /// The address already has a mapping.
    Duplicated,
    /// The requested permission can not be expressed.
    InvalidPermission,
}

/// An address space's hardware page table.
///
/// The table is shared between the thread that owns the address space and
/// any thread that evicts one of its frames, so every operation takes
/// `&self`. Implementations are responsible for invalidating stale TLB
/// entries when a mapping is removed.
pub trait PageTable
where
    Self: Send + Sync,
{
    /// Physical address mapped at `va`, if any.
    fn get_page(&self, va: Va) -> Option<Pa>;

    /// Maps the page at `va` to the frame at `pa`.
    ///
    /// Fails with [`PageTableMappingError::Duplicated`] if `va` is already
    /// mapped.
    fn map(&self, va: Va, pa: Pa, perm: Permission) -> Result<(), PageTableMappingError>;

    /// Removes the mapping of `va`, returning the frame it mapped.
    fn unmap(&self, va: Va) -> Result<Pa, PageTableMappingError>;

    /// Flags of the entry mapping `va`, if any.
    fn flags(&self, va: Va) -> Option<PteFlags>;

    /// Sets or clears the accessed bit of the entry mapping `va`.
    fn set_accessed(&self, va: Va, accessed: bool);

    /// Sets or clears the dirty bit of the entry mapping `va`.
    fn set_dirty(&self, va: Va, dirty: bool);

    /// Whether the page at `va` was accessed since the bit was last cleared.
    fn is_accessed(&self, va: Va) -> bool {
        self.flags(va).is_some_and(|f| f.contains(PteFlags::A))
    }

    /// Whether the page at `va` was written since the bit was last cleared.
    fn is_dirty(&self, va: Va) -> bool {
        self.flags(va).is_some_and(|f| f.contains(PteFlags::D))
    }
}
