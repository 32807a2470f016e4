//! Memory management.
//!
//! The kernel divides physical memory into page-sized frames. This module
//! defines how the kernel obtains such frames ([`PageAllocator`]) and how it
//! installs them into an address space ([`page_table::PageTable`]).

pub mod page_table;

use crate::addressing::Kva;

/// The raw physical frame allocator.
///
/// # Safety
/// An implementation must return addresses of [`PAGE_SIZE`] bytes that are
/// page aligned, readable and writable through the returned [`Kva`], and
/// exclusively owned by the caller until it is handed back with
/// [`PageAllocator::free_page`].
///
/// [`PAGE_SIZE`]: crate::addressing::PAGE_SIZE
pub unsafe trait PageAllocator
where
    Self: Send + Sync,
{
    /// Allocates a zero-filled page.
    ///
    /// Returns `None` when physical memory is exhausted.
    fn get_zeroed_page(&self) -> Option<Kva>;

    /// Returns a page previously obtained from
    /// [`PageAllocator::get_zeroed_page`].
    fn free_page(&self, kva: Kva);
}
