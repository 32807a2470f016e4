//! Memory-mapped files.
//!
//! `mmap` makes a range of a file appear in the address space: reading the
//! memory reads the file, and writes to the memory find their way back into
//! the file. As with every other page, nothing is read at `mmap` time; each
//! page is loaded on its first fault.
//!
//! A file page needs no swap slot. When it is evicted, it is written back to
//! the file if the hardware dirty bit says it was modified (and only if the
//! mapping is writable), and re-read from the file on the next fault.
//!
//! Every page owns a private, reopened handle to the file, so closing the
//! descriptor the mapping was created from does not affect the mapping.

use crate::{
    frame::Frame,
    mm_struct::MmStruct,
    page::{Page, PageContext, PageKind, PageOperations, VmType},
    uninit::{Initializer, LazyLoad, UninitPage},
};
use alloc::vec::Vec;
use keos::{
    KernelError,
    addressing::{PAGE_SIZE, Va},
    fs::RegularFile,
};

/// A mapping created by [`MmStruct::mmap`], recorded on its first page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmapRegion {
    /// Address the mapping starts at.
    pub base: Va,
    /// Number of pages of the mapping.
    pub page_count: usize,
}

/// State of a resident or evicted file page.
pub struct FilePage {
    file: RegularFile,
    offset: usize,
    file_bytes: usize,
    region: Option<MmapRegion>,
}

impl FilePage {
    pub(crate) fn new(
        file: RegularFile,
        offset: usize,
        file_bytes: usize,
        region: Option<MmapRegion>,
    ) -> Self {
        Self {
            file,
            offset,
            file_bytes,
            region,
        }
    }

    /// Offset of the page in the file.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Number of bytes of the page that are backed by the file.
    #[inline]
    pub fn file_bytes(&self) -> usize {
        self.file_bytes
    }

    /// The mapping this page starts, if any.
    #[inline]
    pub fn region(&self) -> Option<MmapRegion> {
        self.region
    }

    fn write_back(&self, cx: &PageContext<'_>, frame: &Frame) -> Result<(), KernelError> {
        if cx.writable && cx.page_table.is_dirty(cx.va) {
            self.file
                .write(self.offset, &frame.inner()[..self.file_bytes])?;
            cx.page_table.set_dirty(cx.va, false);
            log::debug!("mmap: {:?} written back at {:#x}", cx.va, self.offset);
        }
        Ok(())
    }
}

impl PageOperations for FilePage {
    fn swap_in(&mut self, _cx: &PageContext<'_>, frame: &mut Frame) -> Result<(), KernelError> {
        let buf = frame.inner_mut();
        let read = self
            .file
            .read(self.offset, &mut buf[..self.file_bytes])?
            .min(self.file_bytes);
        buf[read..].fill(0);
        Ok(())
    }

    fn swap_out(&mut self, cx: &PageContext<'_>, frame: &Frame) -> Result<(), KernelError> {
        self.write_back(cx, frame)
    }

    fn destroy(&mut self, cx: &PageContext<'_>, frame: Option<&Frame>) -> Result<(), KernelError> {
        match frame {
            Some(frame) => self.write_back(cx, frame),
            None => Ok(()),
        }
    }
}

impl MmStruct {
    /// Maps `length` bytes of `file` starting at `offset` to `addr`.
    ///
    /// The last page is zero-filled past the end of the requested length
    /// (or the end of the file, whichever comes first).
    ///
    /// # Returns
    /// - `Ok(addr)`: the mapping was created.
    /// - `Err(KernelError::InvalidArgument)`: `addr` is null or unaligned,
    ///   `length` is zero, `offset` is unaligned, the range leaves user
    ///   space or overflows (in memory or in the file), or any page in the
    ///   range is already in use. Nothing is mapped in this case.
    pub fn mmap(
        &mut self,
        addr: Va,
        length: usize,
        writable: bool,
        file: &RegularFile,
        offset: usize,
    ) -> Result<Va, KernelError> {
        if addr.into_usize() == 0 || addr.offset() != 0 || length == 0 || offset % PAGE_SIZE != 0
        {
            return Err(KernelError::InvalidArgument);
        }
        let page_count = length.div_ceil(PAGE_SIZE);
        // Span of the last page from the start, in the address space and in
        // the file. Both must be representable.
        let span = (page_count - 1)
            .checked_mul(PAGE_SIZE)
            .filter(|span| offset.checked_add(*span).is_some())
            .ok_or(KernelError::InvalidArgument)?;
        let last = addr
            .into_usize()
            .checked_add(span)
            .and_then(Va::new)
            .filter(|last| self.vm.config().is_user_va(*last))
            .ok_or(KernelError::InvalidArgument)?;
        if (0..page_count).any(|i| self.spt.find(addr + i * PAGE_SIZE).is_some()) {
            return Err(KernelError::InvalidArgument);
        }

        let region = MmapRegion {
            base: addr,
            page_count,
        };
        let mut staged: Vec<Va> = Vec::with_capacity(page_count);
        let mut remaining = length;
        for i in 0..page_count {
            let va = addr + i * PAGE_SIZE;
            let read_bytes = remaining.min(PAGE_SIZE);
            remaining -= read_bytes;
            let result = self.stage_file_page(
                va,
                writable,
                file,
                offset + i * PAGE_SIZE,
                read_bytes,
                (i == 0).then_some(region),
            );
            if let Err(e) = result {
                for va in staged {
                    let _ = self.spt.remove(va, &self.vm);
                }
                return Err(e);
            }
            staged.push(va);
        }
        log::debug!(
            "mmap: {:?}..={:?} ({} pages, offset {:#x}, writable {})",
            addr,
            last,
            page_count,
            offset,
            writable
        );
        Ok(addr)
    }

    fn stage_file_page(
        &mut self,
        va: Va,
        writable: bool,
        file: &RegularFile,
        offset: usize,
        read_bytes: usize,
        region: Option<MmapRegion>,
    ) -> Result<(), KernelError> {
        let init = Initializer::MappedFile {
            load: LazyLoad::new(file.reopen()?, offset, read_bytes),
            writeback: file.reopen()?,
            region,
        };
        let uninit = UninitPage::new(VmType::File, init)?;
        let page = Page::new(va, writable, PageKind::Uninit(uninit), self.page_table.clone());
        self.spt.insert(page).map(|_| ())
    }

    /// Unmaps the mapping starting at `addr`, writing modified pages back
    /// to the file.
    ///
    /// # Errors
    /// [`KernelError::InvalidArgument`] if `addr` is not the start of a
    /// mapping, or the mapping is no longer complete. Nothing is unmapped in
    /// this case.
    pub fn munmap(&mut self, addr: Va) -> Result<(), KernelError> {
        let region = self
            .spt
            .find(addr)
            .and_then(|page| {
                let guard = page.lock();
                let region = match guard.kind() {
                    PageKind::File(file) => file.region(),
                    PageKind::Uninit(uninit) => uninit.region(),
                    _ => None,
                };
                guard.unlock();
                region
            })
            .filter(|region| region.base == addr)
            .ok_or(KernelError::InvalidArgument)?;

        let pages: Vec<Va> = (0..region.page_count)
            .map(|i| region.base + i * PAGE_SIZE)
            .collect();
        for va in pages.iter() {
            let is_file_page = self.spt.find(*va).is_some_and(|page| {
                let guard = page.lock();
                let ty = guard.vm_type();
                guard.unlock();
                ty == VmType::File
            });
            if !is_file_page {
                return Err(KernelError::InvalidArgument);
            }
        }

        let mut result = Ok(());
        for va in pages {
            if let Err(e) = self.spt.remove(va, &self.vm) {
                log::warn!("munmap: {:?}: {:?}", va, e);
                result = result.and(Err(e));
            }
        }
        log::debug!("munmap: {:?} ({} pages)", addr, region.page_count);
        result
    }
}
