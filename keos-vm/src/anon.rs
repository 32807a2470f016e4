//! Anonymous (swap-backed) pages.
//!
//! Anonymous memory has no file behind it: heap, bss, the stack and the
//! data segment once it has been loaded. When such a page is evicted its
//! content is written to the swap disk, and read back on the next fault.
//!
//! The swap disk is divided into *slots* of one page each, that is
//! [`SECTORS_PER_PAGE`] consecutive sectors. A bitmap records which slots are
//! occupied. A page holds its slot only while it is swapped out; the slot is
//! released as soon as the page is read back or destroyed.

use crate::{
    frame::Frame,
    page::{PageContext, PageOperations},
};
use alloc::{vec, vec::Vec};
use keos::{
    KernelError,
    addressing::PAGE_SIZE,
    fs::{Disk, SECTOR_SIZE, Sector},
    spinlock::SpinLock,
};

/// Number of sectors that hold one page.
pub const SECTORS_PER_PAGE: usize = PAGE_SIZE / SECTOR_SIZE;

/// Index of a page-sized slot on the swap disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SwapSlot(usize);

impl SwapSlot {
    /// Index of the slot.
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }

    /// First sector of the slot.
    #[inline]
    pub fn sector(self) -> Sector {
        Sector(self.0 * SECTORS_PER_PAGE)
    }
}

struct SwapBitmap {
    words: Vec<u64>,
    len: usize,
    used: usize,
}

impl SwapBitmap {
    fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(64)],
            len,
            used: 0,
        }
    }

    /// Claims the lowest free slot.
    fn alloc(&mut self) -> Option<usize> {
        for (w, word) in self.words.iter_mut().enumerate() {
            if *word == u64::MAX {
                continue;
            }
            let bit = (!*word).trailing_zeros() as usize;
            let idx = w * 64 + bit;
            if idx >= self.len {
                return None;
            }
            *word |= 1 << bit;
            self.used += 1;
            return Some(idx);
        }
        None
    }

    fn free(&mut self, idx: usize) -> bool {
        let (w, bit) = (idx / 64, idx % 64);
        match self.words.get_mut(w) {
            Some(word) if idx < self.len && *word & (1 << bit) != 0 => {
                *word &= !(1 << bit);
                self.used -= 1;
                true
            }
            _ => false,
        }
    }
}

/// The swap area.
pub struct SwapTable {
    disk: Disk,
    slots: SpinLock<SwapBitmap>,
}

impl SwapTable {
    /// Uses the whole of `disk` as swap.
    pub fn new(disk: Disk) -> Self {
        let capacity = disk.sector_count() / SECTORS_PER_PAGE;
        Self {
            disk,
            slots: SpinLock::new(SwapBitmap::new(capacity)),
        }
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        let slots = self.slots.lock();
        let len = slots.len;
        slots.unlock();
        len
    }

    /// Number of occupied slots.
    pub fn in_use(&self) -> usize {
        let slots = self.slots.lock();
        let used = slots.used;
        slots.unlock();
        used
    }

    /// Claims the lowest-indexed free slot.
    pub fn alloc_slot(&self) -> Option<SwapSlot> {
        let mut slots = self.slots.lock();
        let slot = slots.alloc().map(SwapSlot);
        slots.unlock();
        slot
    }

    /// Releases `slot`.
    pub fn free_slot(&self, slot: SwapSlot) {
        let mut slots = self.slots.lock();
        let freed = slots.free(slot.0);
        slots.unlock();
        if !freed {
            log::warn!("swap: {:?} released twice", slot);
        }
    }

    /// Writes a page to `slot`.
    pub fn write(&self, slot: SwapSlot, page: &[u8; PAGE_SIZE]) -> Result<(), KernelError> {
        let mut buf = [0u8; SECTOR_SIZE];
        for (i, chunk) in page.chunks_exact(SECTOR_SIZE).enumerate() {
            buf.copy_from_slice(chunk);
            self.disk.write(slot.sector() + i, &buf)?;
        }
        Ok(())
    }

    /// Reads a page from `slot`.
    pub fn read(&self, slot: SwapSlot, page: &mut [u8; PAGE_SIZE]) -> Result<(), KernelError> {
        let mut buf = [0u8; SECTOR_SIZE];
        for (i, chunk) in page.chunks_exact_mut(SECTOR_SIZE).enumerate() {
            self.disk.read(slot.sector() + i, &mut buf)?;
            chunk.copy_from_slice(&buf);
        }
        Ok(())
    }
}

/// State of an anonymous page.
#[derive(Debug, Default)]
pub struct AnonPage {
    slot: Option<SwapSlot>,
}

impl AnonPage {
    /// A page that has never been swapped out.
    pub fn new() -> Self {
        Self { slot: None }
    }

    /// The slot holding the page while it is swapped out.
    pub fn swap_slot(&self) -> Option<SwapSlot> {
        self.slot
    }

    /// Reads the swapped-out content into `frame` without giving up the
    /// slot.
    pub(crate) fn read_swapped(&self, swap: &SwapTable, frame: &mut Frame) -> Result<(), KernelError> {
        match self.slot {
            Some(slot) => swap.read(slot, frame.inner_mut()),
            None => Ok(()),
        }
    }
}

impl PageOperations for AnonPage {
    /// Reads the page back from its slot and frees the slot. A page that was
    /// never swapped out keeps the content already in `frame`.
    fn swap_in(&mut self, cx: &PageContext<'_>, frame: &mut Frame) -> Result<(), KernelError> {
        if let Some(slot) = self.slot {
            cx.swap.read(slot, frame.inner_mut())?;
            cx.swap.free_slot(slot);
            self.slot = None;
            log::debug!("swap: {:?} in from {:?}", cx.va, slot);
        }
        Ok(())
    }

    fn swap_out(&mut self, cx: &PageContext<'_>, frame: &Frame) -> Result<(), KernelError> {
        let slot = cx.swap.alloc_slot().ok_or(KernelError::NoSpace)?;
        if let Err(e) = cx.swap.write(slot, frame.inner()) {
            cx.swap.free_slot(slot);
            return Err(e);
        }
        self.slot = Some(slot);
        log::debug!("swap: {:?} out to {:?}", cx.va, slot);
        Ok(())
    }

    fn destroy(&mut self, cx: &PageContext<'_>, _frame: Option<&Frame>) -> Result<(), KernelError> {
        if let Some(slot) = self.slot.take() {
            cx.swap.free_slot(slot);
        }
        Ok(())
    }
}
