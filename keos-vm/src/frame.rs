//! Physical frames and the global frame table.
//!
//! A [`Frame`] is one page of physical memory on loan from the
//! [`PageAllocator`]. It is owned by exactly one [`Page`] while resident and
//! goes back to the allocator when dropped.
//!
//! The [`FrameTable`] records every frame that currently backs a page, so
//! that when the allocator runs dry the kernel can pick a victim, push its
//! content out to swap or to its file, and hand the frame to the faulting
//! page instead.
//!
//! ## Victim selection
//!
//! The table is a ring scanned by a clock hand that persists across
//! evictions (second-chance clock). For the page under the hand:
//!
//! - accessed bit set: clear it, reset the frame's recency counter, move on;
//! - accessed bit clear and counter `>= 1`: this is the victim;
//! - accessed bit clear and counter `0`: bump the counter, move on.
//!
//! A page therefore survives at least one full sweep after its last
//! reference. Pages whose lock is held by someone else are skipped.

use crate::{Vm, page::Page};
use alloc::{
    sync::{Arc, Weak},
    vec::Vec,
};
use keos::{
    KernelError,
    addressing::{Kva, PAGE_SIZE, Pa},
    mm::PageAllocator,
    spinlock::SpinLock,
};

/// A page of physical memory.
pub struct Frame {
    kva: Kva,
    allocator: Arc<dyn PageAllocator>,
}

impl Frame {
    /// Wraps a page handed out by `allocator`.
    ///
    /// # Safety
    /// `kva` must come from `allocator.get_zeroed_page()` and must not be
    /// owned by any other [`Frame`].
    pub(crate) unsafe fn from_raw(kva: Kva, allocator: Arc<dyn PageAllocator>) -> Self {
        Self { kva, allocator }
    }

    /// Kernel virtual address of the frame.
    #[inline]
    pub fn kva(&self) -> Kva {
        self.kva
    }

    /// Physical address of the frame.
    #[inline]
    pub fn pa(&self) -> Pa {
        self.kva.into_pa()
    }

    /// Content of the frame.
    pub fn inner(&self) -> &[u8; PAGE_SIZE] {
        // SAFETY: the allocator guarantees PAGE_SIZE bytes owned by this frame.
        unsafe { &*(self.kva.into_usize() as *const [u8; PAGE_SIZE]) }
    }

    /// Mutable content of the frame.
    pub fn inner_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        // SAFETY: the allocator guarantees PAGE_SIZE bytes owned by this frame.
        unsafe { &mut *(self.kva.into_usize() as *mut [u8; PAGE_SIZE]) }
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.allocator.free_page(self.kva);
    }
}

impl core::fmt::Debug for Frame {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Frame({:?})", self.pa())
    }
}

struct FrameEntry {
    pa: Pa,
    owner: Weak<SpinLock<Page>>,
    recency: u8,
}

enum Verdict {
    Busy,
    Stale,
    Referenced,
    Idle,
}

/// The table of resident frames.
pub struct FrameTable {
    frames: Vec<FrameEntry>,
    hand: usize,
}

impl FrameTable {
    /// Creates an empty table.
    pub const fn new() -> Self {
        Self {
            frames: Vec::new(),
            hand: 0,
        }
    }

    /// Number of resident frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether no frame is resident.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Records that the frame at `pa` now backs `owner`.
    pub fn register(&mut self, pa: Pa, owner: Weak<SpinLock<Page>>) {
        self.frames.push(FrameEntry {
            pa,
            owner,
            recency: 0,
        });
    }

    /// Forgets the frame at `pa`. Returns whether it was present.
    pub fn unregister(&mut self, pa: Pa) -> bool {
        match self.frames.iter().position(|e| e.pa == pa) {
            Some(idx) => {
                self.remove_at(idx);
                true
            }
            None => false,
        }
    }

    fn remove_at(&mut self, idx: usize) -> FrameEntry {
        let entry = self.frames.remove(idx);
        if idx < self.hand {
            self.hand -= 1;
        }
        if self.hand >= self.frames.len() {
            self.hand = 0;
        }
        entry
    }

    /// Runs the clock until it finds a victim.
    ///
    /// The victim is removed from the table. Gives up after three sweeps
    /// without a victim, which only happens when every page is busy.
    pub(crate) fn select_victim(&mut self) -> Option<(Pa, Arc<SpinLock<Page>>)> {
        let mut budget = 3 * self.frames.len() + 1;
        while budget > 0 && !self.frames.is_empty() {
            budget -= 1;
            if self.hand >= self.frames.len() {
                self.hand = 0;
            }
            let idx = self.hand;
            let Some(owner) = self.frames[idx].owner.upgrade() else {
                self.remove_at(idx);
                continue;
            };
            let pa = self.frames[idx].pa;
            let verdict = match owner.try_lock() {
                Ok(page) => {
                    let verdict = if page.frame_pa() != Some(pa) {
                        Verdict::Stale
                    } else if page.test_and_clear_accessed() {
                        Verdict::Referenced
                    } else {
                        Verdict::Idle
                    };
                    page.unlock();
                    verdict
                }
                Err(_) => Verdict::Busy,
            };
            let entry = &mut self.frames[idx];
            match verdict {
                Verdict::Stale => {
                    self.remove_at(idx);
                }
                Verdict::Busy => self.hand += 1,
                Verdict::Referenced => {
                    log::trace!("clock: {:?} referenced, second chance", pa);
                    entry.recency = 0;
                    self.hand += 1;
                }
                Verdict::Idle if entry.recency >= 1 => {
                    let entry = self.remove_at(idx);
                    return Some((entry.pa, owner));
                }
                Verdict::Idle => {
                    entry.recency += 1;
                    self.hand += 1;
                }
            }
        }
        None
    }
}

impl Default for FrameTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    /// Obtains a zero-filled frame, evicting a resident page if physical
    /// memory is exhausted.
    ///
    /// The frame is not registered in the frame table; see
    /// [`Vm::register_frame`].
    pub fn get_frame(&self) -> Result<Frame, KernelError> {
        match self.allocator.get_zeroed_page() {
            // SAFETY: `kva` was just handed out by the allocator.
            Some(kva) => Ok(unsafe { Frame::from_raw(kva, self.allocator.clone()) }),
            None => {
                let mut frame = self.evict_frame()?;
                frame.inner_mut().fill(0);
                Ok(frame)
            }
        }
    }

    /// Makes the frame at `pa` a candidate for eviction on behalf of `owner`.
    pub(crate) fn register_frame(&self, pa: Pa, owner: &Arc<SpinLock<Page>>) {
        let mut frames = self.frames.lock();
        frames.register(pa, Arc::downgrade(owner));
        frames.unlock();
    }

    /// Removes the frame at `pa` from eviction candidates.
    pub(crate) fn unregister_frame(&self, pa: Pa) -> bool {
        let mut frames = self.frames.lock();
        let found = frames.unregister(pa);
        frames.unlock();
        found
    }

    fn evict_frame(&self) -> Result<Frame, KernelError> {
        loop {
            let mut frames = self.frames.lock();
            let victim = frames.select_victim();
            frames.unlock();
            let Some((pa, owner)) = victim else {
                log::warn!("eviction: no evictable frame");
                return Err(KernelError::NoMemory);
            };

            let mut page = owner.lock();
            // Destroyed or evicted by someone else since the scan.
            if page.frame_pa() != Some(pa) {
                page.unlock();
                continue;
            }
            let va = page.va();
            let result = page.swap_out(&self.swap);
            page.unlock();
            return match result {
                Ok(frame) => {
                    log::debug!("eviction: {:?} out of {:?}", va, pa);
                    Ok(frame)
                }
                Err(e) => {
                    log::warn!("eviction: swapping out {:?} failed: {:?}", va, e);
                    self.register_frame(pa, &owner);
                    Err(e)
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pa(n: usize) -> Pa {
        Pa::new(n * PAGE_SIZE).unwrap()
    }

    #[test]
    fn dead_owners_are_dropped_by_the_scan() {
        let mut table = FrameTable::new();
        for i in 0..3 {
            table.register(pa(i), Weak::new());
        }
        assert!(table.select_victim().is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn unregister_keeps_hand_in_range() {
        let mut table = FrameTable::new();
        for i in 0..4 {
            table.register(pa(i), Weak::new());
        }
        table.hand = 3;
        assert!(table.unregister(pa(3)));
        assert_eq!(table.hand, 0);
        table.hand = 2;
        assert!(table.unregister(pa(0)));
        assert_eq!(table.hand, 1);
        assert!(!table.unregister(pa(0)));
        assert_eq!(table.len(), 2);
    }
}
