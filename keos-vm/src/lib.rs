//! # Demand paging for KeOS.
//!
//! A process sees a large, contiguous virtual address space, but only a
//! handful of its pages need to occupy physical memory at any moment. This
//! crate keeps every page of every process in one of three places, moving it
//! between them on demand:
//!
//! ```text
//!                 first fault                     eviction
//!  [uninitialized] ──────────▶ [resident in frame] ──────────▶ [swap slot / file]
//!                                      ▲                               │
//!                                      └────────── fault ──────────────┘
//! ```
//!
//! ## Components
//!
//! - [`Vm`]: the subsystem handle created once at start-up. It owns the
//!   global [`frame::FrameTable`], the [`anon::SwapTable`] and the
//!   [`VmConfig`], and is shared by every address space.
//! - [`mm_struct::MmStruct`]: one address space. It owns the
//!   [`spt::SupplementalPageTable`] that records, for every virtual page,
//!   how to materialize it and where its content lives while not resident.
//! - [`page::Page`]: the descriptor of a single virtual page. Its
//!   [`page::PageKind`] decides which backing store governs it:
//!   [`uninit::UninitPage`] before the first touch, [`anon::AnonPage`] for
//!   swap-backed memory and stacks, and [`file::FilePage`] for memory-mapped
//!   files.
//! - [`page_fault`]: the fault resolver, including stack growth.
//! - [`fork`]: duplication of an address space for `fork()`.
//! - [`process::Process`]: glue between the trap handler and the resolver.
//!
//! ## Locking
//!
//! Page descriptors are shared with the frame table through
//! `Arc<SpinLock<Page>>`. The order is always *page, then frame table* or
//! *page, then swap bitmap*. The eviction scan holds the frame table lock and
//! only ever [`try_lock`]s pages, skipping those that are busy, so it can
//! never wait on a page while holding the table.
//!
//! [`try_lock`]: keos::spinlock::SpinLock::try_lock
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod anon;
pub mod config;
pub mod file;
pub mod fork;
pub mod frame;
pub mod mm_struct;
pub mod page;
pub mod page_fault;
pub mod process;
pub mod spt;
pub mod uninit;

use alloc::sync::Arc;
use anon::SwapTable;
use frame::FrameTable;
use keos::{fs::Disk, mm::PageAllocator, spinlock::SpinLock};

pub use config::VmConfig;
pub use mm_struct::MmStruct;
pub use page::{Page, PageKind, VmType};
pub use page_fault::PageFaultReason;

/// The virtual memory subsystem.
///
/// [`Vm`] carries the state that is shared by all address spaces: the
/// physical frame allocator, the table of resident frames with its eviction
/// cursor, and the swap area.
pub struct Vm {
    allocator: Arc<dyn PageAllocator>,
    frames: SpinLock<FrameTable>,
    swap: SwapTable,
    config: VmConfig,
}

impl Vm {
    /// Starts the virtual memory subsystem.
    ///
    /// `swap_disk` is used in its entirety as the swap area.
    pub fn new(allocator: Arc<dyn PageAllocator>, swap_disk: Disk, config: VmConfig) -> Arc<Self> {
        let swap = SwapTable::new(swap_disk);
        log::info!(
            "vm: {} swap slots, stack top {:?}, max stack {:#x}",
            swap.capacity(),
            config.stack_top(),
            config.max_stack_size()
        );
        Arc::new(Vm {
            allocator,
            frames: SpinLock::new(FrameTable::new()),
            swap,
            config,
        })
    }

    /// Configuration the subsystem was started with.
    #[inline]
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// The swap area.
    #[inline]
    pub fn swap(&self) -> &SwapTable {
        &self.swap
    }

    /// Number of frames currently assigned to some page.
    pub fn resident_frames(&self) -> usize {
        let frames = self.frames.lock();
        let len = frames.len();
        frames.unlock();
        len
    }

    /// Number of occupied swap slots.
    pub fn swap_slots_in_use(&self) -> usize {
        self.swap.in_use()
    }
}
