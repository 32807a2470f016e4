//! Page descriptors.
//!
//! A [`Page`] describes one virtual page of an address space. At any time it
//! is in exactly one of three states:
//!
//! | state          | `frame`  | `kind`                                       |
//! |----------------|----------|----------------------------------------------|
//! | uninitialized  | `None`   | [`PageKind::Uninit`]                         |
//! | resident       | `Some`   | anything but [`PageKind::Uninit`]            |
//! | swapped out    | `None`   | [`PageKind::Anon`]/[`PageKind::Stack`] with a slot, or [`PageKind::File`] |
//!
//! The kind decides which backing store the page is written to on eviction
//! and read from when it faults back in. Anonymous and stack pages go to
//! swap ([`crate::anon`]); file pages go back to their file
//! ([`crate::file`]).

use crate::{
    Vm,
    anon::{AnonPage, SwapTable},
    file::FilePage,
    frame::Frame,
    uninit::UninitPage,
};
use alloc::sync::Arc;
use keos::{
    KernelError,
    addressing::{Pa, Va},
    mm::page_table::{PageTable, Permission},
};

/// The kind of memory a page is, or will become once touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmType {
    /// Swap-backed memory.
    Anon,
    /// Memory mapped from a file.
    File,
    /// Swap-backed memory of the user stack.
    Stack,
}

/// Everything a backing store needs to know about the page it serves.
pub struct PageContext<'a> {
    /// Address of the page.
    pub va: Va,
    /// Whether the page is mapped writable.
    pub writable: bool,
    /// Page table the page is mapped in.
    pub page_table: &'a dyn PageTable,
    /// The swap area.
    pub swap: &'a SwapTable,
}

/// Operations of a backing store.
pub trait PageOperations {
    /// Fills `frame` with the page's content when it becomes resident.
    fn swap_in(&mut self, cx: &PageContext<'_>, frame: &mut Frame) -> Result<(), KernelError>;

    /// Preserves the content of `frame` before the frame is taken away.
    fn swap_out(&mut self, cx: &PageContext<'_>, frame: &Frame) -> Result<(), KernelError>;

    /// Releases the backing store. `frame` is the page's frame if it is
    /// resident.
    fn destroy(&mut self, cx: &PageContext<'_>, frame: Option<&Frame>) -> Result<(), KernelError>;
}

/// Per-kind state of a page.
pub enum PageKind {
    /// Not touched yet.
    Uninit(UninitPage),
    /// Anonymous memory.
    Anon(AnonPage),
    /// Memory mapped from a file.
    File(FilePage),
    /// The user stack.
    Stack(AnonPage),
}

/// A virtual page.
pub struct Page {
    va: Va,
    writable: bool,
    frame: Option<Frame>,
    kind: PageKind,
    page_table: Arc<dyn PageTable>,
}

impl Page {
    /// Creates a non-resident page at `va`, rounded down to its page.
    pub fn new(va: Va, writable: bool, kind: PageKind, page_table: Arc<dyn PageTable>) -> Self {
        Self {
            va: va.page_down(),
            writable,
            frame: None,
            kind,
            page_table,
        }
    }

    /// Address of the page.
    #[inline]
    pub fn va(&self) -> Va {
        self.va
    }

    /// Whether the page may be written.
    #[inline]
    pub fn writable(&self) -> bool {
        self.writable
    }

    /// Per-kind state.
    #[inline]
    pub fn kind(&self) -> &PageKind {
        &self.kind
    }

    /// The frame backing the page, if resident.
    #[inline]
    pub fn frame(&self) -> Option<&Frame> {
        self.frame.as_ref()
    }

    /// Whether the page occupies a frame.
    #[inline]
    pub fn is_resident(&self) -> bool {
        self.frame.is_some()
    }

    /// The kind of memory the page is, or will become once initialized.
    pub fn vm_type(&self) -> VmType {
        match &self.kind {
            PageKind::Uninit(uninit) => uninit.target(),
            PageKind::Anon(_) => VmType::Anon,
            PageKind::File(_) => VmType::File,
            PageKind::Stack(_) => VmType::Stack,
        }
    }

    pub(crate) fn frame_pa(&self) -> Option<Pa> {
        self.frame.as_ref().map(Frame::pa)
    }

    /// Reads and clears the hardware accessed bit of the page.
    pub(crate) fn test_and_clear_accessed(&self) -> bool {
        let accessed = self.page_table.is_accessed(self.va);
        if accessed {
            self.page_table.set_accessed(self.va, false);
        }
        accessed
    }

    /// Makes the page resident in `frame`.
    ///
    /// Installs the mapping and then fills the frame: an uninitialized page
    /// runs its initializer and turns into its target kind, any other page
    /// is swapped in from its backing store. On failure the mapping is
    /// removed and the frame is released.
    pub(crate) fn claim(&mut self, mut frame: Frame, swap: &SwapTable) -> Result<(), KernelError> {
        debug_assert!(self.frame.is_none());
        if self
            .page_table
            .map(self.va, frame.pa(), Permission::user(self.writable))
            .is_err()
        {
            return Err(KernelError::BadAddress);
        }

        let result = if let PageKind::Uninit(_) = self.kind {
            self.initialize(&mut frame)
        } else {
            let cx = PageContext {
                va: self.va,
                writable: self.writable,
                page_table: &*self.page_table,
                swap,
            };
            match &mut self.kind {
                PageKind::Anon(anon) | PageKind::Stack(anon) => anon.swap_in(&cx, &mut frame),
                PageKind::File(file) => file.swap_in(&cx, &mut frame),
                PageKind::Uninit(_) => Ok(()),
            }
        };

        match result {
            Ok(()) => {
                self.frame = Some(frame);
                Ok(())
            }
            Err(e) => {
                let _ = self.page_table.unmap(self.va);
                Err(e)
            }
        }
    }

    /// Runs the initializer of an uninitialized page on `frame` and turns the
    /// page into its target kind. The page stays uninitialized on failure.
    fn initialize(&mut self, frame: &mut Frame) -> Result<(), KernelError> {
        if !matches!(self.kind, PageKind::Uninit(_)) {
            return Err(KernelError::InvalidArgument);
        }
        let PageKind::Uninit(uninit) =
            core::mem::replace(&mut self.kind, PageKind::Anon(AnonPage::new()))
        else {
            unreachable!()
        };
        match uninit.initialize(frame) {
            Ok(kind) => {
                self.kind = kind;
                Ok(())
            }
            Err((uninit, e)) => {
                self.kind = PageKind::Uninit(uninit);
                Err(e)
            }
        }
    }

    /// Writes the page to its backing store and takes its frame away.
    ///
    /// On failure the page stays resident.
    pub(crate) fn swap_out(&mut self, swap: &SwapTable) -> Result<Frame, KernelError> {
        let Some(frame) = self.frame.as_ref() else {
            return Err(KernelError::InvalidArgument);
        };
        let cx = PageContext {
            va: self.va,
            writable: self.writable,
            page_table: &*self.page_table,
            swap,
        };
        match &mut self.kind {
            PageKind::Anon(anon) | PageKind::Stack(anon) => anon.swap_out(&cx, frame)?,
            PageKind::File(file) => file.swap_out(&cx, frame)?,
            PageKind::Uninit(_) => return Err(KernelError::InvalidArgument),
        }
        let _ = self.page_table.unmap(self.va);
        self.frame.take().ok_or(KernelError::InvalidArgument)
    }

    /// Releases everything the page holds: its backing store, its mapping
    /// and its frame.
    ///
    /// The page is left uninhabitable; it must be dropped afterwards.
    pub(crate) fn destroy(&mut self, vm: &Vm) -> Result<(), KernelError> {
        if let Some(pa) = self.frame_pa() {
            vm.unregister_frame(pa);
        }
        let cx = PageContext {
            va: self.va,
            writable: self.writable,
            page_table: &*self.page_table,
            swap: vm.swap(),
        };
        let frame = self.frame.as_ref();
        let result = match &mut self.kind {
            PageKind::Anon(anon) | PageKind::Stack(anon) => anon.destroy(&cx, frame),
            PageKind::File(file) => file.destroy(&cx, frame),
            PageKind::Uninit(_) => Ok(()),
        };
        if self.frame.take().is_some() {
            let _ = self.page_table.unmap(self.va);
        }
        result
    }

    /// Copies the content of the page into `frame`, wherever the content
    /// currently lives.
    pub(crate) fn copy_contents(&self, frame: &mut Frame, swap: &SwapTable) -> Result<(), KernelError> {
        match (&self.frame, &self.kind) {
            (Some(src), _) => {
                frame.inner_mut().copy_from_slice(src.inner());
                Ok(())
            }
            (None, PageKind::Anon(anon) | PageKind::Stack(anon)) => anon.read_swapped(swap, frame),
            _ => Ok(()),
        }
    }
}

impl core::fmt::Debug for Page {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Page")
            .field("va", &self.va)
            .field("writable", &self.writable)
            .field("frame", &self.frame)
            .field("type", &self.vm_type())
            .finish()
    }
}
