//! Uninitialized pages.
//!
//! Pages are not populated when they are created. Instead, an
//! [`UninitPage`] records *how* to populate the page, and the work is
//! deferred to the first fault on it. A program that never touches most of
//! its data segment never pays for reading it.

use crate::{
    anon::AnonPage,
    file::{FilePage, MmapRegion},
    frame::Frame,
    page::{PageKind, VmType},
};
use keos::{KernelError, addressing::PAGE_SIZE, fs::RegularFile};

/// Where the content of a page comes from: `read_bytes` bytes of `file` at
/// `offset`. The rest of the page is zero.
pub struct LazyLoad {
    file: RegularFile,
    offset: usize,
    read_bytes: usize,
}

impl LazyLoad {
    /// Describes a page whose first `read_bytes` bytes come from `file` at
    /// `offset`. `read_bytes` is capped at a page.
    pub fn new(file: RegularFile, offset: usize, read_bytes: usize) -> Self {
        Self {
            file,
            offset,
            read_bytes: read_bytes.min(PAGE_SIZE),
        }
    }

    /// Offset of the page's content in the file.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Number of bytes read from the file.
    #[inline]
    pub fn read_bytes(&self) -> usize {
        self.read_bytes
    }

    /// Populates `frame`. Returns the number of bytes that came from the
    /// file, which is smaller than `read_bytes` if the file is short.
    fn load(&self, frame: &mut Frame) -> Result<usize, KernelError> {
        let buf = frame.inner_mut();
        let read = self
            .file
            .read(self.offset, &mut buf[..self.read_bytes])?
            .min(self.read_bytes);
        buf[read..].fill(0);
        Ok(read)
    }

    fn duplicate(&self) -> Result<Self, KernelError> {
        Ok(Self {
            file: self.file.reopen()?,
            offset: self.offset,
            read_bytes: self.read_bytes,
        })
    }
}

/// How to populate a page on its first fault.
pub enum Initializer {
    /// Fill with zeros.
    Zero,
    /// Load an executable segment.
    Segment(LazyLoad),
    /// Load a page of a memory-mapped file.
    MappedFile {
        /// Where the content comes from.
        load: LazyLoad,
        /// The handle the page is written back through.
        writeback: RegularFile,
        /// The mapping, recorded on its first page only.
        region: Option<MmapRegion>,
    },
}

/// State of a page that has not been touched yet.
pub struct UninitPage {
    target: VmType,
    init: Initializer,
}

impl UninitPage {
    /// Creates a page that becomes `target` once populated with `init`.
    ///
    /// A [`VmType::File`] page must be initialized from a mapped file, and
    /// a mapped file can only populate a [`VmType::File`] page.
    pub fn new(target: VmType, init: Initializer) -> Result<Self, KernelError> {
        let is_mapping = matches!(init, Initializer::MappedFile { .. });
        if is_mapping != (target == VmType::File) {
            return Err(KernelError::InvalidArgument);
        }
        Ok(Self { target, init })
    }

    /// The kind the page turns into.
    #[inline]
    pub fn target(&self) -> VmType {
        self.target
    }

    /// The initializer.
    #[inline]
    pub fn initializer(&self) -> &Initializer {
        &self.init
    }

    /// The mapping this page starts, if any.
    pub fn region(&self) -> Option<MmapRegion> {
        match &self.init {
            Initializer::MappedFile { region, .. } => *region,
            _ => None,
        }
    }

    /// Populates `frame` and returns the state of the initialized page.
    ///
    /// On failure the uninitialized page is handed back unchanged.
    pub(crate) fn initialize(self, frame: &mut Frame) -> Result<PageKind, (Self, KernelError)> {
        let loaded = match &self.init {
            Initializer::Zero => Ok(0),
            Initializer::Segment(load) | Initializer::MappedFile { load, .. } => load.load(frame),
        };
        let read = match loaded {
            Ok(read) => read,
            Err(e) => return Err((self, e)),
        };
        let target = self.target;
        Ok(match self.init {
            Initializer::MappedFile {
                load,
                writeback,
                region,
            } => PageKind::File(FilePage::new(writeback, load.offset, read, region)),
            Initializer::Zero | Initializer::Segment(_) if target == VmType::Stack => {
                PageKind::Stack(AnonPage::new())
            }
            Initializer::Zero | Initializer::Segment(_) => PageKind::Anon(AnonPage::new()),
        })
    }

    /// Duplicates the page for a child address space, reopening the files
    /// it reads from. Pages of memory-mapped files are not inherited.
    pub(crate) fn duplicate(&self) -> Result<Option<Self>, KernelError> {
        let init = match &self.init {
            Initializer::Zero => Initializer::Zero,
            Initializer::Segment(load) => Initializer::Segment(load.duplicate()?),
            Initializer::MappedFile { .. } => return Ok(None),
        };
        Ok(Some(Self {
            target: self.target,
            init,
        }))
    }
}
