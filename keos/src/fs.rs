//! Filesystem abstraction.
//!
//! The paging engine touches storage through two kinds of objects: a raw
//! [`Disk`] addressed by [`Sector`] (the swap area), and [`RegularFile`]
//! handles that back executable segments and memory-mapped files.

use crate::KernelError;
use alloc::sync::Arc;

/// Size of a disk sector in bytes.
pub const SECTOR_SIZE: usize = 512;

/// Defines traits for file system operations.
pub mod traits {
    use crate::KernelError;

    /// Trait representing a block device.
    ///
    /// A block device transfers data in units of [`super::SECTOR_SIZE`]
    /// bytes.
    pub trait BlockDevice
    where
        Self: Send + Sync,
    {
        /// Reads a sector into `buf`.
        fn read(&self, sector: super::Sector, buf: &mut [u8; 512]) -> Result<(), KernelError>;

        /// Writes `buf` to a sector.
        fn write(&self, sector: super::Sector, buf: &[u8; 512]) -> Result<(), KernelError>;

        /// Returns the size of the device in sectors.
        fn size(&self) -> usize;
    }

    /// Trait representing a regular file in the filesystem.
    ///
    /// A regular file contains user data and supports positional read and
    /// write operations. Each handle is independent; [`reopen`] returns a
    /// fresh handle on the same underlying file.
    ///
    /// [`reopen`]: RegularFile::reopen
    pub trait RegularFile
    where
        Self: Send + Sync,
    {
        /// Returns the size of the file in bytes.
        fn size(&self) -> usize;

        /// Reads from the file at `position` into `buf`.
        ///
        /// # Returns
        /// - `Ok(usize)`: The number of bytes read; shorter than `buf` at the
        ///   end of the file.
        /// - `Err(KernelError)`: An error occured while the read operation.
        fn read_at(&self, position: usize, buf: &mut [u8]) -> Result<usize, KernelError>;

        /// Writes `buf` into the file at `position`.
        ///
        /// # Returns
        /// - `Ok(usize)`: The number of bytes written.
        /// - `Err(KernelError)`: An error occured while the write operation.
        fn write_at(&self, position: usize, buf: &[u8]) -> Result<usize, KernelError>;

        /// Opens a new, independent handle to the same file.
        fn reopen(&self) -> Result<super::RegularFile, KernelError>;
    }
}

/// A handle to a regular file.
///
/// Dropping the handle closes it. The handle is deliberately not `Clone`:
/// a second handle must be obtained with [`RegularFile::reopen`].
pub struct RegularFile(pub Arc<dyn traits::RegularFile>);

impl RegularFile {
    /// Creates a new [`RegularFile`] handle from a given implementation of
    /// [`traits::RegularFile`].
    pub fn new(r: impl traits::RegularFile + 'static) -> Self {
        Self(Arc::new(r))
    }

    /// Returns the size of the file in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.0.size()
    }

    /// Reads data from the file at `position` into the provided buffer.
    #[inline]
    pub fn read(&self, position: usize, buf: &mut [u8]) -> Result<usize, KernelError> {
        self.0.read_at(position, buf)
    }

    /// Writes data from the buffer into the file at `position`.
    #[inline]
    pub fn write(&self, position: usize, buf: &[u8]) -> Result<usize, KernelError> {
        self.0.write_at(position, buf)
    }

    /// Opens an independent handle to the same file.
    #[inline]
    pub fn reopen(&self) -> Result<RegularFile, KernelError> {
        self.0.reopen()
    }
}

/// Sector, an access granuality for the disk.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
pub struct Sector(pub usize);

impl Sector {
    /// Get offset that represented by the sector.
    #[inline]
    pub fn into_offset(self) -> usize {
        self.0 * SECTOR_SIZE
    }

    /// Cast into usize.
    #[inline]
    pub fn into_usize(self) -> usize {
        self.0
    }
}

impl core::ops::Add<usize> for Sector {
    type Output = Self;

    fn add(self, rhs: usize) -> Self {
        Self(self.0 + rhs)
    }
}

/// The disk, a device that has byte sink.
pub struct Disk {
    dev: Arc<dyn traits::BlockDevice>,
}

impl Disk {
    /// Create a new disk on top of a block device.
    pub fn new(dev: impl traits::BlockDevice + 'static) -> Self {
        Self { dev: Arc::new(dev) }
    }

    /// Number of sectors of the disk.
    pub fn sector_count(&self) -> usize {
        self.dev.size()
    }

    /// Read 512 bytes from disk starting from sector.
    pub fn read(&self, sector: Sector, buf: &mut [u8; 512]) -> Result<(), KernelError> {
        if sector.into_usize() >= self.sector_count() {
            return Err(KernelError::IOError);
        }
        self.dev.read(sector, buf)
    }

    /// Write 512 bytes to disk starting from sector.
    pub fn write(&self, sector: Sector, buf: &[u8; 512]) -> Result<(), KernelError> {
        if sector.into_usize() >= self.sector_count() {
            Err(KernelError::IOError)
        } else {
            self.dev.write(sector, buf)
        }
    }
}
