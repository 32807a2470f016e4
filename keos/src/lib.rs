//! # KeOS: KAIST Educational Operating System
//!
//! This crate is the kernel surface the demand-paging engine is written
//! against. It does not drive hardware itself; each subsystem the paging
//! engine depends on is exposed as a narrow trait that the rest of the kernel
//! (or a test harness) implements:
//!
//! - [`mm::PageAllocator`]: hands out and reclaims physical page frames.
//! - [`mm::page_table::PageTable`]: the hardware address-translation
//!   structure, including the accessed and dirty bits.
//! - [`fs::traits::BlockDevice`] and [`fs::traits::RegularFile`]: sector
//!   devices (the swap disk) and open files.
//! - [`task::Thread`] and [`task::Task`]: the running thread and the trap
//!   entry of its process.
//!
//! All of them report failures with [`KernelError`], the errno-like error
//! type that is eventually returned to user programs.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod fs;
pub mod mm;
pub mod task;

pub use abyss::{addressing, spinlock};

/// Enum representing errors that can occur during a kernel operation.
///
/// Each variant corresponds to a specific type of error that might occur
/// during the handling of a kernel operation. These errors can be returned to
/// the user program to indicate the nature of the failure.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum KernelError {
    /// No such file or directory. (ENOENT)
    NoSuchEntry,
    /// Input/output error. (EIO)
    IOError,
    /// Cannot allocate memory. (ENOMEM)
    NoMemory,
    /// Permission denied. (EACCES)
    InvalidAccess,
    /// Bad address. (EFAULT)
    BadAddress,
    /// Invalid argument. (EINVAL)
    InvalidArgument,
    /// No space left on device. (ENOSPC)
    NoSpace,
}

impl KernelError {
    /// Converts the [`KernelError`] enum into a corresponding `usize` error
    /// code. The result is cast to `usize` for use as a return value in
    /// system calls.
    pub fn into_usize(self) -> usize {
        (match self {
            KernelError::NoSuchEntry => -2isize,
            KernelError::IOError => -5,
            KernelError::NoMemory => -12,
            KernelError::InvalidAccess => -13,
            KernelError::BadAddress => -14,
            KernelError::InvalidArgument => -22,
            KernelError::NoSpace => -28,
        }) as usize
    }
}

/// The given `isize` does not indicate an [`KernelError`].
#[derive(Debug, Eq, PartialEq)]
pub struct TryFromError {
    e: isize,
}

impl TryFrom<isize> for KernelError {
    type Error = TryFromError;

    fn try_from(value: isize) -> Result<Self, Self::Error> {
        match value {
            -2 => Ok(Self::NoSuchEntry),
            -5 => Ok(Self::IOError),
            -12 => Ok(Self::NoMemory),
            -13 => Ok(Self::InvalidAccess),
            -14 => Ok(Self::BadAddress),
            -22 => Ok(Self::InvalidArgument),
            -28 => Ok(Self::NoSpace),
            e => Err(TryFromError { e }),
        }
    }
}
