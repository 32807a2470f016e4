//! Physical and Virtual Memory Addressing Schemes.
//!
//! This module provides abstractions for virtual address and physical
//! address. In the keos kernel, kernel virtual memory is directly mapped to
//! physical memory: the kernel calculates the physical address of a frame from
//! its kernel virtual address by adding or subtracting a constant offset.
//!
//! The module defines three primary types for memory addresses: [`Kva`] for
//! kernel virtual address, [`Va`] for (user) virtual address, and [`Pa`] for
//! physical address. Keeping them apart in the type system prevents the
//! classic bug of handing a user address to code that expects a frame.
//!
//! ## Arithmetic Operations
//!
//! All three types implement addition, subtraction, and bitwise operations
//! with `usize`, which allow straightforward address arithmetic:
//!
//! ```
//! use abyss::addressing::{Va, PAGE_SIZE};
//!
//! let va = Va::new(0x4000_1234).unwrap();
//! assert_eq!(va.page_down(), Va::new(0x4000_1000).unwrap());
//! assert_eq!(va.offset(), 0x234);
//! assert_eq!(va.page_down() + PAGE_SIZE, va.page_up());
//! ```

/// Offset of the kernel's direct map.
///
/// The conversion between [`Kva`] and [`Pa`] wraps around so that the
/// relation holds for every direct-mapped address.
const VA_TO_PA_OFF: usize = 0xffff000000000000 | (510 << 39);

/// Size of a page (4 KiB).
pub const PAGE_SIZE: usize = 0x1000;

/// Number of bits to shift to get a page number.
pub const PAGE_SHIFT: usize = 12;

/// Mask for the offset within a page.
pub const PAGE_MASK: usize = 0xfff;

/// A physical address.
#[repr(transparent)]
#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct Pa(usize);

impl Pa {
    /// The null physical address.
    pub const ZERO: Self = Self(0);

    /// Creates a new physical address if the address is valid.
    #[inline]
    pub const fn new(addr: usize) -> Option<Self> {
        if addr < 0xffff_0000_0000_0000 {
            Some(Self(addr))
        } else {
            None
        }
    }

    /// Casts the physical address into a raw `usize`.
    #[inline]
    pub const fn into_usize(self) -> usize {
        self.0
    }

    /// Converts the physical address into the kernel virtual address that
    /// maps it.
    #[inline]
    pub const fn into_kva(self) -> Kva {
        Kva(self.0.wrapping_add(VA_TO_PA_OFF))
    }

    /// Aligns the address down to the page boundary.
    #[inline]
    pub const fn page_down(self) -> Self {
        Self(self.0 & !PAGE_MASK)
    }

    /// Aligns the address up to the page boundary.
    #[inline]
    pub const fn page_up(self) -> Self {
        Self((self.0 + PAGE_MASK) & !PAGE_MASK)
    }

    /// Offset within the page.
    #[inline]
    pub const fn offset(self) -> usize {
        self.0 & PAGE_MASK
    }
}

/// A kernel virtual address.
///
/// A [`Kva`] is always dereferenceable by the kernel through the direct map.
#[repr(transparent)]
#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct Kva(usize);

impl Kva {
    /// Creates a new kernel virtual address. Returns `None` for the null
    /// address.
    #[inline(always)]
    pub const fn new(addr: usize) -> Option<Self> {
        if addr != 0 { Some(Self(addr)) } else { None }
    }

    /// Casts the address into a raw `usize`.
    #[inline]
    pub const fn into_usize(self) -> usize {
        self.0
    }

    /// Converts the kernel virtual address into its physical address.
    #[inline]
    pub const fn into_pa(self) -> Pa {
        Pa(self.0.wrapping_sub(VA_TO_PA_OFF))
    }

    /// Aligns the address down to the page boundary.
    #[inline]
    pub const fn page_down(self) -> Self {
        Self(self.0 & !PAGE_MASK)
    }

    /// Offset within the page.
    #[inline]
    pub const fn offset(self) -> usize {
        self.0 & PAGE_MASK
    }
}

/// A virtual address.
///
/// Only canonical addresses can be represented.
#[repr(transparent)]
#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct Va(usize);

impl Va {
    /// Creates a new virtual address if the address is canonical.
    #[inline(always)]
    pub const fn new(addr: usize) -> Option<Self> {
        match addr & 0xffff_8000_0000_0000 {
            m if m == 0xffff_8000_0000_0000 || m == 0 => Some(Self(addr)),
            _ => None,
        }
    }

    /// Casts the address into a raw `usize`.
    #[inline]
    pub const fn into_usize(self) -> usize {
        self.0
    }

    /// Aligns the address down to the page boundary.
    #[inline]
    pub const fn page_down(self) -> Self {
        Self(self.0 & !PAGE_MASK)
    }

    /// Aligns the address up to the page boundary.
    #[inline]
    pub const fn page_up(self) -> Self {
        Self((self.0 + PAGE_MASK) & !PAGE_MASK)
    }

    /// Offset within the page.
    #[inline]
    pub const fn offset(self) -> usize {
        self.0 & PAGE_MASK
    }

    /// Subtracts `other` from the address, returning `None` on underflow.
    #[inline]
    pub const fn checked_sub(self, other: usize) -> Option<Self> {
        match self.0.checked_sub(other) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }
}

macro_rules! impl_arith {
    ($t: ty) => {
        impl core::ops::Add<usize> for $t {
            type Output = Self;

            fn add(self, other: usize) -> Self::Output {
                Self(self.0 + other)
            }
        }
        impl core::ops::AddAssign<usize> for $t {
            fn add_assign(&mut self, other: usize) {
                self.0 = self.0 + other
            }
        }
        impl core::ops::Sub<usize> for $t {
            type Output = Self;

            fn sub(self, other: usize) -> Self::Output {
                Self(self.0 - other)
            }
        }
        impl core::ops::Sub<Self> for $t {
            type Output = usize;

            fn sub(self, other: Self) -> Self::Output {
                self.0 - other.0
            }
        }
        impl core::ops::SubAssign<usize> for $t {
            fn sub_assign(&mut self, other: usize) {
                self.0 = self.0 - other
            }
        }
        impl core::ops::BitAnd<usize> for $t {
            type Output = Self;

            fn bitand(self, other: usize) -> Self {
                Self(self.0 & other)
            }
        }
        impl core::ops::BitOr<usize> for $t {
            type Output = Self;

            fn bitor(self, other: usize) -> Self {
                Self(self.0 | other)
            }
        }
    };
}

impl_arith!(Kva);
impl_arith!(Va);
impl_arith!(Pa);

macro_rules! impl_fmt {
    ($t: ident) => {
        impl core::fmt::Debug for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, concat!(stringify!($t), "(0x{:x})"), self.0)
            }
        }
        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, concat!(stringify!($t), "(0x{:x})"), self.0)
            }
        }
    };
}

impl_fmt!(Kva);
impl_fmt!(Va);
impl_fmt!(Pa);
