//! The abyss of kernel that operates hardwares.
//!
//! This crate contains the lowest layer shared by every other crate of the
//! workspace: the address types that keep user, kernel and physical addresses
//! apart, and the spinlock that every shared kernel structure is guarded by.
//!
//! You are **not** required to understand every line of code in this crate.
//! Instead, see the [`keos`] crate for the interfaces the paging engine is
//! built on.
//!
//! [`keos`]: ../keos/index.html
#![cfg_attr(not(test), no_std)]

pub mod addressing;
pub mod spinlock;
