//! Crate for the storage and tracking substrate of use-definition analysis.
//!
//! This crate is broken up into a module for file-backed storage and two
//! modules for UD bookkeeping. The `mmvec` module provides [`MmapVec`], a
//! growable array whose backing store is a memory-mapped file, so that
//! analysis results many times larger than RAM can be produced and later
//! reopened without re-ingesting anything. The `partial` module provides a
//! sparse, file-backed side table for uses that only cover part of the
//! definition that satisfies them. The `domain` module is the primary
//! interface: a [`Domain`](domain::Domain) tracks, for every byte of one
//! address space (registers or memory), which recorded definition is
//! currently live, and appends a use edge for every read.
//!
//! All bulk state lives in `MmapVec`s; the only ephemeral structure is the
//! live-range map inside `Domain`, which is rebuilt by replaying a trace.

pub mod domain;
pub mod error;
pub mod mmvec;
pub mod partial;
pub mod store;

pub use error::Error;
pub use mmvec::{InitMode, MmapVec, Pod};
pub use store::PathTemplate;

/// Fixed-width address type of a traced program: `u32` or `u64`.
///
/// Analysis state is generic over the traced word so that 32-bit traces pay
/// half the storage of 64-bit ones.
pub trait Word:
    Pod + Copy + Ord + Eq + std::fmt::Debug + std::fmt::Display + std::fmt::LowerHex + 'static
{
    const SIZE: usize;
    const ZERO: Self;
    const MAX: Self;

    fn from_u64(value: u64) -> Self;
    fn to_u64(self) -> u64;
    fn wrapping_add(self, rhs: Self) -> Self;
}

impl Word for u32 {
    const SIZE: usize = 4;
    const ZERO: Self = 0;
    const MAX: Self = u32::MAX;

    #[inline]
    fn from_u64(value: u64) -> Self {
        value as u32
    }

    #[inline]
    fn to_u64(self) -> u64 {
        self as u64
    }

    #[inline]
    fn wrapping_add(self, rhs: Self) -> Self {
        u32::wrapping_add(self, rhs)
    }
}

impl Word for u64 {
    const SIZE: usize = 8;
    const ZERO: Self = 0;
    const MAX: Self = u64::MAX;

    #[inline]
    fn from_u64(value: u64) -> Self {
        value
    }

    #[inline]
    fn to_u64(self) -> u64 {
        self
    }

    #[inline]
    fn wrapping_add(self, rhs: Self) -> Self {
        u64::wrapping_add(self, rhs)
    }
}
