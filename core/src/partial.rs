use std::path::{Path, PathBuf};

use crate::domain::Def;
use crate::mmvec::{InitMode, MmapVec, Pod};
use crate::{Error, Word};

/// One slot of the partial-use table: a use index and the sub-range of the
/// satisfying definition that the use actually covers.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct PartialUse<W> {
    pub use_index: u32,
    pub range: Def<W>,
}

unsafe impl<W: Word> Pod for PartialUse<W> {}

const EMPTY: u32 = u32::MAX;

fn empty<W: Word>() -> PartialUse<W> {
    PartialUse {
        use_index: EMPTY,
        range: Def {
            start: W::ZERO,
            end: W::ZERO,
        },
    }
}

/// Returns the slot holding `use_index`, or the first empty slot on its
/// probe path. Probing is linear from `use_index % capacity` with a single
/// wraparound; the load cap guarantees an empty slot exists.
fn find_slot<W: Word>(entries: &[PartialUse<W>], use_index: u32) -> usize {
    let origin = use_index as usize % entries.len();
    for (index, entry) in entries[origin..].iter().enumerate() {
        if entry.use_index == use_index || entry.use_index == EMPTY {
            return origin + index;
        }
    }
    for (index, entry) in entries[..origin].iter().enumerate() {
        if entry.use_index == use_index || entry.use_index == EMPTY {
            return index;
        }
    }
    unreachable!("partial-use table is over-full");
}

/// Open-addressed hash table from use index to narrowed range, backed by a
/// [`MmapVec`].
///
/// Only a minority of uses overlap their definition partially (about 4% of
/// register uses and 12% of memory uses), so a sparse side table is much
/// cheaper than widening every use entry.
pub struct PartialUses<W: Word> {
    entries: MmapVec<PartialUse<W>>,
    load: usize,
    max_load: usize,
    path: PathBuf,
}

impl<W: Word> PartialUses<W> {
    pub fn open(path: &Path, mode: InitMode) -> Result<Self, Error> {
        let mut entries: MmapVec<PartialUse<W>> = MmapVec::open(path, mode)?;
        let mut load = 0;
        if mode == InitMode::OpenExisting {
            load = entries.iter().filter(|e| e.use_index != EMPTY).count();
        } else {
            entries.resize(11, empty())?;
        }
        let max_load = entries.len() / 2;
        Ok(Self {
            entries,
            load,
            max_load,
            path: path.to_owned(),
        })
    }

    /// Returns the narrowed range slot for `use_index`, inserting it first
    /// if absent. May rehash.
    pub fn entry(&mut self, use_index: u32) -> Result<&mut Def<W>, Error> {
        let slot = find_slot(self.entries.as_slice(), use_index);
        if self.entries[slot].use_index == use_index {
            return Ok(&mut self.entries[slot].range);
        }
        self.entries[slot].use_index = use_index;
        self.load += 1;
        if self.load <= self.max_load {
            return Ok(&mut self.entries[slot].range);
        }
        self.reserve(self.load * 2)?;
        let slot = find_slot(self.entries.as_slice(), use_index);
        debug_assert_eq!(self.entries[slot].use_index, use_index);
        Ok(&mut self.entries[slot].range)
    }

    pub fn find(&self, use_index: u32) -> Option<&Def<W>> {
        let slot = find_slot(self.entries.as_slice(), use_index);
        let entry = &self.entries[slot];
        (entry.use_index == use_index).then(|| &entry.range)
    }

    pub fn data(&self) -> &MmapVec<PartialUse<W>> {
        &self.entries
    }

    /// Grows the table so that `n` occupied slots stay under the load cap.
    /// Rehashes through a file-backed scratch copy so the table never has
    /// to fit in RAM.
    pub fn reserve(&mut self, n: usize) -> Result<(), Error> {
        let new_size = first_prime_at_least(n * 2);
        if new_size <= self.entries.len() {
            return Ok(());
        }
        tracing::trace!(capacity = new_size, "rehashing partial-use table");
        let mut scratch: MmapVec<PartialUse<W>> =
            MmapVec::open(&self.path, InitMode::CreateTemporary)?;
        scratch.extend_from_slice(self.entries.as_slice())?;
        self.entries.resize(new_size, empty())?;
        for slot in self.entries.as_mut_slice() {
            *slot = empty();
        }
        for old in scratch.iter() {
            if old.use_index == EMPTY {
                continue;
            }
            let slot = find_slot(self.entries.as_slice(), old.use_index);
            debug_assert_eq!(self.entries[slot].use_index, EMPTY);
            self.entries[slot] = *old;
        }
        self.max_load = new_size / 2;
        Ok(())
    }
}

pub(crate) fn first_prime_at_least(value: usize) -> usize {
    fn is_prime(n: usize) -> bool {
        if n < 2 {
            return false;
        }
        if n % 2 == 0 {
            return n == 2;
        }
        let mut d = 3;
        while d * d <= n {
            if n % d == 0 {
                return false;
            }
            d += 2;
        }
        true
    }

    let mut n = value | 1;
    while !is_prime(n) {
        n += 2;
    }
    n
}
