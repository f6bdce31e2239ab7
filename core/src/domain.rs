use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};

use crate::mmvec::{InitMode, MmapVec, Pod};
use crate::partial::PartialUses;
use crate::store::PathTemplate;
use crate::{Error, Word};

/// A contiguous byte range written by one dynamic instruction instance,
/// half-open `[start, end)`.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Def<W> {
    pub start: W,
    pub end: W,
}

unsafe impl<W: Word> Pod for Def<W> {}

/// One distinct static instruction: where it was fetched from and where its
/// bytes live in the shared text vector.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct InsnInCode<W> {
    pub pc: W,
    pub text_index: u32,
    pub text_size: u32,
}

unsafe impl<W: Word> Pod for InsnInCode<W> {}

/// One dynamic instruction instance. The four index pairs are half-open
/// ranges into the per-domain use and def vectors; they are monotone
/// non-decreasing across rows, which is what lets [`Domain::resolve_use`]
/// binary-search a def index back to the row that produced it.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct InsnInTrace {
    pub code_index: u32,
    pub reg_use_start: u32,
    pub reg_use_end: u32,
    pub mem_use_start: u32,
    pub mem_use_end: u32,
    pub reg_def_start: u32,
    pub reg_def_end: u32,
    pub mem_def_start: u32,
    pub mem_def_end: u32,
}

unsafe impl Pod for InsnInTrace {}

#[derive(Copy, Clone, Debug)]
struct Live<W> {
    start: W,
    def: u32,
}

/// The most live ranges a single write may touch. The instrumentation
/// backend never reports an access wider than 32 bytes, so byte-granular
/// splitting cannot produce more overlaps than that; anything above is a
/// corrupt trace.
pub const MAX_AFFECTED: usize = 32;

/// Live-definition tracker for one address space (registers or memory).
///
/// `space` maps the exclusive end address of every live range to its start
/// and owning def index. Ranges are pairwise disjoint and, once the caller
/// seeds a whole-address-space def, cover every address, so every read
/// resolves to exactly one definition.
pub struct Domain<W: Word> {
    uses: MmapVec<u32>,
    defs: MmapVec<Def<W>>,
    partial_uses: PartialUses<W>,
    space: BTreeMap<W, Live<W>>,
}

impl<W: Word> Domain<W> {
    pub fn open(
        template: &PathTemplate,
        prefix: &str,
        mode: InitMode,
        expected_uses: usize,
        expected_defs: usize,
        expected_partial_uses: usize,
    ) -> Result<Self, Error> {
        let mut uses = MmapVec::open(template.resolve(&format!("{prefix}uses")), mode)?;
        let mut defs = MmapVec::open(template.resolve(&format!("{prefix}defs")), mode)?;
        let mut partial_uses =
            PartialUses::open(&template.resolve(&format!("{prefix}partial-uses")), mode)?;
        if mode != InitMode::OpenExisting {
            uses.reserve(expected_uses)?;
            defs.reserve(expected_defs)?;
            partial_uses.reserve(expected_partial_uses)?;
        }
        Ok(Self {
            uses,
            defs,
            partial_uses,
            space: BTreeMap::new(),
        })
    }

    /// Records a read of `[start, start + size)`: one use per live range it
    /// touches, with a narrowed side entry whenever the touched part is not
    /// the whole definition.
    pub fn add_uses(&mut self, start: W, size: W) -> Result<(), Error> {
        if size == W::ZERO {
            return Ok(());
        }
        let end = start.wrapping_add(size);
        for (&end_addr, live) in self.space.range((Excluded(start), Unbounded)) {
            if live.start >= end {
                break;
            }
            let use_index = self.uses.len() as u32;
            self.uses.push(live.def)?;
            let def = self.defs[live.def as usize];
            let max_start = start.max(live.start);
            let min_end = end.min(end_addr);
            if def.start != max_start || def.end != min_end {
                *self.partial_uses.entry(use_index)? = Def {
                    start: max_start,
                    end: min_end,
                };
            }
        }
        Ok(())
    }

    /// Records a write of `[start, start + size)`: live ranges it shadows
    /// are deleted, surviving slivers are re-inserted with their original
    /// def index, and a fresh definition takes over the written range.
    ///
    /// Fails without touching any state when the write overlaps more than
    /// [`MAX_AFFECTED`] live ranges.
    pub fn add_defs(&mut self, start: W, size: W) -> Result<(), Error> {
        if size == W::ZERO {
            return Ok(());
        }
        let end = start.wrapping_add(size);
        let mut affected = [(
            W::ZERO,
            Live {
                start: W::ZERO,
                def: 0,
            },
        ); MAX_AFFECTED];
        let mut count = 0;
        for (&end_addr, &live) in self.space.range((Excluded(start), Unbounded)) {
            if live.start >= end {
                break;
            }
            if count == MAX_AFFECTED {
                tracing::debug!(
                    start = %start,
                    size = %size,
                    "write touches more than {MAX_AFFECTED} live ranges"
                );
                return Err(Error::TooManyOverlaps);
            }
            affected[count] = (end_addr, live);
            count += 1;
        }
        for &(end_addr, _) in &affected[..count] {
            self.space.remove(&end_addr);
        }
        for &(end_addr, live) in &affected[..count] {
            if start <= live.start {
                if end < end_addr {
                    // Left overlap: the tail of the old range survives.
                    self.space.insert(
                        end_addr,
                        Live {
                            start: end,
                            def: live.def,
                        },
                    );
                }
                // Outer overlap: nothing survives.
            } else if end < end_addr {
                // Inner overlap: both sides survive.
                self.space.insert(
                    start,
                    Live {
                        start: live.start,
                        def: live.def,
                    },
                );
                self.space.insert(
                    end_addr,
                    Live {
                        start: end,
                        def: live.def,
                    },
                );
            } else {
                // Right overlap: the head survives.
                self.space.insert(
                    start,
                    Live {
                        start: live.start,
                        def: live.def,
                    },
                );
            }
        }
        self.add_def(start, end)?;
        Ok(())
    }

    /// Appends a definition covering `[start, end)` and makes it live.
    /// Used directly to seed the whole-address-space catch-all.
    pub fn add_def(&mut self, start: W, end: W) -> Result<u32, Error> {
        let def_index = self.defs.len() as u32;
        self.defs.push(Def { start, end })?;
        self.space.insert(
            end,
            Live {
                start,
                def: def_index,
            },
        );
        Ok(def_index)
    }

    /// Returns the effective range of a use (narrowed if partial) and the
    /// trace row that produced its definition. `start_def` selects this
    /// domain's def-start field on a row.
    pub fn resolve_use(
        &self,
        use_index: u32,
        trace: &MmapVec<InsnInTrace>,
        start_def: fn(&InsnInTrace) -> u32,
    ) -> (Def<W>, u32) {
        let def_index = self.uses[use_index as usize];
        let def = match self.partial_uses.find(use_index) {
            Some(range) => *range,
            None => self.defs[def_index as usize],
        };
        let upper = trace
            .as_slice()
            .partition_point(|row| start_def(row) <= def_index);
        (def, (upper - 1) as u32)
    }

    pub fn use_count(&self) -> usize {
        self.uses.len()
    }

    pub fn def_count(&self) -> usize {
        self.defs.len()
    }

    pub fn partial_use_count(&self) -> usize {
        self.partial_uses.data().len()
    }

    pub fn defs_in(&self, start: u32, end: u32) -> &[Def<W>] {
        &self.defs.as_slice()[start as usize..end as usize]
    }

    /// Live ranges in address order as `(start, end, def_index)`. The map
    /// itself is not persisted; reopened instances see an empty iterator.
    pub fn live_ranges(&self) -> impl Iterator<Item = (W, W, u32)> + '_ {
        self.space
            .iter()
            .map(|(&end, live)| (live.start, end, live.def))
    }
}
