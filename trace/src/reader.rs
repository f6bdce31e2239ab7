use std::fs::File;
use std::ops::Range;
use std::path::Path;

use memmap::Mmap;

use crate::record::{Entry, Format, HeaderEntry, Machine, HEADER_LEN, TLV_LEN};
use crate::Error;

/// Per-record callback driven by [`Trace::visit`].
pub trait Visitor {
    fn entry(&mut self, index: u64, entry: &Entry<'_>) -> Result<(), Error>;

    /// Called once after the last record.
    fn complete(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

/// A memory-mapped execution trace.
///
/// Opening reads nothing but the header; records are decoded lazily as the
/// cursor moves. The mapping is read-only and shared, so multiple readers
/// can walk the same file.
pub struct Trace {
    map: Mmap,
    fmt: Format,
    machine: Machine,
    body: usize,
    pos: usize,
    entry_index: u64,
}

impl Trace {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let file = File::open(path.as_ref())?;
        if file.metadata()?.len() < 2 {
            return Err(Error::BadMagic);
        }
        let map = unsafe { Mmap::map(&file)? };

        let magic: [u8; 2] = map.get(..2).ok_or(Error::BadMagic)?.try_into().unwrap();
        let fmt = Format::from_magic(magic).ok_or(Error::BadMagic)?;
        if map.len() < HEADER_LEN {
            return Err(Error::Truncated);
        }
        let header_tlv = fmt.tlv(&map)?;
        let machine = HeaderEntry::parse(&map, fmt)?.machine;
        let body = fmt.aligned(header_tlv.len);
        if body > map.len() {
            return Err(Error::Truncated);
        }

        tracing::debug!(
            path = %path.as_ref().display(),
            endianness = %fmt.endianness,
            word_size = fmt.word_size,
            machine = %machine,
            "opened trace"
        );
        Ok(Self {
            map,
            fmt,
            machine,
            body,
            pos: body,
            entry_index: 0,
        })
    }

    pub fn format(&self) -> Format {
        self.fmt
    }

    pub fn machine(&self) -> Machine {
        self.machine
    }

    pub fn file_len(&self) -> usize {
        self.map.len()
    }

    /// Moves the cursor back to the first record after the header.
    pub fn rewind(&mut self) {
        self.pos = self.body;
        self.entry_index = 0;
    }

    /// Frames the record under the cursor and advances past it. Does not
    /// decode the payload.
    fn take_record(&mut self) -> Result<&[u8], Error> {
        let remaining = &self.map[self.pos..];
        let tlv = self.fmt.tlv(remaining)?;
        let framed = self.fmt.aligned(tlv.len);
        if framed < TLV_LEN {
            return Err(Error::Truncated);
        }
        let record = remaining.get(..framed).ok_or(Error::Truncated)?;
        self.pos += framed;
        self.entry_index += 1;
        Ok(record)
    }

    /// Decodes the next record, or `None` at the end of the trace. The
    /// returned entry borrows from the mapping and must be dropped before
    /// the next call.
    pub fn next_entry(&mut self) -> Result<Option<(u64, Entry<'_>)>, Error> {
        if self.pos >= self.map.len() {
            return Ok(None);
        }
        let index = self.entry_index;
        let fmt = self.fmt;
        let record = self.take_record()?;
        Ok(Some((index, Entry::parse(record, fmt)?)))
    }

    /// Walks the remaining records, dispatching those whose entry index
    /// falls inside `window` to the visitor. Records outside the window are
    /// still framed, so a malformed length fails the walk either way.
    pub fn visit<V: Visitor>(&mut self, visitor: &mut V, window: Range<u64>) -> Result<(), Error> {
        while self.pos < self.map.len() {
            let index = self.entry_index;
            let fmt = self.fmt;
            let record = self.take_record()?;
            if window.contains(&index) {
                let entry = Entry::parse(record, fmt)?;
                visitor.entry(index, &entry)?;
            }
        }
        visitor.complete()
    }

    /// Positions the cursor at the first record of the `target`-th dynamic
    /// instruction, counting a new instruction every time the `insn_seq` of
    /// an access or execution record differs from the previous one.
    pub fn seek_insn(&mut self, target: u32) -> Result<(), Error> {
        self.rewind();
        let mut prev_seq = u32::MAX;
        // Wraps to 0 at the first sequenced record.
        let mut count = u32::MAX;
        while self.pos < self.map.len() {
            let record_pos = self.pos;
            let record_index = self.entry_index;
            let fmt = self.fmt;
            let record = self.take_record()?;
            let seq = match Entry::parse(record, fmt)? {
                Entry::LdSt(e) => Some(e.insn_seq),
                Entry::InsnExec(e) => Some(e.insn_seq),
                Entry::LdStNx(e) => Some(e.insn_seq),
                Entry::Insn(_) | Entry::Mmap(_) => None,
            };
            if let Some(seq) = seq {
                if seq != prev_seq {
                    prev_seq = seq;
                    count = count.wrapping_add(1);
                    if count == target {
                        self.pos = record_pos;
                        self.entry_index = record_index;
                        return Ok(());
                    }
                }
            }
        }
        Err(Error::NoSuchInsn(target))
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::record::{Endianness, Tag};
    use crate::writer::TraceWriter;

    const LE64: Format = Format::new(Endianness::Little, 8);

    fn sample_trace(fmt: Format) -> Vec<u8> {
        let mut writer = TraceWriter::new(Vec::new(), fmt, Machine::X86_64).unwrap();
        writer.mmap(0x400000, 0x400fff, 0b101, b"/bin/true").unwrap();
        writer.insn(1, 0x1000, b"\xaa").unwrap();
        writer.insn_exec(1).unwrap();
        writer.store(1, 0x2000, &[1, 2, 3, 4]).unwrap();
        writer.insn(2, 0x1001, b"\xbb").unwrap();
        writer.insn_exec(2).unwrap();
        writer.load(2, 0x2000, &[1, 2, 3, 4]).unwrap();
        writer.into_inner()
    }

    fn open_bytes(bytes: &[u8]) -> (tempfile::TempDir, Trace) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace");
        std::fs::write(&path, bytes).unwrap();
        let trace = Trace::open(&path).unwrap();
        (dir, trace)
    }

    #[test]
    fn test_open_reads_header() {
        let (_dir, trace) = open_bytes(&sample_trace(LE64));
        assert_eq!(trace.format(), LE64);
        assert_eq!(trace.machine(), Machine::X86_64);
    }

    #[test]
    fn test_iterates_all_records() {
        let (_dir, mut trace) = open_bytes(&sample_trace(LE64));
        let mut tags = Vec::new();
        while let Some((_, entry)) = trace.next_entry().unwrap() {
            tags.push(entry.tag());
        }
        assert_eq!(
            tags,
            vec![
                Tag::Mmap,
                Tag::Insn,
                Tag::InsnExec,
                Tag::Store,
                Tag::Insn,
                Tag::InsnExec,
                Tag::Load,
            ]
        );
    }

    #[test]
    fn test_big_endian_32_trace() {
        let be32 = Format::new(Endianness::Big, 4);
        let mut writer = TraceWriter::new(Vec::new(), be32, Machine::Ppc).unwrap();
        writer.insn_exec(1).unwrap();
        writer.store(1, 0x2000, &[9, 9]).unwrap();
        let (_dir, mut trace) = open_bytes(&writer.into_inner());

        assert_eq!(trace.format(), be32);
        assert_eq!(trace.machine(), Machine::Ppc);
        trace.next_entry().unwrap();
        let Some((_, Entry::LdSt(store))) = trace.next_entry().unwrap() else {
            panic!("expected a store");
        };
        assert_eq!(store.addr, 0x2000);
        assert_eq!(store.value, &[9, 9]);
    }

    #[test]
    fn test_rejects_bad_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace");
        std::fs::write(&path, b"ZZ\x00\x00").unwrap();
        assert!(matches!(Trace::open(&path), Err(Error::BadMagic)));
    }

    #[test]
    fn test_rejects_truncated_tail() {
        let mut bytes = sample_trace(LE64);
        bytes.truncate(bytes.len() - 3);
        let (_dir, mut trace) = open_bytes(&bytes);
        let mut last = Ok(());
        loop {
            match trace.next_entry() {
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(e) => {
                    last = Err(e);
                    break;
                }
            }
        }
        assert!(matches!(last, Err(Error::Truncated)));
    }

    #[test]
    fn test_window_skips_but_still_frames() {
        struct Count(u64);
        impl Visitor for Count {
            fn entry(&mut self, _index: u64, _entry: &Entry<'_>) -> Result<(), Error> {
                self.0 += 1;
                Ok(())
            }
        }
        let (_dir, mut trace) = open_bytes(&sample_trace(LE64));
        let mut count = Count(0);
        trace.visit(&mut count, 2..5).unwrap();
        assert_eq!(count.0, 3);
    }

    #[test]
    fn test_seek_insn() {
        let (_dir, mut trace) = open_bytes(&sample_trace(LE64));

        // The first dynamic instruction starts at the first sequenced
        // record, which follows the mmap and static-code records.
        trace.seek_insn(0).unwrap();
        let (index, entry) = trace.next_entry().unwrap().unwrap();
        assert_eq!(index, 2);
        assert_eq!(entry.tag(), Tag::InsnExec);

        trace.seek_insn(1).unwrap();
        let (index, entry) = trace.next_entry().unwrap().unwrap();
        assert_eq!(index, 5);
        assert_eq!(entry.tag(), Tag::InsnExec);

        assert!(matches!(trace.seek_insn(2), Err(Error::NoSuchInsn(2))));
    }
}
