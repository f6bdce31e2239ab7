use std::io::{self, Write};

use crate::record::{
    Entry, Format, HeaderEntry, InsnEntry, InsnExecEntry, LdStEntry, LdStNxEntry, Machine,
    MmapEntry, Tag,
};

/// Serializes records into the trace wire format.
///
/// The header is written on construction; after that, any record sequence
/// is accepted. Mainly useful for re-emitting filtered traces and for
/// building fixtures.
pub struct TraceWriter<Wr: Write> {
    out: Wr,
    fmt: Format,
    buffer: Vec<u8>,
}

impl<Wr: Write> TraceWriter<Wr> {
    pub fn new(mut out: Wr, fmt: Format, machine: Machine) -> io::Result<Self> {
        let mut buffer = Vec::with_capacity(64);
        HeaderEntry { machine }.emit(fmt, &mut buffer);
        out.write_all(&buffer)?;
        buffer.clear();
        Ok(Self { out, fmt, buffer })
    }

    pub fn format(&self) -> Format {
        self.fmt
    }

    pub fn entry(&mut self, entry: &Entry<'_>) -> io::Result<()> {
        self.buffer.clear();
        entry.emit(self.fmt, &mut self.buffer);
        self.out.write_all(&self.buffer)
    }

    pub fn load(&mut self, insn_seq: u32, addr: u64, value: &[u8]) -> io::Result<()> {
        self.ldst(Tag::Load, insn_seq, addr, value)
    }

    pub fn store(&mut self, insn_seq: u32, addr: u64, value: &[u8]) -> io::Result<()> {
        self.ldst(Tag::Store, insn_seq, addr, value)
    }

    pub fn reg(&mut self, insn_seq: u32, addr: u64, value: &[u8]) -> io::Result<()> {
        self.ldst(Tag::Reg, insn_seq, addr, value)
    }

    pub fn get_reg(&mut self, insn_seq: u32, addr: u64, value: &[u8]) -> io::Result<()> {
        self.ldst(Tag::GetReg, insn_seq, addr, value)
    }

    pub fn put_reg(&mut self, insn_seq: u32, addr: u64, value: &[u8]) -> io::Result<()> {
        self.ldst(Tag::PutReg, insn_seq, addr, value)
    }

    fn ldst(&mut self, tag: Tag, insn_seq: u32, addr: u64, value: &[u8]) -> io::Result<()> {
        self.entry(&Entry::LdSt(LdStEntry {
            tag,
            insn_seq,
            addr,
            value,
        }))
    }

    pub fn insn(&mut self, insn_seq: u32, pc: u64, bytes: &[u8]) -> io::Result<()> {
        self.entry(&Entry::Insn(InsnEntry {
            insn_seq,
            pc,
            bytes,
        }))
    }

    pub fn insn_exec(&mut self, insn_seq: u32) -> io::Result<()> {
        self.entry(&Entry::InsnExec(InsnExecEntry { insn_seq }))
    }

    pub fn get_reg_nx(&mut self, insn_seq: u32, addr: u64, size: u64) -> io::Result<()> {
        self.entry(&Entry::LdStNx(LdStNxEntry {
            tag: Tag::GetRegNx,
            insn_seq,
            addr,
            size,
        }))
    }

    pub fn put_reg_nx(&mut self, insn_seq: u32, addr: u64, size: u64) -> io::Result<()> {
        self.entry(&Entry::LdStNx(LdStNxEntry {
            tag: Tag::PutRegNx,
            insn_seq,
            addr,
            size,
        }))
    }

    pub fn mmap(&mut self, start: u64, end: u64, flags: u64, name: &[u8]) -> io::Result<()> {
        self.entry(&Entry::Mmap(MmapEntry::new(start, end, flags, name)))
    }

    pub fn into_inner(self) -> Wr {
        self.out
    }
}
