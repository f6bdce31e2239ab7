use std::io::Write;

use crate::disasm::Disasm;
use crate::reader::{Trace, Visitor};
use crate::record::{Entry, Format};
use crate::{Error, Hex};

/// Prints one line per record and counts executed instructions.
///
/// Pure formatter: the only state is the counter and the disassembler.
pub struct Dumper<Wr: Write> {
    out: Wr,
    fmt: Format,
    disasm: Disasm,
    insn_count: u64,
}

impl<Wr: Write> Dumper<Wr> {
    pub fn new(mut out: Wr, trace: &Trace) -> Result<Self, Error> {
        let fmt = trace.format();
        writeln!(out, "Endian            : {}", fmt.endianness.symbol())?;
        writeln!(
            out,
            "Word              : {}",
            if fmt.word_size == 4 { "I" } else { "Q" }
        )?;
        writeln!(out, "Word size         : {}", fmt.word_size)?;
        writeln!(out, "Machine           : {}", trace.machine())?;
        let disasm = Disasm::new(trace.machine(), fmt.endianness, fmt.word_size)?;
        Ok(Self {
            out,
            fmt,
            disasm,
            insn_count: 0,
        })
    }

    fn write_value(&mut self, value: &[u8]) -> Result<(), Error> {
        match self.fmt.scalar(value) {
            Some(scalar) => write!(self.out, "{scalar:#x}")?,
            None => {
                write!(self.out, "b'")?;
                for byte in value {
                    write!(self.out, "\\x{byte:02x}")?;
                }
                write!(self.out, "'")?;
            }
        }
        Ok(())
    }
}

impl<Wr: Write> Visitor for Dumper<Wr> {
    fn entry(&mut self, index: u64, entry: &Entry<'_>) -> Result<(), Error> {
        match entry {
            Entry::LdSt(e) => {
                write!(
                    self.out,
                    "[{index:10}] 0x{:08x}: {} uint{}_t [{:#x}] ",
                    e.insn_seq,
                    e.tag,
                    e.value.len() * 8,
                    e.addr
                )?;
                self.write_value(e.value)?;
                writeln!(self.out)?;
            }
            Entry::Insn(e) => {
                let text = self
                    .disasm
                    .disasm(e.bytes, e.pc)
                    .unwrap_or_else(|| "<unknown>".to_owned());
                writeln!(
                    self.out,
                    "[{index:10}] 0x{:08x}: MT_INSN 0x{:016x} {} {}",
                    e.insn_seq,
                    e.pc,
                    Hex(e.bytes),
                    text
                )?;
            }
            Entry::InsnExec(e) => {
                writeln!(self.out, "[{index:10}] 0x{:08x}: MT_INSN_EXEC", e.insn_seq)?;
                self.insn_count += 1;
            }
            Entry::LdStNx(e) => {
                writeln!(
                    self.out,
                    "[{index:10}] 0x{:08x}: {} uint{}_t [{:#x}]",
                    e.insn_seq,
                    e.tag,
                    e.size * 8,
                    e.addr
                )?;
            }
            Entry::Mmap(e) => {
                writeln!(
                    self.out,
                    "[{index:10}] MT_MMAP {:016x}-{:016x} {}{}{} {}",
                    e.start,
                    e.end + 1,
                    if e.flags & 1 != 0 { 'r' } else { '-' },
                    if e.flags & 2 != 0 { 'w' } else { '-' },
                    if e.flags & 4 != 0 { 'x' } else { '-' },
                    e.name()
                )?;
            }
        }
        Ok(())
    }

    fn complete(&mut self) -> Result<(), Error> {
        writeln!(self.out, "Insns             : {}", self.insn_count)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::record::{Endianness, Machine};
    use crate::writer::TraceWriter;

    #[test]
    fn test_dump_lines() {
        let fmt = Format::new(Endianness::Little, 8);
        let mut writer = TraceWriter::new(Vec::new(), fmt, Machine::X86_64).unwrap();
        writer.mmap(0x400000, 0x400fff, 0b111, b"/bin/true").unwrap();
        writer.insn(1, 0x1000, b"\x41\x57").unwrap();
        writer.insn_exec(1).unwrap();
        writer.store(1, 0x2000, &[0x04, 0x03, 0x02, 0x01]).unwrap();
        writer.put_reg_nx(1, 0x98, 16).unwrap();
        writer.store(1, 0x3000, &[0xee; 3]).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace");
        std::fs::write(&path, writer.into_inner()).unwrap();
        let mut trace = Trace::open(&path).unwrap();

        let mut dumper = Dumper::new(Vec::new(), &trace).unwrap();
        trace.visit(&mut dumper, 0..u64::MAX).unwrap();
        let text = String::from_utf8(dumper.out).unwrap();

        assert!(text.contains("Endian            : <"));
        assert!(text.contains("Machine           : EM_X86_64"));
        assert!(text.contains("MT_MMAP 0000000000400000-0000000000401000 rwx /bin/true"));
        assert!(text.contains("MT_INSN 0x0000000000001000 4157 push r15"));
        assert!(text.contains("MT_STORE uint32_t [0x2000] 0x1020304"));
        assert!(text.contains("MT_PUT_REG_NX uint128_t [0x98]"));
        assert!(text.contains("b'\\xee\\xee\\xee'"));
        assert!(text.contains("Insns             : 1"));
    }
}
