use std::fmt::Write as _;
use std::fs::File;
use std::io::Read;
use std::ops::Range;
use std::path::{Path, PathBuf};

use ud_core::domain::{Domain, InsnInCode, InsnInTrace};
use ud_core::{InitMode, MmapVec, PathTemplate, Word};

use crate::disasm::Disasm;
use crate::reader::{Trace, Visitor};
use crate::record::{Endianness, Entry, Format, Machine, Tag};
use crate::Error;

mod output;

/// Output selection for one analysis run. Every output is optional; the
/// analysis itself is the same either way.
#[derive(Debug, Clone, Default)]
pub struct UdConfig {
    /// DOT digraph of the use-definition edges.
    pub dot: Option<PathBuf>,
    /// HTML table with anchors from each use to its producer.
    pub html: Option<PathBuf>,
    /// `{}` path template for the `code`/`trace`/`uses` CSV triple.
    pub csv: Option<String>,
    /// `{}` path template for the persistent binary store. Without it, all
    /// bulk state lives in unlinked temporary files.
    pub store: Option<String>,
    /// Print every flushed trace row while ingesting.
    pub verbose: bool,
}

/// The use-definition engine for one trace, monomorphized over the traced
/// word size.
///
/// Row 0 of `trace` and entry 0 of `code` are a synthetic catch-all: any
/// use of a byte that no recorded instruction wrote resolves there, backed
/// by a seed definition covering the whole address space of each domain.
pub struct Ud<W: Word> {
    machine: Machine,
    endianness: Endianness,
    disasm_engine: Disasm,
    code: MmapVec<InsnInCode<W>>,
    text: MmapVec<u8>,
    disasm: Vec<String>,
    trace: MmapVec<InsnInTrace>,
    reg: Domain<W>,
    mem: Domain<W>,
    store_template: PathTemplate,
    csv_template: Option<PathTemplate>,
    dot: Option<PathBuf>,
    html: Option<PathBuf>,
    verbose: bool,
    persist: bool,
}

impl<W: Word> Ud<W> {
    fn init(
        mode: InitMode,
        machine: Machine,
        endianness: Endianness,
        expected_insns: usize,
        config: UdConfig,
    ) -> Result<Self, Error> {
        let csv_template = match &config.csv {
            Some(template) => Some(PathTemplate::new(template)?),
            None => None,
        };
        let (store_template, persist) = match &config.store {
            Some(template) => (PathTemplate::new(template)?, true),
            None => (PathTemplate::new("./{}")?, false),
        };

        let trace = MmapVec::open(store_template.resolve("trace"), mode)?;
        let code = MmapVec::open(store_template.resolve("code"), mode)?;
        let text = MmapVec::open(store_template.resolve("text"), mode)?;
        // Typical traces run about 1.69 register uses and 1.61 register
        // defs per instruction, 0.4 memory uses and 0.22 memory defs.
        let reg = Domain::open(
            &store_template,
            "reg-",
            mode,
            expected_insns * 7 / 4,
            expected_insns * 5 / 3,
            expected_insns / 10,
        )?;
        let mem = Domain::open(
            &store_template,
            "mem-",
            mode,
            expected_insns / 2,
            expected_insns / 4,
            expected_insns / 20,
        )?;
        let disasm_engine = Disasm::new(machine, endianness, W::SIZE)?;

        let mut ud = Self {
            machine,
            endianness,
            disasm_engine,
            code,
            text,
            disasm: Vec::new(),
            trace,
            reg,
            mem,
            store_template,
            csv_template,
            dot: config.dot,
            html: config.html,
            verbose: config.verbose,
            persist,
        };
        if mode != InitMode::OpenExisting {
            ud.code.push(InsnInCode {
                pc: W::ZERO,
                text_index: 0,
                text_size: 0,
            })?;
            ud.disasm.push("<unknown>".to_owned());
            ud.trace.reserve(expected_insns)?;
            ud.add_trace(0)?;
            ud.reg.add_def(W::ZERO, W::MAX)?;
            ud.mem.add_def(W::ZERO, W::MAX)?;
        }
        Ok(ud)
    }

    fn add_trace(&mut self, code_index: u32) -> Result<(), Error> {
        let reg_uses = self.reg.use_count() as u32;
        let mem_uses = self.mem.use_count() as u32;
        let reg_defs = self.reg.def_count() as u32;
        let mem_defs = self.mem.def_count() as u32;
        self.trace.push(InsnInTrace {
            code_index,
            reg_use_start: reg_uses,
            reg_use_end: reg_uses,
            mem_use_start: mem_uses,
            mem_use_end: mem_uses,
            reg_def_start: reg_defs,
            reg_def_end: reg_defs,
            mem_def_start: mem_defs,
            mem_def_end: mem_defs,
        })?;
        Ok(())
    }

    /// Closes the current trace row by recording the domain counts reached
    /// while it was open.
    fn flush(&mut self) -> Result<(), Error> {
        let reg_uses = self.reg.use_count() as u32;
        let mem_uses = self.mem.use_count() as u32;
        let reg_defs = self.reg.def_count() as u32;
        let mem_defs = self.mem.def_count() as u32;
        let last = self.trace.len() - 1;
        {
            let row = &mut self.trace[last];
            row.reg_use_end = reg_uses;
            row.mem_use_end = mem_uses;
            row.reg_def_end = reg_defs;
            row.mem_def_end = mem_defs;
        }
        if self.verbose {
            self.print_row(last);
        }
        Ok(())
    }

    fn handle_insn_seq(&mut self, insn_seq: u32) -> Result<(), Error> {
        let last = self.trace.len() - 1;
        if self.trace[last].code_index == insn_seq {
            return Ok(());
        }
        self.flush()?;
        self.add_trace(insn_seq)
    }

    fn code_bytes(&self, code_index: u32) -> &[u8] {
        let code = self.code[code_index as usize];
        &self.text.as_slice()[code.text_index as usize..][..code.text_size as usize]
    }

    fn uses_text(&self, domain: &Domain<W>, range: Range<u32>, start_def: fn(&InsnInTrace) -> u32) -> String {
        let mut text = String::new();
        for use_index in range {
            let (def, producer) = domain.resolve_use(use_index, &self.trace, start_def);
            if !text.is_empty() {
                text.push_str(", ");
            }
            let _ = write!(text, "{:#x}-{:#x}@[{}]", def.start, def.end, producer);
        }
        text
    }

    fn defs_text(&self, domain: &Domain<W>, range: Range<u32>) -> String {
        let mut text = String::new();
        for def in domain.defs_in(range.start, range.end) {
            if !text.is_empty() {
                text.push_str(", ");
            }
            let _ = write!(text, "{:#x}-{:#x}", def.start, def.end);
        }
        text
    }

    fn print_row(&self, index: usize) {
        let row = self.trace[index];
        let code = self.code[row.code_index as usize];
        println!(
            "[{index}]{:#x}: {} {} reg_uses=[{}] reg_defs=[{}] mem_uses=[{}] mem_defs=[{}]",
            code.pc,
            crate::Hex(self.code_bytes(row.code_index)),
            self.disasm_for_code(row.code_index),
            self.uses_text(&self.reg, row.reg_use_start..row.reg_use_end, |t| t.reg_def_start),
            self.defs_text(&self.reg, row.reg_def_start..row.reg_def_end),
            self.uses_text(&self.mem, row.mem_use_start..row.mem_use_end, |t| t.mem_def_start),
            self.defs_text(&self.mem, row.mem_def_start..row.mem_def_end),
        );
    }

    pub fn code_count(&self) -> u32 {
        self.code.len() as u32
    }

    pub fn trace_count(&self) -> u32 {
        self.trace.len() as u32
    }

    pub fn codes_for_pc(&self, pc: u64) -> Vec<u32> {
        self.code
            .iter()
            .enumerate()
            .filter(|(_, code)| code.pc.to_u64() == pc)
            .map(|(index, _)| index as u32)
            .collect()
    }

    pub fn pc_for_code(&self, code: u32) -> u64 {
        self.code[code as usize].pc.to_u64()
    }

    /// Human-readable text of a static instruction. Freshly ingested
    /// engines answer from the in-memory cache; reopened ones re-run the
    /// disassembler over the stored bytes.
    pub fn disasm_for_code(&self, code: u32) -> String {
        if let Some(text) = self.disasm.get(code as usize) {
            return text.clone();
        }
        let pc = self.code[code as usize].pc.to_u64();
        self.disasm_engine
            .disasm(self.code_bytes(code), pc)
            .unwrap_or_else(|| "<unknown>".to_owned())
    }

    pub fn traces_for_code(&self, code: u32) -> Vec<u32> {
        self.trace
            .iter()
            .enumerate()
            .filter(|(_, row)| row.code_index == code)
            .map(|(index, _)| index as u32)
            .collect()
    }

    pub fn code_for_trace(&self, trace: u32) -> u32 {
        self.trace[trace as usize].code_index
    }

    pub fn reg_uses_for_trace(&self, trace: u32) -> Vec<u32> {
        let row = self.trace[trace as usize];
        (row.reg_use_start..row.reg_use_end).collect()
    }

    pub fn mem_uses_for_trace(&self, trace: u32) -> Vec<u32> {
        let row = self.trace[trace as usize];
        (row.mem_use_start..row.mem_use_end).collect()
    }

    pub fn trace_for_reg_use(&self, reg_use: u32) -> u32 {
        self.reg
            .resolve_use(reg_use, &self.trace, |t| t.reg_def_start)
            .1
    }

    pub fn trace_for_mem_use(&self, mem_use: u32) -> u32 {
        self.mem
            .resolve_use(mem_use, &self.trace, |t| t.mem_def_start)
            .1
    }
}

impl<W: Word> Visitor for Ud<W> {
    fn entry(&mut self, _index: u64, entry: &Entry<'_>) -> Result<(), Error> {
        match entry {
            Entry::LdSt(e) => {
                self.handle_insn_seq(e.insn_seq)?;
                let addr = W::from_u64(e.addr);
                let size = W::from_u64(e.value.len() as u64);
                match e.tag {
                    Tag::Load => self.mem.add_uses(addr, size)?,
                    Tag::Store => self.mem.add_defs(addr, size)?,
                    // An aggregate register snapshot, not an access.
                    Tag::Reg => {}
                    Tag::GetReg => self.reg.add_uses(addr, size)?,
                    Tag::PutReg => self.reg.add_defs(addr, size)?,
                    _ => unreachable!("not a load/store tag"),
                }
            }
            Entry::Insn(e) => {
                if e.insn_seq as usize != self.code.len() {
                    return Err(Error::UnexpectedInsnSeq {
                        got: e.insn_seq,
                        expected: self.code.len() as u32,
                    });
                }
                let text_index = self.text.len() as u32;
                self.text.extend_from_slice(e.bytes)?;
                self.code.push(InsnInCode {
                    pc: W::from_u64(e.pc),
                    text_index,
                    text_size: e.bytes.len() as u32,
                })?;
                self.disasm.push(
                    self.disasm_engine
                        .disasm(e.bytes, e.pc)
                        .unwrap_or_else(|| "<unknown>".to_owned()),
                );
            }
            Entry::InsnExec(e) => self.handle_insn_seq(e.insn_seq)?,
            Entry::LdStNx(e) => {
                self.handle_insn_seq(e.insn_seq)?;
                let addr = W::from_u64(e.addr);
                let size = W::from_u64(e.size);
                match e.tag {
                    Tag::GetRegNx => self.reg.add_uses(addr, size)?,
                    Tag::PutRegNx => self.reg.add_defs(addr, size)?,
                    _ => unreachable!("not a sizeless register tag"),
                }
            }
            // Mapping events carry no dataflow.
            Entry::Mmap(_) => {}
        }
        Ok(())
    }

    fn complete(&mut self) -> Result<(), Error> {
        self.flush()?;
        self.write_dot()?;
        self.write_html()?;
        self.write_csv()?;
        self.write_store_header()?;
        Ok(())
    }
}

macro_rules! with_ud {
    ($self:ident, $ud:ident => $body:expr) => {
        match $self {
            UdGraph::W4($ud) => $body,
            UdGraph::W8($ud) => $body,
        }
    };
}

/// A fully ingested (or reopened) use-definition graph, dispatching over
/// the traced word size selected at open time.
pub enum UdGraph {
    W4(Ud<u32>),
    W8(Ud<u64>),
}

impl UdGraph {
    /// Ingests a trace. Records whose entry index falls outside `window`
    /// are skipped. Outputs configured in `config` are written only after
    /// the whole window has been processed successfully.
    pub fn analyze<P: AsRef<Path>>(
        path: P,
        window: Range<u64>,
        config: UdConfig,
    ) -> Result<Self, Error> {
        let mut trace = Trace::open(path)?;
        let fmt = trace.format();
        let machine = trace.machine();
        // About 128 bytes of trace per executed instruction.
        let expected_insns = trace.file_len() / 128;
        let mode = if config.store.is_some() {
            InitMode::CreatePersistent
        } else {
            InitMode::CreateTemporary
        };
        let graph = match fmt.word_size {
            4 => {
                let mut ud = Ud::<u32>::init(mode, machine, fmt.endianness, expected_insns, config)?;
                trace.visit(&mut ud, window)?;
                Self::W4(ud)
            }
            _ => {
                let mut ud = Ud::<u64>::init(mode, machine, fmt.endianness, expected_insns, config)?;
                trace.visit(&mut ud, window)?;
                Self::W8(ud)
            }
        };
        tracing::debug!(
            codes = graph.code_count(),
            rows = graph.trace_count(),
            "ingest complete"
        );
        Ok(graph)
    }

    /// Reopens a persisted store without re-reading the trace. The store
    /// must have been written by an analyzer of the same endianness.
    pub fn load(store: &str) -> Result<Self, Error> {
        let template = PathTemplate::new(store)?;
        let mut header = [0u8; 5];
        File::open(template.resolve("header"))?.read_exact(&mut header)?;
        let fmt = Format::from_magic([header[0], header[1]]).ok_or(Error::BadMagic)?;
        if fmt.endianness != Endianness::host() {
            return Err(Error::BadMagic);
        }
        let machine = Machine::try_from(u16::from_ne_bytes([header[2], header[3]]))?;
        let endianness = match header[4] {
            0 => Endianness::Little,
            1 => Endianness::Big,
            _ => return Err(Error::BadMagic),
        };
        let config = UdConfig {
            store: Some(store.to_owned()),
            ..UdConfig::default()
        };
        match fmt.word_size {
            4 => Ok(Self::W4(Ud::init(
                InitMode::OpenExisting,
                machine,
                endianness,
                0,
                config,
            )?)),
            _ => Ok(Self::W8(Ud::init(
                InitMode::OpenExisting,
                machine,
                endianness,
                0,
                config,
            )?)),
        }
    }

    pub fn word_size(&self) -> usize {
        match self {
            Self::W4(_) => 4,
            Self::W8(_) => 8,
        }
    }

    pub fn machine(&self) -> Machine {
        with_ud!(self, ud => ud.machine)
    }

    pub fn endianness(&self) -> Endianness {
        with_ud!(self, ud => ud.endianness)
    }

    pub fn code_count(&self) -> u32 {
        with_ud!(self, ud => ud.code_count())
    }

    pub fn trace_count(&self) -> u32 {
        with_ud!(self, ud => ud.trace_count())
    }

    pub fn codes_for_pc(&self, pc: u64) -> Vec<u32> {
        with_ud!(self, ud => ud.codes_for_pc(pc))
    }

    pub fn pc_for_code(&self, code: u32) -> u64 {
        with_ud!(self, ud => ud.pc_for_code(code))
    }

    pub fn disasm_for_code(&self, code: u32) -> String {
        with_ud!(self, ud => ud.disasm_for_code(code))
    }

    pub fn traces_for_code(&self, code: u32) -> Vec<u32> {
        with_ud!(self, ud => ud.traces_for_code(code))
    }

    pub fn code_for_trace(&self, trace: u32) -> u32 {
        with_ud!(self, ud => ud.code_for_trace(trace))
    }

    pub fn reg_uses_for_trace(&self, trace: u32) -> Vec<u32> {
        with_ud!(self, ud => ud.reg_uses_for_trace(trace))
    }

    pub fn mem_uses_for_trace(&self, trace: u32) -> Vec<u32> {
        with_ud!(self, ud => ud.mem_uses_for_trace(trace))
    }

    pub fn trace_for_reg_use(&self, reg_use: u32) -> u32 {
        with_ud!(self, ud => ud.trace_for_reg_use(reg_use))
    }

    pub fn trace_for_mem_use(&self, mem_use: u32) -> u32 {
        with_ud!(self, ud => ud.trace_for_mem_use(mem_use))
    }
}
