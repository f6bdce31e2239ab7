use std::fs::File;
use std::io::{BufWriter, Write};

use serde::Serialize;
use ud_core::domain::{Def, Domain, InsnInTrace};
use ud_core::{MmapVec, Word};

use crate::record::{Endianness, Format};
use crate::{Error, Hex};

use super::Ud;

#[derive(Serialize)]
struct CodeRow {
    code: u32,
    pc: u64,
    bytes: String,
    disasm: String,
}

#[derive(Serialize)]
struct TraceRow {
    trace: u32,
    code: u32,
}

#[derive(Serialize)]
struct UseRow {
    trace: u32,
    producer: u32,
    domain: char,
    start: u64,
    end: u64,
}

fn html_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '"' => escaped.push_str("&quot;"),
            '&' => escaped.push_str("&amp;"),
            '\'' => escaped.push_str("&#39;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

impl<W: Word> Ud<W> {
    fn each_use<'a>(
        domain: &'a Domain<W>,
        trace: &'a MmapVec<InsnInTrace>,
        start: u32,
        end: u32,
        start_def: fn(&InsnInTrace) -> u32,
    ) -> impl Iterator<Item = (Def<W>, u32)> + 'a {
        (start..end).map(move |use_index| domain.resolve_use(use_index, trace, start_def))
    }

    pub(super) fn write_dot(&self) -> Result<(), Error> {
        let Some(path) = &self.dot else {
            return Ok(());
        };
        let mut out = BufWriter::new(File::create(path)?);
        writeln!(out, "digraph ud {{")?;
        for index in 0..self.trace.len() {
            let row = self.trace[index];
            let code = self.code[row.code_index as usize];
            writeln!(
                out,
                "    {index} [label=\"[{index}] {:#x}: {}\"]",
                code.pc,
                self.disasm_for_code(row.code_index)
            )?;
            for (def, producer) in Self::each_use(
                &self.reg,
                &self.trace,
                row.reg_use_start,
                row.reg_use_end,
                |t| t.reg_def_start,
            ) {
                writeln!(
                    out,
                    "    {index} -> {producer} [label=\"r{:#x}-{:#x}\"]",
                    def.start, def.end
                )?;
            }
            for (def, producer) in Self::each_use(
                &self.mem,
                &self.trace,
                row.mem_use_start,
                row.mem_use_end,
                |t| t.mem_def_start,
            ) {
                writeln!(
                    out,
                    "    {index} -> {producer} [label=\"m{:#x}-{:#x}\"]",
                    def.start, def.end
                )?;
            }
        }
        writeln!(out, "}}")?;
        Ok(())
    }

    pub(super) fn write_html(&self) -> Result<(), Error> {
        let Some(path) = &self.html else {
            return Ok(());
        };
        let mut out = BufWriter::new(File::create(path)?);
        writeln!(out, "<!DOCTYPE html>")?;
        writeln!(out, "<html>")?;
        writeln!(out, "<head>")?;
        writeln!(out, "<title>ud</title>")?;
        writeln!(out, "</head>")?;
        writeln!(out, "<body>")?;
        writeln!(out, "<table>")?;
        writeln!(out, "    <tr>")?;
        for column in ["Seq", "Address", "Bytes", "Instruction", "Uses", "Defs"] {
            writeln!(out, "        <th>{column}</th>")?;
        }
        writeln!(out, "    </tr>")?;
        for index in 0..self.trace.len() {
            let row = self.trace[index];
            let code = self.code[row.code_index as usize];
            writeln!(out, "    <tr id=\"{index}\">")?;
            writeln!(out, "        <td>{index}</td>")?;
            writeln!(out, "        <td>{:#x}</td>", code.pc)?;
            writeln!(out, "        <td>{}</td>", Hex(self.code_bytes(row.code_index)))?;
            writeln!(
                out,
                "        <td>{}</td>",
                html_escape(&self.disasm_for_code(row.code_index))
            )?;
            writeln!(out, "        <td>")?;
            for (def, producer) in Self::each_use(
                &self.reg,
                &self.trace,
                row.reg_use_start,
                row.reg_use_end,
                |t| t.reg_def_start,
            ) {
                writeln!(
                    out,
                    "            <a href=\"#{producer}\">r{:#x}-{:#x}</a>",
                    def.start, def.end
                )?;
            }
            for (def, producer) in Self::each_use(
                &self.mem,
                &self.trace,
                row.mem_use_start,
                row.mem_use_end,
                |t| t.mem_def_start,
            ) {
                writeln!(
                    out,
                    "            <a href=\"#{producer}\">m{:#x}-{:#x}</a>",
                    def.start, def.end
                )?;
            }
            writeln!(out, "        </td>")?;
            writeln!(out, "        <td>")?;
            for def in self.reg.defs_in(row.reg_def_start, row.reg_def_end) {
                writeln!(out, "            r{:#x}-{:#x}", def.start, def.end)?;
            }
            for def in self.mem.defs_in(row.mem_def_start, row.mem_def_end) {
                writeln!(out, "            m{:#x}-{:#x}", def.start, def.end)?;
            }
            writeln!(out, "        </td>")?;
            writeln!(out, "    </tr>")?;
        }
        writeln!(out, "</table>")?;
        writeln!(out, "</body>")?;
        writeln!(out, "</html>")?;
        Ok(())
    }

    pub(super) fn write_csv(&self) -> Result<(), Error> {
        let Some(template) = &self.csv_template else {
            return Ok(());
        };

        let mut code_out = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(template.resolve("code"))?;
        for index in 0..self.code.len() {
            let code = self.code[index];
            code_out.serialize(CodeRow {
                code: index as u32,
                pc: code.pc.to_u64(),
                bytes: Hex(self.code_bytes(index as u32)).to_string(),
                disasm: self.disasm_for_code(index as u32),
            })?;
        }
        code_out.flush()?;

        let mut trace_out = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(template.resolve("trace"))?;
        for index in 0..self.trace.len() {
            trace_out.serialize(TraceRow {
                trace: index as u32,
                code: self.trace[index].code_index,
            })?;
        }
        trace_out.flush()?;

        let mut uses_out = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(template.resolve("uses"))?;
        for index in 0..self.trace.len() {
            let row = self.trace[index];
            for (def, producer) in Self::each_use(
                &self.reg,
                &self.trace,
                row.reg_use_start,
                row.reg_use_end,
                |t| t.reg_def_start,
            ) {
                uses_out.serialize(UseRow {
                    trace: index as u32,
                    producer,
                    domain: 'r',
                    start: def.start.to_u64(),
                    end: def.end.to_u64(),
                })?;
            }
            for (def, producer) in Self::each_use(
                &self.mem,
                &self.trace,
                row.mem_use_start,
                row.mem_use_end,
                |t| t.mem_def_start,
            ) {
                uses_out.serialize(UseRow {
                    trace: index as u32,
                    producer,
                    domain: 'm',
                    start: def.start.to_u64(),
                    end: def.end.to_u64(),
                })?;
            }
        }
        uses_out.flush()?;
        Ok(())
    }

    /// Writes the small header that lets [`super::UdGraph::load`] pick the
    /// right word size and machine back up: the analyzer-endian magic, the
    /// machine type, and the traced program's endianness.
    pub(super) fn write_store_header(&self) -> Result<(), Error> {
        if !self.persist {
            return Ok(());
        }
        let magic = Format::new(Endianness::host(), W::SIZE).magic();
        let machine = (self.machine as u16).to_ne_bytes();
        let endianness = match self.endianness {
            Endianness::Little => 0u8,
            Endianness::Big => 1u8,
        };
        let mut out = File::create(self.store_template.resolve("header"))?;
        out.write_all(&[magic[0], magic[1], machine[0], machine[1], endianness])?;
        Ok(())
    }
}
