//! Trace container, parser, and use-definition engine for instruction-level
//! execution traces.
//!
//! A trace is a dense binary log produced by an instrumented program run:
//! every executed instruction together with every load, store, register
//! read, and register write it performed, plus memory-mapping events. The
//! `record` module defines the wire format; `reader` memory-maps a trace
//! and iterates it without copying; `writer` produces the same format;
//! `dump` renders records for humans.
//!
//! The `engine` module turns a trace into a use-definition graph: for each
//! dynamic instruction instance it records which earlier instances most
//! recently defined every byte range it reads, over both the register file
//! and memory. The result can be queried in place, exported as DOT, HTML,
//! or CSV, or persisted to a set of file-backed vectors and reopened later
//! without re-reading the trace.

pub mod disasm;
pub mod dump;
pub mod engine;
pub mod error;
pub mod reader;
pub mod record;
pub mod writer;

pub use engine::{UdConfig, UdGraph};
pub use error::Error;
pub use reader::{Trace, Visitor};

#[derive(Copy, Clone)]
pub(crate) struct Hex<'a>(pub(crate) &'a [u8]);

impl std::fmt::Display for Hex<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}
