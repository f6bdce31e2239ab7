use std::io;

use crate::record::{Endianness, Machine};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("trace does not start with a recognized magic")]
    BadMagic,

    #[error("trace is truncated or a record overruns its frame")]
    Truncated,

    #[error("unknown record tag {0:#06x}")]
    UnknownTag(u16),

    #[error("unknown machine type {0}")]
    UnknownMachine(u16),

    #[error("static instruction records out of order: got {got}, expected {expected}")]
    UnexpectedInsnSeq { got: u32, expected: u32 },

    #[error("no instruction with sequence index {0}")]
    NoSuchInsn(u32),

    #[error("{machine} with {endianness}-endian {word_size}-byte words cannot be disassembled")]
    UnsupportedArch {
        machine: Machine,
        endianness: Endianness,
        word_size: usize,
    },

    #[error("disassembler error")]
    Disasm(#[from] capstone::Error),

    #[error("csv output error")]
    Csv(#[from] csv::Error),

    #[error("i/o failure")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Core(#[from] ud_core::Error),
}
