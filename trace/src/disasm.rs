use capstone::{Arch, Capstone, Endian, Mode, NO_EXTRA_MODE};

use crate::record::{Endianness, Machine};
use crate::Error;

/// Capstone-backed disassembler configured for one traced architecture.
///
/// Construction fails for `(machine, endianness, word size)` combinations
/// capstone cannot decode; failure to decode an individual instruction is
/// not an error, callers render those as `<unknown>`.
pub struct Disasm {
    cs: Capstone,
}

impl Disasm {
    pub fn new(machine: Machine, endianness: Endianness, word_size: usize) -> Result<Self, Error> {
        let unsupported = || Error::UnsupportedArch {
            machine,
            endianness,
            word_size,
        };
        let little = endianness == Endianness::Little;
        let (arch, mode) = match machine {
            Machine::I386 => {
                if !little || word_size != 4 {
                    return Err(unsupported());
                }
                (Arch::X86, Mode::Mode32)
            }
            Machine::X86_64 => {
                if !little || word_size != 8 {
                    return Err(unsupported());
                }
                (Arch::X86, Mode::Mode64)
            }
            Machine::Ppc64 => {
                if word_size != 8 {
                    return Err(unsupported());
                }
                (Arch::PPC, Mode::Mode64)
            }
            Machine::Arm => {
                if word_size != 4 {
                    return Err(unsupported());
                }
                (Arch::ARM, Mode::Arm)
            }
            Machine::Aarch64 => {
                if word_size != 8 {
                    return Err(unsupported());
                }
                (Arch::ARM64, Mode::Arm)
            }
            Machine::S390 => {
                if little {
                    return Err(unsupported());
                }
                (Arch::SYSZ, Mode::Default)
            }
            Machine::Mips => {
                if word_size == 4 {
                    (Arch::MIPS, Mode::Mips32)
                } else {
                    (Arch::MIPS, Mode::Mips64)
                }
            }
            Machine::Ppc | Machine::NanoMips => return Err(unsupported()),
        };
        let endian = match endianness {
            Endianness::Little => Endian::Little,
            Endianness::Big => Endian::Big,
        };
        let cs = Capstone::new_raw(arch, mode, NO_EXTRA_MODE, Some(endian))?;
        Ok(Self { cs })
    }

    /// Disassembles the first instruction in `bytes`, or `None` when the
    /// bytes do not decode.
    pub fn disasm(&self, bytes: &[u8], pc: u64) -> Option<String> {
        let insns = self.cs.disasm_count(bytes, pc, 1).ok()?;
        let insn = insns.iter().next()?;
        Some(format!(
            "{} {}",
            insn.mnemonic()?,
            insn.op_str().unwrap_or("")
        ))
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_disasm_x86_64() {
        let disasm = Disasm::new(Machine::X86_64, Endianness::Little, 8).unwrap();
        // push r15
        let text = disasm.disasm(b"\x41\x57", 0x1000).unwrap();
        assert!(text.starts_with("push"), "{text:?}");
    }

    #[test]
    fn test_undecodable_bytes() {
        let disasm = Disasm::new(Machine::X86_64, Endianness::Little, 8).unwrap();
        assert_eq!(disasm.disasm(b"\xff\xff\xff", 0), None);
    }

    #[test]
    fn test_unsupported_combination() {
        assert!(matches!(
            Disasm::new(Machine::X86_64, Endianness::Big, 8),
            Err(Error::UnsupportedArch { .. })
        ));
        assert!(matches!(
            Disasm::new(Machine::NanoMips, Endianness::Little, 4),
            Err(Error::UnsupportedArch { .. })
        ));
    }
}
