//! The 256-entry opcode decode table: maps an opcode byte to its addressing
//! mode, mnemonic, and memory-access kind. Undocumented opcodes decode to
//! `Instruction::Kil` with `defined: false`; by default the CPU treats this
//! as a one-cycle no-op (see [`crate::config::EmulatorConfig`]).

use super::structs::{Access, AddressingMode, Instruction};

use AddressingMode::*;
use Instruction::*;

pub struct Decoded {
    pub addr_mode: AddressingMode,
    pub instr: Instruction,
    pub access: Access,
    pub defined: bool,
}

const fn d(addr_mode: AddressingMode, instr: Instruction, access: Access) -> Decoded {
    Decoded {
        addr_mode,
        instr,
        access,
        defined: true,
    }
}

const UNDEFINED: Decoded = Decoded {
    addr_mode: Impl,
    instr: Kil,
    access: Access::None,
    defined: false,
};

/// Decodes a documented 6502 opcode. Every slot not covered by the match
/// returns `UNDEFINED`.
pub fn decode_instruction(opcode: u8) -> Decoded {
    use Access::*;
    match opcode {
        0x00 => d(Impl, BRK, None),
        0x01 => d(IndX, ORA, Read),
        0x05 => d(ZP, ORA, Read),
        0x06 => d(ZP, ASL, ReadModifyWrite),
        0x08 => d(Impl, PHP, None),
        0x09 => d(Imm, ORA, Read),
        0x0A => d(Accum, ASL, ReadModifyWrite),
        0x0D => d(Abs, ORA, Read),
        0x0E => d(Abs, ASL, ReadModifyWrite),

        0x10 => d(Rel, BPL, None),
        0x11 => d(IndY, ORA, Read),
        0x15 => d(ZPX, ORA, Read),
        0x16 => d(ZPX, ASL, ReadModifyWrite),
        0x18 => d(Impl, CLC, None),
        0x19 => d(AbsY, ORA, Read),
        0x1D => d(AbsX, ORA, Read),
        0x1E => d(AbsX, ASL, ReadModifyWrite),

        0x20 => d(Abs, JSR, None),
        0x21 => d(IndX, AND, Read),
        0x24 => d(ZP, BIT, Read),
        0x25 => d(ZP, AND, Read),
        0x26 => d(ZP, ROL, ReadModifyWrite),
        0x28 => d(Impl, PLP, None),
        0x29 => d(Imm, AND, Read),
        0x2A => d(Accum, ROL, ReadModifyWrite),
        0x2C => d(Abs, BIT, Read),
        0x2D => d(Abs, AND, Read),
        0x2E => d(Abs, ROL, ReadModifyWrite),

        0x30 => d(Rel, BMI, None),
        0x31 => d(IndY, AND, Read),
        0x35 => d(ZPX, AND, Read),
        0x36 => d(ZPX, ROL, ReadModifyWrite),
        0x38 => d(Impl, SEC, None),
        0x39 => d(AbsY, AND, Read),
        0x3D => d(AbsX, AND, Read),
        0x3E => d(AbsX, ROL, ReadModifyWrite),

        0x40 => d(Impl, RTI, None),
        0x41 => d(IndX, EOR, Read),
        0x45 => d(ZP, EOR, Read),
        0x46 => d(ZP, LSR, ReadModifyWrite),
        0x48 => d(Impl, PHA, None),
        0x49 => d(Imm, EOR, Read),
        0x4A => d(Accum, LSR, ReadModifyWrite),
        0x4C => d(Abs, JMP, None),
        0x4D => d(Abs, EOR, Read),
        0x4E => d(Abs, LSR, ReadModifyWrite),

        0x50 => d(Rel, BVC, None),
        0x51 => d(IndY, EOR, Read),
        0x55 => d(ZPX, EOR, Read),
        0x56 => d(ZPX, LSR, ReadModifyWrite),
        0x58 => d(Impl, CLI, None),
        0x59 => d(AbsY, EOR, Read),
        0x5D => d(AbsX, EOR, Read),
        0x5E => d(AbsX, LSR, ReadModifyWrite),

        0x60 => d(Impl, RTS, None),
        0x61 => d(IndX, ADC, Read),
        0x65 => d(ZP, ADC, Read),
        0x66 => d(ZP, ROR, ReadModifyWrite),
        0x68 => d(Impl, PLA, None),
        0x69 => d(Imm, ADC, Read),
        0x6A => d(Accum, ROR, ReadModifyWrite),
        0x6C => d(AbsInd, JMP, None),
        0x6D => d(Abs, ADC, Read),
        0x6E => d(Abs, ROR, ReadModifyWrite),

        0x70 => d(Rel, BVS, None),
        0x71 => d(IndY, ADC, Read),
        0x75 => d(ZPX, ADC, Read),
        0x76 => d(ZPX, ROR, ReadModifyWrite),
        0x78 => d(Impl, SEI, None),
        0x79 => d(AbsY, ADC, Read),
        0x7D => d(AbsX, ADC, Read),
        0x7E => d(AbsX, ROR, ReadModifyWrite),

        0x81 => d(IndX, STA, Write),
        0x84 => d(ZP, STY, Write),
        0x85 => d(ZP, STA, Write),
        0x86 => d(ZP, STX, Write),
        0x88 => d(Impl, DEY, None),
        0x8A => d(Impl, TXA, None),
        0x8C => d(Abs, STY, Write),
        0x8D => d(Abs, STA, Write),
        0x8E => d(Abs, STX, Write),

        0x90 => d(Rel, BCC, None),
        0x91 => d(IndY, STA, Write),
        0x94 => d(ZPX, STY, Write),
        0x95 => d(ZPX, STA, Write),
        0x96 => d(ZPY, STX, Write),
        0x98 => d(Impl, TYA, None),
        0x99 => d(AbsY, STA, Write),
        0x9A => d(Impl, TXS, None),
        0x9D => d(AbsX, STA, Write),

        0xA0 => d(Imm, LDY, Read),
        0xA1 => d(IndX, LDA, Read),
        0xA2 => d(Imm, LDX, Read),
        0xA4 => d(ZP, LDY, Read),
        0xA5 => d(ZP, LDA, Read),
        0xA6 => d(ZP, LDX, Read),
        0xA8 => d(Impl, TAY, None),
        0xA9 => d(Imm, LDA, Read),
        0xAA => d(Impl, TAX, None),
        0xAC => d(Abs, LDY, Read),
        0xAD => d(Abs, LDA, Read),
        0xAE => d(Abs, LDX, Read),

        0xB0 => d(Rel, BCS, None),
        0xB1 => d(IndY, LDA, Read),
        0xB4 => d(ZPX, LDY, Read),
        0xB5 => d(ZPX, LDA, Read),
        0xB6 => d(ZPY, LDX, Read),
        0xB8 => d(Impl, CLV, None),
        0xB9 => d(AbsY, LDA, Read),
        0xBA => d(Impl, TSX, None),
        0xBC => d(AbsX, LDY, Read),
        0xBD => d(AbsX, LDA, Read),
        0xBE => d(AbsY, LDX, Read),

        0xC0 => d(Imm, CPY, Read),
        0xC1 => d(IndX, CMP, Read),
        0xC4 => d(ZP, CPY, Read),
        0xC5 => d(ZP, CMP, Read),
        0xC6 => d(ZP, DEC, ReadModifyWrite),
        0xC8 => d(Impl, INY, None),
        0xC9 => d(Imm, CMP, Read),
        0xCA => d(Impl, DEX, None),
        0xCC => d(Abs, CPY, Read),
        0xCD => d(Abs, CMP, Read),
        0xCE => d(Abs, DEC, ReadModifyWrite),

        0xD0 => d(Rel, BNE, None),
        0xD1 => d(IndY, CMP, Read),
        0xD5 => d(ZPX, CMP, Read),
        0xD6 => d(ZPX, DEC, ReadModifyWrite),
        0xD8 => d(Impl, CLD, None),
        0xD9 => d(AbsY, CMP, Read),
        0xDD => d(AbsX, CMP, Read),
        0xDE => d(AbsX, DEC, ReadModifyWrite),

        0xE0 => d(Imm, CPX, Read),
        0xE1 => d(IndX, SBC, Read),
        0xE4 => d(ZP, CPX, Read),
        0xE5 => d(ZP, SBC, Read),
        0xE6 => d(ZP, INC, ReadModifyWrite),
        0xE8 => d(Impl, INX, None),
        0xE9 => d(Imm, SBC, Read),
        0xEA => d(Impl, NOP, None),
        0xEC => d(Abs, CPX, Read),
        0xED => d(Abs, SBC, Read),
        0xEE => d(Abs, INC, ReadModifyWrite),

        0xF0 => d(Rel, BEQ, None),
        0xF1 => d(IndY, SBC, Read),
        0xF5 => d(ZPX, SBC, Read),
        0xF6 => d(ZPX, INC, ReadModifyWrite),
        0xF8 => d(Impl, SED, None),
        0xF9 => d(AbsY, SBC, Read),
        0xFD => d(AbsX, SBC, Read),
        0xFE => d(AbsX, INC, ReadModifyWrite),

        _ => UNDEFINED,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_documented_opcode() {
        let nop = decode_instruction(0xEA);
        assert_eq!(nop.instr, NOP);
        assert!(nop.defined);
    }

    #[test]
    fn undocumented_opcode_is_marked_undefined() {
        let undoc = decode_instruction(0x02);
        assert!(!undoc.defined);
        assert_eq!(undoc.instr, Kil);
    }

    #[test]
    fn brk_is_implied_with_no_memory_access() {
        let brk = decode_instruction(0x00);
        assert_eq!(brk.addr_mode, Impl);
        assert_eq!(brk.access, Access::None);
    }
}
