//! The micro-op vocabulary and per-opcode program tables. Generalizes the
//! reference implementation's per-opcode closure table into a tagged enum
//! that a single dispatcher interprets, per the resolved micro-sequencer
//! redesign (a `&'static [MicroOp]` slice per opcode rather than closures).

use super::structs::{Access, AddressingMode};

/// One cycle's worth of sequencer work. Every variant corresponds to
/// exactly one bus cycle (a real memory access or an internal/idle cycle).
/// Variants whose name ends in a conditional ("MaybeFixup") may complete the
/// instruction early or fall through to a following fixup step depending on
/// runtime state (set by the immediately preceding step) - this is how a
/// statically-sized per-opcode table still reproduces the 6502's
/// data-dependent page-crossing cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicroOp {
    FetchLow,
    FetchHigh,
    FetchHighAddX,
    FetchHighAddY,
    AddIndexToPointer,
    FetchPointerLow,
    FetchPointerHigh,
    FetchPointerHighAddY,
    DummyFixupAlways,

    ImmediateExecute,
    AccumExecute,
    ImpliedExecute,

    ReadAndExecute,
    ReadMaybeFixup,
    FixupThenReadAndExecute,
    WriteRegister,

    ReadValue,
    ModifyDummyWrite,
    ModifyAndWrite,

    BranchDecide,
    BranchTake,
    BranchFixup,

    SkipPaddingByte,
    PushPCH,
    PushPCL,
    PushStatusBrk,
    FetchVecLo,
    FetchVecHiAndJump,

    JsrInternalDelay,
    JsrFetchHighAndJump,

    JmpIndReadTargetLow,
    JmpIndReadTargetHighAndJump,
    FetchHighAndJump,

    RtsDiscardByte,
    RtsIncrementS,
    RtsPullPCL,
    RtsPullPCH,
    RtsFixupIncrementPC,

    RtiDiscardByte,
    RtiIncrementS,
    RtiPullStatus,
    RtiPullPCL,
    RtiPullPCHAndJump,

    PushDiscardByte,
    PushAccOrStatus,

    PullDiscardByte,
    PullIncrementS,
    PullAccOrStatus,

    /// The undefined-opcode no-op: consumes its one cycle and does nothing.
    UndefinedNoOp,
}

impl MicroOp {
    /// Whether executing this step writes to the bus. The ready line only
    /// stuns the CPU on read cycles (see SPEC_FULL §4.4's "stun" handling):
    /// the real 6502 cannot be stopped mid-write, since aborting a write
    /// would corrupt the target device.
    pub fn is_write(self) -> bool {
        matches!(
            self,
            MicroOp::WriteRegister
                | MicroOp::ModifyDummyWrite
                | MicroOp::ModifyAndWrite
                | MicroOp::PushPCH
                | MicroOp::PushPCL
                | MicroOp::PushStatusBrk
                | MicroOp::PushAccOrStatus
        )
    }
}

fn addr_prefix(mode: AddressingMode, access: Access) -> &'static [MicroOp] {
    use Access::*;
    use AddressingMode::*;
    use MicroOp::*;
    match (mode, access) {
        (ZP, Read) => &[FetchLow, ReadAndExecute],
        (ZP, Write) => &[FetchLow, WriteRegister],
        (ZP, ReadModifyWrite) => &[FetchLow, ReadValue, ModifyDummyWrite, ModifyAndWrite],

        (ZPX, Read) | (ZPY, Read) => &[FetchLow, AddIndexToPointer, ReadAndExecute],
        (ZPX, Write) | (ZPY, Write) => &[FetchLow, AddIndexToPointer, WriteRegister],
        (ZPX, ReadModifyWrite) => &[
            FetchLow,
            AddIndexToPointer,
            ReadValue,
            ModifyDummyWrite,
            ModifyAndWrite,
        ],

        (Abs, Read) => &[FetchLow, FetchHigh, ReadAndExecute],
        (Abs, Write) => &[FetchLow, FetchHigh, WriteRegister],
        (Abs, ReadModifyWrite) => &[
            FetchLow,
            FetchHigh,
            ReadValue,
            ModifyDummyWrite,
            ModifyAndWrite,
        ],

        (AbsX, Read) => &[FetchLow, FetchHighAddX, ReadMaybeFixup, FixupThenReadAndExecute],
        (AbsY, Read) => &[FetchLow, FetchHighAddY, ReadMaybeFixup, FixupThenReadAndExecute],
        (AbsX, Write) => &[FetchLow, FetchHighAddX, DummyFixupAlways, WriteRegister],
        (AbsY, Write) => &[FetchLow, FetchHighAddY, DummyFixupAlways, WriteRegister],
        (AbsX, ReadModifyWrite) => &[
            FetchLow,
            FetchHighAddX,
            DummyFixupAlways,
            ReadValue,
            ModifyDummyWrite,
            ModifyAndWrite,
        ],
        (AbsY, ReadModifyWrite) => &[
            FetchLow,
            FetchHighAddY,
            DummyFixupAlways,
            ReadValue,
            ModifyDummyWrite,
            ModifyAndWrite,
        ],

        (IndX, Read) => &[
            FetchLow,
            AddIndexToPointer,
            FetchPointerLow,
            FetchPointerHigh,
            ReadAndExecute,
        ],
        (IndX, Write) => &[
            FetchLow,
            AddIndexToPointer,
            FetchPointerLow,
            FetchPointerHigh,
            WriteRegister,
        ],

        (IndY, Read) => &[
            FetchLow,
            FetchPointerLow,
            FetchPointerHighAddY,
            ReadMaybeFixup,
            FixupThenReadAndExecute,
        ],
        (IndY, Write) => &[
            FetchLow,
            FetchPointerLow,
            FetchPointerHighAddY,
            DummyFixupAlways,
            WriteRegister,
        ],

        (Imm, Read) => &[ImmediateExecute],
        (Accum, ReadModifyWrite) => &[AccumExecute],
        (Impl, None) => &[ImpliedExecute],
        (Rel, None) => &[BranchDecide, BranchTake, BranchFixup],
        (AbsInd, None) => &[
            FetchLow,
            FetchHigh,
            JmpIndReadTargetLow,
            JmpIndReadTargetHighAndJump,
        ],
        // JMP absolute and JSR share (Abs, None) but are not the same
        // program - both are handled by opcode in `program_for` instead.
        // BRK is the sole Impl-addressed, None-access opcode, also handled there.
        _ => &[ImpliedExecute],
    }
}

/// The micro-program for a decoded opcode. `instr`/`opcode` select the
/// handful of programs that do not reduce to a pure function of
/// (addressing mode, access) - BRK, JSR, JMP, RTS, RTI, PHA/PHP, PLA/PLP.
pub fn program_for(
    opcode: u8,
    addr_mode: AddressingMode,
    access: Access,
    defined: bool,
) -> &'static [MicroOp] {
    use MicroOp::*;
    if !defined {
        return &[UndefinedNoOp];
    }
    match opcode {
        0x00 => &[SkipPaddingByte, PushPCH, PushPCL, PushStatusBrk, FetchVecLo, FetchVecHiAndJump],
        0x20 => &[FetchLow, JsrInternalDelay, PushPCH, PushPCL, JsrFetchHighAndJump],
        0x4C => &[FetchLow, FetchHighAndJump],
        0x60 => &[RtsDiscardByte, RtsIncrementS, RtsPullPCL, RtsPullPCH, RtsFixupIncrementPC],
        0x40 => &[RtiDiscardByte, RtiIncrementS, RtiPullStatus, RtiPullPCL, RtiPullPCHAndJump],
        0x48 | 0x08 => &[PushDiscardByte, PushAccOrStatus],
        0x68 | 0x28 => &[PullDiscardByte, PullIncrementS, PullAccOrStatus],
        _ => addr_prefix(addr_mode, access),
    }
}

/// The RESET/IRQ/NMI pseudo-instruction programs (SPEC_FULL §4.4). These
/// never come from the opcode table - they pre-empt the next opcode fetch
/// when pending.
pub fn reset_program() -> &'static [MicroOp] {
    &[
        MicroOp::SkipPaddingByte,
        MicroOp::RtsDiscardByte,
        MicroOp::RtsDiscardByte,
        MicroOp::FetchVecLo,
        MicroOp::FetchVecHiAndJump,
    ]
}

pub fn interrupt_program() -> &'static [MicroOp] {
    use MicroOp::*;
    &[SkipPaddingByte, PushPCH, PushPCL, PushStatusBrk, FetchVecLo, FetchVecHiAndJump]
}
