//! Runtime policy knobs for how the core reacts to programming errors in the
//! emulated program (undefined opcodes, etc). See §7 of the design notes.

/// Configuration for a [`crate::c64::C64`] instance.
///
/// The default value reproduces the 6502's real hardware behavior: undefined
/// opcodes are a silent no-op that still consumes a cycle, unmapped reads
/// return the last bus value, and unmapped writes are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmulatorConfig {
    /// When set, an undefined opcode halts the CPU (it stops advancing its
    /// micro-index) instead of silently running as a one-cycle no-op.
    pub strict_opcodes: bool,

    /// When set, an undefined opcode logs a diagnostic trace line at `error`
    /// level through the `log` facade and panics, rather than continuing.
    ///
    /// Takes priority over `strict_opcodes` if both are set.
    pub crash_on_invalid_instruction: bool,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        EmulatorConfig {
            strict_opcodes: false,
            crash_on_invalid_instruction: false,
        }
    }
}

impl EmulatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strict(mut self) -> Self {
        self.strict_opcodes = true;
        self
    }

    pub fn crash_on_invalid_instruction(mut self) -> Self {
        self.crash_on_invalid_instruction = true;
        self
    }
}
