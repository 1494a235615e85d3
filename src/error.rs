//! Error types for configuration-time failures.
//!
//! Per the core's error handling model there are three classes of failure:
//! configuration errors (this module, reported to the caller), programming
//! errors in emulated code (governed by [`crate::config::EmulatorConfig`],
//! silently handled or escalated per policy), and runtime assertions (plain
//! panics - they indicate a bug in this crate, not in the guest program).

use thiserror::Error;

/// Failures that can occur while wiring up the bus, bank switcher, or the
/// top-level machine. These are the only `Result`-returning surface in the
/// crate; once construction succeeds, `tick()` cannot fail.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum EmulatorError {
    #[error("device range ${start:04X}-${end:04X} does not map onto a whole number of pages")]
    UnalignedRange { start: u16, end: u16 },

    #[error("device range ${start:04X}-${end:04X} is empty or inverted")]
    InvalidRange { start: u16, end: u16 },

    #[error("bank switcher requires between 1 and 8 devices per bank, got {count}")]
    InvalidBankWidth { count: usize },

    #[error("bank switcher banks have inconsistent widths: bank 0 has {expected}, bank {index} has {actual}")]
    InconsistentBankWidth {
        expected: usize,
        index: usize,
        actual: usize,
    },

    #[error("ROM image for {name} is {actual} bytes, expected {expected}")]
    WrongRomSize {
        name: &'static str,
        expected: usize,
        actual: usize,
    },
}
