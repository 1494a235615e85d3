use std::fs;
use std::path::Path;

use c64_core::c64::Roms;

/// Mirrors the `nestest.nes` gating convention: this repository does not
/// vendor third-party test ROMs, so the Klaus functional test is written to
/// run against this file if present and to be skipped otherwise.
pub const KLAUS_FUNCTIONAL_TEST_PATH: &str = "./tests/data/6502_functional_test.bin";

/// Three all-zero ROM images of the right size, for scenarios that only
/// exercise RAM and never fall through to KERNAL/BASIC/character-ROM code.
pub fn blank_roms() -> Roms {
    Roms {
        basic: vec![0; 0x2000],
        kernal: vec![0; 0x2000],
        chargen: vec![0; 0x1000],
    }
}

/// Loads the Klaus functional test image if the fixture has been placed in
/// `tests/data/`; returns `None` so callers can skip rather than fail.
pub fn load_klaus_functional_test() -> Option<Vec<u8>> {
    let path = Path::new(KLAUS_FUNCTIONAL_TEST_PATH);
    if !path.exists() {
        return None;
    }
    Some(fs::read(path).expect("6502_functional_test.bin exists but could not be read"))
}
