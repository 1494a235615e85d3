//! Runs Klaus Dormann's 6502 functional test suite if the fixture has been
//! placed at `tests/data/6502_functional_test.bin`; skipped otherwise. This
//! mirrors the upstream convention of not vendoring third-party test ROMs.

mod util;

use c64_core::c64::C64;
use c64_core::config::EmulatorConfig;
use c64_core::host::NullHost;
use util::provider::{blank_roms, load_klaus_functional_test};

/// The reference build of `6502_functional_test.bin` parks the CPU in a
/// tight `JMP *` at this address on success.
const SUCCESS_TRAP: u16 = 0x3469;

const LOAD_ADDR: u16 = 0x0000;
const START_ADDR: u16 = 0x0400;

#[test]
fn klaus_6502_functional_test() {
    let Some(image) = load_klaus_functional_test() else {
        eprintln!("skipping: tests/data/6502_functional_test.bin not present");
        return;
    };

    let mut c64 = C64::new(blank_roms(), EmulatorConfig::new()).unwrap();
    // Full-RAM bank selection: the test image assumes a flat 64K address
    // space with no KERNAL/BASIC/I-O shadowing.
    c64.bus().write(0x0001, 0x00);
    for (i, byte) in image.iter().enumerate() {
        c64.bus().write(LOAD_ADDR.wrapping_add(i as u16), *byte);
    }

    c64.reset();
    c64.cpu_mut().state.pc = START_ADDR;

    let mut host = NullHost;
    let mut last_pc = c64.cpu().state.pc;
    let mut stable_for = 0u32;
    const MAX_CYCLES: u32 = 200_000_000;
    const STABLE_THRESHOLD: u32 = 64;

    let mut cycles = 0u32;
    while cycles < MAX_CYCLES {
        c64.tick(&mut host);
        c64.tick(&mut host);
        cycles += 1;

        let pc = c64.cpu().state.pc;
        if pc == last_pc {
            stable_for += 1;
            if stable_for >= STABLE_THRESHOLD {
                break;
            }
        } else {
            stable_for = 0;
            last_pc = pc;
        }
    }

    assert_eq!(
        last_pc, SUCCESS_TRAP,
        "test trapped at ${last_pc:04X} instead of the success trap ${SUCCESS_TRAP:04X}"
    );
}
