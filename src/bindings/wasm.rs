/// WASM front-end for the C64 digital core
use crate::c64::{Roms, C64};
use crate::config::EmulatorConfig;
use crate::devices::vic::dimensions::PAL;
use crate::host::PixelSink;
use console_error_panic_hook;
use js_sys::Uint8Array;
use std::panic;
use wasm_bindgen::prelude::*;

#[wasm_bindgen]
extern "C" {
    fn alert(s: &str);
}

/// A `PixelSink` backing a flat RGBA8 buffer sized to the PAL visible area,
/// handed to JS as a `Uint8Array` once per frame. The core never allocates
/// or owns this itself (SPEC_FULL §6: the host owns the framebuffer).
struct FrameBuffer {
    pixels: Vec<u8>,
}

impl FrameBuffer {
    fn new() -> FrameBuffer {
        let len = PAL.visible_width as usize * PAL.visible_height as usize * 4;
        FrameBuffer {
            pixels: vec![0; len],
        }
    }
}

impl PixelSink for FrameBuffer {
    fn set_pixel(&mut self, x: u16, y: u16, rgba: u32) {
        let idx = (y as usize * PAL.visible_width as usize + x as usize) * 4;
        if idx + 4 > self.pixels.len() {
            return;
        }
        self.pixels[idx] = (rgba >> 24) as u8;
        self.pixels[idx + 1] = (rgba >> 16) as u8;
        self.pixels[idx + 2] = (rgba >> 8) as u8;
        self.pixels[idx + 3] = rgba as u8;
    }

    fn flip(&mut self) {}
}

#[wasm_bindgen]
pub struct C64Emulator {
    c64: C64,
    frame: FrameBuffer,
}

#[wasm_bindgen]
impl C64Emulator {
    #[wasm_bindgen(constructor)]
    pub fn new(basic: &[u8], kernal: &[u8], chargen: &[u8]) -> C64Emulator {
        let roms = Roms {
            basic: basic.to_vec(),
            kernal: kernal.to_vec(),
            chargen: chargen.to_vec(),
        };
        let c64 = C64::new(roms, EmulatorConfig::new()).expect("invalid ROM image");
        C64Emulator {
            c64,
            frame: FrameBuffer::new(),
        }
    }

    #[wasm_bindgen]
    pub fn reset(&mut self) {
        self.c64.reset();
    }

    #[wasm_bindgen]
    pub fn load_program(&mut self, addr: u16, bytes: &[u8]) {
        self.c64.load_program(addr, bytes);
    }

    #[wasm_bindgen]
    pub fn step_frame(&mut self) -> Uint8Array {
        self.c64.tick_frame(&mut self.frame);
        Uint8Array::from(self.frame.pixels.as_slice())
    }
}

/// Installs a global panic handler to make debugging easier
#[wasm_bindgen]
pub fn init_debug_hooks() {
    panic::set_hook(Box::new(console_error_panic_hook::hook));
}
