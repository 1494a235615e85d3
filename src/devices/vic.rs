//! The VIC-II video controller: a 63-cycle/line, 312-line (PAL) raster state
//! machine performing c/g/p/s-access DMA, driving text/bitmap/multicolor
//! rendering, 8 sprites, collision detection, and raster interrupts. See
//! SPEC_FULL §4.5.
//!
//! The register file (CPU-visible at $D000-$D3FF) is split out as
//! [`VicRegs`], a plain [`AddressSpace`] device the bus mounts directly; the
//! [`Vic`] engine holds a clone of the same `Rc<RefCell<VicRegs>>` so it can
//! drive the raster state machine without the bus needing to hold a second,
//! conflicting borrow of the engine itself (see DESIGN.md's note on cyclic
//! ownership).

use std::cell::RefCell;
use std::rc::Rc;

use crate::devices::bus::{AddressSpace, Bus, Device, Line};
use crate::devices::cia::Cia;
use crate::devices::cpu::Cpu;
use crate::host::PixelSink;

/// PAL screen geometry, carried from the reference implementation's
/// `vic-ii/screendim.go` (SPEC_FULL §4.5).
pub mod dimensions {
    pub struct Dimensions {
        pub screen_width: u16,
        pub screen_height: u16,
        pub visible_width: u16,
        pub visible_height: u16,
        pub cycles_per_line: u16,
        pub lines_per_frame: u16,
    }

    pub const PAL: Dimensions = Dimensions {
        screen_width: 504,
        screen_height: 312,
        visible_width: 403,
        visible_height: 284,
        cycles_per_line: 63,
        lines_per_frame: 312,
    };
}

/// The 16-entry C64 palette, carried verbatim (as packed RGBA) from the
/// reference implementation's `vic-ii/colormap.go`.
pub mod palette {
    pub const COLORS: [u32; 16] = [
        0x000000FF, // 0 black
        0xFFFFFFFF, // 1 white
        0x880000FF, // 2 red
        0xAAFFEEFF, // 3 cyan
        0xCC44CCFF, // 4 purple
        0x00CC55FF, // 5 green
        0x0000AAFF, // 6 blue
        0xEEEE77FF, // 7 yellow
        0xDD8855FF, // 8 orange
        0x664400FF, // 9 brown
        0xFF7777FF, // 10 light red
        0x333333FF, // 11 dark grey
        0x777777FF, // 12 grey
        0xAAFF66FF, // 13 light green
        0x0088FFFF, // 14 light blue
        0xBBBBBBFF, // 15 light grey
    ];
}

// Register offsets, per SPEC_FULL §4.5's register map.
const REG_CTRL1: u16 = 0x11;
const REG_RASTER: u16 = 0x12;
const REG_LPX: u16 = 0x13;
const REG_LPY: u16 = 0x14;
const REG_SPRITE_ENABLE: u16 = 0x15;
const REG_CTRL2: u16 = 0x16;
const REG_SPRITE_Y_EXPAND: u16 = 0x17;
const REG_MEM_PTRS: u16 = 0x18;
const REG_IRQ_STATUS: u16 = 0x19;
const REG_IRQ_ENABLE: u16 = 0x1A;
const REG_SPRITE_PRIORITY: u16 = 0x1B;
const REG_SPRITE_MULTICOLOR: u16 = 0x1C;
const REG_SPRITE_X_EXPAND: u16 = 0x1D;
const REG_SS_COLLISION: u16 = 0x1E;
const REG_BG_COLLISION: u16 = 0x1F;
const REG_BORDER: u16 = 0x20;
const REG_BG0: u16 = 0x21;
const REG_SPRITE_X_HIGH: u16 = 0x10;

/// Per-register "unused bits read as 1" mask, indices 0x00-0x3F. Carried from
/// the reference `vic-ii/vic_ii.go`'s `unusedBitsMask` table, except $D01A
/// (see DESIGN.md: SPEC_FULL §4.5 gives that register's bit 7 real meaning -
/// a master IRQ enable - so only bits 4-6 are actually unused there, unlike
/// the reference's blanket 0xF0).
const UNUSED_MASK: [u8; 64] = {
    let mut m = [0u8; 64];
    m[0x16] = 0xC0;
    m[0x18] = 0x01;
    m[0x19] = 0x70;
    m[0x1A] = 0x70;
    let mut i = 0x20;
    while i <= 0x2E {
        m[i] = 0xF0;
        i += 1;
    }
    let mut i = 0x2F;
    while i <= 0x3F {
        m[i] = 0xFF;
        i += 1;
    }
    m
};

#[derive(Debug, Clone, Copy, Default)]
pub struct SpriteRegs {
    pub enabled: bool,
    pub x: u16,
    pub y: u8,
    pub color: u8,
    pub expand_x: bool,
    pub expand_y: bool,
    pub behind_foreground: bool,
    pub multicolor: bool,
}

/// The CPU-visible register file, mounted as a device at $D000-$D3FF (masked
/// to 6 bits, 16-fold mirrored across the 1 KiB window).
pub struct VicRegs {
    pub sprites: [SpriteRegs; 8],

    pub raster_line: u16,
    pub raster_trigger: u16,

    pub extended_color: bool,
    pub bitmap_mode: bool,
    pub display_enable: bool,
    pub line25: bool,
    pub scroll_y: u8,

    pub multicolor: bool,
    pub col40: bool,
    pub scroll_x: u8,

    pub screen_mem_ptr: u16,
    pub charset_ptr: u16,

    pub irq_raster_pending: bool,
    pub irq_bg_pending: bool,
    pub irq_ss_pending: bool,

    pub irq_raster_enabled: bool,
    pub irq_bg_enabled: bool,
    pub irq_ss_enabled: bool,
    pub irq_lp_enabled: bool,
    pub irq_master_enable: bool,

    pub ss_collision: u8,
    pub bg_collision: u8,

    pub border_color: u8,
    pub bg_colors: [u8; 4],
    pub sprite_mc: [u8; 2],

    not_irq: Line,
    /// Whether this VIC currently holds `not_irq` down. `sync_not_irq` is
    /// called on every pending/enable change and must only pull/release on
    /// the `false`->`true`/`true`->`false` transition of the line's assert
    /// state - otherwise a second call while already asserted (or while
    /// already released) double-pulls or double-releases the shared
    /// wired-OR count against the CIAs.
    holding_irq: bool,
}

impl VicRegs {
    pub fn new(not_irq: Line) -> VicRegs {
        VicRegs {
            sprites: [SpriteRegs::default(); 8],
            raster_line: 0,
            raster_trigger: 0,
            extended_color: false,
            bitmap_mode: false,
            display_enable: true,
            line25: true,
            scroll_y: 3,
            multicolor: false,
            col40: true,
            scroll_x: 0,
            screen_mem_ptr: 0x0400,
            charset_ptr: 0x1000,
            irq_raster_pending: false,
            irq_bg_pending: false,
            irq_ss_pending: false,
            irq_raster_enabled: false,
            irq_bg_enabled: false,
            irq_ss_enabled: false,
            irq_lp_enabled: false,
            irq_master_enable: false,
            ss_collision: 0,
            bg_collision: 0,
            border_color: 14,
            bg_colors: [6, 1, 2, 3],
            sprite_mc: [0, 0],
            not_irq,
            holding_irq: false,
        }
    }

    fn any_enabled_pending(&self) -> bool {
        (self.irq_raster_pending && self.irq_raster_enabled)
            || (self.irq_bg_pending && self.irq_bg_enabled)
            || (self.irq_ss_pending && self.irq_ss_enabled)
    }

    fn sync_not_irq(&mut self) {
        let asserted = self.irq_master_enable && self.any_enabled_pending();
        if asserted && !self.holding_irq {
            crate::devices::bus::pull_down(&self.not_irq);
            self.holding_irq = true;
        } else if !asserted && self.holding_irq {
            crate::devices::bus::release(&self.not_irq);
            self.holding_irq = false;
        }
    }

    /// Called by the raster-interrupt check and by collision detection: sets
    /// a pending bit and, if newly enabled+pending, pulls not-IRQ.
    fn raise(&mut self, raster: bool, bg: bool, ss: bool) {
        if raster {
            self.irq_raster_pending = true;
        }
        if bg {
            self.irq_bg_pending = true;
        }
        if ss {
            self.irq_ss_pending = true;
        }
        self.sync_not_irq();
    }

    fn read_register(&mut self, reg: u16) -> u8 {
        match reg {
            0x00..=0x0F => {
                let n = (reg / 2) as usize;
                if reg % 2 == 0 {
                    (self.sprites[n].x & 0xFF) as u8
                } else {
                    self.sprites[n].y
                }
            }
            REG_SPRITE_X_HIGH => {
                let mut v = 0;
                for (n, s) in self.sprites.iter().enumerate() {
                    if s.x & 0x100 != 0 {
                        v |= 1 << n;
                    }
                }
                v
            }
            REG_CTRL1 => {
                let mut v = 0u8;
                if self.raster_line & 0x100 != 0 {
                    v |= 0x80;
                }
                if self.extended_color {
                    v |= 0x40;
                }
                if self.bitmap_mode {
                    v |= 0x20;
                }
                if self.display_enable {
                    v |= 0x10;
                }
                if self.line25 {
                    v |= 0x08;
                }
                v | (self.scroll_y & 0x07)
            }
            REG_RASTER => (self.raster_line & 0xFF) as u8,
            REG_LPX | REG_LPY => 0,
            REG_SPRITE_ENABLE => self.sprite_bits(|s| s.enabled),
            REG_CTRL2 => {
                let mut v = 0u8;
                if self.multicolor {
                    v |= 0x10;
                }
                if self.col40 {
                    v |= 0x08;
                }
                v | (self.scroll_x & 0x07)
            }
            REG_SPRITE_Y_EXPAND => self.sprite_bits(|s| s.expand_y),
            REG_MEM_PTRS => {
                (((self.screen_mem_ptr >> 6) as u8) << 4) | (((self.charset_ptr >> 10) as u8) << 1)
            }
            REG_IRQ_STATUS => {
                let mut v = 0u8;
                if self.irq_raster_pending {
                    v |= 0x01;
                }
                if self.irq_bg_pending {
                    v |= 0x02;
                }
                if self.irq_ss_pending {
                    v |= 0x04;
                }
                if self.any_enabled_pending() {
                    v |= 0x80;
                }
                v
            }
            REG_IRQ_ENABLE => {
                let mut v = 0u8;
                if self.irq_raster_enabled {
                    v |= 0x01;
                }
                if self.irq_bg_enabled {
                    v |= 0x02;
                }
                if self.irq_ss_enabled {
                    v |= 0x04;
                }
                if self.irq_lp_enabled {
                    v |= 0x08;
                }
                if self.irq_master_enable {
                    v |= 0x80;
                }
                v
            }
            REG_SPRITE_PRIORITY => self.sprite_bits(|s| s.behind_foreground),
            REG_SPRITE_MULTICOLOR => self.sprite_bits(|s| s.multicolor),
            REG_SPRITE_X_EXPAND => self.sprite_bits(|s| s.expand_x),
            REG_SS_COLLISION => {
                let v = self.ss_collision;
                self.ss_collision = 0;
                v
            }
            REG_BG_COLLISION => {
                let v = self.bg_collision;
                self.bg_collision = 0;
                v
            }
            REG_BORDER => self.border_color,
            0x21..=0x24 => self.bg_colors[(reg - REG_BG0) as usize],
            0x25..=0x26 => self.sprite_mc[(reg - 0x25) as usize],
            0x27..=0x2E => self.sprites[(reg - 0x27) as usize].color,
            _ => 0,
        }
    }

    fn sprite_bits(&self, f: impl Fn(&SpriteRegs) -> bool) -> u8 {
        let mut v = 0;
        for (n, s) in self.sprites.iter().enumerate() {
            if f(s) {
                v |= 1 << n;
            }
        }
        v
    }

    fn write_register(&mut self, reg: u16, data: u8) {
        match reg {
            0x00..=0x0F => {
                let n = (reg / 2) as usize;
                if reg % 2 == 0 {
                    self.sprites[n].x = (self.sprites[n].x & 0x100) | data as u16;
                } else {
                    self.sprites[n].y = data;
                }
            }
            REG_SPRITE_X_HIGH => {
                for (n, s) in self.sprites.iter_mut().enumerate() {
                    let bit = if data & (1 << n) != 0 { 0x100 } else { 0 };
                    s.x = (s.x & 0xFF) | bit;
                }
            }
            REG_CTRL1 => {
                self.raster_trigger = (self.raster_trigger & 0xFF) | (if data & 0x80 != 0 { 0x100 } else { 0 });
                self.extended_color = data & 0x40 != 0;
                self.bitmap_mode = data & 0x20 != 0;
                self.display_enable = data & 0x10 != 0;
                self.line25 = data & 0x08 != 0;
                self.scroll_y = data & 0x07;
            }
            REG_RASTER => {
                self.raster_trigger = (self.raster_trigger & 0x100) | data as u16;
            }
            REG_LPX | REG_LPY => {}
            REG_SPRITE_ENABLE => self.set_sprite_bits(data, |s, b| s.enabled = b),
            REG_CTRL2 => {
                self.multicolor = data & 0x10 != 0;
                self.col40 = data & 0x08 != 0;
                self.scroll_x = data & 0x07;
            }
            REG_SPRITE_Y_EXPAND => self.set_sprite_bits(data, |s, b| s.expand_y = b),
            REG_MEM_PTRS => {
                self.screen_mem_ptr = (((data >> 4) & 0x0F) as u16) << 6;
                self.charset_ptr = (((data >> 1) & 0x07) as u16) << 10;
            }
            REG_IRQ_STATUS => {
                if data & 0x01 != 0 {
                    self.irq_raster_pending = false;
                }
                if data & 0x02 != 0 {
                    self.irq_bg_pending = false;
                }
                if data & 0x04 != 0 {
                    self.irq_ss_pending = false;
                }
                self.sync_not_irq();
            }
            REG_IRQ_ENABLE => {
                self.irq_raster_enabled = data & 0x01 != 0;
                self.irq_bg_enabled = data & 0x02 != 0;
                self.irq_ss_enabled = data & 0x04 != 0;
                self.irq_lp_enabled = data & 0x08 != 0;
                self.irq_master_enable = data & 0x80 != 0;
                self.sync_not_irq();
            }
            REG_SPRITE_PRIORITY => self.set_sprite_bits(data, |s, b| s.behind_foreground = b),
            REG_SPRITE_MULTICOLOR => self.set_sprite_bits(data, |s, b| s.multicolor = b),
            REG_SPRITE_X_EXPAND => self.set_sprite_bits(data, |s, b| s.expand_x = b),
            REG_SS_COLLISION | REG_BG_COLLISION => {}
            REG_BORDER => self.border_color = data & 0x0F,
            0x21..=0x24 => self.bg_colors[(reg - REG_BG0) as usize] = data & 0x0F,
            0x25..=0x26 => self.sprite_mc[(reg - 0x25) as usize] = data & 0x0F,
            0x27..=0x2E => self.sprites[(reg - 0x27) as usize].color = data & 0x0F,
            _ => {}
        }
    }

    fn set_sprite_bits(&mut self, data: u8, f: impl Fn(&mut SpriteRegs, bool)) {
        for (n, s) in self.sprites.iter_mut().enumerate() {
            f(s, data & (1 << n) != 0);
        }
    }
}

impl AddressSpace for VicRegs {
    fn read(&mut self, addr: u16) -> u8 {
        let reg = addr & 0x3F;
        self.read_register(reg) | UNUSED_MASK[reg as usize]
    }

    fn write(&mut self, addr: u16, data: u8) {
        self.write_register(addr & 0x3F, data);
    }
}

/// Per-sprite DMA/rendering working state, not CPU-visible.
#[derive(Debug, Clone, Copy, Default)]
struct SpriteRuntime {
    pointer: u16,
    data: [u8; 3],
    mc: u8,
    mc_base: u8,
    dma_active: bool,
    exp_ff: bool,
}

const BAD_LINE_PULL_CYCLE: u8 = 12;
const BAD_LINE_RELEASE_CYCLE: u8 = 52;
const BAD_LINE_C_ACCESS_FIRST: u8 = 15;
const BAD_LINE_C_ACCESS_LAST: u8 = 54;

/// Canonical VIC-II border comparator values (left/right in pixel-x, top/
/// bottom in raster-line), used by the border flip-flop algorithm (§4.5).
/// Not given numerically in the distilled spec's abstract wording; these are
/// the well-known VIC-II constants used to resolve that gap (see DESIGN.md).
const BORDER_LEFT_40COL: u16 = 24;
const BORDER_RIGHT_40COL: u16 = 344;
const BORDER_LEFT_38COL: u16 = 31;
const BORDER_RIGHT_38COL: u16 = 335;
const BORDER_TOP_25LINE: u16 = 51;
const BORDER_BOTTOM_25LINE: u16 = 251;
const BORDER_TOP_24LINE: u16 = 55;
const BORDER_BOTTOM_24LINE: u16 = 247;

pub struct Vic {
    regs: Rc<RefCell<VicRegs>>,
    color_ram: Device,
    vic_bus: Bus,

    ready: Line,

    master_cycle: u64,
    phase2: bool,

    vc: u16,
    vc_base: u16,
    rc: u8,
    vmli: u8,
    bad_line: bool,
    display_state: bool,

    sprite_ready_pulled: bool,
    sprites: [SpriteRuntime; 8],

    c_buf: [(u8, u8); 40],
    g_buf: [u8; 40],

    h_border: bool,
    v_border: bool,
}

impl Vic {
    pub fn new(regs: Rc<RefCell<VicRegs>>, color_ram: Device, vic_bus: Bus, ready: Line) -> Vic {
        Vic {
            regs,
            color_ram,
            vic_bus,
            ready,
            master_cycle: 0,
            phase2: false,
            vc: 0,
            vc_base: 0,
            rc: 0,
            vmli: 0,
            bad_line: false,
            display_state: false,
            sprite_ready_pulled: false,
            sprites: [SpriteRuntime::default(); 8],
            c_buf: [(0, 0); 40],
            g_buf: [0; 40],
            h_border: false,
            v_border: false,
        }
    }

    pub fn raster_line(&self) -> u16 {
        self.regs.borrow().raster_line
    }

    fn local_cycle(&self) -> u8 {
        (self.master_cycle % 63) as u8
    }

    fn vic_bus_read(&mut self, addr14: u16, cia2: &Rc<RefCell<Cia>>) -> u8 {
        let outputs = cia2.borrow().port_a.read_outputs();
        let bank_bits = (!outputs) & 0x03;
        let effective = (addr14 & 0x3FFF) | ((bank_bits as u16) << 14);
        self.vic_bus.read(effective)
    }

    /// Advances one half-cycle. Must be called twice per full VIC-II cycle
    /// (phase 1 then phase 2) - see SPEC_FULL §5's ordering guarantees.
    pub fn tick(&mut self, cpu: &mut Cpu, bus: &mut Bus, cia1: &Rc<RefCell<Cia>>, cia2: &Rc<RefCell<Cia>>, host: &mut dyn PixelSink) {
        if !self.phase2 {
            self.tick_phase1(cia2);
            for id in bus.phase1_order().to_vec() {
                self.tick_clockable(id, cpu, bus, cia1, cia2);
            }
        } else {
            self.tick_phase2(cia2, host);
            for id in bus.phase2_order().to_vec() {
                self.tick_clockable(id, cpu, bus, cia1, cia2);
            }
            self.master_cycle += 1;
        }
        self.phase2 = !self.phase2;
    }

    fn tick_clockable(
        &mut self,
        id: crate::devices::bus::ClockableId,
        cpu: &mut Cpu,
        bus: &mut Bus,
        cia1: &Rc<RefCell<Cia>>,
        cia2: &Rc<RefCell<Cia>>,
    ) {
        use crate::devices::bus::ClockableId::*;
        match id {
            Cpu => cpu.tick(bus),
            Cia1 => cia1.borrow_mut().tick(),
            Cia2 => cia2.borrow_mut().tick(),
        }
    }

    fn tick_phase1(&mut self, cia2: &Rc<RefCell<Cia>>) {
        let local = self.local_cycle();

        if local == 0 {
            self.advance_raster_line();
        }

        if local == BAD_LINE_PULL_CYCLE {
            let (enable, raster, scroll_y) = {
                let r = self.regs.borrow();
                (r.display_enable, r.raster_line, r.scroll_y)
            };
            self.bad_line =
                enable && (48..=247).contains(&raster) && (raster & 7) as u8 == scroll_y;
            if self.bad_line {
                self.display_state = true;
                crate::devices::bus::pull_down(&self.ready);
            }
        }
        if local == BAD_LINE_RELEASE_CYCLE && self.bad_line {
            crate::devices::bus::release(&self.ready);
        }

        if local == 14 {
            self.vmli = 0;
            self.vc = self.vc_base;
            if self.bad_line {
                self.rc = 0;
            }
        }

        if local == 55 {
            self.sprite_dma_activation_check(3..8, cia2);
        }
        if local == 56 {
            self.sprite_dma_activation_check(0..3, cia2);
            let any_active = self.sprites.iter().any(|s| s.dma_active);
            if any_active && !self.sprite_ready_pulled {
                self.sprite_ready_pulled = true;
                crate::devices::bus::pull_down(&self.ready);
            }
        }
        if local == 58 {
            for s in self.sprites.iter_mut() {
                if s.dma_active {
                    s.mc = s.mc_base;
                }
            }
            self.sprite_fetch(cia2);
            if self.rc == 7 {
                self.rc = 0;
                self.vc_base = self.vc;
                self.display_state = false;
            } else if self.display_state {
                self.rc = (self.rc + 1) & 0x07;
            }
        }
        if local == 15 {
            for s in self.sprites.iter_mut() {
                if s.exp_ff {
                    s.mc_base = s.mc_base.saturating_add(2);
                }
            }
        }
        if local == 16 {
            for s in self.sprites.iter_mut() {
                if s.exp_ff {
                    s.mc_base = s.mc_base.saturating_add(1);
                }
                if s.mc_base >= 63 {
                    s.dma_active = false;
                }
            }
            if self.sprite_ready_pulled && self.sprites.iter().all(|s| !s.dma_active) {
                self.sprite_ready_pulled = false;
                crate::devices::bus::release(&self.ready);
            }
        }
    }

    fn advance_raster_line(&mut self) {
        let mut r = self.regs.borrow_mut();
        r.raster_line = (r.raster_line + 1) % dimensions::PAL.lines_per_frame;
        if r.raster_line == 0 {
            self.vc_base = 0;
            self.rc = 0;
            self.bad_line = false;
            self.display_state = false;
        }
        if r.raster_line == r.raster_trigger && r.irq_raster_enabled && !r.irq_raster_pending {
            r.raise(true, false, false);
        }
    }

    fn sprite_dma_activation_check(&mut self, range: std::ops::Range<usize>, _cia2: &Rc<RefCell<Cia>>) {
        let raster_line = self.regs.borrow().raster_line;
        for n in range {
            let (enabled, y, expand_y) = {
                let r = self.regs.borrow();
                (r.sprites[n].enabled, r.sprites[n].y, r.sprites[n].expand_y)
            };
            let s = &mut self.sprites[n];
            if expand_y {
                s.exp_ff = !s.exp_ff;
            }
            if enabled && y as u16 == (raster_line & 0xFF) && !s.dma_active {
                s.dma_active = true;
                s.mc_base = 0;
                if !expand_y {
                    s.exp_ff = true;
                }
            }
        }
    }

    fn sprite_fetch(&mut self, cia2: &Rc<RefCell<Cia>>) {
        let screen_mem_ptr = self.regs.borrow().screen_mem_ptr;
        for n in 0..8 {
            if !self.sprites[n].dma_active {
                continue;
            }
            let p_addr = screen_mem_ptr | 0x03F8 | n as u16;
            let pointer = (self.vic_bus_read(p_addr, cia2) as u16) << 6;
            self.sprites[n].pointer = pointer;
            let mc = self.sprites[n].mc;
            let mut data = [0u8; 3];
            for (i, slot) in data.iter_mut().enumerate() {
                *slot = self.vic_bus_read(pointer | (mc as u16 + i as u16), cia2);
            }
            self.sprites[n].data = data;
        }
    }

    fn tick_phase2(&mut self, cia2: &Rc<RefCell<Cia>>, host: &mut dyn PixelSink) {
        let local = self.local_cycle();

        if self.bad_line && (BAD_LINE_C_ACCESS_FIRST..=BAD_LINE_C_ACCESS_LAST).contains(&local) {
            let (screen_mem_ptr, vc) = {
                let r = self.regs.borrow();
                (r.screen_mem_ptr, self.vc)
            };
            let ch = self.vic_bus_read(screen_mem_ptr | vc, cia2);
            let col = self.color_ram.borrow_mut().read(vc);
            self.c_buf[self.vmli as usize] = (ch, col & 0x0F);
        }

        if self.display_state && (BAD_LINE_C_ACCESS_FIRST..=BAD_LINE_C_ACCESS_LAST).contains(&local) {
            let (charset_ptr, bitmap_mode, extended_color, vc, rc) = {
                let r = self.regs.borrow();
                (r.charset_ptr, r.bitmap_mode, r.extended_color, self.vc, self.rc)
            };
            let (ch, _) = self.c_buf[self.vmli as usize];
            let addr = if bitmap_mode {
                (charset_ptr & 0x2000) | (vc << 3) | rc as u16
            } else {
                let mask = if extended_color { 0x3F } else { 0xFF };
                charset_ptr + (((ch & mask) as u16) << 3) + rc as u16
            };
            self.g_buf[self.vmli as usize] = self.vic_bus_read(addr, cia2);
            self.vmli = (self.vmli + 1) & 0x3F;
            self.vc = (self.vc + 1) & 0x3FF;
        }

        self.render_cycle(local, host);
    }

    fn render_cycle(&mut self, local: u8, host: &mut dyn PixelSink) {
        const FIRST_VISIBLE_CYCLE: u8 = 10;
        const LAST_VISIBLE_CYCLE: u8 = 57;
        const FIRST_VISIBLE_LINE: u16 = 16;
        const LAST_VISIBLE_LINE: u16 = 287;

        let raster_line = self.raster_line();
        if raster_line < FIRST_VISIBLE_LINE || raster_line > LAST_VISIBLE_LINE {
            return;
        }
        if local < FIRST_VISIBLE_CYCLE || local > LAST_VISIBLE_CYCLE {
            return;
        }

        let (col40, line25) = {
            let r = self.regs.borrow();
            (r.col40, r.line25)
        };
        let (left, right) = if col40 {
            (BORDER_LEFT_40COL, BORDER_RIGHT_40COL)
        } else {
            (BORDER_LEFT_38COL, BORDER_RIGHT_38COL)
        };
        let (top, bottom) = if line25 {
            (BORDER_TOP_25LINE, BORDER_BOTTOM_25LINE)
        } else {
            (BORDER_TOP_24LINE, BORDER_BOTTOM_24LINE)
        };
        let display_enable = self.regs.borrow().display_enable;

        let screen_y = raster_line - FIRST_VISIBLE_LINE;
        let base_x = (local as u16 - FIRST_VISIBLE_CYCLE as u16) * 8;

        let content_idx = local.checked_sub(BAD_LINE_C_ACCESS_FIRST);

        let mut collision_mask = 0u8;
        let mut collision_fg = false;

        for px in 0..8u16 {
            let pixel_x = base_x + px + (FIRST_VISIBLE_CYCLE as u16) * 8;

            if pixel_x == right {
                self.h_border = true;
            }
            if px == 7 && raster_line == bottom {
                self.v_border = true;
            }
            if px == 7 && raster_line == top && display_enable {
                self.v_border = false;
            }
            if pixel_x == left && !self.v_border && display_enable {
                self.h_border = false;
            }

            let screen_x = pixel_x.saturating_sub(left);

            let (bg_color, is_foreground) = content_idx
                .map(|idx| self.content_pixel(idx as usize, px))
                .unwrap_or((self.regs.borrow().bg_colors[0], false));

            let mut pixel_color = bg_color;
            let mut any_drawn = false;
            for n in (0..8).rev() {
                if let Some((sprite_color, drawn)) = self.sprite_pixel(n, pixel_x) {
                    if drawn {
                        any_drawn = true;
                        collision_mask |= 1 << n;
                        let behind = self.regs.borrow().sprites[n].behind_foreground;
                        if !(behind && is_foreground) {
                            pixel_color = sprite_color;
                        }
                    }
                }
            }
            if any_drawn && is_foreground {
                collision_fg = true;
            }

            let out_color = if self.h_border { self.regs.borrow().border_color } else { pixel_color };
            let rgba = palette::COLORS[(out_color & 0x0F) as usize];
            host.set_pixel(screen_x, screen_y, rgba);
        }

        if collision_mask.count_ones() > 1 {
            let mut r = self.regs.borrow_mut();
            let was_zero = r.ss_collision == 0;
            r.ss_collision |= collision_mask;
            if was_zero {
                r.raise(false, false, true);
            }
        }
        if collision_mask != 0 && collision_fg {
            let mut r = self.regs.borrow_mut();
            let was_zero = r.bg_collision == 0;
            r.bg_collision |= collision_mask;
            if was_zero {
                r.raise(false, true, false);
            }
        }
    }

    /// Returns (color, is_foreground) for the background/graphics layer at
    /// `c_buf`/`g_buf` slot `idx`, pixel `px` (0..8) within that cell.
    fn content_pixel(&self, idx: usize, px: u16) -> (u8, bool) {
        let r = self.regs.borrow();
        if idx >= 40 {
            return (r.bg_colors[0], false);
        }
        let (ch, color) = self.c_buf[idx];
        let bits = self.g_buf[idx];

        if r.bitmap_mode {
            if r.multicolor {
                let pair = (bits >> (6 - 2 * (px / 2))) & 0b11;
                let (c, fg) = match pair {
                    0 => (r.bg_colors[0], false),
                    1 => ((ch >> 4) & 0x0F, true),
                    2 => (ch & 0x0F, true),
                    _ => (color, true),
                };
                (c, fg)
            } else {
                let bit = (bits >> (7 - px)) & 1;
                if bit != 0 {
                    ((ch >> 4) & 0x0F, true)
                } else {
                    (ch & 0x0F, false)
                }
            }
        } else if r.multicolor && color & 0x08 != 0 {
            let pair = (bits >> (6 - 2 * (px / 2))) & 0b11;
            match pair {
                0 => (r.bg_colors[0], false),
                1 => (r.bg_colors[1], false),
                2 => (r.bg_colors[2], false),
                _ => (color & 0x07, true),
            }
        } else if r.extended_color {
            let bit = (bits >> (7 - px)) & 1;
            if bit != 0 {
                (color, true)
            } else {
                (r.bg_colors[(ch >> 6) as usize], false)
            }
        } else {
            let bit = (bits >> (7 - px)) & 1;
            if bit != 0 {
                (color, true)
            } else {
                (r.bg_colors[0], false)
            }
        }
    }

    /// Returns `Some((color, drawn))` if sprite `n` occupies `screen_px`;
    /// `drawn` distinguishes an opaque pixel from a transparent one within
    /// the sprite's bounding box. Computed functionally from the fetched
    /// data bytes rather than a literal shift-register tick (see DESIGN.md).
    fn sprite_pixel(&self, n: usize, screen_px: u16) -> Option<(u8, bool)> {
        let r = self.regs.borrow();
        let sr = r.sprites[n];
        // `dma_active` bounds a sprite to the raster lines where hardware
        // actually fetches and displays it; without this check a sprite
        // merely left enabled outside its Y band would paint using whatever
        // stale data its last active line fetched.
        if !sr.enabled || !self.sprites[n].dma_active {
            return None;
        }
        let cell_width: u16 = (if sr.multicolor { 2 } else { 1 }) * (if sr.expand_x { 2 } else { 1 });
        let num_cells: u16 = if sr.multicolor { 12 } else { 24 };
        let total_width = num_cells * cell_width;
        if screen_px < sr.x || screen_px >= sr.x + total_width {
            return None;
        }
        let rel = screen_px - sr.x;
        let cell_idx = (rel / cell_width) as usize;
        let data = self.sprites[n].data;
        if sr.multicolor {
            let byte_idx = cell_idx / 4;
            let pair_in_byte = cell_idx % 4;
            let bits = (data[byte_idx] >> (6 - 2 * pair_in_byte)) & 0b11;
            match bits {
                0 => Some((0, false)),
                1 => Some((r.sprite_mc[0], true)),
                2 => Some((sr.color, true)),
                _ => Some((r.sprite_mc[1], true)),
            }
        } else {
            let byte_idx = cell_idx / 8;
            let bit_in_byte = cell_idx % 8;
            let bit = (data[byte_idx] >> (7 - bit_in_byte)) & 1;
            if bit != 0 {
                Some((sr.color, true))
            } else {
                Some((0, false))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::bus::new_line;
    use crate::devices::ram::Ram;

    fn new_vic() -> (Vic, Rc<RefCell<VicRegs>>) {
        let not_irq = new_line();
        let ready = new_line();
        let regs = Rc::new(RefCell::new(VicRegs::new(not_irq)));
        let color_ram: Device = Rc::new(RefCell::new(Ram::new(0x0400)));
        let mut vic_bus = Bus::new();
        let ram: Device = Rc::new(RefCell::new(Ram::new(0x10000)));
        vic_bus.connect(ram, 0x0000, 0xFFFF).unwrap();
        let vic = Vic::new(regs.clone(), color_ram, vic_bus, ready);
        (vic, regs)
    }

    #[test]
    fn frame_start_invariant_holds_at_cycle_zero_line_zero() {
        let (vic, regs) = new_vic();
        assert_eq!(vic.vc_base, 0);
        assert_eq!(vic.rc, 0);
        assert!(!vic.bad_line);
        assert_eq!(regs.borrow().raster_line, 0);
    }

    #[test]
    fn unused_mask_forces_d016_top_bits_high() {
        let (_vic, regs) = new_vic();
        let mut r = regs.borrow_mut();
        r.write(0x16, 0x00);
        assert_eq!(r.read(0x16) & 0xC0, 0xC0);
    }

    #[test]
    fn collision_register_read_clears_it() {
        let (_vic, regs) = new_vic();
        let mut r = regs.borrow_mut();
        r.ss_collision = 0x03;
        assert_eq!(r.read(0x1E), 0x03);
        assert_eq!(r.read(0x1E), 0x00);
    }

    #[test]
    fn mem_ptrs_register_round_trips_per_spec_shift_amounts() {
        let (_vic, regs) = new_vic();
        let mut r = regs.borrow_mut();
        r.write(0x18, 0b0001_0010);
        assert_eq!(r.screen_mem_ptr, 1u16 << 6);
        assert_eq!(r.charset_ptr, 1u16 << 10);
    }

    #[test]
    fn repeated_irq_enable_rewrite_does_not_double_pull_the_shared_line() {
        let not_irq = new_line();
        let mut regs = VicRegs::new(not_irq.clone());
        regs.write(REG_IRQ_ENABLE, 0x81); // master enable + raster
        regs.raise(true, false, false); // raster IRQ pending -> pulls not_irq once
        assert_eq!(not_irq.get().pull_count(), 1);
        // Re-write $D01A while still asserted: must not pull a second time.
        regs.write(REG_IRQ_ENABLE, 0x81);
        assert_eq!(not_irq.get().pull_count(), 1);
        // Acking via $D019 releases exactly the one pull.
        regs.write(REG_IRQ_STATUS, 0x01);
        assert!(not_irq.get().get());
    }
}
