//! The 6526 Complex Interface Adapter: two bidirectional I/O ports and two
//! down-counting timers with linked-chain mode. See §4.3.

use std::cell::Cell;
use std::rc::Rc;

use crate::devices::bus::{AddressSpace, TriState};
use crate::host::KeyProvider;

pub const PRA: u16 = 0x00;
pub const PRB: u16 = 0x01;
pub const DDRA: u16 = 0x02;
pub const DDRB: u16 = 0x03;
pub const TALO: u16 = 0x04;
pub const TAHI: u16 = 0x05;
pub const TBLO: u16 = 0x06;
pub const TBHI: u16 = 0x07;
pub const TOD_10TH: u16 = 0x08;
pub const TOD_SEC: u16 = 0x09;
pub const TOD_MIN: u16 = 0x0A;
pub const TOD_HR: u16 = 0x0B;
pub const SDR: u16 = 0x0C;
pub const ICR: u16 = 0x0D;
pub const CRA: u16 = 0x0E;
pub const CRB: u16 = 0x0F;

/// A timer's clock source, selected by control-register bits 5-6. Timer A
/// only distinguishes internal vs. external; timer B additionally supports
/// chaining off timer A's underflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerSource {
    Internal,
    External,
    Chained,
    ChainedGated,
}

impl TimerSource {
    fn from_bits(bits: u8, is_timer_b: bool) -> TimerSource {
        if is_timer_b {
            match bits {
                0b00 => TimerSource::Internal,
                0b01 => TimerSource::External,
                0b10 => TimerSource::Chained,
                _ => TimerSource::ChainedGated,
            }
        } else {
            match bits & 0b01 {
                0 => TimerSource::Internal,
                _ => TimerSource::External,
            }
        }
    }
}

/// One 16-bit down-counting timer.
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    pub counter: u16,
    pub latch: u16,
    pending_external_ticks: u32,
    pub running: bool,
    pub continuous: bool,
    pub source: TimerSource,
    pub irq_enabled: bool,
    pub irq_occurred: bool,
    is_timer_b: bool,
}

impl Timer {
    fn new(is_timer_b: bool) -> Timer {
        Timer {
            counter: 0xFFFF,
            latch: 0xFFFF,
            pending_external_ticks: 0,
            running: false,
            continuous: true,
            source: TimerSource::Internal,
            irq_enabled: false,
            irq_occurred: false,
            is_timer_b,
        }
    }

    /// Underflow edge: returns `true` if the timer ticked to zero this step.
    /// `linked` is `Some` only for timer A, chaining into timer B.
    fn tick_one(&mut self) -> bool {
        if self.counter == 0 {
            if self.continuous {
                self.counter = self.latch;
            } else {
                self.running = false;
            }
            if self.irq_enabled {
                self.irq_occurred = true;
            }
            true
        } else {
            self.counter -= 1;
            false
        }
    }

    fn set_control_flags(&mut self, flags: u8) {
        self.running = flags & 0x01 != 0;
        self.continuous = flags & 0x08 == 0;
        if flags & 0x10 != 0 {
            self.counter = self.latch;
        }
        let source_bits = if self.is_timer_b {
            (flags & 0x60) >> 5
        } else {
            (flags & 0x20) >> 5
        };
        self.source = TimerSource::from_bits(source_bits, self.is_timer_b);
    }

    fn control_flags(&self) -> u8 {
        let mut flags = 0u8;
        if self.running {
            flags |= 0x01;
        }
        if !self.continuous {
            flags |= 0x08;
        }
        let source_bits = match self.source {
            TimerSource::Internal => 0b00,
            TimerSource::External => 0b01,
            TimerSource::Chained => 0b10,
            TimerSource::ChainedGated => 0b11,
        };
        flags |= if self.is_timer_b {
            source_bits << 5
        } else {
            (source_bits & 0b01) << 5
        };
        flags
    }

    /// Called from an external pulse source (e.g. a CNT-pin peripheral).
    /// Accumulated atomically so a driver thread can call this outside the
    /// core's own tick.
    pub fn pulse_external(&mut self) {
        if self.running && self.source == TimerSource::External {
            self.pending_external_ticks += 1;
        }
    }
}

/// One bidirectional 8-bit I/O port with per-bit direction and pull-ups.
#[derive(Debug, Clone, Copy, Default)]
pub struct Port {
    data: u8,
    pub direction: u8,
    pub pullups: u8,
}

impl Port {
    fn internal_read(&self) -> u8 {
        (self.data & !self.direction) | (self.pullups & self.direction)
    }

    fn internal_write(&mut self, data: u8) {
        self.data = (self.data & !self.direction) | (data & self.direction);
    }

    /// Outputs as driven on the physical pins, for peripherals reading this
    /// port (e.g. the VIC-II reading CIA2 port A for the video bank select).
    pub fn read_outputs(&self) -> u8 {
        (self.data & self.direction) | (self.pullups & !self.direction)
    }

    /// Drive the input bits of this port from an external source.
    pub fn set_inputs(&mut self, data: u8) {
        self.data = (self.data & self.direction) | (data & !self.direction);
    }
}

/// A CIA 6526: two ports, two timers, and an interrupt control register.
/// Mounted at a 16-byte-periodic window ($DC00 for CIA1, $DD00 for CIA2).
pub struct Cia {
    pub port_a: Port,
    pub port_b: Port,
    pub timer_a: Timer,
    pub timer_b: Timer,
    irq_active: bool,
    not_irq: Rc<Cell<TriState>>,
    keys: Option<Rc<dyn KeyProvider>>,
}

impl Cia {
    pub fn new(not_irq: Rc<Cell<TriState>>) -> Cia {
        Cia {
            port_a: Port::default(),
            port_b: Port::default(),
            timer_a: Timer::new(false),
            timer_b: Timer::new(true),
            irq_active: false,
            not_irq,
            keys: None,
        }
    }

    /// Wire a host key-state provider; polled once per phase-1 tick so the
    /// guest's port scan sees up-to-date key state (§6 host key protocol).
    pub fn set_key_provider(&mut self, keys: Rc<dyn KeyProvider>) {
        self.keys = Some(keys);
    }

    fn pull_not_irq(&self) {
        let mut line = self.not_irq.get();
        line.pull_down();
        self.not_irq.set(line);
    }

    fn release_not_irq(&self) {
        let mut line = self.not_irq.get();
        line.release();
        self.not_irq.set(line);
    }

    /// One CIA clock step: timer A ticks before timer B so that a chained B
    /// reaching zero in the same step can tick A only through the linked
    /// path (see SPEC_FULL §4.3).
    pub fn tick(&mut self) {
        self.scan_keyboard();

        let irq_a_before = self.timer_a.irq_occurred;
        let irq_b_before = self.timer_b.irq_occurred;

        self.clock_timer_a();
        self.clock_timer_b();

        let fired = (self.timer_a.irq_occurred && !irq_a_before)
            || (self.timer_b.irq_occurred && !irq_b_before);
        if fired {
            // Both timers can underflow in the same or adjacent steps before
            // the ICR is read; only the first pulls the shared line down, or
            // a second underflow here would double-pull against a single
            // release on ack.
            if !self.irq_active {
                self.pull_not_irq();
            }
            self.irq_active = true;
        }
    }

    /// Keyboard matrix scan, as wired to CIA1 by the KERNAL: port A drives
    /// the active-low column select, port B reads back active-low rows. A
    /// no-op on CIA2, which has no key provider attached.
    fn scan_keyboard(&mut self) {
        let keys = match &self.keys {
            Some(keys) => keys,
            None => return,
        };
        let selected_columns = !self.port_a.read_outputs();
        let mut row_bits = 0xFFu8;
        for col in 0..8u8 {
            if selected_columns & (1 << col) == 0 {
                continue;
            }
            for row in 0..8u8 {
                if keys.pressed(row * 8 + col) {
                    row_bits &= !(1 << row);
                }
            }
        }
        self.port_b.set_inputs(row_bits);
    }

    fn clock_timer_a(&mut self) {
        if !self.timer_a.running {
            return;
        }
        if self.timer_a.source == TimerSource::Internal {
            let underflowed = self.timer_a.tick_one();
            if underflowed && self.timer_b.running && self.timer_b.source == TimerSource::Chained {
                self.timer_b.tick_one();
            }
        }
        let pending = std::mem::take(&mut self.timer_a.pending_external_ticks);
        for _ in 0..pending {
            let underflowed = self.timer_a.tick_one();
            if underflowed && self.timer_b.running && self.timer_b.source == TimerSource::Chained {
                self.timer_b.tick_one();
            }
        }
    }

    fn clock_timer_b(&mut self) {
        if !self.timer_b.running {
            return;
        }
        if self.timer_b.source == TimerSource::Internal {
            self.timer_b.tick_one();
        }
        let pending = std::mem::take(&mut self.timer_b.pending_external_ticks);
        for _ in 0..pending {
            self.timer_b.tick_one();
        }
    }
}

impl AddressSpace for Cia {
    fn read(&mut self, addr: u16) -> u8 {
        match addr & 0x0F {
            PRA => self.port_a.internal_read(),
            PRB => self.port_b.internal_read(),
            DDRA => self.port_a.direction,
            DDRB => self.port_b.direction,
            TALO => (self.timer_a.counter & 0xFF) as u8,
            TAHI => (self.timer_a.counter >> 8) as u8,
            TBLO => (self.timer_b.counter & 0xFF) as u8,
            TBHI => (self.timer_b.counter >> 8) as u8,
            TOD_10TH | TOD_SEC | TOD_MIN | TOD_HR | SDR => 0,
            ICR => {
                let mut flags = 0u8;
                if self.timer_a.irq_occurred {
                    flags |= 0x01;
                    self.timer_a.irq_occurred = false;
                }
                if self.timer_b.irq_occurred {
                    flags |= 0x02;
                    self.timer_b.irq_occurred = false;
                }
                if flags != 0 {
                    flags |= 0x80;
                }
                if self.irq_active {
                    self.irq_active = false;
                    self.release_not_irq();
                }
                flags
            }
            CRA => self.timer_a.control_flags(),
            CRB => self.timer_b.control_flags(),
            _ => 0xFF,
        }
    }

    fn write(&mut self, addr: u16, data: u8) {
        match addr & 0x0F {
            PRA => self.port_a.internal_write(data),
            PRB => self.port_b.internal_write(data),
            DDRA => self.port_a.direction = data,
            DDRB => self.port_b.direction = data,
            TALO => self.timer_a.latch = (self.timer_a.latch & 0xFF00) | data as u16,
            TAHI => self.timer_a.latch = (self.timer_a.latch & 0x00FF) | ((data as u16) << 8),
            TBLO => self.timer_b.latch = (self.timer_b.latch & 0xFF00) | data as u16,
            TBHI => self.timer_b.latch = (self.timer_b.latch & 0x00FF) | ((data as u16) << 8),
            TOD_10TH | TOD_SEC | TOD_MIN | TOD_HR | SDR => {}
            ICR => {
                let setting = data & 0x80 != 0;
                if data & 0x01 != 0 {
                    self.timer_a.irq_enabled = setting;
                }
                if data & 0x02 != 0 {
                    self.timer_b.irq_enabled = setting;
                }
            }
            CRA => self.timer_a.set_control_flags(data),
            CRB => self.timer_b.set_control_flags(data),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_cia() -> Cia {
        Cia::new(Rc::new(Cell::new(TriState::new())))
    }

    #[test]
    fn port_read_combines_inputs_and_pullups_per_direction() {
        let mut cia = make_cia();
        cia.port_a.direction = 0b1010_1010; // high nibble bits output
        cia.port_a.pullups = 0b1111_1111;
        cia.port_a.set_inputs(0b0101_0101);
        let read = cia.read(PRA);
        assert_eq!(read, (0b0101_0101 & !0b1010_1010) | (0b1111_1111 & 0b1010_1010));
    }

    #[test]
    fn continuous_timer_reloads_from_latch_on_underflow() {
        let mut cia = make_cia();
        cia.write(TALO, 0x02);
        cia.write(TAHI, 0x00);
        cia.write(CRA, 0x11); // start, force reload
        assert_eq!(cia.timer_a.counter, 2);
        cia.tick(); // 2 -> 1
        cia.tick(); // 1 -> 0
        cia.tick(); // 0 -> reload to latch (2), irq flagged if enabled
        assert_eq!(cia.timer_a.counter, 2);
    }

    #[test]
    fn one_shot_timer_stops_after_underflow() {
        let mut cia = make_cia();
        cia.write(TALO, 0x01);
        cia.write(CRA, 0x01 | 0x08 | 0x10); // start, one-shot, force reload
        cia.tick(); // 1 -> 0
        cia.tick(); // 0 -> stop
        assert!(!cia.timer_a.running);
    }

    #[test]
    fn icr_read_clears_pending_and_releases_irq_line() {
        let line = Rc::new(Cell::new(TriState::new()));
        let mut cia = Cia::new(line.clone());
        cia.write(ICR, 0x81); // enable timer A irq
        cia.write(TALO, 0x01);
        cia.write(CRA, 0x01 | 0x10);
        cia.tick();
        cia.tick(); // underflow -> irq pending, not_irq pulled
        assert!(line.get().asserted());
        let flags = cia.read(ICR);
        assert_eq!(flags & 0x81, 0x81);
        assert!(!line.get().asserted());
        assert_eq!(cia.read(ICR), 0);
    }

    #[test]
    fn keyboard_scan_reports_pressed_key_on_its_row_and_column() {
        struct OneKey(u8);
        impl KeyProvider for OneKey {
            fn pressed(&self, key_id: u8) -> bool {
                key_id == self.0
            }
        }
        let mut cia = make_cia();
        cia.set_key_provider(Rc::new(OneKey(row_col(3, 5))));
        cia.port_a.direction = 0xFF; // all columns driven as outputs
        cia.port_a.internal_write(!(1 << 5)); // select column 5 (active low)
        cia.port_b.direction = 0x00; // rows are inputs
        cia.port_b.pullups = 0xFF;
        cia.tick();
        let rows = cia.port_b.internal_read();
        assert_eq!(rows & (1 << 3), 0); // row 3 pulled low: key is down
        assert_eq!(rows & !(1 << 3), 0xFF & !(1 << 3)); // every other row stays high
    }

    fn row_col(row: u8, col: u8) -> u8 {
        row * 8 + col
    }

    #[test]
    fn both_timers_underflowing_before_ack_pulls_the_line_only_once() {
        let line = Rc::new(Cell::new(TriState::new()));
        let mut cia = Cia::new(line.clone());
        cia.write(ICR, 0x83); // enable timer A and timer B irq
        cia.write(TALO, 0x01); // underflows on the 2nd tick
        cia.write(CRA, 0x01 | 0x10);
        cia.write(TBLO, 0x02); // underflows one tick later, on the 3rd
        cia.write(CRB, 0x01 | 0x10);
        cia.tick(); // 1 -> 0, 2 -> 1: neither has underflowed yet
        assert_eq!(line.get().pull_count(), 0);
        cia.tick(); // timer A underflows and fires first
        assert_eq!(line.get().pull_count(), 1);
        cia.tick(); // timer B underflows while irq_active is still set
        assert_eq!(line.get().pull_count(), 1);
        let flags = cia.read(ICR); // single ack releases the single pull
        assert_eq!(flags & 0x83, 0x83);
        assert!(line.get().get());
    }

    #[test]
    fn chained_timer_b_ticks_on_timer_a_underflow() {
        let mut cia = make_cia();
        cia.write(TALO, 0x01);
        cia.write(CRA, 0x01 | 0x10); // timer A: start, reload
        cia.write(TBLO, 0x05);
        cia.write(CRB, 0x01 | 0x10 | 0x40); // timer B: start, reload, chained
        let before = cia.timer_b.counter;
        cia.tick(); // A: 1 -> 0, underflows, chains into B
        assert_eq!(cia.timer_b.counter, before - 1);
    }
}
