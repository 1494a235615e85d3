//! The 3-bit CPU-port bank switcher: a multiplexed view over up to 8 devices
//! per banked window, selected by the value written to $0001.

use std::cell::RefCell;
use std::rc::Rc;

use crate::devices::bus::{AddressSpace, Device};
use crate::error::EmulatorError;

/// One banked window: up to 8 candidate devices and the selector shared by
/// every bank in a [`BankSwitcher`]. Device 0 is always the underlying RAM
/// (see §4.2's "RAM under ROM" fallthrough).
struct Bank {
    devices: Vec<Device>,
}

impl Bank {
    fn selected(&self, selector: u8) -> &Device {
        &self.devices[selector as usize]
    }
}

/// Models the C64 CPU port at $0001: a single 3-bit selector that is applied
/// to every banked window at once (the $A000, $D000, and $E000 regions).
pub struct BankSwitcher {
    banks: Vec<Bank>,
    selector: u8,
}

impl BankSwitcher {
    /// `devices` is one inner list per banked window; every inner list must
    /// have the same length, between 1 and 8.
    pub fn new(devices: Vec<Vec<Device>>) -> Result<BankSwitcher, EmulatorError> {
        let expected = devices.first().map(|b| b.len()).unwrap_or(0);
        if expected == 0 || expected > 8 {
            return Err(EmulatorError::InvalidBankWidth { count: expected });
        }
        for (index, bank) in devices.iter().enumerate() {
            if bank.len() != expected {
                return Err(EmulatorError::InconsistentBankWidth {
                    expected,
                    index,
                    actual: bank.len(),
                });
            }
        }
        Ok(BankSwitcher {
            banks: devices.into_iter().map(|devices| Bank { devices }).collect(),
            selector: 7,
        })
    }

    /// Apply `selector` (0..=7) to every bank.
    pub fn switch(&mut self, selector: u8) {
        self.selector = selector & 0x07;
    }

    pub fn selector(&self) -> u8 {
        self.selector
    }

    /// A bus-mountable device wrapping bank `index`. Shares this
    /// `BankSwitcher`'s selector: switching affects every handed-out bank.
    pub fn bank(this: &Rc<RefCell<BankSwitcher>>, index: usize) -> BankedWindow {
        BankedWindow {
            switcher: this.clone(),
            index,
        }
    }
}

/// A bus device presenting one banked window of a [`BankSwitcher`].
pub struct BankedWindow {
    switcher: Rc<RefCell<BankSwitcher>>,
    index: usize,
}

impl AddressSpace for BankedWindow {
    fn read(&mut self, addr: u16) -> u8 {
        let switcher = self.switcher.borrow();
        let bank = &switcher.banks[self.index];
        let device = bank.selected(switcher.selector);
        device.borrow_mut().read(addr)
    }

    fn write(&mut self, addr: u16, data: u8) {
        let switcher = self.switcher.borrow();
        let bank = &switcher.banks[self.index];
        let device = bank.selected(switcher.selector);
        if device.borrow().is_writeable() {
            device.borrow_mut().write(addr, data);
        } else {
            // RAM-under-ROM: the write still lands, just in the RAM that the
            // selected ROM shadows, not the ROM itself.
            bank.devices[0].borrow_mut().write(addr, data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::ram::{Ram, Rom};

    fn device(d: impl AddressSpace + 'static) -> Device {
        Rc::new(RefCell::new(d))
    }

    #[test]
    fn switch_then_read_dispatches_to_selected_device() {
        let banks = vec![vec![
            device(Ram::new(0x10)),
            device(Ram::new(0x10)),
            device(Ram::new(0x10)),
            device(Ram::new(0x10)),
            device(Ram::new(0x10)),
            device(Ram::new(0x10)),
            device(Ram::new(0x10)),
            device(Ram::new(0x10)),
        ]];
        let switcher = Rc::new(RefCell::new(BankSwitcher::new(banks).unwrap()));
        for selector in 0u8..=7 {
            switcher.borrow_mut().switch(selector);
            let mut window = BankSwitcher::bank(&switcher, 0);
            window.write(0x04, selector + 1);
            assert_eq!(window.read(0x04), selector + 1);
        }
    }

    #[test]
    fn write_to_rom_falls_through_to_device_zero() {
        let ram = device(Ram::new(0x10));
        let rom = device(Rom::new(vec![0xFF; 0x10]));
        let switcher = Rc::new(RefCell::new(
            BankSwitcher::new(vec![vec![ram.clone(), rom]]).unwrap(),
        ));
        switcher.borrow_mut().switch(1); // select the ROM
        let mut window = BankSwitcher::bank(&switcher, 0);
        window.write(0x05, 0x42);
        assert_eq!(window.read(0x05), 0xFF); // ROM ignores the write
        assert_eq!(ram.borrow_mut().read(0x05), 0x42); // underlying RAM got it
    }

    #[test]
    fn rejects_inconsistent_bank_widths() {
        let banks = vec![
            vec![device(Ram::new(1)), device(Ram::new(1))],
            vec![device(Ram::new(1))],
        ];
        assert!(matches!(
            BankSwitcher::new(banks),
            Err(EmulatorError::InconsistentBankWidth { .. })
        ));
    }
}
