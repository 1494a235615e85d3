//! Flat byte storage: plain RAM and ROM-backed read-only storage.

use super::bus::AddressSpace;

/// Linear read/write storage. Out-of-range accesses return 0 / are
/// discarded rather than panicking, matching §4.1's "unmapped" behavior for
/// devices that are undersized relative to the window they are mounted in.
#[derive(Debug, Clone)]
pub struct Ram {
    bytes: Vec<u8>,
}

impl Ram {
    pub fn new(size: usize) -> Ram {
        Ram {
            bytes: vec![0; size],
        }
    }
}

impl AddressSpace for Ram {
    fn read(&mut self, addr: u16) -> u8 {
        self.bytes.get(addr as usize).copied().unwrap_or(0)
    }

    fn write(&mut self, addr: u16, data: u8) {
        if let Some(slot) = self.bytes.get_mut(addr as usize) {
            *slot = data;
        }
    }
}

/// Linear read-only storage, loaded once from a ROM image. Writes are
/// silently discarded at the device level; `is_writeable` reports `false`
/// so a bank switcher can implement RAM-under-ROM fallthrough.
#[derive(Debug, Clone)]
pub struct Rom {
    bytes: Vec<u8>,
}

impl Rom {
    pub fn new(bytes: Vec<u8>) -> Rom {
        Rom { bytes }
    }
}

impl AddressSpace for Rom {
    fn read(&mut self, addr: u16) -> u8 {
        self.bytes.get(addr as usize).copied().unwrap_or(0)
    }

    fn write(&mut self, _addr: u16, _data: u8) {}

    fn is_writeable(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ram_round_trips_for_any_nonzero_byte() {
        let mut ram = Ram::new(0x100);
        for data in 1u8..=0xFE {
            ram.write(0x10, data);
            assert_eq!(ram.read(0x10), data);
        }
    }

    #[test]
    fn ram_out_of_range_is_silently_ignored() {
        let mut ram = Ram::new(4);
        ram.write(10, 0xFF);
        assert_eq!(ram.read(10), 0);
    }

    #[test]
    fn rom_write_is_discarded() {
        let mut rom = Rom::new(vec![0xAB, 0xCD]);
        assert!(!rom.is_writeable());
        rom.write(0, 0x00);
        assert_eq!(rom.read(0), 0xAB);
    }
}
