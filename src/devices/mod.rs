//! The device layer: bus, memory, bank switching, and the three chips
//! (CPU, CIA, VIC-II) that drive the machine.

pub mod bank;
pub mod bus;
pub mod cia;
pub mod cpu;
pub mod ram;
pub mod sid;
pub mod vic;
