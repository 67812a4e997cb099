//! System integration: the emulator facade.
//!
//! `Nes` wires the CPU to the bus (which owns RAM, PPU, APU shadow and
//! cartridge) and advances the whole machine one CPU instruction at a time,
//! slaving the PPU to the CPU's cycle count at 3 dots per cycle.

use std::io::Read;

use crate::bus::Bus;
use crate::cartridge::{Cartridge, CartridgeError};
use crate::cpu::{Cpu, CpuError};
use crate::ppu::Ppu;

/// PPU dots per CPU cycle (NTSC)
pub const PPU_DOTS_PER_CPU_CYCLE: u32 = 3;

/// The emulator facade
#[derive(Debug, Clone)]
pub struct Nes {
    cpu: Cpu,
    bus: Bus,
    /// Whether `step` advances the PPU. Reference-trace runs freeze PPU
    /// timing to keep the golden log comparable.
    ppu_enabled: bool,
}

impl Nes {
    /// Load an iNES stream into a cartridge and wire up a reset machine.
    pub fn from_ines<R: Read>(reader: R) -> Result<Self, CartridgeError> {
        let cartridge = Cartridge::from_ines(reader)?;
        let mut nes = Self {
            cpu: Cpu::new(),
            bus: Bus::new(cartridge),
            ppu_enabled: true,
        };
        nes.reset();
        Ok(nes)
    }

    /// Reset: clear RAM and PPU state, reinitialize the register file, and
    /// load PC from the reset vector. The cycle counter restarts at the 7
    /// cycles the reset sequence consumes.
    pub fn reset(&mut self) {
        self.bus.reset();
        self.cpu.reset(&mut self.bus);
    }

    /// Execute one CPU instruction, then advance the PPU by 3 dots per CPU
    /// cycle. An NMI the PPU raises here is latched and serviced at the
    /// top of the next step.
    pub fn step(&mut self) -> Result<u32, CpuError> {
        let cycles = self.cpu.step(&mut self.bus)?;
        if self.ppu_enabled {
            self.bus.tick_ppu(cycles * PPU_DOTS_PER_CPU_CYCLE);
        }
        Ok(cycles)
    }

    /// Toggle PPU advancement (on by default).
    pub fn set_ppu_enabled(&mut self, enabled: bool) {
        self.ppu_enabled = enabled;
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Cpu {
        &mut self.cpu
    }

    pub fn ppu(&self) -> &Ppu {
        self.bus.ppu()
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Read a byte through the bus, exactly as the CPU would.
    pub fn read_memory(&mut self, address: u16) -> u8 {
        self.bus.read_u8(address)
    }

    /// Write a byte through the bus, exactly as the CPU would.
    pub fn write_memory(&mut self, address: u16, value: u8) {
        self.bus.write_u8(address, value);
    }
}
