//! CPU tests against the public surface.

use famicore::cpu::{decode, AddressingMode, Bus, Cpu, CpuError, Mnemonic};

/// Flat 64 KiB memory standing in for the full bus.
struct FlatBus([u8; 0x10000]);

impl FlatBus {
    fn new() -> Self {
        Self([0; 0x10000])
    }
}

impl Bus for FlatBus {
    fn read(&mut self, address: u16) -> u8 {
        self.0[address as usize]
    }

    fn write(&mut self, address: u16, value: u8) {
        self.0[address as usize] = value;
    }
}

#[test]
fn test_official_opcodes_decode() {
    // One representative per family
    let cases: &[(u8, Mnemonic, AddressingMode, u32)] = &[
        (0x69, Mnemonic::Adc, AddressingMode::Immediate, 2),
        (0x0A, Mnemonic::Asl, AddressingMode::Accumulator, 2),
        (0x90, Mnemonic::Bcc, AddressingMode::Relative, 2),
        (0x00, Mnemonic::Brk, AddressingMode::Implied, 7),
        (0x6C, Mnemonic::Jmp, AddressingMode::Indirect, 5),
        (0x20, Mnemonic::Jsr, AddressingMode::Absolute, 6),
        (0xB1, Mnemonic::Lda, AddressingMode::IndirectY, 5),
        (0x9D, Mnemonic::Sta, AddressingMode::AbsoluteX, 5),
        (0x40, Mnemonic::Rti, AddressingMode::Implied, 6),
        (0xA3, Mnemonic::Lax, AddressingMode::IndirectX, 6),
        (0x87, Mnemonic::Sax, AddressingMode::ZeroPage, 3),
    ];

    for &(opcode, mnemonic, mode, cycles) in cases {
        let operation = decode(opcode)
            .unwrap_or_else(|| panic!("opcode 0x{:02X} did not decode", opcode));
        assert_eq!(operation.mnemonic, mnemonic, "opcode 0x{:02X}", opcode);
        assert_eq!(operation.mode, mode, "opcode 0x{:02X}", opcode);
        assert_eq!(operation.cycles, cycles, "opcode 0x{:02X}", opcode);
    }
}

#[test]
fn test_undecoded_opcodes_stay_unknown() {
    // A few opcodes deliberately outside the supported set
    for opcode in [0x02u8, 0x22, 0xC7, 0xEB, 0x9F] {
        assert!(decode(opcode).is_none(), "opcode 0x{:02X}", opcode);
    }
}

#[test]
fn test_step_reports_unknown_opcode() {
    let mut bus = FlatBus::new();
    bus.write(0x0400, 0x22);
    let mut cpu = Cpu::new();
    cpu.registers.pc = 0x0400;

    let error = cpu.step(&mut bus).unwrap_err();
    assert_eq!(error, CpuError::UnknownOpcode { opcode: 0x22, pc: 0x0400 });
}

#[test]
fn test_small_program_with_cycle_accounting() {
    // LDX #$08; loop: DEX; BNE loop; NOP
    let program = [0xA2, 0x08, 0xCA, 0xD0, 0xFD, 0xEA];
    let mut bus = FlatBus::new();
    for (i, byte) in program.iter().enumerate() {
        bus.write(0x0600 + i as u16, *byte);
    }

    let mut cpu = Cpu::new();
    cpu.registers.pc = 0x0600;

    let mut cycles = cpu.step(&mut bus).unwrap(); // LDX
    assert_eq!(cycles, 2);
    while cpu.registers.pc != 0x0605 {
        cycles += cpu.step(&mut bus).unwrap();
    }

    assert_eq!(cpu.registers.x, 0);
    // 8 DEX (2 each) + 7 taken branches (3 each) + 1 fallthrough (2)
    assert_eq!(cycles, 2 + 8 * 2 + 7 * 3 + 2);
}

#[test]
fn test_interrupt_vectors_are_little_endian() {
    let mut bus = FlatBus::new();
    // BRK at $0200; IRQ/BRK vector bytes read low-then-high
    bus.write(0x0200, 0x00);
    bus.write(0xFFFE, 0xCD);
    bus.write(0xFFFF, 0xAB);

    let mut cpu = Cpu::new();
    cpu.registers.pc = 0x0200;
    cpu.step(&mut bus).unwrap();
    assert_eq!(cpu.registers.pc, 0xABCD);
}
