//! CPU module - the 2A03 (6502 variant) core.
//!
//! One step executes one instruction: fetch the opcode, decode it against
//! the operation table, resolve the addressing mode, execute, and account
//! cycles (base cost, page-cross and branch penalties, and the OAM DMA
//! stall when a step triggered one). The decimal flag is storable but has
//! no arithmetic effect on this part.

use std::fmt;

use crate::bits;

/// Stack page base address
pub const STACK_BASE: u16 = 0x0100;

/// NMI vector location
pub const NMI_VECTOR: u16 = 0xFFFA;

/// Reset vector location
pub const RESET_VECTOR: u16 = 0xFFFC;

/// IRQ/BRK vector location
pub const IRQ_VECTOR: u16 = 0xFFFE;

/// Cycles consumed servicing an interrupt (and by the reset sequence)
const INTERRUPT_CYCLES: u32 = 7;

/// Cycle stall charged once per OAM DMA transfer
const DMA_STALL_CYCLES: u32 = 513;

/// Bus seam between the CPU and everything it can address.
///
/// The two latch drains carry the cross-component signals: the PPU's NMI
/// request and the OAM DMA stall, both latched in the bus and polled by
/// the CPU at step boundaries. Flat test memories can rely on the
/// defaults.
pub trait Bus {
    /// Read a byte from the given address
    fn read(&mut self, address: u16) -> u8;

    /// Write a byte to the given address
    fn write(&mut self, address: u16, value: u8);

    /// Read a little-endian 16-bit word, one byte at a time
    fn read_u16(&mut self, address: u16) -> u16 {
        let low = self.read(address);
        let high = self.read(address.wrapping_add(1));
        bits::combine(low, high)
    }

    /// Drain the latched NMI request
    fn take_nmi(&mut self) -> bool {
        false
    }

    /// Drain the OAM DMA stall latch
    fn take_dma_stall(&mut self) -> bool {
        false
    }
}

/// CPU status flags (the P register)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusFlags(u8);

impl StatusFlags {
    pub const CARRY: u8 = 0b0000_0001;
    pub const ZERO: u8 = 0b0000_0010;
    pub const INTERRUPT_DISABLE: u8 = 0b0000_0100;
    pub const DECIMAL: u8 = 0b0000_1000;
    pub const BREAK: u8 = 0b0001_0000;
    pub const UNUSED: u8 = 0b0010_0000;
    pub const OVERFLOW: u8 = 0b0100_0000;
    pub const NEGATIVE: u8 = 0b1000_0000;

    pub fn new(value: u8) -> Self {
        Self(value)
    }

    /// The raw P byte, as pushed by interrupts and compared by traces
    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn carry(&self) -> bool {
        self.0 & Self::CARRY != 0
    }

    pub fn zero(&self) -> bool {
        self.0 & Self::ZERO != 0
    }

    pub fn interrupt_disable(&self) -> bool {
        self.0 & Self::INTERRUPT_DISABLE != 0
    }

    pub fn decimal(&self) -> bool {
        self.0 & Self::DECIMAL != 0
    }

    pub fn overflow(&self) -> bool {
        self.0 & Self::OVERFLOW != 0
    }

    pub fn negative(&self) -> bool {
        self.0 & Self::NEGATIVE != 0
    }

    pub fn set_carry(&mut self, on: bool) {
        self.set(Self::CARRY, on);
    }

    pub fn set_zero(&mut self, on: bool) {
        self.set(Self::ZERO, on);
    }

    pub fn set_interrupt_disable(&mut self, on: bool) {
        self.set(Self::INTERRUPT_DISABLE, on);
    }

    pub fn set_decimal(&mut self, on: bool) {
        self.set(Self::DECIMAL, on);
    }

    pub fn set_overflow(&mut self, on: bool) {
        self.set(Self::OVERFLOW, on);
    }

    pub fn set_negative(&mut self, on: bool) {
        self.set(Self::NEGATIVE, on);
    }

    fn set(&mut self, mask: u8, on: bool) {
        if on {
            self.0 |= mask;
        } else {
            self.0 &= !mask;
        }
    }
}

impl fmt::Display for StatusFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "C:{} Z:{} I:{} D:{} V:{} N:{}",
            self.carry() as u8,
            self.zero() as u8,
            self.interrupt_disable() as u8,
            self.decimal() as u8,
            self.overflow() as u8,
            self.negative() as u8,
        )
    }
}

/// 2A03 register file
#[derive(Debug, Clone, Copy)]
pub struct Registers {
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub sp: u8,
    pub pc: u16,
    pub p: StatusFlags,
}

impl Default for Registers {
    fn default() -> Self {
        Self {
            a: 0,
            x: 0,
            y: 0,
            // The reset sequence's three fake pushes leave SP here
            sp: 0xFD,
            pc: 0,
            // InterruptDisable latched at power-on; bit 5 always reads 1
            p: StatusFlags::new(StatusFlags::INTERRUPT_DISABLE | StatusFlags::UNUSED),
        }
    }
}

/// Addressing modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressingMode {
    Implied,
    Accumulator,
    Immediate,
    ZeroPage,
    ZeroPageX,
    ZeroPageY,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    Indirect,
    IndirectX,
    IndirectY,
    Relative,
}

/// Instruction mnemonics, unofficial ones included
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mnemonic {
    Adc, And, Asl, Bcc, Bcs, Beq, Bit, Bmi, Bne, Bpl, Brk, Bvc, Bvs,
    Clc, Cld, Cli, Clv, Cmp, Cpx, Cpy, Dec, Dex, Dey, Eor, Inc, Inx,
    Iny, Jmp, Jsr, Lda, Ldx, Ldy, Lsr, Nop, Ora, Pha, Php, Pla, Plp,
    Rol, Ror, Rti, Rts, Sbc, Sec, Sed, Sei, Sta, Stx, Sty, Tax, Tay,
    Tsx, Txa, Txs, Tya,
    // Unofficial opcodes exercised by the validation corpus
    Lax, Sax,
}

/// One entry of the operation table
#[derive(Debug, Clone, Copy)]
pub struct Operation {
    pub mnemonic: Mnemonic,
    pub mode: AddressingMode,
    /// Bytes the step advances PC by; 0 for operations that set PC
    /// themselves (jumps, branches, returns, BRK)
    pub length: u16,
    /// Base cycle cost from the standard 6502 timing table
    pub cycles: u32,
    /// Whether the mode's page-cross / branch penalty applies
    pub page_penalty: bool,
}

const fn op(
    mnemonic: Mnemonic,
    mode: AddressingMode,
    length: u16,
    cycles: u32,
    page_penalty: bool,
) -> Operation {
    Operation { mnemonic, mode, length, cycles, page_penalty }
}

/// Decode an opcode byte against the operation table.
pub fn decode(opcode: u8) -> Option<Operation> {
    use AddressingMode::*;
    use Mnemonic::*;

    let operation = match opcode {
        // ADC - add with carry
        0x69 => op(Adc, Immediate, 2, 2, false),
        0x65 => op(Adc, ZeroPage, 2, 3, false),
        0x75 => op(Adc, ZeroPageX, 2, 4, false),
        0x6D => op(Adc, Absolute, 3, 4, false),
        0x7D => op(Adc, AbsoluteX, 3, 4, true),
        0x79 => op(Adc, AbsoluteY, 3, 4, true),
        0x61 => op(Adc, IndirectX, 2, 6, false),
        0x71 => op(Adc, IndirectY, 2, 5, true),
        // AND - logical AND
        0x29 => op(And, Immediate, 2, 2, false),
        0x25 => op(And, ZeroPage, 2, 3, false),
        0x35 => op(And, ZeroPageX, 2, 4, false),
        0x2D => op(And, Absolute, 3, 4, false),
        0x3D => op(And, AbsoluteX, 3, 4, true),
        0x39 => op(And, AbsoluteY, 3, 4, true),
        0x21 => op(And, IndirectX, 2, 6, false),
        0x31 => op(And, IndirectY, 2, 5, true),
        // ASL - arithmetic shift left
        0x0A => op(Asl, Accumulator, 1, 2, false),
        0x06 => op(Asl, ZeroPage, 2, 5, false),
        0x16 => op(Asl, ZeroPageX, 2, 6, false),
        0x0E => op(Asl, Absolute, 3, 6, false),
        0x1E => op(Asl, AbsoluteX, 3, 7, false),
        // Branches
        0x90 => op(Bcc, Relative, 0, 2, true),
        0xB0 => op(Bcs, Relative, 0, 2, true),
        0xF0 => op(Beq, Relative, 0, 2, true),
        0x30 => op(Bmi, Relative, 0, 2, true),
        0xD0 => op(Bne, Relative, 0, 2, true),
        0x10 => op(Bpl, Relative, 0, 2, true),
        0x50 => op(Bvc, Relative, 0, 2, true),
        0x70 => op(Bvs, Relative, 0, 2, true),
        // BIT - bit test
        0x24 => op(Bit, ZeroPage, 2, 3, false),
        0x2C => op(Bit, Absolute, 3, 4, false),
        // BRK - software interrupt
        0x00 => op(Brk, Implied, 0, 7, false),
        // Flag clears
        0x18 => op(Clc, Implied, 1, 2, false),
        0xD8 => op(Cld, Implied, 1, 2, false),
        0x58 => op(Cli, Implied, 1, 2, false),
        0xB8 => op(Clv, Implied, 1, 2, false),
        // CMP/CPX/CPY - compares
        0xC9 => op(Cmp, Immediate, 2, 2, false),
        0xC5 => op(Cmp, ZeroPage, 2, 3, false),
        0xD5 => op(Cmp, ZeroPageX, 2, 4, false),
        0xCD => op(Cmp, Absolute, 3, 4, false),
        0xDD => op(Cmp, AbsoluteX, 3, 4, true),
        0xD9 => op(Cmp, AbsoluteY, 3, 4, true),
        0xC1 => op(Cmp, IndirectX, 2, 6, false),
        0xD1 => op(Cmp, IndirectY, 2, 5, true),
        0xE0 => op(Cpx, Immediate, 2, 2, false),
        0xE4 => op(Cpx, ZeroPage, 2, 3, false),
        0xEC => op(Cpx, Absolute, 3, 4, false),
        0xC0 => op(Cpy, Immediate, 2, 2, false),
        0xC4 => op(Cpy, ZeroPage, 2, 3, false),
        0xCC => op(Cpy, Absolute, 3, 4, false),
        // DEC/DEX/DEY - decrements
        0xC6 => op(Dec, ZeroPage, 2, 5, false),
        0xD6 => op(Dec, ZeroPageX, 2, 6, false),
        0xCE => op(Dec, Absolute, 3, 6, false),
        0xDE => op(Dec, AbsoluteX, 3, 7, false),
        0xCA => op(Dex, Implied, 1, 2, false),
        0x88 => op(Dey, Implied, 1, 2, false),
        // EOR - exclusive OR
        0x49 => op(Eor, Immediate, 2, 2, false),
        0x45 => op(Eor, ZeroPage, 2, 3, false),
        0x55 => op(Eor, ZeroPageX, 2, 4, false),
        0x4D => op(Eor, Absolute, 3, 4, false),
        0x5D => op(Eor, AbsoluteX, 3, 4, true),
        0x59 => op(Eor, AbsoluteY, 3, 4, true),
        0x41 => op(Eor, IndirectX, 2, 6, false),
        0x51 => op(Eor, IndirectY, 2, 5, true),
        // INC/INX/INY - increments
        0xE6 => op(Inc, ZeroPage, 2, 5, false),
        0xF6 => op(Inc, ZeroPageX, 2, 6, false),
        0xEE => op(Inc, Absolute, 3, 6, false),
        0xFE => op(Inc, AbsoluteX, 3, 7, false),
        0xE8 => op(Inx, Implied, 1, 2, false),
        0xC8 => op(Iny, Implied, 1, 2, false),
        // JMP/JSR - jumps
        0x4C => op(Jmp, Absolute, 0, 3, false),
        0x6C => op(Jmp, Indirect, 0, 5, false),
        0x20 => op(Jsr, Absolute, 0, 6, false),
        // LDA/LDX/LDY - loads
        0xA9 => op(Lda, Immediate, 2, 2, false),
        0xA5 => op(Lda, ZeroPage, 2, 3, false),
        0xB5 => op(Lda, ZeroPageX, 2, 4, false),
        0xAD => op(Lda, Absolute, 3, 4, false),
        0xBD => op(Lda, AbsoluteX, 3, 4, true),
        0xB9 => op(Lda, AbsoluteY, 3, 4, true),
        0xA1 => op(Lda, IndirectX, 2, 6, false),
        0xB1 => op(Lda, IndirectY, 2, 5, true),
        0xA2 => op(Ldx, Immediate, 2, 2, false),
        0xA6 => op(Ldx, ZeroPage, 2, 3, false),
        0xB6 => op(Ldx, ZeroPageY, 2, 4, false),
        0xAE => op(Ldx, Absolute, 3, 4, false),
        0xBE => op(Ldx, AbsoluteY, 3, 4, true),
        0xA0 => op(Ldy, Immediate, 2, 2, false),
        0xA4 => op(Ldy, ZeroPage, 2, 3, false),
        0xB4 => op(Ldy, ZeroPageX, 2, 4, false),
        0xAC => op(Ldy, Absolute, 3, 4, false),
        0xBC => op(Ldy, AbsoluteX, 3, 4, true),
        // LSR - logical shift right
        0x4A => op(Lsr, Accumulator, 1, 2, false),
        0x46 => op(Lsr, ZeroPage, 2, 5, false),
        0x56 => op(Lsr, ZeroPageX, 2, 6, false),
        0x4E => op(Lsr, Absolute, 3, 6, false),
        0x5E => op(Lsr, AbsoluteX, 3, 7, false),
        // NOP
        0xEA => op(Nop, Implied, 1, 2, false),
        // ORA - logical OR
        0x09 => op(Ora, Immediate, 2, 2, false),
        0x05 => op(Ora, ZeroPage, 2, 3, false),
        0x15 => op(Ora, ZeroPageX, 2, 4, false),
        0x0D => op(Ora, Absolute, 3, 4, false),
        0x1D => op(Ora, AbsoluteX, 3, 4, true),
        0x19 => op(Ora, AbsoluteY, 3, 4, true),
        0x01 => op(Ora, IndirectX, 2, 6, false),
        0x11 => op(Ora, IndirectY, 2, 5, true),
        // Stack operations
        0x48 => op(Pha, Implied, 1, 3, false),
        0x08 => op(Php, Implied, 1, 3, false),
        0x68 => op(Pla, Implied, 1, 4, false),
        0x28 => op(Plp, Implied, 1, 4, false),
        // ROL/ROR - rotates
        0x2A => op(Rol, Accumulator, 1, 2, false),
        0x26 => op(Rol, ZeroPage, 2, 5, false),
        0x36 => op(Rol, ZeroPageX, 2, 6, false),
        0x2E => op(Rol, Absolute, 3, 6, false),
        0x3E => op(Rol, AbsoluteX, 3, 7, false),
        0x6A => op(Ror, Accumulator, 1, 2, false),
        0x66 => op(Ror, ZeroPage, 2, 5, false),
        0x76 => op(Ror, ZeroPageX, 2, 6, false),
        0x6E => op(Ror, Absolute, 3, 6, false),
        0x7E => op(Ror, AbsoluteX, 3, 7, false),
        // RTI/RTS - returns
        0x40 => op(Rti, Implied, 0, 6, false),
        0x60 => op(Rts, Implied, 0, 6, false),
        // SBC - subtract with carry
        0xE9 => op(Sbc, Immediate, 2, 2, false),
        0xE5 => op(Sbc, ZeroPage, 2, 3, false),
        0xF5 => op(Sbc, ZeroPageX, 2, 4, false),
        0xED => op(Sbc, Absolute, 3, 4, false),
        0xFD => op(Sbc, AbsoluteX, 3, 4, true),
        0xF9 => op(Sbc, AbsoluteY, 3, 4, true),
        0xE1 => op(Sbc, IndirectX, 2, 6, false),
        0xF1 => op(Sbc, IndirectY, 2, 5, true),
        // Flag sets
        0x38 => op(Sec, Implied, 1, 2, false),
        0xF8 => op(Sed, Implied, 1, 2, false),
        0x78 => op(Sei, Implied, 1, 2, false),
        // STA/STX/STY - stores
        0x85 => op(Sta, ZeroPage, 2, 3, false),
        0x95 => op(Sta, ZeroPageX, 2, 4, false),
        0x8D => op(Sta, Absolute, 3, 4, false),
        0x9D => op(Sta, AbsoluteX, 3, 5, false),
        0x99 => op(Sta, AbsoluteY, 3, 5, false),
        0x81 => op(Sta, IndirectX, 2, 6, false),
        0x91 => op(Sta, IndirectY, 2, 6, false),
        0x86 => op(Stx, ZeroPage, 2, 3, false),
        0x96 => op(Stx, ZeroPageY, 2, 4, false),
        0x8E => op(Stx, Absolute, 3, 4, false),
        0x84 => op(Sty, ZeroPage, 2, 3, false),
        0x94 => op(Sty, ZeroPageX, 2, 4, false),
        0x8C => op(Sty, Absolute, 3, 4, false),
        // Transfers
        0xAA => op(Tax, Implied, 1, 2, false),
        0xA8 => op(Tay, Implied, 1, 2, false),
        0xBA => op(Tsx, Implied, 1, 2, false),
        0x8A => op(Txa, Implied, 1, 2, false),
        0x9A => op(Txs, Implied, 1, 2, false),
        0x98 => op(Tya, Implied, 1, 2, false),
        // LAX - load A and X together (unofficial)
        0xA7 => op(Lax, ZeroPage, 2, 3, false),
        0xB7 => op(Lax, ZeroPageY, 2, 4, false),
        0xAF => op(Lax, Absolute, 3, 4, false),
        0xBF => op(Lax, AbsoluteY, 3, 4, true),
        0xA3 => op(Lax, IndirectX, 2, 6, false),
        0xB3 => op(Lax, IndirectY, 2, 5, true),
        // SAX - store A AND X (unofficial)
        0x87 => op(Sax, ZeroPage, 2, 3, false),
        0x97 => op(Sax, ZeroPageY, 2, 4, false),
        0x8F => op(Sax, Absolute, 3, 4, false),
        0x83 => op(Sax, IndirectX, 2, 6, false),
        // Multi-byte NOPs (unofficial)
        0x1A | 0x3A | 0x5A | 0x7A | 0xDA | 0xFA => op(Nop, Implied, 1, 2, false),
        0x80 => op(Nop, Immediate, 2, 2, false),
        0x04 | 0x44 | 0x64 => op(Nop, ZeroPage, 2, 3, false),
        0x14 | 0x34 | 0x54 | 0x74 | 0xD4 | 0xF4 => op(Nop, ZeroPageX, 2, 4, false),
        0x0C => op(Nop, Absolute, 3, 4, false),
        0x1C | 0x3C | 0x5C | 0x7C | 0xDC | 0xFC => op(Nop, AbsoluteX, 3, 4, true),
        _ => return None,
    };
    Some(operation)
}

/// Interrupt sources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// Software interrupt; pushes the address after the BRK padding byte
    Brk,
    /// Maskable interrupt request
    Irq,
    /// Non-maskable interrupt from the PPU's vblank entry
    Nmi,
}

impl Interrupt {
    fn vector(self) -> u16 {
        match self {
            Interrupt::Brk | Interrupt::Irq => IRQ_VECTOR,
            Interrupt::Nmi => NMI_VECTOR,
        }
    }
}

/// Execution state between steps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Running,
    ServicingInterrupt,
}

/// CPU error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuError {
    /// The opcode is not in the operation table
    UnknownOpcode { opcode: u8, pc: u16 },
}

impl fmt::Display for CpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CpuError::UnknownOpcode { opcode, pc } => {
                write!(f, "unknown opcode 0x{:02X} at 0x{:04X}", opcode, pc)
            }
        }
    }
}

impl std::error::Error for CpuError {}

/// CPU state
#[derive(Debug, Clone)]
pub struct Cpu {
    pub registers: Registers,
    state: State,
    /// Page-cross and branch penalty cycles for the current instruction
    extra_cycles: u32,
    /// Cumulative cycle count; starts at 7 after a reset
    total_cycles: u64,
}

impl Cpu {
    pub fn new() -> Self {
        Self {
            registers: Registers::default(),
            state: State::Running,
            extra_cycles: 0,
            total_cycles: 0,
        }
    }

    /// Run the reset sequence: registers to their power-on values, PC from
    /// the reset vector, cycle counter at the 7 cycles the sequence burns.
    pub fn reset(&mut self, bus: &mut impl Bus) {
        self.registers = Registers::default();
        self.registers.pc = bus.read_u16(RESET_VECTOR);
        self.state = State::Running;
        self.extra_cycles = 0;
        self.total_cycles = u64::from(INTERRUPT_CYCLES);
    }

    /// Cumulative cycles executed since reset
    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    /// Execute one instruction; returns the cycles it consumed.
    ///
    /// A latched NMI is serviced first and counts as the whole step.
    pub fn step(&mut self, bus: &mut impl Bus) -> Result<u32, CpuError> {
        if bus.take_nmi() {
            self.state = State::ServicingInterrupt;
        }
        if self.state == State::ServicingInterrupt {
            self.interrupt(bus, Interrupt::Nmi);
            self.state = State::Running;
            self.total_cycles += u64::from(INTERRUPT_CYCLES);
            return Ok(INTERRUPT_CYCLES);
        }

        let pc = self.registers.pc;
        let opcode = bus.read(pc);
        let operation = decode(opcode).ok_or(CpuError::UnknownOpcode { opcode, pc })?;

        self.extra_cycles = 0;
        self.execute(bus, &operation);
        self.registers.pc = self.registers.pc.wrapping_add(operation.length);

        let mut cycles = operation.cycles;
        if operation.page_penalty {
            cycles += self.extra_cycles;
        }
        if bus.take_dma_stall() {
            cycles += DMA_STALL_CYCLES;
        }
        self.total_cycles += u64::from(cycles);
        Ok(cycles)
    }

    /// Service an interrupt: push PC (high then low) and P, set the
    /// interrupt latch, load PC from the vector. IRQ is refused while
    /// InterruptDisable is set; NMI never is. BRK pushes the address after
    /// its padding byte, with the Break bit set in the pushed copy.
    pub fn interrupt(&mut self, bus: &mut impl Bus, kind: Interrupt) {
        if kind == Interrupt::Irq && self.registers.p.interrupt_disable() {
            return;
        }

        let return_address = match kind {
            Interrupt::Brk => self.registers.pc.wrapping_add(2),
            Interrupt::Irq | Interrupt::Nmi => self.registers.pc,
        };
        self.push_u16(bus, return_address);

        let mut pushed = self.registers.p.bits() | StatusFlags::UNUSED;
        if kind == Interrupt::Brk {
            pushed |= StatusFlags::BREAK;
        } else {
            pushed &= !StatusFlags::BREAK;
        }
        self.push_byte(bus, pushed);

        self.registers.p.set_interrupt_disable(true);
        self.registers.pc = bus.read_u16(kind.vector());
    }

    /// Push a byte onto the stack page; SP decrements and wraps within it.
    pub fn push_byte(&mut self, bus: &mut impl Bus, value: u8) {
        bus.write(STACK_BASE + u16::from(self.registers.sp), value);
        self.registers.sp = self.registers.sp.wrapping_sub(1);
    }

    /// Pop a byte off the stack page; SP wraps then increments.
    pub fn pop_byte(&mut self, bus: &mut impl Bus) -> u8 {
        self.registers.sp = self.registers.sp.wrapping_add(1);
        bus.read(STACK_BASE + u16::from(self.registers.sp))
    }

    /// Push a 16-bit value: high byte first, then low.
    pub fn push_u16(&mut self, bus: &mut impl Bus, value: u16) {
        self.push_byte(bus, (value >> 8) as u8);
        self.push_byte(bus, value as u8);
    }

    /// Pop a 16-bit value: low byte first, then high.
    pub fn pop_u16(&mut self, bus: &mut impl Bus) -> u16 {
        let low = self.pop_byte(bus);
        let high = self.pop_byte(bus);
        bits::combine(low, high)
    }

    fn page_crossed(a: u16, b: u16) -> bool {
        a & 0xFF00 != b & 0xFF00
    }

    /// Resolve the effective address for a mode with a memory operand,
    /// recording page-cross penalties as they are discovered.
    fn operand_address(&mut self, bus: &mut impl Bus, mode: AddressingMode) -> u16 {
        let pc = self.registers.pc;
        match mode {
            AddressingMode::Immediate => pc.wrapping_add(1),
            AddressingMode::ZeroPage => u16::from(bus.read(pc.wrapping_add(1))),
            AddressingMode::ZeroPageX => {
                let operand = u16::from(bus.read(pc.wrapping_add(1)));
                bits::wrap(operand + u16::from(self.registers.x), 0xFF)
            }
            AddressingMode::ZeroPageY => {
                let operand = u16::from(bus.read(pc.wrapping_add(1)));
                bits::wrap(operand + u16::from(self.registers.y), 0xFF)
            }
            AddressingMode::Absolute => bus.read_u16(pc.wrapping_add(1)),
            AddressingMode::AbsoluteX => {
                let base = bus.read_u16(pc.wrapping_add(1));
                let address = base.wrapping_add(u16::from(self.registers.x));
                if Self::page_crossed(base, address) {
                    self.extra_cycles += 1;
                }
                address
            }
            AddressingMode::AbsoluteY => {
                let base = bus.read_u16(pc.wrapping_add(1));
                let address = base.wrapping_add(u16::from(self.registers.y));
                if Self::page_crossed(base, address) {
                    self.extra_cycles += 1;
                }
                address
            }
            AddressingMode::Indirect => {
                // The 6502 fetches the pointer's high byte without carrying
                // into the page: a pointer at $xxFF wraps to $xx00.
                let pointer = bus.read_u16(pc.wrapping_add(1));
                let low = bus.read(pointer);
                let high = bus.read((pointer & 0xFF00) | (pointer.wrapping_add(1) & 0x00FF));
                bits::combine(low, high)
            }
            AddressingMode::IndirectX => {
                let pointer = bits::wrap(
                    u16::from(bus.read(pc.wrapping_add(1))) + u16::from(self.registers.x),
                    0xFF,
                );
                let low = bus.read(pointer);
                let high = bus.read(bits::wrap(pointer + 1, 0xFF));
                bits::combine(low, high)
            }
            AddressingMode::IndirectY => {
                let operand = u16::from(bus.read(pc.wrapping_add(1)));
                let low = bus.read(operand);
                let high = bus.read(bits::wrap(operand + 1, 0xFF));
                let base = bits::combine(low, high);
                let address = base.wrapping_add(u16::from(self.registers.y));
                if Self::page_crossed(base, address) {
                    self.extra_cycles += 1;
                }
                address
            }
            AddressingMode::Implied | AddressingMode::Accumulator | AddressingMode::Relative => {
                panic!("addressing mode {:?} has no operand address", mode)
            }
        }
    }

    /// Read the operand for a mode, register or memory.
    fn read_operand(&mut self, bus: &mut impl Bus, mode: AddressingMode) -> u8 {
        match mode {
            AddressingMode::Accumulator => self.registers.a,
            _ => {
                let address = self.operand_address(bus, mode);
                bus.read(address)
            }
        }
    }

    /// Write the operand for a mode, register or memory.
    fn write_operand(&mut self, bus: &mut impl Bus, mode: AddressingMode, value: u8) {
        match mode {
            AddressingMode::Accumulator => self.registers.a = value,
            _ => {
                let address = self.operand_address(bus, mode);
                bus.write(address, value);
            }
        }
    }

    /// Read-modify-write helper for shifts, rotates and INC/DEC.
    fn read_modify_write(
        &mut self,
        bus: &mut impl Bus,
        mode: AddressingMode,
        operation: fn(&mut Self, u8) -> u8,
    ) {
        match mode {
            AddressingMode::Accumulator => {
                let value = self.registers.a;
                let result = operation(self, value);
                self.registers.a = result;
            }
            _ => {
                let address = self.operand_address(bus, mode);
                let value = bus.read(address);
                let result = operation(self, value);
                bus.write(address, result);
            }
        }
    }

    fn execute(&mut self, bus: &mut impl Bus, operation: &Operation) {
        let mode = operation.mode;
        match operation.mnemonic {
            Mnemonic::Adc => {
                let value = self.read_operand(bus, mode);
                self.adc(value);
            }
            Mnemonic::And => {
                let value = self.read_operand(bus, mode);
                self.registers.a &= value;
                self.set_zero_negative(self.registers.a);
            }
            Mnemonic::Asl => self.read_modify_write(bus, mode, Self::asl_value),
            Mnemonic::Bcc => self.branch(bus, !self.registers.p.carry()),
            Mnemonic::Bcs => self.branch(bus, self.registers.p.carry()),
            Mnemonic::Beq => self.branch(bus, self.registers.p.zero()),
            Mnemonic::Bmi => self.branch(bus, self.registers.p.negative()),
            Mnemonic::Bne => self.branch(bus, !self.registers.p.zero()),
            Mnemonic::Bpl => self.branch(bus, !self.registers.p.negative()),
            Mnemonic::Bvc => self.branch(bus, !self.registers.p.overflow()),
            Mnemonic::Bvs => self.branch(bus, self.registers.p.overflow()),
            Mnemonic::Bit => {
                let value = self.read_operand(bus, mode);
                self.registers.p.set_zero(self.registers.a & value == 0);
                self.registers.p.set_negative(value & 0x80 != 0);
                self.registers.p.set_overflow(value & 0x40 != 0);
            }
            Mnemonic::Brk => self.interrupt(bus, Interrupt::Brk),
            Mnemonic::Clc => self.registers.p.set_carry(false),
            Mnemonic::Cld => self.registers.p.set_decimal(false),
            Mnemonic::Cli => self.registers.p.set_interrupt_disable(false),
            Mnemonic::Clv => self.registers.p.set_overflow(false),
            Mnemonic::Cmp => {
                let value = self.read_operand(bus, mode);
                self.compare(self.registers.a, value);
            }
            Mnemonic::Cpx => {
                let value = self.read_operand(bus, mode);
                self.compare(self.registers.x, value);
            }
            Mnemonic::Cpy => {
                let value = self.read_operand(bus, mode);
                self.compare(self.registers.y, value);
            }
            Mnemonic::Dec => self.read_modify_write(bus, mode, Self::dec_value),
            Mnemonic::Dex => {
                self.registers.x = self.registers.x.wrapping_sub(1);
                self.set_zero_negative(self.registers.x);
            }
            Mnemonic::Dey => {
                self.registers.y = self.registers.y.wrapping_sub(1);
                self.set_zero_negative(self.registers.y);
            }
            Mnemonic::Eor => {
                let value = self.read_operand(bus, mode);
                self.registers.a ^= value;
                self.set_zero_negative(self.registers.a);
            }
            Mnemonic::Inc => self.read_modify_write(bus, mode, Self::inc_value),
            Mnemonic::Inx => {
                self.registers.x = self.registers.x.wrapping_add(1);
                self.set_zero_negative(self.registers.x);
            }
            Mnemonic::Iny => {
                self.registers.y = self.registers.y.wrapping_add(1);
                self.set_zero_negative(self.registers.y);
            }
            Mnemonic::Jmp => {
                self.registers.pc = self.operand_address(bus, mode);
            }
            Mnemonic::Jsr => {
                let target = self.operand_address(bus, mode);
                let return_address = self.registers.pc.wrapping_add(2);
                self.push_u16(bus, return_address);
                self.registers.pc = target;
            }
            Mnemonic::Lda => {
                self.registers.a = self.read_operand(bus, mode);
                self.set_zero_negative(self.registers.a);
            }
            Mnemonic::Ldx => {
                self.registers.x = self.read_operand(bus, mode);
                self.set_zero_negative(self.registers.x);
            }
            Mnemonic::Ldy => {
                self.registers.y = self.read_operand(bus, mode);
                self.set_zero_negative(self.registers.y);
            }
            Mnemonic::Lsr => self.read_modify_write(bus, mode, Self::lsr_value),
            Mnemonic::Nop => {
                // Multi-byte NOPs still fetch their operand, which is where
                // the absolute,X page penalty comes from
                if mode != AddressingMode::Implied {
                    let _ = self.read_operand(bus, mode);
                }
            }
            Mnemonic::Ora => {
                let value = self.read_operand(bus, mode);
                self.registers.a |= value;
                self.set_zero_negative(self.registers.a);
            }
            Mnemonic::Pha => self.push_byte(bus, self.registers.a),
            Mnemonic::Php => {
                let pushed =
                    self.registers.p.bits() | StatusFlags::BREAK | StatusFlags::UNUSED;
                self.push_byte(bus, pushed);
            }
            Mnemonic::Pla => {
                self.registers.a = self.pop_byte(bus);
                self.set_zero_negative(self.registers.a);
            }
            Mnemonic::Plp => {
                let value = self.pop_byte(bus);
                self.registers.p =
                    StatusFlags::new((value | StatusFlags::UNUSED) & !StatusFlags::BREAK);
            }
            Mnemonic::Rol => self.read_modify_write(bus, mode, Self::rol_value),
            Mnemonic::Ror => self.read_modify_write(bus, mode, Self::ror_value),
            Mnemonic::Rti => {
                let value = self.pop_byte(bus);
                self.registers.p =
                    StatusFlags::new((value | StatusFlags::UNUSED) & !StatusFlags::BREAK);
                self.registers.pc = self.pop_u16(bus);
            }
            Mnemonic::Rts => {
                self.registers.pc = self.pop_u16(bus).wrapping_add(1);
            }
            Mnemonic::Sbc => {
                let value = self.read_operand(bus, mode);
                self.adc(value ^ 0xFF);
            }
            Mnemonic::Sec => self.registers.p.set_carry(true),
            Mnemonic::Sed => self.registers.p.set_decimal(true),
            Mnemonic::Sei => self.registers.p.set_interrupt_disable(true),
            Mnemonic::Sta => self.write_operand(bus, mode, self.registers.a),
            Mnemonic::Stx => self.write_operand(bus, mode, self.registers.x),
            Mnemonic::Sty => self.write_operand(bus, mode, self.registers.y),
            Mnemonic::Tax => {
                self.registers.x = self.registers.a;
                self.set_zero_negative(self.registers.x);
            }
            Mnemonic::Tay => {
                self.registers.y = self.registers.a;
                self.set_zero_negative(self.registers.y);
            }
            Mnemonic::Tsx => {
                self.registers.x = self.registers.sp;
                self.set_zero_negative(self.registers.x);
            }
            Mnemonic::Txa => {
                self.registers.a = self.registers.x;
                self.set_zero_negative(self.registers.a);
            }
            Mnemonic::Txs => self.registers.sp = self.registers.x,
            Mnemonic::Tya => {
                self.registers.a = self.registers.y;
                self.set_zero_negative(self.registers.a);
            }
            Mnemonic::Lax => {
                let value = self.read_operand(bus, mode);
                self.registers.a = value;
                self.registers.x = value;
                self.set_zero_negative(value);
            }
            Mnemonic::Sax => {
                let value = self.registers.a & self.registers.x;
                self.write_operand(bus, mode, value);
            }
        }
    }

    /// Take a branch decision: not taken advances past the operand for the
    /// base 2 cycles; taken adds 1 in-page or 2 across a page boundary and
    /// jumps to PC+2 plus the signed offset.
    fn branch(&mut self, bus: &mut impl Bus, taken: bool) {
        let offset = bus.read(self.registers.pc.wrapping_add(1)) as i8;
        let next = self.registers.pc.wrapping_add(2);
        if taken {
            let target = next.wrapping_add(offset as u16);
            self.extra_cycles += if Self::page_crossed(next, target) { 2 } else { 1 };
            self.registers.pc = target;
        } else {
            self.registers.pc = next;
        }
    }

    fn adc(&mut self, value: u8) {
        let a = self.registers.a;
        let sum = u16::from(a) + u16::from(value) + u16::from(self.registers.p.carry());
        let result = sum as u8;

        self.registers.p.set_carry(sum > 0xFF);
        // Signed overflow: operands agree in sign, result does not
        self.registers
            .p
            .set_overflow((a ^ value) & 0x80 == 0 && (a ^ result) & 0x80 != 0);
        self.registers.a = result;
        self.set_zero_negative(result);
    }

    fn compare(&mut self, register: u8, value: u8) {
        let result = register.wrapping_sub(value);
        self.registers.p.set_carry(register >= value);
        self.set_zero_negative(result);
    }

    fn asl_value(&mut self, value: u8) -> u8 {
        self.registers.p.set_carry(value & 0x80 != 0);
        let result = value << 1;
        self.set_zero_negative(result);
        result
    }

    fn lsr_value(&mut self, value: u8) -> u8 {
        self.registers.p.set_carry(value & 0x01 != 0);
        let result = value >> 1;
        self.set_zero_negative(result);
        result
    }

    fn rol_value(&mut self, value: u8) -> u8 {
        let carry_in = self.registers.p.carry() as u8;
        self.registers.p.set_carry(value & 0x80 != 0);
        let result = (value << 1) | carry_in;
        self.set_zero_negative(result);
        result
    }

    fn ror_value(&mut self, value: u8) -> u8 {
        let carry_in = self.registers.p.carry() as u8;
        self.registers.p.set_carry(value & 0x01 != 0);
        let result = (value >> 1) | (carry_in << 7);
        self.set_zero_negative(result);
        result
    }

    fn inc_value(&mut self, value: u8) -> u8 {
        let result = value.wrapping_add(1);
        self.set_zero_negative(result);
        result
    }

    fn dec_value(&mut self, value: u8) -> u8 {
        let result = value.wrapping_sub(1);
        self.set_zero_negative(result);
        result
    }

    fn set_zero_negative(&mut self, value: u8) {
        self.registers.p.set_zero(value == 0);
        self.registers.p.set_negative(value & 0x80 != 0);
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}
