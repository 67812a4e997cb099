//! Cartridge loading and mapping.
//!
//! An iNES image is a 16-byte header, an optional 512-byte trainer, then
//! PRG-ROM banks (16 KiB each) followed by CHR-ROM banks (8 KiB each).
//! The reference mapper is NROM: PRG appears at $8000-$FFFF (mirrored when
//! only one bank is present), PRG RAM at $6000-$7FFF, and CHR linearly on
//! the PPU side at $0000-$1FFF.

use std::fmt;
use std::io::Read;

use crate::bits;

/// iNES header magic: "NES" followed by an EOF byte.
pub const INES_MAGIC: [u8; 4] = [b'N', b'E', b'S', 0x1A];

/// iNES header size in bytes
pub const HEADER_SIZE: usize = 16;

/// PRG-ROM bank size in bytes (16 KiB)
pub const PRG_BANK_SIZE: usize = 16 * 1024;

/// CHR-ROM bank size in bytes (8 KiB)
pub const CHR_BANK_SIZE: usize = 8 * 1024;

/// Trainer blob size, present only when the header flags it
pub const TRAINER_SIZE: usize = 512;

/// PRG RAM size served at $6000-$7FFF
pub const PRG_RAM_SIZE: usize = 8 * 1024;

/// Nametable mirroring arrangement, from control byte 1 bit 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mirroring {
    Vertical,
    Horizontal,
}

/// Which revision of the iNES container the header declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InesFormat {
    Ines1,
    Ines2,
}

/// Mapper variants. Only the fixed-bank reference mapper is supported;
/// images declaring other ids are served with NROM address translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mapper {
    Nrom,
}

/// Decoded iNES header fields
#[derive(Debug, Clone)]
pub struct InesHeader {
    /// PRG-ROM bank count (16 KiB units)
    pub prg_banks: u8,
    /// CHR-ROM bank count (8 KiB units)
    pub chr_banks: u8,
    /// Full mapper id (control byte 2 high nibble | control byte 1 high nibble)
    pub mapper_id: u8,
    pub mirroring: Mirroring,
    pub four_screen: bool,
    pub trainer: bool,
    pub battery_ram: bool,
    pub format: InesFormat,
    /// PRG RAM length field (byte 8)
    pub prg_ram_length: u8,
}

impl InesHeader {
    /// Decode the 16 header bytes, validating the magic and the format
    /// selector in control byte 2 bits 2-3.
    pub fn parse(bytes: &[u8; HEADER_SIZE]) -> Result<Self, CartridgeError> {
        if bytes[0..4] != INES_MAGIC {
            return Err(CartridgeError::InvalidRom("bad header magic"));
        }

        let control1 = bytes[6];
        let control2 = bytes[7];

        let format = if bits::bit_set(control2, 3) && !bits::bit_set(control2, 2) {
            InesFormat::Ines2
        } else if !bits::bit_set(control2, 3) && !bits::bit_set(control2, 2) {
            InesFormat::Ines1
        } else {
            return Err(CartridgeError::InvalidRom("unsupported iNES variant"));
        };

        let mirroring = if bits::bit_set(control1, 0) {
            Mirroring::Vertical
        } else {
            Mirroring::Horizontal
        };

        Ok(Self {
            prg_banks: bytes[4],
            chr_banks: bytes[5],
            mapper_id: (control2 & 0xF0) | (control1 >> 4),
            mirroring,
            four_screen: bits::bit_set(control1, 3),
            trainer: bits::bit_set(control1, 2),
            battery_ram: bits::bit_set(control1, 1),
            format,
            prg_ram_length: bytes[8],
        })
    }
}

/// Cartridge state: decoded header plus PRG/CHR/PRG-RAM storage.
///
/// Created once from an iNES stream and owned by the bus for the whole
/// session.
#[derive(Debug, Clone)]
pub struct Cartridge {
    header: InesHeader,
    prg: Vec<u8>,
    chr: Vec<u8>,
    prg_ram: Vec<u8>,
    mapper: Mapper,
}

impl Cartridge {
    /// Consume an iNES stream: header, optional trainer, PRG banks, CHR
    /// banks. Truncated data at any point is an `InvalidRom`.
    pub fn from_ines<R: Read>(mut reader: R) -> Result<Self, CartridgeError> {
        let mut header_bytes = [0u8; HEADER_SIZE];
        reader
            .read_exact(&mut header_bytes)
            .map_err(|_| CartridgeError::InvalidRom("truncated header"))?;
        let header = InesHeader::parse(&header_bytes)?;

        if header.trainer {
            let mut trainer = [0u8; TRAINER_SIZE];
            reader
                .read_exact(&mut trainer)
                .map_err(|_| CartridgeError::InvalidRom("truncated trainer"))?;
        }

        let mut prg = vec![0u8; header.prg_banks as usize * PRG_BANK_SIZE];
        reader
            .read_exact(&mut prg)
            .map_err(|_| CartridgeError::InvalidRom("truncated PRG bank data"))?;
        if prg.is_empty() {
            return Err(CartridgeError::InvalidRom("no PRG banks"));
        }

        let mut chr = vec![0u8; header.chr_banks as usize * CHR_BANK_SIZE];
        reader
            .read_exact(&mut chr)
            .map_err(|_| CartridgeError::InvalidRom("truncated CHR bank data"))?;
        if chr.is_empty() {
            // CHR-RAM image: serve a zeroed 8 KiB region so PPU pattern
            // reads stay in-bounds.
            chr = vec![0u8; CHR_BANK_SIZE];
        }

        Ok(Self {
            header,
            prg,
            chr,
            prg_ram: vec![0u8; PRG_RAM_SIZE],
            mapper: Mapper::Nrom,
        })
    }

    pub fn header(&self) -> &InesHeader {
        &self.header
    }

    pub fn mapper(&self) -> Mapper {
        self.mapper
    }

    pub fn mirroring(&self) -> Mirroring {
        self.header.mirroring
    }

    /// CPU-side read of cartridge space ($4020-$FFFF).
    ///
    /// A 16 KiB PRG image appears in both $8000-$BFFF and $C000-$FFFF.
    /// Addresses below $4020 indicate a bus routing bug.
    pub fn read_prg(&self, address: u16) -> u8 {
        match self.mapper {
            Mapper::Nrom => match address {
                // Expansion area, nothing mapped there on NROM boards
                0x4020..=0x5FFF => 0xFF,
                0x6000..=0x7FFF => self.prg_ram[(address - 0x6000) as usize],
                0x8000..=0xFFFF => {
                    let offset = (address - 0x8000) as usize;
                    self.prg[offset % self.prg.len()]
                }
                _ => panic!("address 0x{:04X} is not in cartridge space", address),
            },
        }
    }

    /// CPU-side write. PRG RAM accepts it; ROM and expansion space ignore it.
    pub fn write_prg(&mut self, address: u16, value: u8) {
        match self.mapper {
            Mapper::Nrom => match address {
                0x4020..=0x5FFF => {}
                0x6000..=0x7FFF => self.prg_ram[(address - 0x6000) as usize] = value,
                // ROM is write-protected
                0x8000..=0xFFFF => {}
                _ => panic!("address 0x{:04X} is not in cartridge space", address),
            },
        }
    }

    /// PPU-side read of the pattern tables, linear within CHR.
    pub fn read_chr(&self, address: u16) -> u8 {
        self.chr[address as usize % self.chr.len()]
    }
}

/// Cartridge error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CartridgeError {
    InvalidRom(&'static str),
}

impl fmt::Display for CartridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CartridgeError::InvalidRom(reason) => write!(f, "invalid rom: {}", reason),
        }
    }
}

impl std::error::Error for CartridgeError {}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a minimal iNES image with the given header flags and bank
    /// counts, PRG filled with `prg_fill`.
    fn build_ines(prg_banks: u8, chr_banks: u8, control1: u8, control2: u8, prg_fill: u8) -> Vec<u8> {
        let mut rom = Vec::new();
        rom.extend_from_slice(&INES_MAGIC);
        rom.push(prg_banks);
        rom.push(chr_banks);
        rom.push(control1);
        rom.push(control2);
        rom.push(0); // PRG RAM length
        rom.extend_from_slice(&[0u8; 7]);
        rom.extend_from_slice(&vec![prg_fill; prg_banks as usize * PRG_BANK_SIZE]);
        rom.extend_from_slice(&vec![0u8; chr_banks as usize * CHR_BANK_SIZE]);
        rom
    }

    #[test]
    fn test_header_parsing() {
        let mut header = [0u8; HEADER_SIZE];
        header[0..4].copy_from_slice(&INES_MAGIC);
        header[4] = 2;
        header[5] = 1;
        header[6] = 0b0001_0011; // mapper low nibble 1, battery RAM, vertical
        header[7] = 0b0010_0000; // mapper high nibble 2, iNES 1

        let parsed = InesHeader::parse(&header).unwrap();
        assert_eq!(parsed.prg_banks, 2);
        assert_eq!(parsed.chr_banks, 1);
        assert_eq!(parsed.mapper_id, 0x21);
        assert_eq!(parsed.mirroring, Mirroring::Vertical);
        assert!(parsed.battery_ram);
        assert!(!parsed.trainer);
        assert_eq!(parsed.format, InesFormat::Ines1);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut rom = build_ines(1, 1, 0, 0, 0);
        rom[0] = b'X';
        let err = Cartridge::from_ines(rom.as_slice()).unwrap_err();
        assert_eq!(err, CartridgeError::InvalidRom("bad header magic"));
    }

    #[test]
    fn test_unsupported_variant_rejected() {
        // Control byte 2 with bit 2 set is neither iNES 1 nor iNES 2
        let rom = build_ines(1, 1, 0, 0b0000_0100, 0);
        let err = Cartridge::from_ines(rom.as_slice()).unwrap_err();
        assert_eq!(err, CartridgeError::InvalidRom("unsupported iNES variant"));
    }

    #[test]
    fn test_truncated_prg_rejected() {
        let mut rom = build_ines(1, 0, 0, 0, 0);
        rom.truncate(HEADER_SIZE + 100);
        let err = Cartridge::from_ines(rom.as_slice()).unwrap_err();
        assert_eq!(err, CartridgeError::InvalidRom("truncated PRG bank data"));
    }

    #[test]
    fn test_trainer_skipped() {
        let mut rom = Vec::new();
        rom.extend_from_slice(&INES_MAGIC);
        rom.push(1);
        rom.push(0);
        rom.push(0b0000_0100); // trainer flag
        rom.push(0);
        rom.push(0);
        rom.extend_from_slice(&[0u8; 7]);
        rom.extend_from_slice(&[0xAAu8; TRAINER_SIZE]);
        rom.extend_from_slice(&[0x55u8; PRG_BANK_SIZE]);

        let cart = Cartridge::from_ines(rom.as_slice()).unwrap();
        // First PRG byte must come from after the trainer
        assert_eq!(cart.read_prg(0x8000), 0x55);
    }

    #[test]
    fn test_single_bank_prg_mirrors() {
        let rom = build_ines(1, 1, 0, 0, 0x7E);
        let cart = Cartridge::from_ines(rom.as_slice()).unwrap();
        assert_eq!(cart.read_prg(0x8000), 0x7E);
        assert_eq!(cart.read_prg(0xC000), 0x7E);
        assert_eq!(cart.read_prg(0xFFFF), 0x7E);
    }

    #[test]
    fn test_prg_ram_round_trip() {
        let rom = build_ines(1, 1, 0, 0, 0);
        let mut cart = Cartridge::from_ines(rom.as_slice()).unwrap();
        cart.write_prg(0x6000, 0x42);
        cart.write_prg(0x7FFF, 0x43);
        assert_eq!(cart.read_prg(0x6000), 0x42);
        assert_eq!(cart.read_prg(0x7FFF), 0x43);
    }

    #[test]
    fn test_rom_write_ignored() {
        let rom = build_ines(1, 1, 0, 0, 0x11);
        let mut cart = Cartridge::from_ines(rom.as_slice()).unwrap();
        cart.write_prg(0x8000, 0x99);
        assert_eq!(cart.read_prg(0x8000), 0x11);
    }

    #[test]
    fn test_chr_ram_fallback() {
        // Zero CHR banks still serves a readable 8 KiB region
        let rom = build_ines(1, 0, 0, 0, 0);
        let cart = Cartridge::from_ines(rom.as_slice()).unwrap();
        assert_eq!(cart.read_chr(0x1FFF), 0x00);
    }
}
