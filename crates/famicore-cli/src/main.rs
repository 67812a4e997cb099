//! Command line harness for the famicore NES emulator.
//!
//! Loads an iNES ROM, runs a bounded number of instruction steps, and can
//! print a nestest-style trace line per step for comparison against
//! reference logs.

use std::fs::File;
use std::path::PathBuf;
use std::process;

use clap::Parser;
use famicore::system::Nes;

/// NES core emulator CLI
#[derive(Parser, Debug)]
#[command(name = "famicore-cli")]
#[command(about = "Run an iNES ROM through the famicore emulator", long_about = None)]
struct Args {
    /// Path to the iNES ROM file
    #[arg(short, long)]
    rom: PathBuf,

    /// Number of instruction steps to run
    #[arg(short, long, default_value = "1000")]
    steps: u64,

    /// Override the program counter after reset (hex, e.g. C000)
    #[arg(long, value_parser = parse_hex_u16)]
    start: Option<u16>,

    /// Print a trace line (PC, opcode, registers, cycles) before each step
    #[arg(short, long)]
    trace: bool,

    /// Freeze PPU timing while running
    #[arg(long)]
    no_ppu: bool,

    /// Dump CPU state after execution
    #[arg(short = 'c', long)]
    dump_cpu: bool,

    /// Dump PPU state after execution
    #[arg(short = 'p', long)]
    dump_ppu: bool,
}

fn parse_hex_u16(value: &str) -> Result<u16, String> {
    u16::from_str_radix(value.trim_start_matches("0x"), 16).map_err(|e| e.to_string())
}

fn main() {
    let args = Args::parse();

    let file = match File::open(&args.rom) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Failed to open ROM file: {}", e);
            process::exit(1);
        }
    };

    let mut nes = match Nes::from_ines(file) {
        Ok(nes) => nes,
        Err(e) => {
            eprintln!("Failed to load ROM: {}", e);
            process::exit(1);
        }
    };

    if args.no_ppu {
        nes.set_ppu_enabled(false);
    }
    if let Some(start) = args.start {
        nes.cpu_mut().registers.pc = start;
    }

    for _ in 0..args.steps {
        if args.trace {
            println!("{}", trace_line(&mut nes));
        }
        if let Err(e) = nes.step() {
            eprintln!("Execution stopped: {}", e);
            process::exit(1);
        }
    }

    if args.dump_cpu {
        dump_cpu_state(&nes);
    }
    if args.dump_ppu {
        dump_ppu_state(&nes);
    }
}

/// One nestest-log shaped line: PC, opcode byte, registers, cumulative
/// cycle count.
fn trace_line(nes: &mut Nes) -> String {
    let pc = nes.cpu().registers.pc;
    let opcode = nes.read_memory(pc);
    let registers = nes.cpu().registers;
    format!(
        "{:04X}  {:02X}  A:{:02X} X:{:02X} Y:{:02X} P:{:02X} SP:{:02X} CYC:{}",
        pc,
        opcode,
        registers.a,
        registers.x,
        registers.y,
        registers.p.bits(),
        registers.sp,
        nes.cpu().total_cycles(),
    )
}

fn dump_cpu_state(nes: &Nes) {
    let registers = nes.cpu().registers;
    println!("CPU state:");
    println!("  A:    ${:02X}", registers.a);
    println!("  X:    ${:02X}", registers.x);
    println!("  Y:    ${:02X}", registers.y);
    println!("  PC:   ${:04X}", registers.pc);
    println!("  SP:   ${:02X}", registers.sp);
    println!("  P:    ${:02X} ({})", registers.p.bits(), registers.p);
    println!("  Cycles: {}", nes.cpu().total_cycles());
}

fn dump_ppu_state(nes: &Nes) {
    let ppu = nes.ppu();
    println!("PPU state:");
    println!("  Phase:    {:?}", ppu.phase());
    println!("  Scanline: {}", ppu.scanline());
    println!("  Dot:      {}", ppu.dot());
    println!("  VBLANK:   {}", ppu.status().vblank());
}
