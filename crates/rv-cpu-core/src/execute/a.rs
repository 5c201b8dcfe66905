//! A-extension: load-reserved/store-conditional and atomic memory
//! operations (§4.2, §9 "Reservation set").
//!
//! `LR` is translated as a load; `SC` and the AMOs are translated as
//! stores, since [`rv_mmu::AccessKind`] only distinguishes three access
//! kinds and an atomic read-modify-write needs write permission anyway.

use rv_decoder::Instruction32;
use rv_types::{AccessKind, Exception};

use super::ExecOutcome;
use crate::CpuCore;

pub fn execute(cpu: &mut CpuCore, insn: Instruction32) -> Result<ExecOutcome, Exception> {
    let width: u8 = match insn.funct3() {
        0b010 => 4, // .W
        0b011 => 8, // .D
        _ => return Err(Exception::IllegalInstruction { raw: insn.raw() }),
    };
    let funct5 = insn.funct7() >> 2;
    let addr = cpu.regs.read(insn.rs1());

    match funct5 {
        0b00010 => lr(cpu, insn, addr, width), // LR
        0b00011 => sc(cpu, insn, addr, width), // SC
        _ => amo(cpu, insn, addr, width, funct5),
    }
}

fn sign_extend_word(value: u64) -> u64 {
    value as u32 as i32 as i64 as u64
}

fn lr(cpu: &mut CpuCore, insn: Instruction32, addr: u64, width: u8) -> Result<ExecOutcome, Exception> {
    let pa = cpu.translate(addr, width, AccessKind::Load)?;
    let raw = cpu.bus.read(pa, width, AccessKind::Load)?;
    let value = if width == 4 { sign_extend_word(raw) } else { raw };
    cpu.reservation.reserve(pa);
    cpu.regs.write(insn.rd(), value);
    Ok(ExecOutcome::Retired)
}

fn sc(cpu: &mut CpuCore, insn: Instruction32, addr: u64, width: u8) -> Result<ExecOutcome, Exception> {
    let pa = cpu.translate(addr, width, AccessKind::Store)?;
    let result = if cpu.reservation.try_consume(pa) {
        let value = cpu.regs.read(insn.rs2());
        cpu.bus.write(pa, width, value, AccessKind::Store)?;
        0
    } else {
        1
    };
    cpu.regs.write(insn.rd(), result);
    Ok(ExecOutcome::Retired)
}

fn amo(cpu: &mut CpuCore, insn: Instruction32, addr: u64, width: u8, funct5: u32) -> Result<ExecOutcome, Exception> {
    let pa = cpu.translate(addr, width, AccessKind::Store)?;
    let raw_old = cpu.bus.read(pa, width, AccessKind::Load)?;
    let old = if width == 4 { sign_extend_word(raw_old) } else { raw_old };
    let operand = cpu.regs.read(insn.rs2());

    let new: u64 = match funct5 {
        0b00001 => operand,                                                    // AMOSWAP
        0b00000 => wrapping_add(old, operand, width),                          // AMOADD
        0b00100 => old ^ operand,                                              // AMOXOR
        0b01100 => old & operand,                                              // AMOAND
        0b01000 => old | operand,                                              // AMOOR
        0b10000 => signed_min(old, operand, width),                            // AMOMIN
        0b10100 => signed_max(old, operand, width),                            // AMOMAX
        0b11000 => unsigned_min(old, operand, width),                          // AMOMINU
        0b11100 => unsigned_max(old, operand, width),                          // AMOMAXU
        _ => return Err(Exception::IllegalInstruction { raw: insn.raw() }),
    };

    cpu.bus.write(pa, width, new, AccessKind::Store)?;
    cpu.reservation.invalidate(pa);
    cpu.regs.write(insn.rd(), old);
    Ok(ExecOutcome::Retired)
}

fn wrapping_add(a: u64, b: u64, width: u8) -> u64 {
    if width == 4 {
        sign_extend_word((a as u32).wrapping_add(b as u32) as u64)
    } else {
        a.wrapping_add(b)
    }
}

fn signed_min(a: u64, b: u64, width: u8) -> u64 {
    if width == 4 {
        (a as i32).min(b as i32) as i64 as u64
    } else {
        (a as i64).min(b as i64) as u64
    }
}

fn signed_max(a: u64, b: u64, width: u8) -> u64 {
    if width == 4 {
        (a as i32).max(b as i32) as i64 as u64
    } else {
        (a as i64).max(b as i64) as u64
    }
}

fn unsigned_min(a: u64, b: u64, width: u8) -> u64 {
    if width == 4 {
        sign_extend_word((a as u32).min(b as u32) as u64)
    } else {
        a.min(b)
    }
}

fn unsigned_max(a: u64, b: u64, width: u8) -> u64 {
    if width == 4 {
        sign_extend_word((a as u32).max(b as u32) as u64)
    } else {
        a.max(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CpuCore;

    #[test]
    fn sc_without_lr_fails() {
        let mut cpu = CpuCore::new(0x1000, None);
        cpu.regs.write(1, rv_devices::RAM_BASE);
        cpu.regs.write(2, 99);
        // sc.d x3, x2, (x1)
        let sc_word = (0b00011 << 27) | (1 << 25) | (2 << 20) | (1 << 15) | (0b011 << 12) | (3 << 7) | 0b0101111;
        let insn = Instruction32(sc_word);
        sc(&mut cpu, insn, cpu.regs.read(1), 8).unwrap();
        assert_eq!(cpu.regs.read(3), 1);
    }

    #[test]
    fn lr_then_sc_succeeds_without_intervening_write() {
        let mut cpu = CpuCore::new(0x1000, None);
        let addr = rv_devices::RAM_BASE;
        cpu.regs.write(1, addr);
        cpu.regs.write(2, 0xabcd);
        lr(&mut cpu, Instruction32(0), addr, 8).unwrap();
        let insn = Instruction32((2 << 20) | (1 << 15) | (3 << 7));
        sc(&mut cpu, insn, addr, 8).unwrap();
        assert_eq!(cpu.regs.read(3), 0);
    }
}
