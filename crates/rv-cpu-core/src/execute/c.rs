//! C extension: 16-bit compressed instruction expansion (§4.2).
//!
//! Each compressed form is handled by computing the equivalent base-ISA
//! effect directly (register file / PC updates), rather than by
//! synthesizing a 32-bit word and re-dispatching - there is no benefit to
//! the indirection and it would just make illegal-encoding detection
//! harder to follow.

use rv_decoder::Instruction16;
use rv_types::{AccessKind, Exception};

use super::ExecOutcome;
use crate::CpuCore;

pub fn execute(cpu: &mut CpuCore, raw: u16) -> Result<ExecOutcome, Exception> {
    let insn = Instruction16(raw);
    if raw == 0 {
        return Err(Exception::IllegalInstruction { raw: raw as u32 });
    }
    match insn.op() {
        0b00 => quadrant0(cpu, insn),
        0b01 => quadrant1(cpu, insn),
        0b10 => quadrant2(cpu, insn),
        _ => Err(Exception::IllegalInstruction { raw: raw as u32 }),
    }
}

fn illegal(insn: Instruction16) -> Exception {
    Exception::IllegalInstruction { raw: insn.raw() as u32 }
}

fn quadrant0(cpu: &mut CpuCore, insn: Instruction16) -> Result<ExecOutcome, Exception> {
    let rd = insn.rd_rs2_short();
    let rs1 = insn.rd_rs1_short();
    match insn.funct3() {
        0b000 => {
            // C.ADDI4SPN
            let uimm = insn.addi4spn_uimm();
            if uimm == 0 {
                return Err(illegal(insn));
            }
            cpu.regs.write(rd, cpu.regs.read(2).wrapping_add(uimm as u64));
            Ok(ExecOutcome::Retired)
        }
        0b001 => {
            // C.FLD
            let addr = cpu.regs.read(rs1).wrapping_add(insn.ld_sd_offset() as u64);
            let bits = cpu.read_mem(addr, 8, AccessKind::Load)?;
            cpu.fp.write_f64(rd, f64::from_bits(bits));
            Ok(ExecOutcome::Retired)
        }
        0b010 => {
            // C.LW
            let addr = cpu.regs.read(rs1).wrapping_add(insn.lw_sw_offset() as u64);
            let raw = cpu.read_mem(addr, 4, AccessKind::Load)?;
            cpu.regs.write(rd, raw as i32 as i64 as u64);
            Ok(ExecOutcome::Retired)
        }
        0b011 => {
            // C.LD
            let addr = cpu.regs.read(rs1).wrapping_add(insn.ld_sd_offset() as u64);
            let value = cpu.read_mem(addr, 8, AccessKind::Load)?;
            cpu.regs.write(rd, value);
            Ok(ExecOutcome::Retired)
        }
        0b101 => {
            // C.FSD
            let addr = cpu.regs.read(rs1).wrapping_add(insn.ld_sd_offset() as u64);
            let bits = cpu.fp.read_f64(rd).to_bits();
            cpu.write_mem(addr, 8, bits, AccessKind::Store)?;
            Ok(ExecOutcome::Retired)
        }
        0b110 => {
            // C.SW
            let addr = cpu.regs.read(rs1).wrapping_add(insn.lw_sw_offset() as u64);
            cpu.write_mem(addr, 4, cpu.regs.read(rd), AccessKind::Store)?;
            Ok(ExecOutcome::Retired)
        }
        0b111 => {
            // C.SD
            let addr = cpu.regs.read(rs1).wrapping_add(insn.ld_sd_offset() as u64);
            cpu.write_mem(addr, 8, cpu.regs.read(rd), AccessKind::Store)?;
            Ok(ExecOutcome::Retired)
        }
        _ => Err(illegal(insn)),
    }
}

fn quadrant1(cpu: &mut CpuCore, insn: Instruction16) -> Result<ExecOutcome, Exception> {
    match insn.funct3() {
        0b000 => {
            // C.ADDI (and C.NOP when rd == 0)
            let rd = insn.rd_rs1_full();
            let v = cpu.regs.read(rd).wrapping_add(insn.ci_imm() as u64);
            cpu.regs.write(rd, v);
            Ok(ExecOutcome::Retired)
        }
        0b001 => {
            // C.ADDIW
            let rd = insn.rd_rs1_full();
            if rd == 0 {
                return Err(illegal(insn));
            }
            let result = (cpu.regs.read(rd) as i32).wrapping_add(insn.ci_imm() as i32);
            cpu.regs.write(rd, result as i64 as u64);
            Ok(ExecOutcome::Retired)
        }
        0b010 => {
            // C.LI
            let rd = insn.rd_rs1_full();
            cpu.regs.write(rd, insn.ci_imm() as u64);
            Ok(ExecOutcome::Retired)
        }
        0b011 => {
            let rd = insn.rd_rs1_full();
            if rd == 2 {
                // C.ADDI16SP
                let imm = insn.addi16sp_imm();
                if imm == 0 {
                    return Err(illegal(insn));
                }
                let sp = cpu.regs.read(2).wrapping_add(imm as u64);
                cpu.regs.write(2, sp);
            } else {
                // C.LUI
                let imm = insn.lui_imm();
                if imm == 0 || rd == 0 {
                    return Err(illegal(insn));
                }
                cpu.regs.write(rd, imm as u64);
            }
            Ok(ExecOutcome::Retired)
        }
        0b100 => alu_quadrant1(cpu, insn),
        0b101 => {
            // C.J
            Ok(ExecOutcome::Jump(cpu.pc.wrapping_add(insn.jump_offset() as u64)))
        }
        0b110 => {
            // C.BEQZ
            let rs1 = insn.rd_rs1_short();
            if cpu.regs.read(rs1) == 0 {
                Ok(ExecOutcome::Jump(cpu.pc.wrapping_add(insn.branch_offset() as u64)))
            } else {
                Ok(ExecOutcome::Retired)
            }
        }
        0b111 => {
            // C.BNEZ
            let rs1 = insn.rd_rs1_short();
            if cpu.regs.read(rs1) != 0 {
                Ok(ExecOutcome::Jump(cpu.pc.wrapping_add(insn.branch_offset() as u64)))
            } else {
                Ok(ExecOutcome::Retired)
            }
        }
        _ => Err(illegal(insn)),
    }
}

fn alu_quadrant1(cpu: &mut CpuCore, insn: Instruction16) -> Result<ExecOutcome, Exception> {
    let rd = insn.rd_rs1_short();
    match insn.funct2() {
        0b00 => {
            // C.SRLI
            let v = cpu.regs.read(rd) >> insn.shamt();
            cpu.regs.write(rd, v);
            Ok(ExecOutcome::Retired)
        }
        0b01 => {
            // C.SRAI
            let v = ((cpu.regs.read(rd) as i64) >> insn.shamt()) as u64;
            cpu.regs.write(rd, v);
            Ok(ExecOutcome::Retired)
        }
        0b10 => {
            // C.ANDI
            let v = cpu.regs.read(rd) & insn.ci_imm() as u64;
            cpu.regs.write(rd, v);
            Ok(ExecOutcome::Retired)
        }
        0b11 => {
            let rs2 = insn.rd_rs2_short();
            let is_word = insn.raw() >> 12 & 1 == 1;
            let sub_op = (insn.raw() >> 5) & 0b11;
            let a = cpu.regs.read(rd);
            let b = cpu.regs.read(rs2);
            let result: u64 = if is_word {
                let a32 = a as i32;
                let b32 = b as i32;
                match sub_op {
                    0b00 => a32.wrapping_sub(b32) as i64 as u64, // C.SUBW
                    0b01 => a32.wrapping_add(b32) as i64 as u64, // C.ADDW
                    _ => return Err(illegal(insn)),
                }
            } else {
                match sub_op {
                    0b00 => (a as i64).wrapping_sub(b as i64) as u64, // C.SUB
                    0b01 => a ^ b,                                    // C.XOR
                    0b10 => a | b,                                    // C.OR
                    0b11 => a & b,                                    // C.AND
                    _ => unreachable!(),
                }
            };
            cpu.regs.write(rd, result);
            Ok(ExecOutcome::Retired)
        }
        _ => Err(illegal(insn)),
    }
}

fn quadrant2(cpu: &mut CpuCore, insn: Instruction16) -> Result<ExecOutcome, Exception> {
    match insn.funct3() {
        0b000 => {
            // C.SLLI
            let rd = insn.rd_rs1_full();
            let v = cpu.regs.read(rd) << insn.shamt();
            cpu.regs.write(rd, v);
            Ok(ExecOutcome::Retired)
        }
        0b001 => {
            // C.FLDSP
            let rd = insn.rd_rs1_full();
            let addr = cpu.regs.read(2).wrapping_add(insn.ldsp_offset() as u64);
            let bits = cpu.read_mem(addr, 8, AccessKind::Load)?;
            cpu.fp.write_f64(rd, f64::from_bits(bits));
            Ok(ExecOutcome::Retired)
        }
        0b010 => {
            // C.LWSP
            let rd = insn.rd_rs1_full();
            if rd == 0 {
                return Err(illegal(insn));
            }
            let addr = cpu.regs.read(2).wrapping_add(insn.lwsp_offset() as u64);
            let raw = cpu.read_mem(addr, 4, AccessKind::Load)?;
            cpu.regs.write(rd, raw as i32 as i64 as u64);
            Ok(ExecOutcome::Retired)
        }
        0b011 => {
            // C.LDSP
            let rd = insn.rd_rs1_full();
            if rd == 0 {
                return Err(illegal(insn));
            }
            let addr = cpu.regs.read(2).wrapping_add(insn.ldsp_offset() as u64);
            let value = cpu.read_mem(addr, 8, AccessKind::Load)?;
            cpu.regs.write(rd, value);
            Ok(ExecOutcome::Retired)
        }
        0b100 => quadrant2_system(cpu, insn),
        0b101 => {
            // C.FSDSP
            let rs2 = insn.rs2_full();
            let addr = cpu.regs.read(2).wrapping_add(insn.sdsp_offset() as u64);
            let bits = cpu.fp.read_f64(rs2).to_bits();
            cpu.write_mem(addr, 8, bits, AccessKind::Store)?;
            Ok(ExecOutcome::Retired)
        }
        0b110 => {
            // C.SWSP
            let rs2 = insn.rs2_full();
            let addr = cpu.regs.read(2).wrapping_add(insn.swsp_offset() as u64);
            cpu.write_mem(addr, 4, cpu.regs.read(rs2), AccessKind::Store)?;
            Ok(ExecOutcome::Retired)
        }
        0b111 => {
            // C.SDSP
            let rs2 = insn.rs2_full();
            let addr = cpu.regs.read(2).wrapping_add(insn.sdsp_offset() as u64);
            cpu.write_mem(addr, 8, cpu.regs.read(rs2), AccessKind::Store)?;
            Ok(ExecOutcome::Retired)
        }
        _ => Err(illegal(insn)),
    }
}

fn quadrant2_system(cpu: &mut CpuCore, insn: Instruction16) -> Result<ExecOutcome, Exception> {
    let rd_rs1 = insn.rd_rs1_full();
    let rs2 = insn.rs2_full();
    let bit12 = insn.funct4() & 1;
    match (bit12, rs2, rd_rs1) {
        (0, 0, 0) => Err(illegal(insn)), // reserved: C.SLLI64/hint space
        (0, 0, _) => {
            // C.JR
            Ok(ExecOutcome::Jump(cpu.regs.read(rd_rs1) & !1u64))
        }
        (0, _, 0) => Err(illegal(insn)),
        (0, _, _) => {
            // C.MV
            cpu.regs.write(rd_rs1, cpu.regs.read(rs2));
            Ok(ExecOutcome::Retired)
        }
        (1, 0, 0) => Err(Exception::Breakpoint), // C.EBREAK
        (1, 0, _) => {
            // C.JALR
            let target = cpu.regs.read(rd_rs1) & !1u64;
            cpu.regs.write(1, cpu.pc.wrapping_add(2));
            Ok(ExecOutcome::Jump(target))
        }
        (1, _, _) => {
            // C.ADD
            let v = cpu.regs.read(rd_rs1).wrapping_add(cpu.regs.read(rs2));
            cpu.regs.write(rd_rs1, v);
            Ok(ExecOutcome::Retired)
        }
        _ => Err(illegal(insn)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CpuCore;

    #[test]
    fn c_addi_adds_immediate_to_register() {
        let mut cpu = CpuCore::new(0x1000, None);
        cpu.regs.write(1, 10);
        // c.addi x1, 2: funct3=000, imm bits: hi=0, lo=00010, rd=1
        let word: u16 = (0 << 12) | (0b00010 << 2) | (1 << 7) | 0b01;
        execute(&mut cpu, word).unwrap();
        assert_eq!(cpu.regs.read(1), 12);
    }

    #[test]
    fn c_mv_copies_register() {
        let mut cpu = CpuCore::new(0x1000, None);
        cpu.regs.write(2, 0xdead);
        // c.mv x1, x2: op=10, funct3=100, bit12=0, rd=1, rs2=2
        let word: u16 = (0b100 << 13) | (1 << 7) | (2 << 2) | 0b10;
        execute(&mut cpu, word).unwrap();
        assert_eq!(cpu.regs.read(1), 0xdead);
    }

    #[test]
    fn c_j_jumps_by_signed_offset() {
        let mut cpu = CpuCore::new(0x1000, None);
        cpu.pc = rv_devices::RAM_BASE;
        // c.j +0: all offset bits zero, funct3=101, op=01
        let word: u16 = (0b101 << 13) | 0b01;
        match execute(&mut cpu, word).unwrap() {
            ExecOutcome::Jump(target) => assert_eq!(target, rv_devices::RAM_BASE),
            _ => panic!("expected jump"),
        }
    }
}
