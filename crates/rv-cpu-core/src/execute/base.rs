//! Base integer R/I/S/B/U/J instructions, `FENCE*`, and the system
//! instructions (`ECALL`/`EBREAK`/`*RET`/`WFI`/`SFENCE.VMA`) (§4.2).

use rv_decoder::{Format32, Instruction32};
use rv_types::{AccessKind, Exception, PrivilegeLevel};

use super::{dispatch_m, opcode, ExecOutcome};
use crate::CpuCore;

pub fn execute(cpu: &mut CpuCore, insn: Instruction32) -> Result<ExecOutcome, Exception> {
    match insn.opcode() {
        opcode::OP_IMM => op_imm(cpu, insn, false),
        opcode::OP_IMM_32 => op_imm(cpu, insn, true),
        opcode::OP => {
            if insn.funct7() == 0b0000001 {
                dispatch_m(cpu, insn)
            } else {
                op(cpu, insn, false)
            }
        }
        opcode::OP_32 => {
            if insn.funct7() == 0b0000001 {
                dispatch_m(cpu, insn)
            } else {
                op(cpu, insn, true)
            }
        }
        opcode::LOAD => load(cpu, insn),
        opcode::STORE => store(cpu, insn),
        opcode::BRANCH => branch(cpu, insn),
        opcode::JAL => {
            cpu.regs.write(insn.rd(), cpu.pc.wrapping_add(4));
            Ok(ExecOutcome::Jump(cpu.pc.wrapping_add(insn.imm(Format32::J) as u64)))
        }
        opcode::JALR => {
            let target = cpu.regs.read(insn.rs1()).wrapping_add(insn.imm(Format32::I) as u64) & !1u64;
            cpu.regs.write(insn.rd(), cpu.pc.wrapping_add(4));
            Ok(ExecOutcome::Jump(target))
        }
        opcode::LUI => {
            cpu.regs.write(insn.rd(), insn.imm(Format32::U) as u64);
            Ok(ExecOutcome::Retired)
        }
        opcode::AUIPC => {
            cpu.regs.write(insn.rd(), cpu.pc.wrapping_add(insn.imm(Format32::U) as u64));
            Ok(ExecOutcome::Retired)
        }
        opcode::MISC_MEM => Ok(ExecOutcome::Retired),
        _ => Err(Exception::IllegalInstruction { raw: insn.raw() }),
    }
}

fn op_imm(cpu: &mut CpuCore, insn: Instruction32, is_w: bool) -> Result<ExecOutcome, Exception> {
    let rs1 = cpu.regs.read(insn.rs1());
    let imm = insn.imm(Format32::I);
    let result: u64 = if is_w {
        let a = rs1 as i32;
        match insn.funct3() {
            0b000 => a.wrapping_add(imm as i32) as i64 as u64, // addiw
            0b001 => ((a as u32) << insn.shamt5()) as i32 as i64 as u64, // slliw
            0b101 => {
                if insn.raw() >> 30 & 1 == 1 {
                    (a >> insn.shamt5()) as i64 as u64 // sraiw
                } else {
                    ((a as u32) >> insn.shamt5()) as i32 as i64 as u64 // srliw
                }
            }
            _ => return Err(Exception::IllegalInstruction { raw: insn.raw() }),
        }
    } else {
        match insn.funct3() {
            0b000 => (rs1 as i64).wrapping_add(imm) as u64, // addi
            0b010 => ((rs1 as i64) < imm) as u64,           // slti
            0b011 => (rs1 < imm as u64) as u64,             // sltiu
            0b100 => rs1 ^ imm as u64,                      // xori
            0b110 => rs1 | imm as u64,                      // ori
            0b111 => rs1 & imm as u64,                      // andi
            0b001 => rs1 << insn.shamt6(),                  // slli
            0b101 => {
                if insn.raw() >> 30 & 1 == 1 {
                    ((rs1 as i64) >> insn.shamt6()) as u64 // srai
                } else {
                    rs1 >> insn.shamt6() // srli
                }
            }
            _ => return Err(Exception::IllegalInstruction { raw: insn.raw() }),
        }
    };
    cpu.regs.write(insn.rd(), result);
    Ok(ExecOutcome::Retired)
}

fn op(cpu: &mut CpuCore, insn: Instruction32, is_w: bool) -> Result<ExecOutcome, Exception> {
    let rs1 = cpu.regs.read(insn.rs1());
    let rs2 = cpu.regs.read(insn.rs2());
    let arith = insn.funct7() >> 5 & 1 == 1;
    let result: u64 = if is_w {
        let a = rs1 as i32;
        let b = rs2 as i32;
        match insn.funct3() {
            0b000 if !arith => a.wrapping_add(b) as i64 as u64, // addw
            0b000 if arith => a.wrapping_sub(b) as i64 as u64,  // subw
            0b001 => ((a as u32) << (b as u32 & 0x1f)) as i32 as i64 as u64, // sllw
            0b101 if !arith => ((a as u32) >> (b as u32 & 0x1f)) as i32 as i64 as u64, // srlw
            0b101 if arith => (a >> (b as u32 & 0x1f)) as i64 as u64, // sraw
            _ => return Err(Exception::IllegalInstruction { raw: insn.raw() }),
        }
    } else {
        match insn.funct3() {
            0b000 if !arith => (rs1 as i64).wrapping_add(rs2 as i64) as u64, // add
            0b000 if arith => (rs1 as i64).wrapping_sub(rs2 as i64) as u64,  // sub
            0b001 => rs1 << (rs2 & 0x3f),                                   // sll
            0b010 => ((rs1 as i64) < (rs2 as i64)) as u64,                  // slt
            0b011 => (rs1 < rs2) as u64,                                    // sltu
            0b100 => rs1 ^ rs2,                                             // xor
            0b101 if !arith => rs1 >> (rs2 & 0x3f),                         // srl
            0b101 if arith => ((rs1 as i64) >> (rs2 & 0x3f)) as u64,        // sra
            0b110 => rs1 | rs2,                                            // or
            0b111 => rs1 & rs2,                                            // and
            _ => return Err(Exception::IllegalInstruction { raw: insn.raw() }),
        }
    };
    cpu.regs.write(insn.rd(), result);
    Ok(ExecOutcome::Retired)
}

fn load(cpu: &mut CpuCore, insn: Instruction32) -> Result<ExecOutcome, Exception> {
    let addr = cpu.regs.read(insn.rs1()).wrapping_add(insn.imm(Format32::I) as u64);
    let (width, sext_bits): (u8, Option<u32>) = match insn.funct3() {
        0b000 => (1, Some(8)),  // lb
        0b001 => (2, Some(16)), // lh
        0b010 => (4, Some(32)), // lw
        0b011 => (8, None),     // ld
        0b100 => (1, None),     // lbu
        0b101 => (2, None),     // lhu
        0b110 => (4, None),     // lwu
        _ => return Err(Exception::IllegalInstruction { raw: insn.raw() }),
    };
    let raw = cpu.read_mem(addr, width, AccessKind::Load)?;
    let value = match sext_bits {
        Some(bits) => sign_extend(raw, bits),
        None => raw,
    };
    cpu.regs.write(insn.rd(), value);
    Ok(ExecOutcome::Retired)
}

fn store(cpu: &mut CpuCore, insn: Instruction32) -> Result<ExecOutcome, Exception> {
    let addr = cpu.regs.read(insn.rs1()).wrapping_add(insn.imm(Format32::S) as u64);
    let width: u8 = match insn.funct3() {
        0b000 => 1, // sb
        0b001 => 2, // sh
        0b010 => 4, // sw
        0b011 => 8, // sd
        _ => return Err(Exception::IllegalInstruction { raw: insn.raw() }),
    };
    let value = cpu.regs.read(insn.rs2());
    cpu.write_mem(addr, width, value, AccessKind::Store)?;
    Ok(ExecOutcome::Retired)
}

fn branch(cpu: &mut CpuCore, insn: Instruction32) -> Result<ExecOutcome, Exception> {
    let rs1 = cpu.regs.read(insn.rs1());
    let rs2 = cpu.regs.read(insn.rs2());
    let taken = match insn.funct3() {
        0b000 => rs1 == rs2,                       // beq
        0b001 => rs1 != rs2,                       // bne
        0b100 => (rs1 as i64) < (rs2 as i64),      // blt
        0b101 => (rs1 as i64) >= (rs2 as i64),     // bge
        0b110 => rs1 < rs2,                        // bltu
        0b111 => rs1 >= rs2,                       // bgeu
        _ => return Err(Exception::IllegalInstruction { raw: insn.raw() }),
    };
    if taken {
        Ok(ExecOutcome::Jump(cpu.pc.wrapping_add(insn.imm(Format32::B) as u64)))
    } else {
        Ok(ExecOutcome::Retired)
    }
}

fn sign_extend(value: u64, bits: u32) -> u64 {
    let shift = 64 - bits;
    (((value << shift) as i64) >> shift) as u64
}

pub fn execute_system(cpu: &mut CpuCore, insn: Instruction32) -> Result<ExecOutcome, Exception> {
    let rs2 = insn.rs2();
    let funct7 = insn.funct7();
    match (funct7, rs2) {
        (0, 0) => {
            if cpu.emulating_test {
                Ok(ExecOutcome::TestExit)
            } else {
                Err(Exception::ecall_from(cpu.privilege))
            }
        }
        (0, 1) => Err(Exception::Breakpoint),
        (0b0001000, 2) => {
            // SRET
            if cpu.privilege < PrivilegeLevel::Supervisor {
                return Err(Exception::IllegalInstruction { raw: insn.raw() });
            }
            if cpu.privilege == PrivilegeLevel::Supervisor && cpu.csrs.tsr() {
                return Err(Exception::IllegalInstruction { raw: insn.raw() });
            }
            cpu.sret();
            Ok(ExecOutcome::Jump(cpu.pc))
        }
        (0b0011000, 2) => {
            // MRET
            if cpu.privilege != PrivilegeLevel::Machine {
                return Err(Exception::IllegalInstruction { raw: insn.raw() });
            }
            cpu.mret();
            Ok(ExecOutcome::Jump(cpu.pc))
        }
        (0b0001000, 5) => {
            // WFI
            cpu.waiting_for_interrupt = true;
            Ok(ExecOutcome::Retired)
        }
        (0b0001001, _) => {
            // SFENCE.VMA
            if cpu.privilege == PrivilegeLevel::User {
                return Err(Exception::IllegalInstruction { raw: insn.raw() });
            }
            if cpu.privilege == PrivilegeLevel::Supervisor && cpu.csrs.tvm() {
                return Err(Exception::IllegalInstruction { raw: insn.raw() });
            }
            cpu.sfence_vma();
            Ok(ExecOutcome::Retired)
        }
        _ => Err(Exception::IllegalInstruction { raw: insn.raw() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CpuCore;

    fn enc_i(imm: i32, rs1: u8, funct3: u32, rd: u8, opcode: u32) -> u32 {
        ((imm as u32 & 0xfff) << 20) | ((rs1 as u32) << 15) | (funct3 << 12) | ((rd as u32) << 7) | opcode
    }

    #[test]
    fn addi_adds_sign_extended_immediate() {
        let mut cpu = CpuCore::new(0x1000, None);
        cpu.regs.write(1, 5);
        let insn = Instruction32(enc_i(-1, 1, 0, 2, opcode::OP_IMM));
        op_imm(&mut cpu, insn, false).unwrap();
        assert_eq!(cpu.regs.read(2), 4);
    }

    #[test]
    fn x0_destination_discards_result() {
        let mut cpu = CpuCore::new(0x1000, None);
        cpu.regs.write(1, 5);
        let insn = Instruction32(enc_i(10, 1, 0, 0, opcode::OP_IMM));
        op_imm(&mut cpu, insn, false).unwrap();
        assert_eq!(cpu.regs.read(0), 0);
    }
}
