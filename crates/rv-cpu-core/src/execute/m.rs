//! M-extension: integer multiply/divide/remainder (§4.2).
//!
//! Division by zero and the `MIN / -1` overflow case never trap; they
//! produce the fixed results the ISA manual specifies.

use rv_decoder::Instruction32;
use rv_types::Exception;

use super::{opcode, ExecOutcome};
use crate::CpuCore;

pub fn execute(cpu: &mut CpuCore, insn: Instruction32) -> Result<ExecOutcome, Exception> {
    let is_w = insn.opcode() == opcode::OP_32;
    let rs1 = cpu.regs.read(insn.rs1());
    let rs2 = cpu.regs.read(insn.rs2());

    let result: u64 = if is_w {
        let a = rs1 as i32;
        let b = rs2 as i32;
        match insn.funct3() {
            0b000 => a.wrapping_mul(b) as i64 as u64, // mulw
            0b100 => div_w(a, b),                     // divw
            0b101 => divu_w(a as u32, b as u32),       // divuw
            0b110 => rem_w(a, b),                      // remw
            0b111 => remu_w(a as u32, b as u32),       // remuw
            _ => return Err(Exception::IllegalInstruction { raw: insn.raw() }),
        }
    } else {
        match insn.funct3() {
            0b000 => (rs1 as i64).wrapping_mul(rs2 as i64) as u64, // mul
            0b001 => (((rs1 as i64 as i128) * (rs2 as i64 as i128)) >> 64) as u64, // mulh
            0b010 => (((rs1 as i64 as i128) * (rs2 as u64 as i128)) >> 64) as u64, // mulhsu
            0b011 => (((rs1 as u128) * (rs2 as u128)) >> 64) as u64,              // mulhu
            0b100 => div(rs1 as i64, rs2 as i64),                                 // div
            0b101 => divu(rs1, rs2),                                             // divu
            0b110 => rem(rs1 as i64, rs2 as i64),                                 // rem
            0b111 => remu(rs1, rs2),                                             // remu
            _ => return Err(Exception::IllegalInstruction { raw: insn.raw() }),
        }
    };
    cpu.regs.write(insn.rd(), result);
    Ok(ExecOutcome::Retired)
}

fn div(a: i64, b: i64) -> u64 {
    if b == 0 {
        u64::MAX
    } else if a == i64::MIN && b == -1 {
        a as u64
    } else {
        a.wrapping_div(b) as u64
    }
}

fn rem(a: i64, b: i64) -> u64 {
    if b == 0 {
        a as u64
    } else if a == i64::MIN && b == -1 {
        0
    } else {
        a.wrapping_rem(b) as u64
    }
}

fn divu(a: u64, b: u64) -> u64 {
    if b == 0 {
        u64::MAX
    } else {
        a / b
    }
}

fn remu(a: u64, b: u64) -> u64 {
    if b == 0 {
        a
    } else {
        a % b
    }
}

fn div_w(a: i32, b: i32) -> u64 {
    let result = if b == 0 {
        -1i32
    } else if a == i32::MIN && b == -1 {
        a
    } else {
        a.wrapping_div(b)
    };
    result as i64 as u64
}

fn rem_w(a: i32, b: i32) -> u64 {
    let result = if b == 0 {
        a
    } else if a == i32::MIN && b == -1 {
        0
    } else {
        a.wrapping_rem(b)
    };
    result as i64 as u64
}

fn divu_w(a: u32, b: u32) -> u64 {
    let result = if b == 0 { u32::MAX } else { a / b };
    result as i32 as i64 as u64
}

fn remu_w(a: u32, b: u32) -> u64 {
    let result = if b == 0 { a } else { a % b };
    result as i32 as i64 as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn div_by_zero_yields_all_ones() {
        assert_eq!(div(42, 0), u64::MAX);
    }

    #[test]
    fn rem_by_zero_yields_dividend() {
        assert_eq!(rem(42, 0), 42u64);
    }

    #[test]
    fn signed_overflow_divide_saturates_to_dividend() {
        assert_eq!(div(i64::MIN, -1), i64::MIN as u64);
        assert_eq!(rem(i64::MIN, -1), 0);
    }

    #[test]
    fn mulhu_computes_high_bits_of_unsigned_product() {
        let a = u64::MAX;
        let b = 2u64;
        let expected = (((a as u128) * (b as u128)) >> 64) as u64;
        assert_eq!(expected, 1);
    }
}
