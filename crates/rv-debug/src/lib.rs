//! Trace-dump formatting for fatal errors (§7 "User-visible behavior").
//!
//! Kept as its own crate so `rv-cpu-core` doesn't have to pick an output
//! format (or pull in `serde`) just to let a fatal trap be diagnosed.

use rv_cpu_core::CpuCore;
use serde::Serialize;

/// A serializable snapshot of architectural state, taken at the point a
/// fatal, non-architectural error is detected (§7: unmapped bus address,
/// unsupported CSR, corrupt virtio configuration - "programming errors,
/// not architectural traps").
#[derive(Debug, Serialize)]
pub struct TraceDump {
    pub pc: u64,
    pub privilege: String,
    pub registers: [u64; 32],
    pub fp_registers: [u64; 32],
    pub mcause: u64,
    pub mepc: u64,
    pub mtval: u64,
}

impl TraceDump {
    pub fn capture(cpu: &CpuCore) -> Self {
        let mcause = cpu.csrs.read(rv_csr::addr::MCAUSE, rv_types::PrivilegeLevel::Machine).unwrap_or(0);
        let mepc = cpu.csrs.read(rv_csr::addr::MEPC, rv_types::PrivilegeLevel::Machine).unwrap_or(0);
        let mtval = cpu.csrs.read(rv_csr::addr::MTVAL, rv_types::PrivilegeLevel::Machine).unwrap_or(0);
        let mut fp_registers = [0u64; 32];
        for (i, slot) in fp_registers.iter_mut().enumerate() {
            *slot = cpu.fp.read_bits(i as u8);
        }
        TraceDump {
            pc: cpu.pc,
            privilege: format!("{:?}", cpu.privilege),
            registers: *cpu.regs.all(),
            fp_registers,
            mcause,
            mepc,
            mtval,
        }
    }

    /// Render as the human-readable block the binary prints to stderr
    /// before exiting.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("fatal error at pc={:#018x} (privilege={})\n", self.pc, self.privilege));
        for (i, value) in self.registers.iter().enumerate() {
            out.push_str(&format!("x{i:<2}: {value:#018x}\n"));
        }
        out.push_str(&format!("mcause: {:#018x}  mepc: {:#018x}  mtval: {:#018x}\n", self.mcause, self.mepc, self.mtval));
        out
    }

    pub fn render_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Build the full fatal-error report: a one-line message, the text dump,
/// and a pretty JSON snapshot for machine consumption.
pub fn fatal_report(cpu: &CpuCore, message: &str) -> String {
    let dump = TraceDump::capture(cpu);
    let json = dump.render_json().unwrap_or_else(|e| format!("{{\"error\": \"failed to serialize trace: {e}\"}}"));
    format!("{message}\n\n{}\n{json}\n", dump.render_text())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_reads_live_register_state() {
        let mut cpu = CpuCore::new(0x1000, None);
        cpu.regs.write(5, 0x1234);
        let dump = TraceDump::capture(&cpu);
        assert_eq!(dump.registers[5], 0x1234);
        assert_eq!(dump.pc, cpu.pc);
    }

    #[test]
    fn render_json_round_trips_through_serde() {
        let cpu = CpuCore::new(0x1000, None);
        let dump = TraceDump::capture(&cpu);
        let json = dump.render_json().unwrap();
        assert!(json.contains("\"pc\""));
    }
}
