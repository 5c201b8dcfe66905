//! Pending-interrupt resolution and the trap-delivery algorithm (§4.2 step 2
//! and §4.4). Kept independent of the interpreter's fetch/execute loop so it
//! can be unit-tested against synthetic CSR states, the same separation the
//! teacher draws between its interrupt-controller trait and the CPU core
//! that calls it.

#![forbid(unsafe_code)]

use rv_csr::{addr, interrupt_bits, CsrFile, TrapVectorMode};
use rv_types::{Interrupt, PrivilegeLevel, CAUSE_INTERRUPT_BIT};

fn interrupt_bit(i: Interrupt) -> u64 {
    match i {
        Interrupt::SupervisorSoftware => interrupt_bits::SSIP,
        Interrupt::MachineSoftware => interrupt_bits::MSIP,
        Interrupt::SupervisorTimer => interrupt_bits::STIP,
        Interrupt::MachineTimer => interrupt_bits::MTIP,
        Interrupt::SupervisorExternal => interrupt_bits::SEIP,
        Interrupt::MachineExternal => interrupt_bits::MEIP,
    }
}

/// Resolve the single interrupt (if any) that should be taken right now,
/// given the pending/enabled bits in `csrs` and the hart's current
/// privilege. Priority order is MEI, MSI, MTI, SEI, SSI, STI (§4.2).
pub fn resolve_pending_interrupt(csrs: &CsrFile, current: PrivilegeLevel) -> Option<Interrupt> {
    let pending_enabled = csrs.mip_bits() & csrs.mie_bits();
    for &cause in Interrupt::PRIORITY_ORDER.iter() {
        let bit = interrupt_bit(cause);
        if pending_enabled & bit == 0 {
            continue;
        }
        let delegated = csrs.mideleg() & bit != 0;
        let taken = if delegated && current <= PrivilegeLevel::Supervisor {
            current < PrivilegeLevel::Supervisor || csrs.sie()
        } else {
            current < PrivilegeLevel::Machine || csrs.mie()
        };
        if taken {
            return Some(cause);
        }
    }
    None
}

/// The result of delivering a trap: the hart's privilege changes and PC
/// lands at the vector entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrapOutcome {
    pub new_privilege: PrivilegeLevel,
    pub new_pc: u64,
}

/// Deliver a trap (exception or interrupt) per §4.4: decide destination
/// mode, save `*epc`/`*cause`/`*tval`, flip the relevant `mstatus` bits, and
/// compute the entry PC.
pub fn deliver_trap(
    csrs: &mut CsrFile,
    current: PrivilegeLevel,
    cause_code: u64,
    is_interrupt: bool,
    tval: u64,
    faulting_or_next_pc: u64,
) -> TrapOutcome {
    let deleg_bits = if is_interrupt { csrs.mideleg() } else { csrs.medeleg() };
    let to_supervisor = current <= PrivilegeLevel::Supervisor && (deleg_bits >> cause_code) & 1 != 0;

    let cause_value = if is_interrupt {
        cause_code | CAUSE_INTERRUPT_BIT
    } else {
        cause_code
    };

    if to_supervisor {
        csrs.sepc = faulting_or_next_pc;
        csrs.scause_set(cause_value);
        csrs.stval_set(tval);
        csrs.set_spie(csrs.sie());
        csrs.set_sie(false);
        csrs.set_spp(current);
        let pc = csrs.stvec.entry_pc(cause_code, is_interrupt);
        // stvec never uses vectored dispatch with a mode other than what's
        // legalized on write; the helper above handles both.
        let _ = TrapVectorMode::Direct; // keep symmetry obvious at a glance
        TrapOutcome {
            new_privilege: PrivilegeLevel::Supervisor,
            new_pc: pc,
        }
    } else {
        csrs.mepc = faulting_or_next_pc;
        csrs.mcause_set(cause_value);
        csrs.mtval_set(tval);
        csrs.set_mpie(csrs.mie());
        csrs.set_mie(false);
        csrs.set_mpp(current);
        let pc = csrs.mtvec.entry_pc(cause_code, is_interrupt);
        TrapOutcome {
            new_privilege: PrivilegeLevel::Machine,
            new_pc: pc,
        }
    }
}

/// `MRET`: restore privilege/PC from the machine-mode trap frame (§4.3).
pub fn mret(csrs: &mut CsrFile) -> TrapOutcome {
    let mpp = csrs.mpp();
    csrs.set_mie(csrs.mpie());
    csrs.set_mpie(true);
    csrs.set_mpp(PrivilegeLevel::User);
    if mpp != PrivilegeLevel::Machine {
        csrs.clear_mprv();
    }
    TrapOutcome {
        new_privilege: mpp,
        new_pc: csrs.mepc,
    }
}

/// `SRET`: restore privilege/PC from the supervisor-mode trap frame (§4.3).
/// Caller is responsible for the `mstatus.TSR` illegal-instruction check.
pub fn sret(csrs: &mut CsrFile) -> TrapOutcome {
    let spp = csrs.spp();
    csrs.set_sie(csrs.spie());
    csrs.set_spie(true);
    csrs.set_spp(PrivilegeLevel::User);
    if spp != PrivilegeLevel::Machine {
        csrs.clear_mprv();
    }
    TrapOutcome {
        new_privilege: spp,
        new_pc: csrs.sepc,
    }
}
