//! End-to-end timer-interrupt delivery (§8 scenario 3): a hart parked in
//! `WFI` wakes and traps to `mtvec` once `mtime` reaches `mtimecmp`.

use rv_cpu_core::{CpuCore, StepOutcome};
use rv_csr::{addr, interrupt_bits, mstatus_bits};
use rv_types::{AccessKind, PrivilegeLevel};

const CLINT_MTIMECMP: u64 = 0x0200_4000;

#[test]
fn timer_interrupt_wakes_idle_hart_and_traps_to_mtvec() {
    let mut cpu = CpuCore::new(0x1_0000, None);

    let handler_pc = 0x8000_1000;
    cpu.csrs.write(addr::MTVEC, handler_pc, PrivilegeLevel::Machine).unwrap();
    cpu.csrs
        .write(addr::MSTATUS, mstatus_bits::MIE, PrivilegeLevel::Machine)
        .unwrap();
    cpu.csrs
        .write(addr::MIE, interrupt_bits::MTIP, PrivilegeLevel::Machine)
        .unwrap();

    // Arm mtimecmp so it is already due once the CLINT ticks once.
    cpu.write_mem(CLINT_MTIMECMP, 8, 1, AccessKind::Store).unwrap();

    cpu.waiting_for_interrupt = true;
    let mut sink = Vec::new();

    let mut observed_idle = false;
    for _ in 0..4 {
        match cpu.tick(&mut sink) {
            StepOutcome::Idle => observed_idle = true,
            StepOutcome::Continue => {
                if cpu.pc == handler_pc {
                    assert!(observed_idle, "hart should have been idle before the interrupt fired");
                    assert_eq!(cpu.privilege, PrivilegeLevel::Machine);
                    let mcause = cpu.csrs.read(addr::MCAUSE, PrivilegeLevel::Machine).unwrap();
                    assert_eq!(mcause, rv_types::Interrupt::MachineTimer.code());
                    return;
                }
            }
            StepOutcome::TestExit(_) => panic!("unexpected test-mode exit"),
        }
    }
    panic!("timer interrupt never reached mtvec");
}
