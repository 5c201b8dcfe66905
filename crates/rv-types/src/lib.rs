//! Small value types shared across the emulator crates: privilege levels,
//! memory access kinds, and the architectural exception/interrupt taxonomy.
//!
//! Nothing in this crate depends on CSR state, a bus, or a register file —
//! it exists so that `rv-decoder`, `rv-csr`, `rv-mmu` and `rv-interrupts`
//! can all agree on these shapes without depending on each other.

#![forbid(unsafe_code)]

/// The three privilege levels this hart implements. Ordered so that
/// `User < Supervisor < Machine` comparisons match "current <= S" checks
/// used throughout trap delegation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PrivilegeLevel {
    User = 0,
    Supervisor = 1,
    Machine = 3,
}

impl PrivilegeLevel {
    /// Decode the 2-bit MPP/xPP encoding. Reserved encoding 2 (Hypervisor,
    /// not implemented) legalizes down to User, matching how an unsupported
    /// WARL field is expected to collapse to the least-surprising legal value.
    pub fn from_mpp_bits(bits: u64) -> Self {
        match bits & 0b11 {
            0b00 => PrivilegeLevel::User,
            0b01 => PrivilegeLevel::Supervisor,
            0b11 => PrivilegeLevel::Machine,
            _ => PrivilegeLevel::User,
        }
    }

    pub fn from_spp_bit(bit: u64) -> Self {
        if bit & 1 != 0 {
            PrivilegeLevel::Supervisor
        } else {
            PrivilegeLevel::User
        }
    }

    pub fn mpp_bits(self) -> u64 {
        self as u64
    }

    pub fn spp_bit(self) -> u64 {
        match self {
            PrivilegeLevel::Supervisor => 1,
            _ => 0,
        }
    }
}

/// The kind of access that triggered a memory operation, used both by the
/// MMU (to select the right permission check) and by the translation cache
/// key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessKind {
    Instruction,
    Load,
    Store,
}

/// Synchronous exception causes, numbered exactly as the architecture's
/// `mcause`/`scause` exception codes (low bits, interrupt bit excluded).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    InstructionAddressMisaligned { addr: u64 },
    InstructionAccessFault { addr: u64 },
    IllegalInstruction { raw: u32 },
    Breakpoint,
    LoadAddressMisaligned { addr: u64 },
    LoadAccessFault { addr: u64 },
    StoreAmoAddressMisaligned { addr: u64 },
    StoreAmoAccessFault { addr: u64 },
    EnvironmentCallFromU,
    EnvironmentCallFromS,
    EnvironmentCallFromM,
    InstructionPageFault { addr: u64 },
    LoadPageFault { addr: u64 },
    StoreAmoPageFault { addr: u64 },
}

impl Exception {
    /// The architectural exception code (low bits of `*cause`, interrupt
    /// bit clear).
    pub fn code(&self) -> u64 {
        match self {
            Exception::InstructionAddressMisaligned { .. } => 0,
            Exception::InstructionAccessFault { .. } => 1,
            Exception::IllegalInstruction { .. } => 2,
            Exception::Breakpoint => 3,
            Exception::LoadAddressMisaligned { .. } => 4,
            Exception::LoadAccessFault { .. } => 5,
            Exception::StoreAmoAddressMisaligned { .. } => 6,
            Exception::StoreAmoAccessFault { .. } => 7,
            Exception::EnvironmentCallFromU => 8,
            Exception::EnvironmentCallFromS => 9,
            Exception::EnvironmentCallFromM => 11,
            Exception::InstructionPageFault { .. } => 12,
            Exception::LoadPageFault { .. } => 13,
            Exception::StoreAmoPageFault { .. } => 15,
        }
    }

    /// The value to write into `*tval`: a faulting address for address/page
    /// faults, the raw instruction bits for illegal-instruction, zero
    /// otherwise.
    pub fn tval(&self) -> u64 {
        match self {
            Exception::InstructionAddressMisaligned { addr }
            | Exception::InstructionAccessFault { addr }
            | Exception::LoadAddressMisaligned { addr }
            | Exception::LoadAccessFault { addr }
            | Exception::StoreAmoAddressMisaligned { addr }
            | Exception::StoreAmoAccessFault { addr }
            | Exception::InstructionPageFault { addr }
            | Exception::LoadPageFault { addr }
            | Exception::StoreAmoPageFault { addr } => *addr,
            Exception::IllegalInstruction { raw } => *raw as u64,
            Exception::Breakpoint
            | Exception::EnvironmentCallFromU
            | Exception::EnvironmentCallFromS
            | Exception::EnvironmentCallFromM => 0,
        }
    }

    pub fn ecall_from(priv_level: PrivilegeLevel) -> Self {
        match priv_level {
            PrivilegeLevel::User => Exception::EnvironmentCallFromU,
            PrivilegeLevel::Supervisor => Exception::EnvironmentCallFromS,
            PrivilegeLevel::Machine => Exception::EnvironmentCallFromM,
        }
    }
}

/// Asynchronous interrupt causes, numbered as the architectural interrupt
/// codes (low bits of `*cause`; the interrupt bit itself is added by the
/// trap-delivery code, not stored here).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Interrupt {
    SupervisorSoftware = 1,
    MachineSoftware = 3,
    SupervisorTimer = 5,
    MachineTimer = 7,
    SupervisorExternal = 9,
    MachineExternal = 11,
}

impl Interrupt {
    pub fn code(self) -> u64 {
        self as u64
    }

    /// Priority order for simultaneous-pending resolution: MEI, MSI, MTI,
    /// SEI, SSI, STI (highest first).
    pub const PRIORITY_ORDER: [Interrupt; 6] = [
        Interrupt::MachineExternal,
        Interrupt::MachineSoftware,
        Interrupt::MachineTimer,
        Interrupt::SupervisorExternal,
        Interrupt::SupervisorSoftware,
        Interrupt::SupervisorTimer,
    ];
}

/// The MSB of `mcause`/`scause` for RV64.
pub const CAUSE_INTERRUPT_BIT: u64 = 1 << 63;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn privilege_ordering() {
        assert!(PrivilegeLevel::User < PrivilegeLevel::Supervisor);
        assert!(PrivilegeLevel::Supervisor < PrivilegeLevel::Machine);
    }

    #[test]
    fn mpp_round_trip() {
        for p in [
            PrivilegeLevel::User,
            PrivilegeLevel::Supervisor,
            PrivilegeLevel::Machine,
        ] {
            assert_eq!(PrivilegeLevel::from_mpp_bits(p.mpp_bits()), p);
        }
    }

    #[test]
    fn exception_codes_match_spec() {
        assert_eq!(Exception::IllegalInstruction { raw: 0 }.code(), 2);
        assert_eq!(Exception::EnvironmentCallFromM.code(), 11);
        assert_eq!(Exception::StoreAmoPageFault { addr: 0 }.code(), 15);
    }

    #[test]
    fn interrupt_priority_is_mei_first() {
        assert_eq!(Interrupt::PRIORITY_ORDER[0], Interrupt::MachineExternal);
        assert_eq!(Interrupt::PRIORITY_ORDER[5], Interrupt::SupervisorTimer);
    }
}
