//! Sv39 virtual-to-physical translation (§4.5) plus the translation cache
//! (§4.5, §9). Physical memory access during the page walk goes through the
//! [`PhysicalMemory`] trait rather than a concrete RAM type, the same split
//! the teacher draws between its infallible `MemoryBus` (physical) and
//! fallible `CpuBus` (virtual) traits.

#![forbid(unsafe_code)]

use std::collections::HashMap;

use rv_csr::{CsrFile, SatpMode};
use rv_types::{AccessKind, Exception, PrivilegeLevel};

/// Infallible physical-memory access, implemented by the RAM backing store.
/// A PTE address that falls outside RAM is a host bug (misconfigured
/// `satp`/bus map), not an architectural fault, so this trait does not
/// return `Result`.
pub trait PhysicalMemory {
    fn read_phys_u64(&self, paddr: u64) -> u64;
    fn write_phys_u64(&mut self, paddr: u64, value: u64);
}

const PAGE_SHIFT: u32 = 12;
const PAGE_SIZE: u64 = 1 << PAGE_SHIFT;
const PTE_SIZE: u64 = 8;
const LEVELS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pte(u64);

impl Pte {
    fn v(self) -> bool {
        self.0 & 0b1 != 0
    }
    fn r(self) -> bool {
        (self.0 >> 1) & 0b1 != 0
    }
    fn w(self) -> bool {
        (self.0 >> 2) & 0b1 != 0
    }
    fn x(self) -> bool {
        (self.0 >> 3) & 0b1 != 0
    }
    fn u(self) -> bool {
        (self.0 >> 4) & 0b1 != 0
    }
    fn a(self) -> bool {
        (self.0 >> 6) & 0b1 != 0
    }
    fn d(self) -> bool {
        (self.0 >> 7) & 0b1 != 0
    }
    fn is_leaf(self) -> bool {
        self.r() || self.x()
    }
    fn ppn(self) -> u64 {
        (self.0 >> 10) & 0xfff_ffff_ffff
    }
    /// The three 9-bit PPN fields (level 0, 1, 2), matching the VPN split.
    fn ppns(self) -> [u64; 3] {
        [
            (self.0 >> 10) & 0x1ff,
            (self.0 >> 19) & 0x1ff,
            (self.0 >> 28) & 0x3ff_ffff,
        ]
    }
    fn with_a(self) -> Self {
        Pte(self.0 | (1 << 6))
    }
    fn with_ad(self) -> Self {
        Pte(self.0 | (1 << 6) | (1 << 7))
    }
}

fn vpns(va: u64) -> [u64; 3] {
    [(va >> 12) & 0x1ff, (va >> 21) & 0x1ff, (va >> 30) & 0x1ff]
}

/// Translation-cache key: §4.5 says to key on {vpn, access kind, effective
/// privilege, SUM, MXR}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    vpn: u64,
    access: AccessKindKey,
    privilege: PrivilegeLevel,
    sum: bool,
    mxr: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum AccessKindKey {
    Instruction,
    Load,
    Store,
}

impl From<AccessKind> for AccessKindKey {
    fn from(k: AccessKind) -> Self {
        match k {
            AccessKind::Instruction => AccessKindKey::Instruction,
            AccessKind::Load => AccessKindKey::Load,
            AccessKind::Store => AccessKindKey::Store,
        }
    }
}

/// A resolved translation: the physical page number and the leaf page size,
/// so the cache never conceals a super-page boundary from its caller.
#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    ppn: u64,
    /// `log2` of the leaf page size in bytes (12 for a 4 KiB page, 21 for a
    /// 2 MiB super-page, 30 for a 1 GiB super-page).
    leaf_shift: u32,
}

/// The Sv39 MMU: page walker plus a small direct-mapped translation cache.
#[derive(Debug, Default)]
pub struct Mmu {
    cache: HashMap<CacheKey, CacheEntry>,
}

impl Mmu {
    pub fn new() -> Self {
        Mmu { cache: HashMap::new() }
    }

    /// Invalidate the entire translation cache. Called on any write to
    /// `satp` and on `SFENCE.VMA` (§4.3, §4.5).
    pub fn invalidate(&mut self) {
        self.cache.clear();
    }

    fn effective_privilege(csrs: &CsrFile, current: PrivilegeLevel, access: AccessKind) -> PrivilegeLevel {
        if access != AccessKind::Instruction && csrs.mprv() && current == PrivilegeLevel::Machine {
            csrs.mpp()
        } else {
            current
        }
    }

    fn exception_for(access: AccessKind, addr: u64) -> Exception {
        match access {
            AccessKind::Instruction => Exception::InstructionPageFault { addr },
            AccessKind::Load => Exception::LoadPageFault { addr },
            AccessKind::Store => Exception::StoreAmoPageFault { addr },
        }
    }

    /// Translate a virtual address to a physical address, walking the Sv39
    /// page table on a cache miss and updating A/D bits as required by
    /// §4.5 step 4.
    pub fn translate(
        &mut self,
        mem: &mut dyn PhysicalMemory,
        csrs: &CsrFile,
        current: PrivilegeLevel,
        access: AccessKind,
        va: u64,
    ) -> Result<u64, Exception> {
        let satp = csrs.satp();
        let eff_priv = Self::effective_privilege(csrs, current, access);

        if satp.mode == SatpMode::Bare || eff_priv == PrivilegeLevel::Machine {
            return Ok(va);
        }

        let vpn_of_va = va >> PAGE_SHIFT;
        let key = CacheKey {
            vpn: vpn_of_va,
            access: access.into(),
            privilege: eff_priv,
            sum: csrs.sum(),
            mxr: csrs.mxr(),
        };

        if let Some(entry) = self.cache.get(&key) {
            return Ok(Self::compose(entry.ppn, entry.leaf_shift, va));
        }

        let (entry, phys) = self.walk(mem, satp.ppn, eff_priv, csrs.sum(), csrs.mxr(), access, va)?;
        self.cache.insert(key, entry);
        Ok(phys)
    }

    fn walk(
        &self,
        mem: &mut dyn PhysicalMemory,
        root_ppn: u64,
        eff_priv: PrivilegeLevel,
        sum: bool,
        mxr: bool,
        access: AccessKind,
        va: u64,
    ) -> Result<(CacheEntry, u64), Exception> {
        let vpn = vpns(va);
        let fault = || Self::exception_for(access, va);

        let mut table_ppn = root_ppn;
        for level in (0..LEVELS).rev() {
            let pte_addr = table_ppn * PAGE_SIZE + vpn[level] * PTE_SIZE;
            let raw = mem.read_phys_u64(pte_addr);
            let pte = Pte(raw);

            if !pte.v() || (!pte.r() && pte.w()) {
                return Err(fault());
            }

            if !pte.is_leaf() {
                table_ppn = pte.ppn();
                continue;
            }

            // Super-page alignment: PPNs for levels below this one must be
            // zero.
            let ppns = pte.ppns();
            for lvl in 0..level {
                if ppns[lvl] != 0 {
                    return Err(fault());
                }
            }

            Self::check_permissions(&pte, eff_priv, sum, mxr, access, va)?;

            let needs_a = !pte.a();
            let needs_d = access == AccessKind::Store && !pte.d();
            if needs_a || needs_d {
                let updated = if needs_d { pte.with_ad() } else { pte.with_a() };
                mem.write_phys_u64(pte_addr, updated.0);
            }

            let leaf_shift = match level {
                0 => PAGE_SHIFT,
                1 => 21,
                _ => 30,
            };
            let ppn = pte.ppn();
            let entry = CacheEntry { ppn, leaf_shift };
            return Ok((entry, Self::compose(ppn, leaf_shift, va)));
        }
        unreachable!("Sv39 walk always terminates within 3 levels")
    }

    fn check_permissions(
        pte: &Pte,
        eff_priv: PrivilegeLevel,
        sum: bool,
        mxr: bool,
        access: AccessKind,
        va: u64,
    ) -> Result<(), Exception> {
        let ok = match access {
            AccessKind::Instruction => pte.x(),
            AccessKind::Load => pte.r() || (mxr && pte.x()),
            AccessKind::Store => pte.w(),
        };
        if !ok {
            return Err(Self::exception_for(access, va));
        }

        if pte.u() {
            if eff_priv == PrivilegeLevel::Supervisor {
                if access == AccessKind::Instruction || !sum {
                    return Err(Self::exception_for(access, va));
                }
            }
        } else if eff_priv == PrivilegeLevel::User {
            return Err(Self::exception_for(access, va));
        }
        Ok(())
    }

    /// Compose a physical address from the leaf PPN and the original VA's
    /// low bits, per §4.5 step 5: the leaf's own PPN field covers the
    /// addressed page; VA bits below `leaf_shift` pass through unchanged.
    fn compose(ppn: u64, leaf_shift: u32, va: u64) -> u64 {
        let low_mask = (1u64 << leaf_shift) - 1;
        ((ppn << PAGE_SHIFT) & !low_mask) | (va & low_mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rv_csr::addr;
    use std::collections::HashMap as Map;

    struct FakeRam {
        words: Map<u64, u64>,
    }

    impl FakeRam {
        fn new() -> Self {
            FakeRam { words: Map::new() }
        }
    }

    impl PhysicalMemory for FakeRam {
        fn read_phys_u64(&self, paddr: u64) -> u64 {
            *self.words.get(&paddr).unwrap_or(&0)
        }
        fn write_phys_u64(&mut self, paddr: u64, value: u64) {
            self.words.insert(paddr, value);
        }
    }

    fn leaf_pte(ppn: u64, r: bool, w: bool, x: bool, u: bool) -> u64 {
        let mut v = 1u64; // V=1
        if r {
            v |= 1 << 1;
        }
        if w {
            v |= 1 << 2;
        }
        if x {
            v |= 1 << 3;
        }
        if u {
            v |= 1 << 4;
        }
        v |= 1 << 6; // A
        v |= 1 << 7; // D
        v | (ppn << 10)
    }

    fn branch_pte(child_ppn: u64) -> u64 {
        1 | (child_ppn << 10) // V=1, R=W=X=0 => pointer
    }

    #[test]
    fn bare_mode_is_identity() {
        let csrs = CsrFile::new();
        let mut mmu = Mmu::new();
        let mut ram = FakeRam::new();
        let pa = mmu
            .translate(&mut ram, &csrs, PrivilegeLevel::Supervisor, AccessKind::Load, 0x1234)
            .unwrap();
        assert_eq!(pa, 0x1234);
    }

    #[test]
    fn three_level_walk_resolves_leaf_page() {
        let mut csrs = CsrFile::new();
        csrs.write(addr::SATP, (8u64 << 60) | 0x100, PrivilegeLevel::Machine).unwrap(); // root ppn=0x100

        let va: u64 = (3 << 30) | (5 << 21) | (7 << 12) | 0x42;
        let l2_ppn = 0x100;
        let l1_ppn = 0x200;
        let l0_ppn = 0x300;
        let leaf_ppn = 0x400;

        let mut ram = FakeRam::new();
        ram.write_phys_u64(l2_ppn * PAGE_SIZE + 3 * 8, branch_pte(l1_ppn));
        ram.write_phys_u64(l1_ppn * PAGE_SIZE + 5 * 8, branch_pte(l0_ppn));
        ram.write_phys_u64(l0_ppn * PAGE_SIZE + 7 * 8, leaf_pte(leaf_ppn, true, true, false, false));

        let mut mmu = Mmu::new();
        let pa = mmu
            .translate(&mut ram, &csrs, PrivilegeLevel::Supervisor, AccessKind::Load, va)
            .unwrap();
        assert_eq!(pa, (leaf_ppn << 12) | 0x42);
    }

    #[test]
    fn superpage_with_nonzero_low_ppn_faults() {
        let mut csrs = CsrFile::new();
        csrs.write(addr::SATP, (8u64 << 60) | 0x100, PrivilegeLevel::Machine).unwrap();
        let va: u64 = (3 << 30) | (5 << 21) | 0x42;
        let mut ram = FakeRam::new();
        // Leaf at level 1 (2 MiB superpage) but level-0 PPN field nonzero => fault.
        let bogus_ppn = (0x400u64) | 1; // low PPN bits nonzero
        ram.write_phys_u64(0x100 * PAGE_SIZE + 3 * 8, branch_pte(0x200));
        ram.write_phys_u64(0x200 * PAGE_SIZE + 5 * 8, leaf_pte(bogus_ppn, true, true, false, false));

        let mut mmu = Mmu::new();
        let err = mmu
            .translate(&mut ram, &csrs, PrivilegeLevel::Supervisor, AccessKind::Load, va)
            .unwrap_err();
        assert!(matches!(err, Exception::LoadPageFault { .. }));
    }

    #[test]
    fn user_page_denied_from_supervisor_without_sum() {
        let mut csrs = CsrFile::new();
        csrs.write(addr::SATP, (8u64 << 60) | 0x100, PrivilegeLevel::Machine).unwrap();
        let va: u64 = (0 << 30) | (0 << 21) | (1 << 12);
        let mut ram = FakeRam::new();
        ram.write_phys_u64(0x100 * PAGE_SIZE, branch_pte(0x200));
        ram.write_phys_u64(0x200 * PAGE_SIZE, branch_pte(0x300));
        ram.write_phys_u64(0x300 * PAGE_SIZE + 8, leaf_pte(0x400, true, true, false, true));

        let mut mmu = Mmu::new();
        let err = mmu
            .translate(&mut ram, &csrs, PrivilegeLevel::Supervisor, AccessKind::Load, va)
            .unwrap_err();
        assert!(matches!(err, Exception::LoadPageFault { .. }));
    }

    #[test]
    fn invalidate_clears_cache() {
        let mut csrs = CsrFile::new();
        csrs.write(addr::SATP, (8u64 << 60) | 0x100, PrivilegeLevel::Machine).unwrap();
        let va: u64 = 1 << 12;
        let mut ram = FakeRam::new();
        ram.write_phys_u64(0x100 * PAGE_SIZE, branch_pte(0x200));
        ram.write_phys_u64(0x200 * PAGE_SIZE, branch_pte(0x300));
        ram.write_phys_u64(0x300 * PAGE_SIZE + 8, leaf_pte(0x400, true, true, false, false));

        let mut mmu = Mmu::new();
        mmu.translate(&mut ram, &csrs, PrivilegeLevel::Supervisor, AccessKind::Load, va)
            .unwrap();
        assert_eq!(mmu.cache.len(), 1);
        mmu.invalidate();
        assert_eq!(mmu.cache.len(), 0);
    }
}
