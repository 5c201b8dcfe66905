//! The physical address decoder: routes loads/stores to RAM or to one of
//! the three bus devices by fixed range, and returns an access fault for
//! anything unmapped (§3, §4.6).
//!
//! "Polymorphic devices" (REDESIGN FLAGS) becomes dispatch-by-range over a
//! fixed set of named fields rather than a tagged union: each device exists
//! exactly once on this bus, so there is no runtime set of variants to hold
//! — the range match *is* the dispatch.

use std::io::Write;

use rv_csr::CsrFile;
use rv_types::{AccessKind, Exception};

use crate::clint::Clint;
use crate::plic::{self, Plic};
use crate::ram::{Ram, RAM_BASE};
use crate::uart::Uart;
use crate::virtio::{BlockImage, VirtioBlk};

const CLINT_BASE: u64 = 0x0200_0000;
const CLINT_END: u64 = 0x0200_ffff;
const PLIC_BASE: u64 = 0x0c00_0000;
const PLIC_END: u64 = 0x0fff_ffff;
const UART_BASE: u64 = 0x1000_0000;
const UART_END: u64 = 0x1000_00ff;
const VIRTIO_BASE: u64 = 0x1000_1000;
const VIRTIO_END: u64 = 0x1000_1fff;

pub struct Bus {
    pub ram: Ram,
    pub clint: Clint,
    pub plic: Plic,
    pub uart: Uart,
    pub virtio: VirtioBlk,
}

impl Bus {
    pub fn new(ram_size_bytes: usize, block_image: Option<Box<dyn BlockImage + Send>>) -> Self {
        Bus {
            ram: Ram::new(ram_size_bytes),
            clint: Clint::new(),
            plic: Plic::new(),
            uart: Uart::new(),
            virtio: VirtioBlk::new(block_image),
        }
    }

    /// Load a kernel image byte-for-byte at `paddr` (mirrors the original's
    /// `Bus::write_file`).
    pub fn load_image(&mut self, paddr: u64, image: &[u8]) {
        self.ram.load_image(paddr, image);
    }

    fn access_fault(kind: AccessKind, addr: u64) -> Exception {
        match kind {
            AccessKind::Instruction => Exception::InstructionAccessFault { addr },
            AccessKind::Load => Exception::LoadAccessFault { addr },
            AccessKind::Store => Exception::StoreAmoAccessFault { addr },
        }
    }

    pub fn read(&mut self, addr: u64, width: u8, kind: AccessKind) -> Result<u64, Exception> {
        if self.ram.contains(addr) {
            return Ok(match width {
                1 => self.ram.read_u8(addr) as u64,
                2 => self.ram.read_u16(addr) as u64,
                4 => self.ram.read_u32(addr) as u64,
                8 => self.ram.read_u64(addr),
                _ => unreachable!("width is always 1/2/4/8"),
            });
        }
        if (CLINT_BASE..=CLINT_END).contains(&addr) {
            let offset = addr - CLINT_BASE;
            let mut value = 0u64;
            for i in 0..width as u64 {
                value |= (self.clint.read_byte(offset + i) as u64) << (i * 8);
            }
            return Ok(value);
        }
        if (PLIC_BASE..=PLIC_END).contains(&addr) {
            let offset = addr - PLIC_BASE;
            let low = self.plic.read_u32(offset) as u64;
            let value = if width == 8 {
                low | ((self.plic.read_u32(offset + 4) as u64) << 32)
            } else {
                low
            };
            return Ok(mask_width(value, width));
        }
        if (UART_BASE..=UART_END).contains(&addr) {
            let offset = addr - UART_BASE;
            return Ok(self.uart.read_byte(offset) as u64);
        }
        if (VIRTIO_BASE..=VIRTIO_END).contains(&addr) {
            let offset = addr - VIRTIO_BASE;
            let low = self.virtio.read_u32(offset) as u64;
            let value = if width == 8 {
                low | ((self.virtio.read_u32(offset + 4) as u64) << 32)
            } else {
                low
            };
            return Ok(mask_width(value, width));
        }
        Err(Self::access_fault(kind, addr))
    }

    pub fn write(&mut self, addr: u64, width: u8, value: u64, kind: AccessKind) -> Result<(), Exception> {
        if self.ram.contains(addr) {
            match width {
                1 => self.ram.write_u8(addr, value as u8),
                2 => self.ram.write_u16(addr, value as u16),
                4 => self.ram.write_u32(addr, value as u32),
                8 => self.ram.write_u64(addr, value),
                _ => unreachable!("width is always 1/2/4/8"),
            }
            return Ok(());
        }
        if (CLINT_BASE..=CLINT_END).contains(&addr) {
            let offset = addr - CLINT_BASE;
            for i in 0..width as u64 {
                self.clint.write_byte(offset + i, (value >> (i * 8)) as u8);
            }
            return Ok(());
        }
        if (PLIC_BASE..=PLIC_END).contains(&addr) {
            let offset = addr - PLIC_BASE;
            self.plic.write_u32(offset, value as u32);
            if width == 8 {
                self.plic.write_u32(offset + 4, (value >> 32) as u32);
            }
            return Ok(());
        }
        if (UART_BASE..=UART_END).contains(&addr) {
            let offset = addr - UART_BASE;
            self.uart.write_byte(offset, value as u8);
            return Ok(());
        }
        if (VIRTIO_BASE..=VIRTIO_END).contains(&addr) {
            let offset = addr - VIRTIO_BASE;
            self.virtio.write_u32(offset, value as u32);
            if width == 8 {
                self.virtio.write_u32(offset + 4, (value >> 32) as u32);
            }
            return Ok(());
        }
        Err(Self::access_fault(kind, addr))
    }

    /// Advance every device by one tick (§4.2 step 1): CLINT's `mtime`,
    /// UART's TX drain and RX/TX interrupt lines, PLIC's external-interrupt
    /// lines into `mip`, and any pending virtio notification.
    pub fn tick(&mut self, csrs: &mut CsrFile, uart_out: &mut dyn Write) {
        self.clint.tick(csrs);
        self.uart.tick(&mut self.plic, uart_out);
        self.virtio.tick(&mut self.ram, &mut self.plic);

        csrs.set_mip_bit(rv_csr::interrupt_bits::SEIP, self.plic.has_claimable(plic::CONTEXT_SUPERVISOR));
        csrs.set_mip_bit(rv_csr::interrupt_bits::MEIP, self.plic.has_claimable(plic::CONTEXT_MACHINE));
    }
}

impl rv_mmu::PhysicalMemory for Bus {
    fn read_phys_u64(&self, paddr: u64) -> u64 {
        self.ram.read_u64(paddr)
    }
    fn write_phys_u64(&mut self, paddr: u64, value: u64) {
        self.ram.write_u64(paddr, value)
    }
}

fn mask_width(value: u64, width: u8) -> u64 {
    match width {
        1 => value & 0xff,
        2 => value & 0xffff,
        4 => value & 0xffff_ffff,
        _ => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ram_round_trip_through_bus() {
        let mut bus = Bus::new(0x1000, None);
        bus.write(RAM_BASE + 8, 8, 0x1122_3344_5566_7788, AccessKind::Store).unwrap();
        assert_eq!(bus.read(RAM_BASE + 8, 8, AccessKind::Load).unwrap(), 0x1122_3344_5566_7788);
    }

    #[test]
    fn unmapped_address_faults() {
        let mut bus = Bus::new(0x1000, None);
        let err = bus.read(0xdead_beef, 4, AccessKind::Load).unwrap_err();
        assert!(matches!(err, Exception::LoadAccessFault { .. }));
    }

    #[test]
    fn clint_mtimecmp_write_read_round_trips() {
        let mut bus = Bus::new(0x1000, None);
        bus.write(CLINT_BASE + 0x4000, 8, 0x42, AccessKind::Store).unwrap();
        assert_eq!(bus.read(CLINT_BASE + 0x4000, 8, AccessKind::Load).unwrap(), 0x42);
    }

    #[test]
    fn plic_priority_register_accessible_through_bus() {
        let mut bus = Bus::new(0x1000, None);
        bus.write(PLIC_BASE + plic::SOURCE_UART as u64 * 4, 4, 7, AccessKind::Store).unwrap();
        assert_eq!(bus.read(PLIC_BASE + plic::SOURCE_UART as u64 * 4, 4, AccessKind::Load).unwrap(), 7);
    }
}
