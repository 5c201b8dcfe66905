//! A virtio-mmio (version 2, legacy-free) block device with a single
//! request virtqueue (§4.6). Queue structures live in guest RAM; DMA reads
//! and writes go through the same [`crate::ram::Ram`] the interpreter uses.

use crate::plic::{Plic, SOURCE_BLOCK};
use crate::ram::Ram;

pub const MAGIC_VALUE: u32 = 0x7472_6976; // "virt"
pub const VERSION: u32 = 2;
pub const DEVICE_ID_BLOCK: u32 = 2;
pub const BLOCK_SIZE: u64 = 512;
const MAX_QUEUE_SIZE: u32 = 32768;

const FEATURE_VIRTIO_F_VERSION_1: u64 = 1 << 32;
const FEATURE_VIRTIO_BLK_F_FLUSH: u64 = 1 << 9;
const STATUS_DRIVER_OK: u32 = 4;

/// Request footer `status` field: 0=OK, 1=IOERR, 2=UNSUPP.
const STATUS_OK: u8 = 0;
const STATUS_UNSUPP: u8 = 2;

mod reg {
    pub const MAGIC_VALUE: u64 = 0x00;
    pub const VERSION: u64 = 0x04;
    pub const DEVICE_ID: u64 = 0x08;
    pub const VENDOR_ID: u64 = 0x0c;
    pub const DEVICE_FEATURES: u64 = 0x10;
    pub const DEVICE_FEATURES_SELECT: u64 = 0x14;
    pub const DRIVER_FEATURES: u64 = 0x20;
    pub const DRIVER_FEATURES_SELECT: u64 = 0x24;
    pub const QUEUE_SELECT: u64 = 0x30;
    pub const QUEUE_NUM_MAX: u64 = 0x34;
    pub const QUEUE_NUM: u64 = 0x38;
    pub const QUEUE_READY: u64 = 0x44;
    pub const QUEUE_NOTIFY: u64 = 0x50;
    pub const INTERRUPT_STATUS: u64 = 0x60;
    pub const INTERRUPT_ACK: u64 = 0x64;
    pub const STATUS: u64 = 0x70;
    pub const QUEUE_DESC_LOW: u64 = 0x80;
    pub const QUEUE_DESC_HIGH: u64 = 0x84;
    pub const QUEUE_AVAIL_LOW: u64 = 0x90;
    pub const QUEUE_AVAIL_HIGH: u64 = 0x94;
    pub const QUEUE_USED_LOW: u64 = 0xa0;
    pub const QUEUE_USED_HIGH: u64 = 0xa4;
    pub const CONFIG_GENERATION: u64 = 0xfc;
    pub const CAPACITY_LOW: u64 = 0x100;
    pub const CAPACITY_HIGH: u64 = 0x104;
}

/// Request header `type` field: 0=READ, 1=WRITE, 2=FLUSH, 8=GETID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestType {
    Read,
    Write,
    Flush,
    GetId,
}

impl RequestType {
    fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(RequestType::Read),
            1 => Some(RequestType::Write),
            2 => Some(RequestType::Flush),
            8 => Some(RequestType::GetId),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct QueueDescription {
    address: u64,
    length: u32,
    flags: u16,
    next: u16,
}

impl QueueDescription {
    const SIZE: u64 = 16;

    fn has_next(&self) -> bool {
        self.flags & 1 != 0
    }
    fn is_device_write_only(&self) -> bool {
        self.flags & 2 != 0
    }

    fn load(ram: &Ram, table_addr: u64, index: u16) -> Self {
        let base = table_addr + index as u64 * Self::SIZE;
        QueueDescription {
            address: ram.read_u64(base),
            length: ram.read_u32(base + 8),
            flags: ram.read_u16(base + 12),
            next: ram.read_u16(base + 14),
        }
    }
}

/// A host-file-backed (or in-memory, for tests) block store.
pub trait BlockImage {
    fn capacity_sectors(&self) -> u64;
    fn read_sector(&mut self, sector: u64, buf: &mut [u8]);
    fn write_sector(&mut self, sector: u64, buf: &[u8]);
    fn flush(&mut self);
}

/// A plain in-memory block image, useful for tests and for "no image
/// attached" runs.
#[derive(Debug, Default)]
pub struct MemoryBlockImage {
    bytes: Vec<u8>,
}

impl MemoryBlockImage {
    pub fn new(bytes: Vec<u8>) -> Self {
        MemoryBlockImage { bytes }
    }
}

impl BlockImage for MemoryBlockImage {
    fn capacity_sectors(&self) -> u64 {
        self.bytes.len() as u64 / BLOCK_SIZE
    }
    fn read_sector(&mut self, sector: u64, buf: &mut [u8]) {
        let off = (sector * BLOCK_SIZE) as usize;
        buf.copy_from_slice(&self.bytes[off..off + buf.len()]);
    }
    fn write_sector(&mut self, sector: u64, buf: &[u8]) {
        let off = (sector * BLOCK_SIZE) as usize;
        self.bytes[off..off + buf.len()].copy_from_slice(buf);
    }
    fn flush(&mut self) {}
}

#[derive(Debug)]
pub struct VirtioBlk {
    device_feature_select: u32,
    driver_features: [u32; 2],
    driver_features_select: u32,
    queue_select: u32,
    queue_num: u32,
    queue_ready: u32,
    interrupt_status: u32,
    interrupt_ack: u32,
    status: u32,
    queue_desc: u64,
    queue_avail: u64,
    queue_used: u64,
    last_processed_idx: u16,
    wrote_to_queue_notify: bool,
    wrote_to_interrupt_ack: bool,
    wrote_to_status: bool,
    image: Option<Box<dyn BlockImage + Send>>,
}

impl VirtioBlk {
    pub fn new(image: Option<Box<dyn BlockImage + Send>>) -> Self {
        VirtioBlk {
            device_feature_select: 0,
            driver_features: [0; 2],
            driver_features_select: 0,
            queue_select: 0,
            queue_num: 0,
            queue_ready: 0,
            interrupt_status: 0,
            interrupt_ack: 0,
            status: 0,
            queue_desc: 0,
            queue_avail: 0,
            queue_used: 0,
            last_processed_idx: 0,
            wrote_to_queue_notify: false,
            wrote_to_interrupt_ack: false,
            wrote_to_status: false,
            image,
        }
    }

    fn has_image(&self) -> bool {
        self.image.is_some()
    }

    fn capacity_sectors(&self) -> u64 {
        self.image.as_ref().map(|i| i.capacity_sectors()).unwrap_or(0)
    }

    fn device_features(&self) -> u64 {
        let mut f = FEATURE_VIRTIO_F_VERSION_1 | FEATURE_VIRTIO_BLK_F_FLUSH;
        if !self.has_image() {
            f = 0;
        }
        f
    }

    pub fn read_u32(&mut self, offset: u64) -> u32 {
        match offset {
            reg::MAGIC_VALUE => {
                if self.has_image() {
                    MAGIC_VALUE
                } else {
                    0
                }
            }
            reg::VERSION => VERSION,
            reg::DEVICE_ID => DEVICE_ID_BLOCK,
            reg::VENDOR_ID => 0,
            reg::DEVICE_FEATURES => {
                let features = self.device_features();
                match self.device_feature_select {
                    0 => (features & 0xffff_ffff) as u32,
                    _ => (features >> 32) as u32,
                }
            }
            reg::QUEUE_NUM_MAX => MAX_QUEUE_SIZE,
            reg::QUEUE_READY => self.queue_ready,
            reg::INTERRUPT_STATUS => self.interrupt_status,
            reg::STATUS => self.status,
            reg::CONFIG_GENERATION => 0,
            reg::CAPACITY_LOW => (self.capacity_sectors() & 0xffff_ffff) as u32,
            reg::CAPACITY_HIGH => (self.capacity_sectors() >> 32) as u32,
            _ => 0,
        }
    }

    pub fn write_u32(&mut self, offset: u64, value: u32) {
        match offset {
            reg::DEVICE_FEATURES_SELECT => self.device_feature_select = value,
            reg::DRIVER_FEATURES => {
                let idx = self.driver_features_select.min(1) as usize;
                self.driver_features[idx] = value;
            }
            reg::DRIVER_FEATURES_SELECT => self.driver_features_select = value,
            reg::QUEUE_SELECT => self.queue_select = value,
            reg::QUEUE_NUM => self.queue_num = value,
            reg::QUEUE_READY => self.queue_ready = value,
            reg::QUEUE_NOTIFY => self.wrote_to_queue_notify = true,
            reg::INTERRUPT_ACK => {
                self.interrupt_ack = value;
                self.wrote_to_interrupt_ack = true;
            }
            reg::STATUS => {
                self.status = value;
                self.wrote_to_status = true;
            }
            reg::QUEUE_DESC_LOW => self.queue_desc = set_low(self.queue_desc, value),
            reg::QUEUE_DESC_HIGH => self.queue_desc = set_high(self.queue_desc, value),
            reg::QUEUE_AVAIL_LOW => self.queue_avail = set_low(self.queue_avail, value),
            reg::QUEUE_AVAIL_HIGH => self.queue_avail = set_high(self.queue_avail, value),
            reg::QUEUE_USED_LOW => self.queue_used = set_low(self.queue_used, value),
            reg::QUEUE_USED_HIGH => self.queue_used = set_high(self.queue_used, value),
            _ => {}
        }
    }

    fn reset(&mut self) {
        let image = self.image.take();
        *self = VirtioBlk::new(image);
    }

    /// Advance one device tick, processing any pending notification (§4.6).
    pub fn tick(&mut self, ram: &mut Ram, plic: &mut Plic) {
        if self.wrote_to_interrupt_ack {
            self.wrote_to_interrupt_ack = false;
            if self.interrupt_ack == self.interrupt_status {
                self.interrupt_status = 0;
                self.interrupt_ack = 0;
                plic.clear_interrupt_pending(SOURCE_BLOCK);
            }
        }

        if self.wrote_to_queue_notify && (self.status & STATUS_DRIVER_OK) != 0 {
            self.wrote_to_queue_notify = false;
            self.process_queue(ram, plic);
        }

        if self.wrote_to_status {
            self.wrote_to_status = false;
            if self.status == 0 {
                self.reset();
            }
        }
    }

    fn queue_size(&self) -> u16 {
        if self.queue_num == 0 {
            MAX_QUEUE_SIZE as u16
        } else {
            self.queue_num as u16
        }
    }

    fn process_queue(&mut self, ram: &mut Ram, plic: &mut Plic) {
        let avail_idx = ram.read_u16(self.queue_avail + 2);
        let avail_flags = ram.read_u16(self.queue_avail);
        let size = self.queue_size().max(1);

        let mut ring_index = self.last_processed_idx;
        if ring_index == avail_idx {
            return;
        }

        loop {
            let slot = ring_index % size;
            let descriptor_index = ram.read_u16(self.queue_avail + 4 + slot as u64 * 2);
            ring_index = ring_index.wrapping_add(1) % size;

            self.process_descriptor_chain(ram, descriptor_index);

            if ring_index == avail_idx {
                break;
            }
        }
        self.last_processed_idx = avail_idx;

        if avail_flags & 1 == 0 {
            self.interrupt_status |= 1;
            plic.set_interrupt_pending(SOURCE_BLOCK);
        }
    }

    fn process_descriptor_chain(&mut self, ram: &mut Ram, head_index: u16) {
        let mut local_index = 0u16;
        let mut descriptor_index = head_index;
        let mut sector = 0u64;
        let mut request_type: Option<RequestType> = None;
        let mut written_length = 0u32;
        let mut status = STATUS_OK;

        loop {
            let desc = QueueDescription::load(ram, self.queue_desc, descriptor_index);

            if local_index == 0 {
                // Header: {type: u32, reserved: u32, sector: u64}.
                request_type = RequestType::from_raw(ram.read_u32(desc.address));
                sector = ram.read_u64(desc.address + 8);
            } else if local_index == 1 {
                (written_length, status) = self.service_data(ram, &desc, request_type, sector);
            } else {
                // Footer: {status: u8}.
                ram.write_u8(desc.address, status);
            }

            local_index += 1;
            if desc.has_next() {
                descriptor_index = desc.next;
            } else {
                break;
            }
        }

        let size = self.queue_size().max(1);
        let used_idx = ram.read_u16(self.queue_used + 2);
        let used_slot = used_idx % size;
        let elem_addr = self.queue_used + 4 + used_slot as u64 * 8;
        ram.write_u32(elem_addr, head_index as u32);
        ram.write_u32(elem_addr + 4, written_length);
        ram.write_u16(self.queue_used + 2, used_idx.wrapping_add(1));
    }

    /// Service the data descriptor of a request, returning the number of
    /// bytes written into the descriptor's buffer and the status the
    /// footer should report (§3: 0=OK, 1=IOERR, 2=UNSUPP).
    fn service_data(&mut self, ram: &mut Ram, desc: &QueueDescription, request_type: Option<RequestType>, sector: u64) -> (u32, u8) {
        let Some(image) = self.image.as_mut() else {
            return (0, STATUS_UNSUPP);
        };
        match request_type {
            Some(RequestType::Read) if desc.is_device_write_only() => {
                let mut buf = vec![0u8; desc.length as usize];
                image.read_sector(sector, &mut buf);
                ram.write_bytes(desc.address, &buf);
                (desc.length, STATUS_OK)
            }
            Some(RequestType::Write) if !desc.is_device_write_only() => {
                let mut buf = vec![0u8; desc.length as usize];
                ram.read_bytes(desc.address, &mut buf);
                image.write_sector(sector, &buf);
                (0, STATUS_OK)
            }
            Some(RequestType::Flush) => {
                image.flush();
                (0, STATUS_OK)
            }
            Some(RequestType::GetId) => {
                let id = b"riscv-emulator\0";
                ram.write_bytes(desc.address, id);
                (id.len() as u32, STATUS_OK)
            }
            _ => (0, STATUS_UNSUPP),
        }
    }
}

fn set_low(current: u64, low: u32) -> u64 {
    (current & 0xffff_ffff_0000_0000) | low as u64
}

fn set_high(current: u64, high: u32) -> u64 {
    (current & 0xffff_ffff) | ((high as u64) << 32)
}
