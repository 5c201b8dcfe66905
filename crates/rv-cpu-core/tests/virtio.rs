//! End-to-end virtio-blk descriptor-chain read (§8 scenario 6), driven
//! entirely through the MMIO window the way a guest driver would: register
//! writes via `cpu.write_mem`, queue structures built directly in guest
//! RAM, then a `QUEUE_NOTIFY` write and a tick to process the request.

use rv_cpu_core::CpuCore;
use rv_devices::ram::RAM_BASE;
use rv_devices::virtio::{BlockImage, MemoryBlockImage, BLOCK_SIZE};
use rv_types::AccessKind;

const VIRTIO_BASE: u64 = 0x1000_1000;
const REG_QUEUE_NUM: u64 = VIRTIO_BASE + 0x38;
const REG_QUEUE_READY: u64 = VIRTIO_BASE + 0x44;
const REG_QUEUE_NOTIFY: u64 = VIRTIO_BASE + 0x50;
const REG_STATUS: u64 = VIRTIO_BASE + 0x70;
const REG_QUEUE_DESC_LOW: u64 = VIRTIO_BASE + 0x80;
const REG_QUEUE_AVAIL_LOW: u64 = VIRTIO_BASE + 0x90;
const REG_QUEUE_USED_LOW: u64 = VIRTIO_BASE + 0xa0;

const STATUS_DRIVER_OK: u64 = 4;

fn image_with_pattern(sectors: u64) -> MemoryBlockImage {
    let mut bytes = vec![0u8; (BLOCK_SIZE * sectors) as usize];
    for (i, b) in bytes.iter_mut().enumerate().take(BLOCK_SIZE as usize) {
        *b = (i % 251) as u8;
    }
    MemoryBlockImage::new(bytes)
}

#[test]
fn guest_driver_reads_sector_zero_through_mmio() {
    let mut cpu = CpuCore::new(0x2_0000, Some(Box::new(image_with_pattern(4)) as Box<dyn BlockImage + Send>));

    let desc_table = RAM_BASE + 0x1000;
    let avail = RAM_BASE + 0x2000;
    let used = RAM_BASE + 0x3000;
    let header_addr = RAM_BASE + 0x4000;
    let data_addr = RAM_BASE + 0x5000;
    let footer_addr = RAM_BASE + 0x6000;

    let mut write = |addr: u64, width: u8, value: u64| {
        cpu.write_mem(addr, width, value, AccessKind::Store).unwrap();
    };

    write(REG_QUEUE_DESC_LOW, 4, desc_table);
    write(REG_QUEUE_AVAIL_LOW, 4, avail);
    write(REG_QUEUE_USED_LOW, 4, used);
    write(REG_QUEUE_NUM, 4, 8);
    write(REG_QUEUE_READY, 4, 1);
    write(REG_STATUS, 4, STATUS_DRIVER_OK);

    // Descriptor 0: request header, readable, chained.
    write(desc_table, 8, header_addr);
    write(desc_table + 8, 4, 16);
    write(desc_table + 12, 2, 1); // NEXT
    write(desc_table + 14, 2, 1);
    // Descriptor 1: data buffer, device-writable, chained.
    write(desc_table + 16, 8, data_addr);
    write(desc_table + 16 + 8, 4, BLOCK_SIZE);
    write(desc_table + 16 + 12, 2, 1 | 2); // NEXT | WRITE
    write(desc_table + 16 + 14, 2, 2);
    // Descriptor 2: status footer, device-writable, terminal.
    write(desc_table + 32, 8, footer_addr);
    write(desc_table + 32 + 8, 4, 1);
    write(desc_table + 32 + 12, 2, 2); // WRITE

    // Request header: type=READ(0), reserved, sector=0.
    write(header_addr, 4, 0);
    write(header_addr + 4, 4, 0);
    write(header_addr + 8, 8, 0);

    write(avail, 2, 0); // flags
    write(avail + 2, 2, 1); // idx
    write(avail + 4, 2, 0); // ring[0] = descriptor 0

    write(REG_QUEUE_NOTIFY, 4, 1);

    let mut sink = Vec::new();
    cpu.tick(&mut sink);

    let mut expected = vec![0u8; BLOCK_SIZE as usize];
    for (i, b) in expected.iter_mut().enumerate() {
        *b = (i % 251) as u8;
    }
    let mut actual = Vec::with_capacity(BLOCK_SIZE as usize);
    for i in 0..BLOCK_SIZE {
        actual.push(cpu.read_mem(data_addr + i, 1, AccessKind::Load).unwrap() as u8);
    }
    assert_eq!(actual, expected);

    let used_idx = cpu.read_mem(used + 2, 2, AccessKind::Load).unwrap();
    assert_eq!(used_idx, 1);
    let status_byte = cpu.read_mem(footer_addr, 1, AccessKind::Load).unwrap();
    assert_eq!(status_byte, 0, "virtio-blk status footer reports VIRTIO_BLK_S_OK");
}

#[test]
fn guest_driver_unsupported_request_type_reports_unsupp_through_mmio() {
    let mut cpu = CpuCore::new(0x2_0000, Some(Box::new(image_with_pattern(4)) as Box<dyn BlockImage + Send>));

    let desc_table = RAM_BASE + 0x1000;
    let avail = RAM_BASE + 0x2000;
    let used = RAM_BASE + 0x3000;
    let header_addr = RAM_BASE + 0x4000;
    let data_addr = RAM_BASE + 0x5000;
    let footer_addr = RAM_BASE + 0x6000;

    let mut write = |addr: u64, width: u8, value: u64| {
        cpu.write_mem(addr, width, value, AccessKind::Store).unwrap();
    };

    write(REG_QUEUE_DESC_LOW, 4, desc_table);
    write(REG_QUEUE_AVAIL_LOW, 4, avail);
    write(REG_QUEUE_USED_LOW, 4, used);
    write(REG_QUEUE_NUM, 4, 8);
    write(REG_QUEUE_READY, 4, 1);
    write(REG_STATUS, 4, STATUS_DRIVER_OK);

    // Descriptor 0: request header, readable, chained.
    write(desc_table, 8, header_addr);
    write(desc_table + 8, 4, 16);
    write(desc_table + 12, 2, 1); // NEXT
    write(desc_table + 14, 2, 1);
    // Descriptor 1: data buffer, device-writable, chained.
    write(desc_table + 16, 8, data_addr);
    write(desc_table + 16 + 8, 4, BLOCK_SIZE);
    write(desc_table + 16 + 12, 2, 1 | 2); // NEXT | WRITE
    write(desc_table + 16 + 14, 2, 2);
    // Descriptor 2: status footer, device-writable, terminal.
    write(desc_table + 32, 8, footer_addr);
    write(desc_table + 32 + 8, 4, 1);
    write(desc_table + 32 + 12, 2, 2); // WRITE

    // Request header: type=3 (not READ/WRITE/FLUSH/GETID), reserved, sector=0.
    write(header_addr, 4, 3);
    write(header_addr + 4, 4, 0);
    write(header_addr + 8, 8, 0);

    write(avail, 2, 0); // flags
    write(avail + 2, 2, 1); // idx
    write(avail + 4, 2, 0); // ring[0] = descriptor 0

    write(REG_QUEUE_NOTIFY, 4, 1);

    let mut sink = Vec::new();
    cpu.tick(&mut sink);

    let status_byte = cpu.read_mem(footer_addr, 1, AccessKind::Load).unwrap();
    assert_eq!(status_byte, 2, "virtio-blk status footer reports VIRTIO_BLK_S_UNSUPP");
}
