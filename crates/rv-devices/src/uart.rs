//! The two-register UART console (§4.6): a TX/RX data register and a
//! status register. Filling the RX ring from the host terminal is an
//! external collaborator's job (the CLI's background input thread); this
//! type only exposes [`Uart::push_rx_byte`] for that purpose.

use std::collections::VecDeque;
use std::io::Write;

use crate::plic::{Plic, SOURCE_UART};

const TX_RX_REG: u64 = 0;
const STATUS_REG: u64 = 1;

const RXEMPTY_BIT: u8 = 0;
const RX_INTERRUPT_BIT: u8 = 1;
const TXEMPTY_BIT: u8 = 2;
const TX_INTERRUPT_BIT: u8 = 3;

/// Ring capacity at which point the UART drains its TX buffer to the host,
/// and the point above which a filling RX buffer signals an interrupt.
const RING_THRESHOLD: usize = 16;

#[derive(Debug, Default)]
pub struct Uart {
    rx: VecDeque<u8>,
    tx: VecDeque<u8>,
    rx_irq_enabled: bool,
    tx_irq_enabled: bool,
}

impl Uart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_byte(&mut self, offset: u64) -> u8 {
        match offset {
            TX_RX_REG => self.rx.pop_front().unwrap_or(0),
            STATUS_REG => {
                let mut value = 0u8;
                value |= (self.rx.is_empty() as u8) << RXEMPTY_BIT;
                value |= (self.tx.is_empty() as u8) << TXEMPTY_BIT;
                value |= (self.rx_irq_enabled as u8) << RX_INTERRUPT_BIT;
                value |= (self.tx_irq_enabled as u8) << TX_INTERRUPT_BIT;
                value
            }
            _ => 0,
        }
    }

    pub fn write_byte(&mut self, offset: u64, value: u8) {
        match offset {
            TX_RX_REG => self.tx.push_back(value),
            STATUS_REG => {
                self.rx_irq_enabled = (value >> RX_INTERRUPT_BIT) & 1 != 0;
                self.tx_irq_enabled = (value >> TX_INTERRUPT_BIT) & 1 != 0;
            }
            _ => {}
        }
    }

    /// Feed one byte read from the host terminal into the RX ring. A full
    /// ring silently drops the byte, matching the bounded-queue contract.
    pub fn push_rx_byte(&mut self, byte: u8) {
        if self.rx.len() < RING_THRESHOLD {
            self.rx.push_back(byte);
        }
    }

    /// Advance one device tick: drain TX to `out` once the ring is full
    /// enough, and raise/lower the PLIC line per the interrupt-enable bits.
    pub fn tick(&mut self, plic: &mut Plic, out: &mut dyn Write) {
        if self.tx.len() >= RING_THRESHOLD {
            while let Some(byte) = self.tx.pop_front() {
                let _ = out.write_all(&[byte]);
            }
            let _ = out.flush();
        }

        let should_trigger = (self.rx_irq_enabled && self.rx.len() >= RING_THRESHOLD)
            || (self.tx_irq_enabled && self.tx.is_empty());

        if should_trigger {
            plic.set_interrupt_pending(SOURCE_UART);
        } else {
            plic.clear_interrupt_pending(SOURCE_UART);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rx_read_pops_fifo_order() {
        let mut uart = Uart::new();
        uart.push_rx_byte(b'a');
        uart.push_rx_byte(b'b');
        assert_eq!(uart.read_byte(TX_RX_REG), b'a');
        assert_eq!(uart.read_byte(TX_RX_REG), b'b');
        assert_eq!(uart.read_byte(TX_RX_REG), 0);
    }

    #[test]
    fn status_bits_reflect_ring_state() {
        let mut uart = Uart::new();
        assert_eq!(uart.read_byte(STATUS_REG) & (1 << RXEMPTY_BIT), 1 << RXEMPTY_BIT);
        uart.push_rx_byte(b'x');
        assert_eq!(uart.read_byte(STATUS_REG) & (1 << RXEMPTY_BIT), 0);
    }

    #[test]
    fn tx_drains_to_sink_past_threshold() {
        let mut uart = Uart::new();
        let mut plic = Plic::new();
        let mut sink = Vec::new();
        for b in 0..RING_THRESHOLD {
            uart.write_byte(TX_RX_REG, b as u8);
        }
        uart.tick(&mut plic, &mut sink);
        assert_eq!(sink.len(), RING_THRESHOLD);
    }

    #[test]
    fn tx_irq_asserted_when_buffer_empty_and_enabled() {
        let mut uart = Uart::new();
        let mut plic = Plic::new();
        let mut sink = Vec::new();
        uart.write_byte(STATUS_REG, 1 << TX_INTERRUPT_BIT);
        uart.tick(&mut plic, &mut sink);
        assert!(plic.is_pending(SOURCE_UART));
    }
}
