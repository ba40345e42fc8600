// Simulated DMA controller for the host tests.
//
// Transfers run synchronously when a channel gets enabled (or on `fire()` when autorun is
// off): the descriptor is read back from the table the engine bound, beats are copied one
// byte at a time and a SPI data register can be modelled at a fixed address.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::mem::size_of;
use std::ptr;
use std::rc::Rc;

use mcu_bridge::lib_channels::ChannelId;
use mcu_bridge::lib_dma::DmaEngine;
use mcu_bridge::lib_dmac::{
    BlockControl, ChannelControl, ControlRegister, CrcControl, CrcPolynomial, DescriptorTables, Dmac,
    Increment, Qos,
};
use mcu_bridge::lib_resources::{DmaTriggers, DMA_CHANNEL_COUNT};
use mcu_bridge::CompletionFlags;

pub struct SimSpi {
    pub data_register: usize,
    pub rx: VecDeque<u8>,
    pub tx: Vec<u8>,
}

#[derive(Default)]
pub struct SimState {
    pub base: usize,
    pub writeback: usize,
    pub ctrl: Option<ControlRegister>,
    pub round_robin: Option<u8>,
    pub qos: Option<Qos>,
    pub crc_control: Option<CrcControl>,
    pub checksum: u32,
    pub crc_beats: usize,
    pub channel_control: [Option<ChannelControl>; DMA_CHANNEL_COUNT],
    pub int_enabled: [bool; DMA_CHANNEL_COUNT],
    pub enabled: [bool; DMA_CHANNEL_COUNT],
    pub complete: [bool; DMA_CHANNEL_COUNT],
    pub busy_once: [bool; DMA_CHANNEL_COUNT],
    pub irq_unmasked: bool,
    pub autorun: bool,
    pub spi: Option<SimSpi>,
    pub enable_log: Vec<(ChannelId, bool)>,
}

#[derive(Clone, Default)]
pub struct SimDmac {
    pub state: Rc<RefCell<SimState>>,
}

// Reflected CRC-32 accumulator, one byte per beat.
fn crc32_update(mut crc: u32, byte: u8) -> u32 {
    crc ^= byte as u32;
    for _ in 0..8 {
        crc = if crc & 1 != 0 {
            (crc >> 1) ^ 0xEDB8_8320
        } else {
            crc >> 1
        };
    }
    crc
}

impl SimDmac {
    pub fn new(autorun: bool) -> Self {
        let sim = Self::default();
        sim.state.borrow_mut().autorun = autorun;
        sim
    }

    pub fn with_spi(autorun: bool, data_register: usize, rx: impl IntoIterator<Item = u8>) -> Self {
        let sim = Self::new(autorun);
        sim.state.borrow_mut().spi = Some(SimSpi {
            data_register,
            rx: rx.into_iter().collect(),
            tx: Vec::new(),
        });
        sim
    }

    pub fn spi_tx(&self) -> Vec<u8> {
        self.state
            .borrow()
            .spi
            .as_ref()
            .map(|s| s.tx.clone())
            .unwrap_or_default()
    }

    pub fn enabled(&self, channel: ChannelId) -> bool {
        self.state.borrow().enabled[channel.index()]
    }

    /// Run the transfer currently armed on `channel`.
    pub fn fire(&self, channel: ChannelId) {
        self.state.borrow_mut().run(channel);
    }

    /// Pretend the controller stopped `channel` with `remaining` beats left.
    pub fn stall(&self, channel: ChannelId, remaining: u16) {
        let state = self.state.borrow();
        let addr = state.writeback + channel.index() * size_of::<mcu_bridge::TransferDescriptor>();
        unsafe {
            let wb = addr as *mut mcu_bridge::TransferDescriptor;
            let mut d = ptr::read_volatile(wb);
            d.btcnt = remaining;
            ptr::write_volatile(wb, d);
        }
    }
}

impl SimState {
    fn read_byte(&mut self, addr: usize) -> u8 {
        match self.spi.as_mut() {
            Some(spi) if spi.data_register == addr => spi.rx.pop_front().unwrap_or(0xFF),
            _ => unsafe { ptr::read_volatile(addr as *const u8) },
        }
    }

    fn write_byte(&mut self, addr: usize, value: u8) {
        match self.spi.as_mut() {
            Some(spi) if spi.data_register == addr => spi.tx.push(value),
            _ => unsafe { ptr::write_volatile(addr as *mut u8, value) },
        }
    }

    fn run(&mut self, channel: ChannelId) {
        let size = size_of::<mcu_bridge::TransferDescriptor>();
        let descriptor = unsafe {
            ptr::read_volatile((self.base + channel.index() * size) as *const mcu_bridge::TransferDescriptor)
        };
        let control = BlockControl::from_bits(descriptor.btctrl);
        assert!(control.valid, "channel {:?} armed without a valid descriptor", channel);

        let count = descriptor.btcnt as usize;
        let src_inc = control.increment == Increment::Source;
        let dst_inc = control.increment == Increment::Destination;

        let crc_source = match (self.ctrl, self.crc_control) {
            (Some(ctrl), Some(crc)) if ctrl.crc_enable => crc.source == channel,
            _ => false,
        };

        for i in 0..count {
            let src = if src_inc { descriptor.srcaddr - count + i } else { descriptor.srcaddr };
            let dst = if dst_inc { descriptor.dstaddr - count + i } else { descriptor.dstaddr };

            let byte = self.read_byte(src);
            self.write_byte(dst, byte);

            if crc_source {
                self.checksum = crc32_update(self.checksum, byte);
                self.crc_beats += 1;
            }
        }

        unsafe {
            let wb = (self.writeback + channel.index() * size) as *mut mcu_bridge::TransferDescriptor;
            let mut d = ptr::read_volatile(wb);
            d.btcnt = 0;
            ptr::write_volatile(wb, d);
        }

        let i = channel.index();
        self.enabled[i] = false;
        self.complete[i] = true;
        self.busy_once[i] = true;
    }
}

impl Dmac for SimDmac {
    fn set_descriptor_addresses(&mut self, base: usize, writeback: usize) {
        let mut state = self.state.borrow_mut();
        state.base = base;
        state.writeback = writeback;
    }

    fn write_control(&mut self, ctrl: ControlRegister) {
        self.state.borrow_mut().ctrl = Some(ctrl);
    }

    fn write_priority_control(&mut self, round_robin_levels: u8) {
        self.state.borrow_mut().round_robin = Some(round_robin_levels);
    }

    fn write_qos(&mut self, qos: Qos) {
        self.state.borrow_mut().qos = Some(qos);
    }

    fn write_crc_control(&mut self, crc: CrcControl) {
        self.state.borrow_mut().crc_control = Some(crc);
    }

    fn write_crc_checksum(&mut self, value: u32) {
        self.state.borrow_mut().checksum = value;
    }

    fn crc_checksum(&self) -> u32 {
        let state = self.state.borrow();
        match state.crc_control {
            // CRC-32 reads back bit-reversed and complemented.
            Some(CrcControl {
                polynomial: CrcPolynomial::Crc32,
                ..
            }) => !state.checksum,
            _ => state.checksum,
        }
    }

    fn crc_busy(&self) -> bool {
        false
    }

    fn write_channel_control(&mut self, channel: ChannelId, ctrl: ChannelControl) {
        self.state.borrow_mut().channel_control[channel.index()] = Some(ctrl);
    }

    fn enable_complete_interrupt(&mut self, channel: ChannelId) {
        self.state.borrow_mut().int_enabled[channel.index()] = true;
    }

    fn disable_complete_interrupt(&mut self, channel: ChannelId) {
        self.state.borrow_mut().int_enabled[channel.index()] = false;
    }

    fn set_channel_enabled(&mut self, channel: ChannelId, enabled: bool) {
        let mut state = self.state.borrow_mut();
        state.enabled[channel.index()] = enabled;
        state.enable_log.push((channel, enabled));

        if enabled && state.autorun {
            state.run(channel);
        }
    }

    fn channel_enabled(&self, channel: ChannelId) -> bool {
        self.state.borrow().enabled[channel.index()]
    }

    fn channel_busy(&self, channel: ChannelId) -> bool {
        let mut state = self.state.borrow_mut();
        let busy = state.busy_once[channel.index()];
        state.busy_once[channel.index()] = false;
        busy
    }

    fn transfer_complete(&self, channel: ChannelId) -> bool {
        self.state.borrow().complete[channel.index()]
    }

    fn clear_transfer_complete(&mut self, channel: ChannelId) {
        self.state.borrow_mut().complete[channel.index()] = false;
    }

    fn unmask_interrupt(&mut self) {
        self.state.borrow_mut().irq_unmasked = true;
    }
}

/// A configured engine on leaked tables, plus a handle on the simulator behind it.
pub fn engine(sim: &SimDmac) -> DmaEngine<SimDmac> {
    let tables: &'static mut DescriptorTables = Box::leak(Box::new(DescriptorTables::new()));
    let flags: &'static CompletionFlags = Box::leak(Box::new(CompletionFlags::new()));

    let mut engine = DmaEngine::new(sim.clone(), DmaTriggers::default(), tables, flags);
    engine.configure();
    engine
}

/// Reference CRC of what the CRC unit should produce.
pub fn reference_crc32(data: &[u8]) -> u32 {
    const CRC32: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);
    CRC32.checksum(data)
}
