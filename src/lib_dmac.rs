//! Register-level view of the DMA controller.
//!
//! The transfer engine only talks to the controller through the [`Dmac`] trait, so the same
//! engine runs against the real SAMD21 register block ([`Samd21Dmac`]) and against a
//! simulated controller in the host tests. Channel-scoped accessors take the channel id and
//! the implementation deals with the CHID indirection, callers are expected to hold a
//! critical section around multi-register sequences.

use core::ptr;

use crate::lib_channels::ChannelId;
use crate::lib_resources::{TriggerSource, DMA_CHANNEL_COUNT};

/// Arbitration level, higher number wins within the round-robin arbiter.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Priority {
    Level0 = 0,
    Level1 = 1,
    Level2 = 2,
    Level3 = 3,
}

impl Priority {
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => Priority::Level0,
            1 => Priority::Level1,
            2 => Priority::Level2,
            _ => Priority::Level3,
        }
    }
}

/// What the controller does once a block is transferred.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum BlockAction {
    NoAction = 0,
    Interrupt = 1,
}

/// Which side of a transfer walks through memory.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Increment {
    None,
    Source,
    Destination,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum TriggerAction {
    Block = 0,
    Beat = 2,
    Transaction = 3,
}

/// Channel event input action (EVACT).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum EventAction {
    ConditionalBlock = 3,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum QosLevel {
    Disable = 0,
    Low = 1,
    Medium = 2,
    High = 3,
}

/// Quality of service for data transfers, descriptor fetches and writebacks.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Qos {
    pub data: QosLevel,
    pub fetch: QosLevel,
    pub writeback: QosLevel,
}

/// Controller wide CTRL register.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ControlRegister {
    pub dma_enable: bool,
    pub crc_enable: bool,
    /// One bit per priority level.
    pub level_enable: u8,
}

impl ControlRegister {
    pub const ALL_LEVELS: u8 = 0x0F;
}

/// Per channel CHCTRLB register.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelControl {
    pub level: Priority,
    pub trigger: TriggerSource,
    pub trigger_action: TriggerAction,
    pub event_input: Option<EventAction>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum CrcPolynomial {
    Crc16 = 0,
    Crc32 = 1,
}

/// CRCCTRL: feed the CRC unit from one channel, one byte per beat.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CrcControl {
    pub source: ChannelId,
    pub polynomial: CrcPolynomial,
}

impl CrcControl {
    // CRCSRC values 0x20.. select a DMA channel.
    pub const fn source_bits(&self) -> u8 {
        0x20 + self.source as u8
    }
}

/// BTCTRL of a transfer descriptor. Beat size is always one byte and the step size one beat.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BlockControl {
    pub valid: bool,
    pub block_action: BlockAction,
    pub increment: Increment,
}

impl BlockControl {
    pub const VALID: u16 = 1 << 0;
    pub const BLOCKACT_SHIFT: u16 = 3;
    pub const BLOCKACT_MASK: u16 = 0x3 << Self::BLOCKACT_SHIFT;
    pub const BEATSIZE_BYTE: u16 = 0 << 8;
    pub const SRCINC: u16 = 1 << 10;
    pub const DSTINC: u16 = 1 << 11;
    pub const STEPSEL_SRC: u16 = 1 << 12;

    pub const fn bits(&self) -> u16 {
        let mut bits = Self::BEATSIZE_BYTE | ((self.block_action as u16) << Self::BLOCKACT_SHIFT);
        if self.valid {
            bits |= Self::VALID;
        }
        match self.increment {
            Increment::None => {}
            Increment::Source => bits |= Self::SRCINC | Self::STEPSEL_SRC,
            Increment::Destination => bits |= Self::DSTINC,
        }
        bits
    }

    pub const fn from_bits(bits: u16) -> Self {
        let block_action = if (bits & Self::BLOCKACT_MASK) >> Self::BLOCKACT_SHIFT == 1 {
            BlockAction::Interrupt
        } else {
            BlockAction::NoAction
        };
        let increment = if bits & Self::SRCINC != 0 {
            Increment::Source
        } else if bits & Self::DSTINC != 0 {
            Increment::Destination
        } else {
            Increment::None
        };
        Self {
            valid: bits & Self::VALID != 0,
            block_action,
            increment,
        }
    }
}

/// One entry of the descriptor (or writeback) table, as the controller reads it.
///
/// Address fields are pointer wide, which is the 32 bit hardware layout on target.
/// `descaddr` stays 0: linked descriptors are never used (errata 15683).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(C, align(16))]
pub struct TransferDescriptor {
    pub btctrl: u16,
    pub btcnt: u16,
    pub srcaddr: usize,
    pub dstaddr: usize,
    pub descaddr: usize,
}

impl TransferDescriptor {
    pub const EMPTY: TransferDescriptor = TransferDescriptor {
        btctrl: 0,
        btcnt: 0,
        srcaddr: 0,
        dstaddr: 0,
        descaddr: 0,
    };
}

/// Base and writeback descriptor tables. The controller keeps their addresses, so they
/// have to live for the rest of the program.
#[repr(C, align(16))]
pub struct DescriptorTables {
    pub descriptors: [TransferDescriptor; DMA_CHANNEL_COUNT],
    pub writeback: [TransferDescriptor; DMA_CHANNEL_COUNT],
}

impl DescriptorTables {
    pub const fn new() -> Self {
        Self {
            descriptors: [TransferDescriptor::EMPTY; DMA_CHANNEL_COUNT],
            writeback: [TransferDescriptor::EMPTY; DMA_CHANNEL_COUNT],
        }
    }
}

impl Default for DescriptorTables {
    fn default() -> Self {
        Self::new()
    }
}

/// The DMA controller registers the engine needs.
pub trait Dmac {
    fn set_descriptor_addresses(&mut self, base: usize, writeback: usize);
    fn write_control(&mut self, ctrl: ControlRegister);
    /// Round-robin arbitration enable, one bit per priority level.
    fn write_priority_control(&mut self, round_robin_levels: u8);
    fn write_qos(&mut self, qos: Qos);

    fn write_crc_control(&mut self, crc: CrcControl);
    fn write_crc_checksum(&mut self, value: u32);
    fn crc_checksum(&self) -> u32;
    fn crc_busy(&self) -> bool;

    fn write_channel_control(&mut self, channel: ChannelId, ctrl: ChannelControl);
    fn enable_complete_interrupt(&mut self, channel: ChannelId);
    fn disable_complete_interrupt(&mut self, channel: ChannelId);
    fn set_channel_enabled(&mut self, channel: ChannelId, enabled: bool);
    fn channel_enabled(&self, channel: ChannelId) -> bool;
    fn channel_busy(&self, channel: ChannelId) -> bool;
    fn transfer_complete(&self, channel: ChannelId) -> bool;
    fn clear_transfer_complete(&mut self, channel: ChannelId);

    /// Unmask the controller interrupt line.
    fn unmask_interrupt(&mut self);
}

// SAMD21 DMAC register offsets.
mod regs {
    pub const CTRL: usize = 0x00;
    pub const CRCCTRL: usize = 0x02;
    pub const CRCCHKSUM: usize = 0x08;
    pub const CRCSTATUS: usize = 0x0C;
    pub const QOSCTRL: usize = 0x0E;
    pub const PRICTRL0: usize = 0x14;
    pub const BUSYCH: usize = 0x28;
    pub const BASEADDR: usize = 0x34;
    pub const WRBADDR: usize = 0x38;
    pub const CHID: usize = 0x3F;
    pub const CHCTRLA: usize = 0x40;
    pub const CHCTRLB: usize = 0x44;
    pub const CHINTENCLR: usize = 0x4C;
    pub const CHINTENSET: usize = 0x4D;
    pub const CHINTFLAG: usize = 0x4E;

    pub const CTRL_DMAENABLE: u16 = 1 << 1;
    pub const CTRL_CRCENABLE: u16 = 1 << 2;
    pub const CTRL_LVLEN_SHIFT: u16 = 8;
    pub const CRCSTATUS_CRCBUSY: u8 = 1 << 0;
    pub const CHCTRLA_ENABLE: u8 = 1 << 1;
    pub const CHINT_TCMPL: u8 = 1 << 1;

    pub const NVIC_ISER0: usize = 0xE000_E100;
    pub const DMAC_IRQN: u32 = 6;
}

/// SAMD21 DMAC register block.
pub struct Samd21Dmac {
    base: usize,
}

impl Samd21Dmac {
    pub const DMAC_BASE: usize = 0x4100_4800;

    /// # Safety
    ///
    /// Only one instance may exist and nothing else may touch the DMAC registers.
    pub const unsafe fn steal() -> Self {
        Self {
            base: Self::DMAC_BASE,
        }
    }

    fn read8(&self, offset: usize) -> u8 {
        unsafe { ptr::read_volatile((self.base + offset) as *const u8) }
    }

    fn write8(&mut self, offset: usize, value: u8) {
        unsafe { ptr::write_volatile((self.base + offset) as *mut u8, value) }
    }

    fn write16(&mut self, offset: usize, value: u16) {
        unsafe { ptr::write_volatile((self.base + offset) as *mut u16, value) }
    }

    fn read32(&self, offset: usize) -> u32 {
        unsafe { ptr::read_volatile((self.base + offset) as *const u32) }
    }

    fn write32(&mut self, offset: usize, value: u32) {
        unsafe { ptr::write_volatile((self.base + offset) as *mut u32, value) }
    }

    fn select(&mut self, channel: ChannelId) {
        self.write8(regs::CHID, channel as u8);
    }
}

impl Dmac for Samd21Dmac {
    fn set_descriptor_addresses(&mut self, base: usize, writeback: usize) {
        self.write32(regs::BASEADDR, base as u32);
        self.write32(regs::WRBADDR, writeback as u32);
    }

    fn write_control(&mut self, ctrl: ControlRegister) {
        let mut reg = ((ctrl.level_enable & 0x0F) as u16) << regs::CTRL_LVLEN_SHIFT;
        if ctrl.dma_enable {
            reg |= regs::CTRL_DMAENABLE;
        }
        if ctrl.crc_enable {
            reg |= regs::CTRL_CRCENABLE;
        }
        self.write16(regs::CTRL, reg);
    }

    fn write_priority_control(&mut self, round_robin_levels: u8) {
        // RRLVLENx lives at bit 7 of each level byte.
        let mut reg = 0u32;
        for level in 0..4 {
            if round_robin_levels & (1 << level) != 0 {
                reg |= 1 << (level * 8 + 7);
            }
        }
        self.write32(regs::PRICTRL0, reg);
    }

    fn write_qos(&mut self, qos: Qos) {
        let reg = (qos.writeback as u8) | ((qos.fetch as u8) << 2) | ((qos.data as u8) << 4);
        self.write8(regs::QOSCTRL, reg);
    }

    fn write_crc_control(&mut self, crc: CrcControl) {
        // CRCBEATSIZE = byte (0).
        let reg = ((crc.polynomial as u16) << 2) | ((crc.source_bits() as u16) << 8);
        self.write16(regs::CRCCTRL, reg);
    }

    fn write_crc_checksum(&mut self, value: u32) {
        self.write32(regs::CRCCHKSUM, value);
    }

    fn crc_checksum(&self) -> u32 {
        self.read32(regs::CRCCHKSUM)
    }

    fn crc_busy(&self) -> bool {
        self.read8(regs::CRCSTATUS) & regs::CRCSTATUS_CRCBUSY != 0
    }

    fn write_channel_control(&mut self, channel: ChannelId, ctrl: ChannelControl) {
        let mut reg = ((ctrl.level as u32) << 5)
            | ((ctrl.trigger.0 as u32 & 0x3F) << 8)
            | ((ctrl.trigger_action as u32) << 22);
        if let Some(action) = ctrl.event_input {
            reg |= (action as u32) | (1 << 3); // EVACT + EVIE
        }
        self.select(channel);
        self.write32(regs::CHCTRLB, reg);
    }

    fn enable_complete_interrupt(&mut self, channel: ChannelId) {
        self.select(channel);
        self.write8(regs::CHINTENSET, regs::CHINT_TCMPL);
    }

    fn disable_complete_interrupt(&mut self, channel: ChannelId) {
        self.select(channel);
        self.write8(regs::CHINTENCLR, regs::CHINT_TCMPL);
    }

    fn set_channel_enabled(&mut self, channel: ChannelId, enabled: bool) {
        self.select(channel);
        self.write8(
            regs::CHCTRLA,
            if enabled { regs::CHCTRLA_ENABLE } else { 0 },
        );
    }

    fn channel_enabled(&self, channel: ChannelId) -> bool {
        // CHID is a plain register write, reads need it selected too.
        unsafe { ptr::write_volatile((self.base + regs::CHID) as *mut u8, channel as u8) };
        self.read8(regs::CHCTRLA) != 0
    }

    fn channel_busy(&self, channel: ChannelId) -> bool {
        self.read32(regs::BUSYCH) & (1 << channel as u32) != 0
    }

    fn transfer_complete(&self, channel: ChannelId) -> bool {
        unsafe { ptr::write_volatile((self.base + regs::CHID) as *mut u8, channel as u8) };
        self.read8(regs::CHINTFLAG) & regs::CHINT_TCMPL != 0
    }

    fn clear_transfer_complete(&mut self, channel: ChannelId) {
        self.select(channel);
        self.write8(regs::CHINTFLAG, regs::CHINT_TCMPL); // Write one to clear.
    }

    fn unmask_interrupt(&mut self) {
        unsafe { ptr::write_volatile(regs::NVIC_ISER0 as *mut u32, 1 << regs::DMAC_IRQN) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_control_bits() {
        let rx = BlockControl {
            valid: true,
            block_action: BlockAction::Interrupt,
            increment: Increment::Destination,
        };
        assert_eq!(rx.bits(), 0x0001 | 0x0008 | 0x0800);
        assert_eq!(BlockControl::from_bits(rx.bits()), rx);

        let tx = BlockControl {
            valid: true,
            block_action: BlockAction::NoAction,
            increment: Increment::Source,
        };
        assert_eq!(tx.bits(), 0x0001 | 0x0400 | 0x1000);
        assert_eq!(BlockControl::from_bits(tx.bits()), tx);
    }

    #[test]
    fn crc_source_selects_channel() {
        let crc = CrcControl {
            source: ChannelId::AuxMcuRx,
            polynomial: CrcPolynomial::Crc32,
        };
        assert_eq!(crc.source_bits(), 0x20);
    }

    #[test]
    fn descriptor_is_hardware_aligned() {
        assert_eq!(core::mem::align_of::<TransferDescriptor>(), 16);
        #[cfg(target_pointer_width = "32")]
        assert_eq!(core::mem::size_of::<TransferDescriptor>(), 16);
    }
}
