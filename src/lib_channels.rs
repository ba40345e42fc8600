//! The fixed DMA channel layout.
//!
//! Priority levels (higher number is higher priority, contrary to what is written in some
//! datasheets):
//!
//! | Channel | Routine                                   | Level |
//! | ------- | ----------------------------------------- | ----- |
//! | 0       | USART RX from the aux MCU                 | 3     |
//! | 1       | SPI RX for custom fs (dataflash) reads    | 0     |
//! | 2       | SPI TX for custom fs (dataflash) reads    | 0     |
//! | 3       | SPI TX to the accelerometer               | 2     |
//! | 4       | SPI TX to the display                     | 1     |
//! | 5       | SPI RX from the accelerometer             | 2     |
//! | 6       | USART TX to the aux MCU                   | 1     |

use crate::lib_dmac::{
    BlockAction, BlockControl, ChannelControl, EventAction, Increment, Priority, TriggerAction,
};
use crate::lib_resources::{DmaTriggers, TriggerSource, DMA_CHANNEL_COUNT};

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ChannelId {
    AuxMcuRx = 0,
    CustomFsRx = 1,
    CustomFsTx = 2,
    AccTx = 3,
    OledTx = 4,
    AccRx = 5,
    AuxMcuTx = 6,
}

impl ChannelId {
    pub const ALL: [ChannelId; DMA_CHANNEL_COUNT] = [
        ChannelId::AuxMcuRx,
        ChannelId::CustomFsRx,
        ChannelId::CustomFsTx,
        ChannelId::AccTx,
        ChannelId::OledTx,
        ChannelId::AccRx,
        ChannelId::AuxMcuTx,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<ChannelId> {
        Self::ALL.get(index).copied()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    Rx,
    Tx,
}

/// How the consumer learns that a transfer is done.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CompletionMode {
    /// The controller interrupt raises a completion flag.
    Interrupt,
    /// The caller spins on the hardware transfer complete flag.
    Polled,
    /// Nobody waits for it (TX halves of a paired transfer).
    None,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelDescriptor {
    pub id: ChannelId,
    pub direction: Direction,
    pub priority: Priority,
    pub trigger: TriggerSource,
    pub completion: CompletionMode,
    pub block_action: BlockAction,
    pub increment: Increment,
    pub event_input: Option<EventAction>,
}

impl ChannelDescriptor {
    const fn rx(id: ChannelId, priority: Priority, trigger: TriggerSource) -> Self {
        Self {
            id,
            direction: Direction::Rx,
            priority,
            trigger,
            completion: CompletionMode::Interrupt,
            block_action: BlockAction::Interrupt,
            increment: Increment::Destination,
            event_input: None,
        }
    }

    const fn tx(id: ChannelId, priority: Priority, trigger: TriggerSource) -> Self {
        Self {
            id,
            direction: Direction::Tx,
            priority,
            trigger,
            completion: CompletionMode::None,
            block_action: BlockAction::NoAction,
            increment: Increment::Source,
            event_input: None,
        }
    }

    /// Channel 0 as used by the CRC mode: SPI data register into a scratch byte.
    pub const fn crc_spi_rx(trigger: TriggerSource) -> Self {
        Self {
            id: ChannelId::AuxMcuRx,
            direction: Direction::Rx,
            priority: Priority::Level0,
            trigger,
            completion: CompletionMode::Polled,
            block_action: BlockAction::NoAction,
            increment: Increment::None,
            event_input: None,
        }
    }

    /// Channel 1 as used by the CRC mode: scratch byte into the SPI data register.
    pub const fn crc_spi_tx(trigger: TriggerSource) -> Self {
        Self {
            id: ChannelId::CustomFsRx,
            direction: Direction::Tx,
            priority: Priority::Level0,
            trigger,
            completion: CompletionMode::None,
            block_action: BlockAction::NoAction,
            increment: Increment::None,
            event_input: None,
        }
    }

    pub const fn block_control(&self) -> BlockControl {
        BlockControl {
            valid: true,
            block_action: self.block_action,
            increment: self.increment,
        }
    }

    pub const fn channel_control(&self) -> ChannelControl {
        ChannelControl {
            level: self.priority,
            trigger: self.trigger,
            trigger_action: TriggerAction::Beat, // One trigger per beat.
            event_input: self.event_input,
        }
    }

    pub const fn source_increments(&self) -> bool {
        matches!(self.increment, Increment::Source)
    }

    pub const fn destination_increments(&self) -> bool {
        matches!(self.increment, Increment::Destination)
    }
}

/// The seven channel descriptors, indexed by [`ChannelId`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ChannelRegistry {
    channels: [ChannelDescriptor; DMA_CHANNEL_COUNT],
}

impl ChannelRegistry {
    pub fn new(triggers: &DmaTriggers) -> Self {
        let mut acc_tx = ChannelDescriptor::tx(ChannelId::AccTx, Priority::Level2, triggers.acc_tx);
        // The read command byte is sent over and over, the source doesn't move.
        acc_tx.increment = Increment::None;
        acc_tx.event_input = Some(EventAction::ConditionalBlock);

        Self {
            channels: [
                ChannelDescriptor::rx(ChannelId::AuxMcuRx, Priority::Level3, triggers.aux_mcu_rx),
                ChannelDescriptor::rx(
                    ChannelId::CustomFsRx,
                    Priority::Level0,
                    triggers.dataflash_rx,
                ),
                ChannelDescriptor::tx(
                    ChannelId::CustomFsTx,
                    Priority::Level0,
                    triggers.dataflash_tx,
                ),
                acc_tx,
                {
                    let mut oled = ChannelDescriptor::tx(
                        ChannelId::OledTx,
                        Priority::Level1,
                        triggers.oled_tx,
                    );
                    oled.completion = CompletionMode::Interrupt;
                    oled.block_action = BlockAction::Interrupt;
                    oled
                },
                ChannelDescriptor::rx(ChannelId::AccRx, Priority::Level2, triggers.acc_rx),
                ChannelDescriptor::tx(ChannelId::AuxMcuTx, Priority::Level1, triggers.aux_mcu_tx),
            ],
        }
    }

    pub fn get(&self, id: ChannelId) -> &ChannelDescriptor {
        &self.channels[id.index()]
    }

    /// Re-bind a channel to another trigger source (the display can move between SERCOMs).
    pub fn set_trigger(&mut self, id: ChannelId, trigger: TriggerSource) {
        self.channels[id.index()].trigger = trigger;
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChannelDescriptor> {
        self.channels.iter()
    }

    /// Channels whose completion is reported through the controller interrupt.
    pub fn interrupt_channels(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.channels
            .iter()
            .filter(|c| c.completion == CompletionMode::Interrupt)
            .map(|c| c.id)
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new(&DmaTriggers::default())
    }
}
