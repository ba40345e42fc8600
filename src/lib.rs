#![cfg_attr(not(test), no_std)]

//! Transfer plumbing shared by the main and auxiliary MCU firmware.
//!
//! * [`lib_channels`]: the fixed set of seven DMA channels and what each is wired to.
//! * [`lib_dmac`]: register-level view of the DMA controller.
//! * [`lib_dma`]: the transfer engine (arm / disable / completion flags).
//! * [`lib_crc`]: CRC32 over SPI through the DMA CRC unit (bootloader only).
//! * [`lib_usbhid`]: USB HID packet fragmentation and reassembly.
//! * [`lib_aux_message`]: the envelope exchanged between the two MCUs.
//! * [`lib_resources`]: board constants and trigger assignment.

pub(crate) mod fmt;

// External "defines".
pub mod lib_aux_message;
pub mod lib_channels;
pub mod lib_crc;
pub mod lib_dma;
pub mod lib_dmac;
pub mod lib_resources;
pub mod lib_usbhid;

pub use lib_channels::{ChannelDescriptor, ChannelId, ChannelRegistry};
pub use lib_dma::{CompletionFlags, DmaEngine};
pub use lib_dmac::{Dmac, TransferDescriptor};
pub use lib_aux_message::AuxMcuMessage;
pub use lib_usbhid::{HidMailbox, HidPacket, UsbHid};
