//! Envelope exchanged with the aux MCU over the USART DMA channels (0 and 6).
//!
//! ```text
//! | type u16 | len1 u16 | payload [u8; 536] | len2 u16 | flag u16 |
//! ```
//!
//! Everything is little endian. Both length fields hold the same value, a mismatch means
//! the frame was cut or overrun.

use core::fmt;

use crate::lib_resources::{AUX_MCU_MSG_PAYLOAD_LENGTH, AUX_MCU_MSG_SIZE};

const TYPE_OFFSET: usize = 0;
const LEN1_OFFSET: usize = 2;
const PAYLOAD_OFFSET: usize = 4;
const LEN2_OFFSET: usize = PAYLOAD_OFFSET + AUX_MCU_MSG_PAYLOAD_LENGTH;
const FLAG_OFFSET: usize = LEN2_OFFSET + 2;

// Main MCU commands.
pub const MAIN_MCU_COMMAND_SLEEP: u16 = 0x0001;
pub const MAIN_MCU_COMMAND_ATTACH_USB: u16 = 0x0002;
pub const MAIN_MCU_COMMAND_PING: u16 = 0x0003;
pub const MAIN_MCU_COMMAND_ENABLE_BLE: u16 = 0x0004;

// Aux MCU events.
pub const AUX_MCU_EVENT_BLE_ENABLED: u16 = 0x0001;

// NiMH charge commands.
pub const NIMH_CMD_CHARGE_START: u16 = 0x0001;

// Last field. RX: payload valid, TX: reply requested.
pub const TX_NO_REPLY_REQUEST_FLAG: u16 = 0x0000;
pub const TX_REPLY_REQUEST_FLAG: u16 = 0x0001;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MessageError {
    /// Frame shorter than the type it should hold.
    Truncated(usize),
    UnknownType(u16),
    /// The two length fields disagree.
    LengthMismatch { first: u16, second: u16 },
    PayloadTooLong(u16),
}

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageError::Truncated(len) => write!(f, "truncated message ({} bytes)", len),
            MessageError::UnknownType(t) => write!(f, "unknown message type {:#06x}", t),
            MessageError::LengthMismatch { first, second } => {
                write!(f, "payload lengths differ ({} != {})", first, second)
            }
            MessageError::PayloadTooLong(len) => write!(f, "payload of {} bytes too long", len),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum MessageType {
    Usb = 0x0000,
    Ble = 0x0001,
    Bootloader = 0x0002,
    PlatDetails = 0x0003,
    MainMcuCmd = 0x0004,
    AuxMcuEvent = 0x0005,
    NimhCharge = 0x0006,
}

impl TryFrom<u16> for MessageType {
    type Error = MessageError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x0000 => Ok(MessageType::Usb),
            0x0001 => Ok(MessageType::Ble),
            0x0002 => Ok(MessageType::Bootloader),
            0x0003 => Ok(MessageType::PlatDetails),
            0x0004 => Ok(MessageType::MainMcuCmd),
            0x0005 => Ok(MessageType::AuxMcuEvent),
            0x0006 => Ok(MessageType::NimhCharge),
            _ => Err(MessageError::UnknownType(value)),
        }
    }
}

fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

fn write_u16(data: &mut [u8], offset: usize, value: u16) {
    data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn write_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuxMcuMessage {
    pub message_type: MessageType,
    payload_length: u16,
    payload: [u8; AUX_MCU_MSG_PAYLOAD_LENGTH],
    pub flag: u16,
}

impl AuxMcuMessage {
    /// An empty message, ready to be filled and sent.
    pub fn new(message_type: MessageType, reply_request: bool) -> Self {
        Self {
            message_type,
            payload_length: 0,
            payload: [0u8; AUX_MCU_MSG_PAYLOAD_LENGTH],
            flag: if reply_request {
                TX_REPLY_REQUEST_FLAG
            } else {
                TX_NO_REPLY_REQUEST_FLAG
            },
        }
    }

    /// Main MCU command without arguments.
    pub fn simple_command(command: u16) -> Self {
        let mut message = Self::new(MessageType::MainMcuCmd, false);
        message.payload[..2].copy_from_slice(&command.to_le_bytes());
        message.payload_length = 2;
        message
    }

    pub fn set_payload(&mut self, data: &[u8]) -> Result<(), MessageError> {
        if data.len() > AUX_MCU_MSG_PAYLOAD_LENGTH {
            return Err(MessageError::PayloadTooLong(data.len() as u16));
        }

        self.payload[..data.len()].copy_from_slice(data);
        self.payload_length = data.len() as u16;
        Ok(())
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload[..self.payload_length as usize]
    }

    pub fn reply_requested(&self) -> bool {
        self.flag == TX_REPLY_REQUEST_FLAG
    }

    pub fn encode(&self, out: &mut [u8; AUX_MCU_MSG_SIZE]) {
        out.fill(0);
        write_u16(out, TYPE_OFFSET, self.message_type as u16);
        write_u16(out, LEN1_OFFSET, self.payload_length);
        out[PAYLOAD_OFFSET..LEN2_OFFSET].copy_from_slice(&self.payload);
        write_u16(out, LEN2_OFFSET, self.payload_length);
        write_u16(out, FLAG_OFFSET, self.flag);
    }

    /// Parse a frame as received by the USART RX channel.
    pub fn decode(data: &[u8]) -> Result<Self, MessageError> {
        if data.len() < AUX_MCU_MSG_SIZE {
            return Err(MessageError::Truncated(data.len()));
        }

        let message_type = MessageType::try_from(read_u16(data, TYPE_OFFSET))?;
        let first = read_u16(data, LEN1_OFFSET);
        let second = read_u16(data, LEN2_OFFSET);
        if first != second {
            return Err(MessageError::LengthMismatch { first, second });
        }
        if first as usize > AUX_MCU_MSG_PAYLOAD_LENGTH {
            return Err(MessageError::PayloadTooLong(first));
        }

        let mut payload = [0u8; AUX_MCU_MSG_PAYLOAD_LENGTH];
        payload.copy_from_slice(&data[PAYLOAD_OFFSET..LEN2_OFFSET]);

        Ok(Self {
            message_type,
            payload_length: first,
            payload,
            flag: read_u16(data, FLAG_OFFSET),
        })
    }

    pub fn main_mcu_command(&self) -> Result<MainMcuCommand<'_>, MessageError> {
        self.expect_type(MessageType::MainMcuCmd)?;
        MainMcuCommand::parse(self.payload())
    }

    pub fn aux_mcu_event(&self) -> Result<AuxMcuEvent<'_>, MessageError> {
        self.expect_type(MessageType::AuxMcuEvent)?;
        AuxMcuEvent::parse(self.payload())
    }

    pub fn platform_details(&self) -> Result<PlatformDetails, MessageError> {
        self.expect_type(MessageType::PlatDetails)?;
        PlatformDetails::from_bytes(self.payload())
    }

    pub fn nimh_charge(&self) -> Result<NimhCharge, MessageError> {
        self.expect_type(MessageType::NimhCharge)?;
        NimhCharge::from_bytes(self.payload())
    }

    fn expect_type(&self, wanted: MessageType) -> Result<(), MessageError> {
        if self.message_type != wanted {
            return Err(MessageError::UnknownType(self.message_type as u16));
        }
        Ok(())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MainMcuCommand<'a> {
    pub command: u16,
    pub payload: &'a [u8],
}

impl<'a> MainMcuCommand<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, MessageError> {
        if data.len() < 2 {
            return Err(MessageError::Truncated(data.len()));
        }
        Ok(Self {
            command: read_u16(data, 0),
            payload: &data[2..],
        })
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AuxMcuEvent<'a> {
    pub event_id: u16,
    pub payload: &'a [u8],
}

impl<'a> AuxMcuEvent<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, MessageError> {
        if data.len() < 2 {
            return Err(MessageError::Truncated(data.len()));
        }
        Ok(Self {
            event_id: read_u16(data, 0),
            payload: &data[2..],
        })
    }
}

/// Aux MCU firmware and BLE chip identification.
///
/// Serialized with the aux MCU's natural alignment: two padding bytes after
/// `blusdk_fw_build` and two at the end.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PlatformDetails {
    pub aux_fw_ver_major: u16,
    pub aux_fw_ver_minor: u16,
    pub aux_did_register: u32,
    pub aux_uid_registers: [u32; 4],
    pub blusdk_lib_maj: u16,
    pub blusdk_lib_min: u16,
    pub blusdk_fw_maj: u16,
    pub blusdk_fw_min: u16,
    pub blusdk_fw_build: u16,
    pub atbtlc_rf_ver: u32,
    pub atbtlc_chip_id: u32,
    pub atbtlc_address: [u8; 6],
}

impl PlatformDetails {
    pub const SIZE: usize = 52;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        write_u16(&mut out, 0, self.aux_fw_ver_major);
        write_u16(&mut out, 2, self.aux_fw_ver_minor);
        write_u32(&mut out, 4, self.aux_did_register);
        for (i, uid) in self.aux_uid_registers.iter().enumerate() {
            write_u32(&mut out, 8 + 4 * i, *uid);
        }
        write_u16(&mut out, 24, self.blusdk_lib_maj);
        write_u16(&mut out, 26, self.blusdk_lib_min);
        write_u16(&mut out, 28, self.blusdk_fw_maj);
        write_u16(&mut out, 30, self.blusdk_fw_min);
        write_u16(&mut out, 32, self.blusdk_fw_build);
        write_u32(&mut out, 36, self.atbtlc_rf_ver);
        write_u32(&mut out, 40, self.atbtlc_chip_id);
        out[44..50].copy_from_slice(&self.atbtlc_address);
        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, MessageError> {
        if data.len() < Self::SIZE {
            return Err(MessageError::Truncated(data.len()));
        }

        let mut atbtlc_address = [0u8; 6];
        atbtlc_address.copy_from_slice(&data[44..50]);

        Ok(Self {
            aux_fw_ver_major: read_u16(data, 0),
            aux_fw_ver_minor: read_u16(data, 2),
            aux_did_register: read_u32(data, 4),
            aux_uid_registers: core::array::from_fn(|i| read_u32(data, 8 + 4 * i)),
            blusdk_lib_maj: read_u16(data, 24),
            blusdk_lib_min: read_u16(data, 26),
            blusdk_fw_maj: read_u16(data, 28),
            blusdk_fw_min: read_u16(data, 30),
            blusdk_fw_build: read_u16(data, 32),
            atbtlc_rf_ver: read_u32(data, 36),
            atbtlc_chip_id: read_u32(data, 40),
            atbtlc_address,
        })
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NimhCharge {
    pub command_status: u16,
    pub battery_voltage: u16,
    pub charge_current: u16,
}

impl NimhCharge {
    pub const SIZE: usize = 6;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        write_u16(&mut out, 0, self.command_status);
        write_u16(&mut out, 2, self.battery_voltage);
        write_u16(&mut out, 4, self.charge_current);
        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, MessageError> {
        if data.len() < Self::SIZE {
            return Err(MessageError::Truncated(data.len()));
        }
        Ok(Self {
            command_status: read_u16(data, 0),
            battery_voltage: read_u16(data, 2),
            charge_current: read_u16(data, 4),
        })
    }
}
