// Board constants and the peripheral -> DMA trigger assignment.

// Number of DMA channels in use (of 12 on the SAMD21).
pub const DMA_CHANNEL_COUNT: usize = 7;

// BTCNT is a 16 bit field, anything bigger has to be chunked by the caller.
pub const DMA_MAX_BEATS: u16 = u16::MAX;

// The CRC unit has to be seeded with all ones before the first beat.
pub const CRC32_SEED: u32 = 0xFFFF_FFFF;

// USB HID transport.
pub const USBHID_PKT_HEADER_SIZE: usize = 2;
pub const USBHID_MAX_PAYLOAD: usize = 62; // 6 bit length field, minus the header.
pub const USBHID_REPORT_SIZE: usize = USBHID_PKT_HEADER_SIZE + USBHID_MAX_PAYLOAD;
pub const USBHID_MAX_TOTAL_PKTS: u8 = 16; // 4 bit packet id.
pub const USBHID_MAX_MSG_SIZE: usize = USBHID_MAX_TOTAL_PKTS as usize * USBHID_MAX_PAYLOAD;

// Main <-> aux MCU envelope.
pub const AUX_MCU_MSG_SIZE: usize = 544;
pub const AUX_MCU_MSG_PAYLOAD_LENGTH: usize = AUX_MCU_MSG_SIZE - 2 - 2 - 2 - 2;

/// DMA trigger source (the TRIGSRC field of CHCTRLB).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TriggerSource(pub u8);

impl TriggerSource {
    /// Only software triggers.
    pub const DISABLE: TriggerSource = TriggerSource(0x00);

    /// SERCOMn "receive complete" trigger.
    pub const fn sercom_rx(sercom: u8) -> Self {
        TriggerSource(0x01 + 2 * sercom)
    }

    /// SERCOMn "data register empty" trigger.
    pub const fn sercom_tx(sercom: u8) -> Self {
        TriggerSource(0x02 + 2 * sercom)
    }
}

// Which SERCOM each bus is wired to on the main MCU.
pub const AUX_MCU_SERCOM: u8 = 1;
pub const DATAFLASH_SERCOM: u8 = 4;
pub const ACC_SERCOM: u8 = 5;
pub const OLED_SERCOM: u8 = 2;

/// Trigger source of every peripheral direction that owns a DMA channel.
///
/// Fixed at boot, handed to [`crate::lib_channels::ChannelRegistry::new`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DmaTriggers {
    pub aux_mcu_rx: TriggerSource,
    pub aux_mcu_tx: TriggerSource,
    pub dataflash_rx: TriggerSource,
    pub dataflash_tx: TriggerSource,
    pub acc_rx: TriggerSource,
    pub acc_tx: TriggerSource,
    pub oled_tx: TriggerSource,
}

impl Default for DmaTriggers {
    fn default() -> Self {
        Self {
            aux_mcu_rx: TriggerSource::sercom_rx(AUX_MCU_SERCOM),
            aux_mcu_tx: TriggerSource::sercom_tx(AUX_MCU_SERCOM),
            dataflash_rx: TriggerSource::sercom_rx(DATAFLASH_SERCOM),
            dataflash_tx: TriggerSource::sercom_tx(DATAFLASH_SERCOM),
            acc_rx: TriggerSource::sercom_rx(ACC_SERCOM),
            acc_tx: TriggerSource::sercom_tx(ACC_SERCOM),
            oled_tx: TriggerSource::sercom_tx(OLED_SERCOM),
        }
    }
}
