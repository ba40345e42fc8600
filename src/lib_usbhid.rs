//! USB HID transport between the aux MCU and the host.
//!
//! Every HID report is one packet: a two byte control header followed by up to 62 bytes of
//! payload. Messages longer than that are split into up to 16 packets.
//!
//! ```text
//! byte 0:  | flip | ack |          len (6)          |
//! byte 1:  |     pkt_id (4)     |   total_pkts (4)   |
//! ```
//!
//! `total_pkts` is the id of the last packet, the flip bit toggles between consecutive
//! messages and a set `ack` on the last packet asks for that packet to be echoed back.

use core::fmt;
use core::hint::spin_loop;

use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, signal::Signal};

use crate::lib_resources::{
    USBHID_MAX_MSG_SIZE, USBHID_MAX_PAYLOAD, USBHID_MAX_TOTAL_PKTS, USBHID_PKT_HEADER_SIZE,
    USBHID_REPORT_SIZE,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HidError {
    /// Packet id doesn't match the running packet counter.
    OutOfSequence { expected: u8, got: u8 },
    /// More packets than a message can hold.
    TooManyPackets,
    /// Header length bigger than a packet can carry.
    InvalidLength(u8),
    /// Report too short to hold a header.
    ShortReport(usize),
    /// Buffer can't be described with a 4 bit packet id.
    MessageTooLong(usize),
}

impl fmt::Display for HidError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HidError::OutOfSequence { expected, got } => {
                write!(f, "packet {} received, expected {}", got, expected)
            }
            HidError::TooManyPackets => write!(f, "too many packets in message"),
            HidError::InvalidLength(len) => write!(f, "invalid payload length {}", len),
            HidError::ShortReport(len) => write!(f, "report of {} bytes is too short", len),
            HidError::MessageTooLong(len) => {
                write!(f, "{} bytes don't fit in {} packets", len, USBHID_MAX_TOTAL_PKTS)
            }
        }
    }
}

/// The first two bytes of a HID packet.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HidControl {
    pub len: u8,
    pub final_ack: bool,
    pub msg_flip: bool,
    pub total_pkts: u8,
    pub pkt_id: u8,
}

impl HidControl {
    pub const fn to_bytes(&self) -> [u8; USBHID_PKT_HEADER_SIZE] {
        [
            (self.len & 0x3F) | ((self.final_ack as u8) << 6) | ((self.msg_flip as u8) << 7),
            (self.total_pkts & 0x0F) | ((self.pkt_id & 0x0F) << 4),
        ]
    }

    pub const fn from_bytes(bytes: [u8; USBHID_PKT_HEADER_SIZE]) -> Self {
        Self {
            len: bytes[0] & 0x3F,
            final_ack: bytes[0] & 0x40 != 0,
            msg_flip: bytes[0] & 0x80 != 0,
            total_pkts: bytes[1] & 0x0F,
            pkt_id: bytes[1] >> 4,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HidPacket {
    pub control: HidControl,
    pub payload: [u8; USBHID_MAX_PAYLOAD],
}

impl HidPacket {
    /// Build a packet around `data` (at most 62 bytes are kept). `control.len` is
    /// overwritten with the stored length.
    pub fn new(control: HidControl, data: &[u8]) -> Self {
        let len = data.len().min(USBHID_MAX_PAYLOAD);
        let mut payload = [0u8; USBHID_MAX_PAYLOAD];
        payload[..len].copy_from_slice(&data[..len]);

        Self {
            control: HidControl {
                len: len as u8,
                ..control
            },
            payload,
        }
    }

    /// Decode a raw report as received from the USB stack.
    pub fn from_report(report: &[u8]) -> Result<Self, HidError> {
        if report.len() < USBHID_PKT_HEADER_SIZE {
            return Err(HidError::ShortReport(report.len()));
        }

        let control = HidControl::from_bytes([report[0], report[1]]);
        let body = &report[USBHID_PKT_HEADER_SIZE..];
        let copy = body.len().min(USBHID_MAX_PAYLOAD);

        let mut payload = [0u8; USBHID_MAX_PAYLOAD];
        payload[..copy].copy_from_slice(&body[..copy]);

        Ok(Self { control, payload })
    }

    pub fn payload(&self) -> &[u8] {
        let len = (self.control.len as usize).min(USBHID_MAX_PAYLOAD);
        &self.payload[..len]
    }

    /// Number of meaningful bytes in [`HidPacket::to_report`].
    pub fn report_len(&self) -> usize {
        USBHID_PKT_HEADER_SIZE + self.payload().len()
    }

    pub fn to_report(&self) -> [u8; USBHID_REPORT_SIZE] {
        let mut report = [0u8; USBHID_REPORT_SIZE];
        report[..USBHID_PKT_HEADER_SIZE].copy_from_slice(&self.control.to_bytes());
        report[USBHID_PKT_HEADER_SIZE..].copy_from_slice(&self.payload);
        report
    }
}

/// Id of the last packet needed for `len` bytes.
pub const fn total_packets(len: usize) -> u8 {
    let mut total = len / USBHID_MAX_PAYLOAD;

    // An exact multiple doesn't need the extra, empty, packet.
    if len % USBHID_MAX_PAYLOAD == 0 && len > 0 {
        total -= 1;
    }
    total as u8
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PacketStatus {
    pub msg_start: bool,
    pub msg_end: bool,
}

/// Reports going to the host (`udi_hid_generic_send_report_in` on the aux MCU).
pub trait HidReportSender {
    /// Queue one report. Returns `false` if the USB stack can't take it right now.
    fn send_report_in(&mut self, report: &[u8]) -> bool;
}

/// Receives every accepted packet, in order, as soon as it's validated.
pub trait InboundPacketSink {
    fn process_inbound_slice(&mut self, status: PacketStatus, data: &[u8]);
}

impl<F> InboundPacketSink for F
where
    F: FnMut(PacketStatus, &[u8]),
{
    fn process_inbound_slice(&mut self, status: PacketStatus, data: &[u8]) {
        self(status, data)
    }
}

/// Single slot between the USB interrupt and the HID task.
///
/// A new report overwrites one that wasn't taken yet. That's fine as long as the poll
/// loop runs faster than the host sends reports, which it does.
pub struct HidMailbox {
    report: Signal<CriticalSectionRawMutex, [u8; USBHID_REPORT_SIZE]>,
}

impl HidMailbox {
    pub const fn new() -> Self {
        Self {
            report: Signal::new(),
        }
    }

    /// Raw report callback from the USB stack. Only copies, never blocks.
    pub fn usb_callback(&self, data: &[u8]) {
        let mut report = [0u8; USBHID_REPORT_SIZE];
        let len = data.len().min(USBHID_REPORT_SIZE);
        report[..len].copy_from_slice(&data[..len]);

        self.report.signal(report);
    }

    pub fn pending(&self) -> bool {
        self.report.signaled()
    }

    pub fn try_take(&self) -> Option<[u8; USBHID_REPORT_SIZE]> {
        self.report.try_take()
    }

    /// Wait for the next report, for callers running under an executor.
    pub async fn wait(&self) -> [u8; USBHID_REPORT_SIZE] {
        self.report.wait().await
    }
}

impl Default for HidMailbox {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReassemblyState {
    /// Waiting for packet 0 of a message.
    Idle,
    Accumulating,
    /// Last packet was rejected, the message it belonged to is lost.
    Error,
}

/// HID protocol state: reassembly of incoming messages, fragmentation of outgoing ones.
pub struct UsbHid<T: HidReportSender> {
    transport: T,
    rx_buffer: [u8; USBHID_MAX_MSG_SIZE],
    rx_msg_flip: bool,
    rx_pkt_counter: u8,
    rx_msg_size: usize,
    state: ReassemblyState,
}

impl<T: HidReportSender> UsbHid<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            rx_buffer: [0u8; USBHID_MAX_MSG_SIZE],
            rx_msg_flip: false,
            rx_pkt_counter: 0,
            rx_msg_size: 0,
            state: ReassemblyState::Idle,
        }
    }

    pub fn state(&self) -> ReassemblyState {
        self.state
    }

    pub fn msg_flip(&self) -> bool {
        self.rx_msg_flip
    }

    pub fn packet_counter(&self) -> u8 {
        self.rx_pkt_counter
    }

    /// Bytes of the current message received so far.
    pub fn received(&self) -> &[u8] {
        &self.rx_buffer[..self.rx_msg_size]
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn reset_rx(&mut self) {
        self.rx_msg_size = 0;
        self.rx_pkt_counter = 0;
    }

    /// Cyclic task: handle the report waiting in `mailbox`, if any.
    ///
    /// Returns `None` when there was nothing to do. Protocol errors only reset the
    /// reassembly, they are returned for logging.
    pub fn task<S: InboundPacketSink>(
        &mut self,
        mailbox: &HidMailbox,
        sink: &mut S,
    ) -> Option<Result<PacketStatus, HidError>> {
        let report = mailbox.try_take()?;
        Some(self.process_report(&report, sink))
    }

    pub fn process_report<S: InboundPacketSink>(
        &mut self,
        report: &[u8],
        sink: &mut S,
    ) -> Result<PacketStatus, HidError> {
        let packet = HidPacket::from_report(report)?;
        self.process_packet(&packet, sink)
    }

    pub fn process_packet<S: InboundPacketSink>(
        &mut self,
        packet: &HidPacket,
        sink: &mut S,
    ) -> Result<PacketStatus, HidError> {
        let control = packet.control;

        // New message flip, start over.
        if control.msg_flip != self.rx_msg_flip {
            self.reset_rx();
            self.rx_msg_flip = control.msg_flip;
        }

        if let Err(e) = self.check_packet(&control) {
            // Protocol error, drop whatever we had. The host isn't told about it.
            warn!("HID protocol error: {}", e);
            self.reset_rx();
            self.state = ReassemblyState::Error;
            return Err(e);
        }

        let len = control.len as usize;
        let start = self.rx_msg_size;
        self.rx_buffer[start..start + len].copy_from_slice(&packet.payload[..len]);
        self.rx_msg_size += len;
        self.rx_pkt_counter += 1;
        self.state = ReassemblyState::Accumulating;

        let status = PacketStatus {
            msg_start: control.pkt_id == 0,
            msg_end: control.pkt_id == control.total_pkts,
        };
        trace!(
            "HID packet {}/{} ({} bytes)",
            control.pkt_id,
            control.total_pkts,
            len
        );

        sink.process_inbound_slice(status, &self.rx_buffer[start..start + len]);

        if status.msg_end {
            // Answer to the host.
            if control.final_ack {
                let report = packet.to_report();
                if !self.transport.send_report_in(&report[..packet.report_len()]) {
                    warn!("HID final ack not accepted");
                }
            }

            debug!("HID message of {} bytes received", self.rx_msg_size);
            self.reset_rx();
            self.state = ReassemblyState::Idle;
        }

        Ok(status)
    }

    fn check_packet(&self, control: &HidControl) -> Result<(), HidError> {
        if control.len as usize > USBHID_MAX_PAYLOAD {
            return Err(HidError::InvalidLength(control.len));
        }
        if self.rx_pkt_counter >= USBHID_MAX_TOTAL_PKTS {
            return Err(HidError::TooManyPackets);
        }
        if control.pkt_id != self.rx_pkt_counter {
            return Err(HidError::OutOfSequence {
                expected: self.rx_pkt_counter,
                got: control.pkt_id,
            });
        }
        Ok(())
    }

    /// Send `buffer` to the host, split in as many packets as needed.
    ///
    /// Uses the flip bit of the last received message. Each packet is retried until the
    /// USB stack accepts it.
    pub fn send(&mut self, buffer: &[u8]) -> Result<(), HidError> {
        if buffer.len() > USBHID_MAX_MSG_SIZE {
            return Err(HidError::MessageTooLong(buffer.len()));
        }

        let total_pkts = total_packets(buffer.len());
        let mut idx = 0;

        for pkt_id in 0..=total_pkts {
            let len = (buffer.len() - idx).min(USBHID_MAX_PAYLOAD);
            let packet = HidPacket::new(
                HidControl {
                    len: len as u8,
                    final_ack: false,
                    msg_flip: self.rx_msg_flip,
                    total_pkts,
                    pkt_id,
                },
                &buffer[idx..idx + len],
            );
            idx += len;

            // The USB stack copies the report, so it can be reused right away.
            let report = packet.to_report();
            while !self.transport.send_report_in(&report[..packet.report_len()]) {
                spin_loop();
            }
        }

        debug!("HID message of {} bytes sent in {} packets", buffer.len(), total_pkts + 1);
        Ok(())
    }
}
