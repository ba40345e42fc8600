//! DMA transfer engine.
//!
//! Owns the descriptor tables and the controller, arms the seven channels described by the
//! [`ChannelRegistry`] and turns "transfer complete" interrupts into [`CompletionFlags`]
//! the main loop polls. Every register sequence runs inside a critical section so the
//! controller interrupt never sees a half selected channel.

use core::cell::RefCell;
use core::hint::spin_loop;
use core::ptr;
use core::sync::atomic::{compiler_fence, Ordering};

use embassy_sync::blocking_mutex::{raw::CriticalSectionRawMutex, Mutex};
use portable_atomic::AtomicBool;
use static_cell::StaticCell;

use crate::lib_channels::{ChannelDescriptor, ChannelId, ChannelRegistry, CompletionMode};
use crate::lib_dmac::{ControlRegister, DescriptorTables, Dmac, Qos, QosLevel, TransferDescriptor};
use crate::lib_resources::{DmaTriggers, TriggerSource, DMA_CHANNEL_COUNT};

/// Engine shared between the main loop and the DMAC interrupt handler.
pub type SharedDmaEngine<D> = Mutex<CriticalSectionRawMutex, RefCell<Option<DmaEngine<D>>>>;

/// Address to hand to the controller for one side of a transfer.
///
/// When that side increments, the controller wants the END of the block (`base + length`)
/// and not its start.
pub const fn transfer_address(base: usize, length: u16, increments: bool) -> usize {
    if increments {
        end_address(base, length)
    } else {
        base
    }
}

pub const fn end_address(base: usize, length: u16) -> usize {
    base + length as usize
}

/// One "transfer done" flag per channel. Set from the interrupt, consumed by the main loop.
pub struct CompletionFlags {
    flags: [AtomicBool; DMA_CHANNEL_COUNT],
}

#[allow(clippy::declare_interior_mutable_const)]
const FLAG_INIT: AtomicBool = AtomicBool::new(false);

impl CompletionFlags {
    pub const fn new() -> Self {
        Self {
            flags: [FLAG_INIT; DMA_CHANNEL_COUNT],
        }
    }

    pub fn set(&self, channel: ChannelId) {
        let was_set = self.flags[channel.index()].swap(true, Ordering::AcqRel);

        // Only one transfer can be in flight per channel, so the previous completion
        // must have been consumed already.
        debug_assert!(!was_set, "completion flag raised twice");
    }

    /// Raise the flag outside of the interrupt. Raising it again before it's consumed is
    /// harmless.
    pub fn raise(&self, channel: ChannelId) {
        self.flags[channel.index()].store(true, Ordering::Release);
    }

    /// True exactly once per completion.
    pub fn check_and_clear(&self, channel: ChannelId) -> bool {
        self.flags[channel.index()].swap(false, Ordering::AcqRel)
    }

    pub fn is_set(&self, channel: ChannelId) -> bool {
        self.flags[channel.index()].load(Ordering::Acquire)
    }

    pub fn clear(&self, channel: ChannelId) {
        self.flags[channel.index()].store(false, Ordering::Release);
    }
}

impl Default for CompletionFlags {
    fn default() -> Self {
        Self::new()
    }
}

/// Hand out the descriptor tables. Can only be called once.
pub fn init_descriptor_tables() -> &'static mut DescriptorTables {
    static TABLES: StaticCell<DescriptorTables> = StaticCell::new();
    TABLES.init(DescriptorTables::new())
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EngineMode {
    Unconfigured,
    Transfers,
    Crc,
}

pub struct DmaEngine<D: Dmac> {
    pub(crate) dmac: D,
    pub(crate) registry: ChannelRegistry,
    pub(crate) triggers: DmaTriggers,
    pub(crate) tables: &'static mut DescriptorTables,
    pub(crate) flags: &'static CompletionFlags,
    pub(crate) mode: EngineMode,
}

impl<D: Dmac> DmaEngine<D> {
    pub fn new(
        dmac: D,
        triggers: DmaTriggers,
        tables: &'static mut DescriptorTables,
        flags: &'static CompletionFlags,
    ) -> Self {
        Self {
            dmac,
            registry: ChannelRegistry::new(&triggers),
            triggers,
            tables,
            flags,
            mode: EngineMode::Unconfigured,
        }
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn flags(&self) -> &'static CompletionFlags {
        self.flags
    }

    pub fn mode(&self) -> EngineMode {
        self.mode
    }

    pub fn dmac(&self) -> &D {
        &self.dmac
    }

    pub fn descriptor(&self, channel: ChannelId) -> TransferDescriptor {
        unsafe { ptr::read_volatile(&self.tables.descriptors[channel.index()]) }
    }

    pub fn writeback(&self, channel: ChannelId) -> TransferDescriptor {
        unsafe { ptr::read_volatile(&self.tables.writeback[channel.index()]) }
    }

    /// One time controller setup, must run before any transfer is armed.
    pub fn configure(&mut self) {
        // Back to the boot layout (the display channel may have been re-bound).
        self.registry = ChannelRegistry::new(&self.triggers);

        critical_section::with(|_| {
            self.bind_tables();
            self.dmac.write_control(ControlRegister {
                dma_enable: true,
                crc_enable: false,
                level_enable: ControlRegister::ALL_LEVELS,
            });

            // Round robin on all levels.
            self.dmac.write_priority_control(ControlRegister::ALL_LEVELS);

            // Using the SERCOM DMA requests requires the controller to be configured first.
            for id in ChannelId::ALL {
                let channel = *self.registry.get(id);
                self.setup_channel(&channel);
            }

            // Elevate to medium priority on the bus.
            self.dmac.write_qos(Qos {
                data: QosLevel::Medium,
                fetch: QosLevel::Medium,
                writeback: QosLevel::Medium,
            });

            self.dmac.unmask_interrupt();
            self.mode = EngineMode::Transfers;
        });

        info!("DMA controller configured, {} channels", DMA_CHANNEL_COUNT);
    }

    pub(crate) fn bind_tables(&mut self) {
        let base = self.tables.descriptors.as_ptr() as usize;
        let writeback = self.tables.writeback.as_ptr() as usize;
        self.dmac.set_descriptor_addresses(base, writeback);
    }

    pub(crate) fn setup_channel(&mut self, channel: &ChannelDescriptor) {
        let descriptor = TransferDescriptor {
            btctrl: channel.block_control().bits(),
            ..TransferDescriptor::EMPTY
        };
        self.write_descriptor(channel.id, descriptor);

        self.dmac
            .write_channel_control(channel.id, channel.channel_control());
        if channel.completion == CompletionMode::Interrupt {
            self.dmac.enable_complete_interrupt(channel.id);
        }
    }

    fn write_descriptor(&mut self, channel: ChannelId, descriptor: TransferDescriptor) {
        unsafe { ptr::write_volatile(&mut self.tables.descriptors[channel.index()], descriptor) };
    }

    // Must be called with interrupts masked.
    pub(crate) fn arm_descriptor(
        &mut self,
        channel: &ChannelDescriptor,
        src: usize,
        dst: usize,
        length: u16,
    ) {
        let descriptor = TransferDescriptor {
            btctrl: channel.block_control().bits(),
            btcnt: length,
            srcaddr: transfer_address(src, length, channel.source_increments()),
            dstaddr: transfer_address(dst, length, channel.destination_increments()),
            descaddr: 0, // No next descriptor.
        };
        self.write_descriptor(channel.id, descriptor);

        // The descriptor has to be in memory before the controller fetches it.
        compiler_fence(Ordering::SeqCst);

        self.dmac.set_channel_enabled(channel.id, true);
        trace!("Armed channel {}: {} bytes", channel.id, length);
    }

    fn arm_raw(&mut self, channel: ChannelId, src: usize, dst: usize, length: u16) {
        let descriptor = *self.registry.get(channel);
        self.arm_descriptor(&descriptor, src, dst, length);
    }

    /// Start a transfer of `length` bytes from `src` to `dst` on `channel`.
    ///
    /// The hardware starts moving bytes on the next trigger of the channel. Larger
    /// transfers have to be chunked by the caller.
    ///
    /// # Safety
    ///
    /// Both buffers must stay valid (and `dst` otherwise untouched) until the transfer
    /// completes or the channel is disabled. The channel must not have a transfer in flight.
    pub unsafe fn arm(&mut self, channel: ChannelId, src: *const u8, dst: *mut u8, length: u16) {
        critical_section::with(|_| self.arm_raw(channel, src as usize, dst as usize, length));
    }

    fn disable_raw(&mut self, channel: ChannelId) {
        self.dmac.set_channel_enabled(channel, false);

        // Wait for bit clear.
        while self.dmac.channel_enabled(channel) {
            spin_loop();
        }

        self.flags.clear(channel);
    }

    /// Stop `channel` and drop any completion it may have flagged.
    pub fn disable(&mut self, channel: ChannelId) {
        critical_section::with(|_| self.disable_raw(channel));
        debug!("Disabled channel {}", channel);
    }

    pub fn check_and_clear(&self, channel: ChannelId) -> bool {
        self.flags.check_and_clear(channel)
    }

    /// DMAC interrupt handler.
    pub fn on_interrupt(&mut self) {
        // The CRC mode polls channel 0 itself.
        if self.mode != EngineMode::Transfers {
            return;
        }

        for channel in self.registry.interrupt_channels() {
            if self.dmac.transfer_complete(channel) {
                // Set transfer done boolean, clear interrupt.
                self.flags.set(channel);
                self.dmac.clear_transfer_complete(channel);
            }
        }
    }

    // =====
    // Custom fs (dataflash) transfers: channel 1 reads, channel 2 clocks the bus.

    /// Read `size` bytes from the dataflash SPI bus into `buffer`.
    ///
    /// # Safety
    ///
    /// Same contract as [`DmaEngine::arm`], for both `spi_data` and `buffer`.
    pub unsafe fn custom_fs_init_transfer(&mut self, spi_data: *mut u8, buffer: *mut u8, size: u16) {
        critical_section::with(|_| {
            self.arm_raw(ChannelId::CustomFsRx, spi_data as usize, buffer as usize, size);
            self.arm_raw(ChannelId::CustomFsTx, buffer as usize, spi_data as usize, size);
        });
    }

    pub fn custom_fs_check_and_clear(&self) -> bool {
        self.flags.check_and_clear(ChannelId::CustomFsRx)
    }

    /// Raise the custom fs flag by hand, for transfers that were served without DMA.
    pub fn set_custom_fs_flag_done(&self) {
        self.flags.raise(ChannelId::CustomFsRx);
    }

    // =====
    // Display.

    /// Push `size` bytes from `buffer` to the display, triggered by `trigger`.
    ///
    /// # Safety
    ///
    /// Same contract as [`DmaEngine::arm`].
    pub unsafe fn oled_init_transfer(
        &mut self,
        spi_data: *mut u8,
        buffer: *const u8,
        size: u16,
        trigger: TriggerSource,
    ) {
        critical_section::with(|_| {
            self.registry.set_trigger(ChannelId::OledTx, trigger);
            let channel = *self.registry.get(ChannelId::OledTx);
            self.dmac
                .write_channel_control(channel.id, channel.channel_control());
            self.dmac.enable_complete_interrupt(channel.id);
            self.arm_descriptor(&channel, buffer as usize, spi_data as usize, size);
        });
    }

    pub fn oled_check_and_clear(&self) -> bool {
        self.flags.check_and_clear(ChannelId::OledTx)
    }

    // =====
    // Accelerometer: channel 5 reads, channel 3 keeps sending the read command.

    /// Read `size` bytes from the accelerometer into `buffer`.
    ///
    /// With `bug_fix` the call waits for the RX channel to get busy and then idle again
    /// before returning (DMAC erratum workaround).
    ///
    /// # Safety
    ///
    /// Same contract as [`DmaEngine::arm`], for `spi_data`, `buffer` and `read_cmd`.
    pub unsafe fn acc_init_transfer(
        &mut self,
        spi_data: *mut u8,
        buffer: *mut u8,
        size: u16,
        read_cmd: *const u8,
        bug_fix: bool,
    ) {
        critical_section::with(|_| {
            self.arm_raw(ChannelId::AccRx, spi_data as usize, buffer as usize, size);
            self.arm_raw(ChannelId::AccTx, read_cmd as usize, spi_data as usize, size);

            if bug_fix {
                while !self.dmac.channel_busy(ChannelId::AccRx) {
                    spin_loop();
                }
                while self.dmac.channel_busy(ChannelId::AccRx) {
                    spin_loop();
                }
            }
        });
    }

    pub fn acc_disable_transfer(&mut self) {
        critical_section::with(|_| {
            self.disable_raw(ChannelId::AccRx);
            self.disable_raw(ChannelId::AccTx);
        });
        debug!("Accelerometer transfer stopped");
    }

    pub fn acc_check_and_clear(&self) -> bool {
        self.flags.check_and_clear(ChannelId::AccRx)
    }

    // =====
    // Aux MCU link.

    /// # Safety
    ///
    /// Same contract as [`DmaEngine::arm`].
    pub unsafe fn aux_mcu_init_tx_transfer(
        &mut self,
        usart_data: *mut u8,
        buffer: *const u8,
        size: u16,
    ) {
        critical_section::with(|_| {
            self.arm_raw(ChannelId::AuxMcuTx, buffer as usize, usart_data as usize, size)
        });
    }

    /// # Safety
    ///
    /// Same contract as [`DmaEngine::arm`].
    pub unsafe fn aux_mcu_init_rx_transfer(
        &mut self,
        usart_data: *mut u8,
        buffer: *mut u8,
        size: u16,
    ) {
        critical_section::with(|_| {
            self.arm_raw(ChannelId::AuxMcuRx, usart_data as usize, buffer as usize, size)
        });
    }

    pub fn aux_mcu_disable_transfer(&mut self) {
        critical_section::with(|_| {
            self.disable_raw(ChannelId::AuxMcuTx);
            self.disable_raw(ChannelId::AuxMcuRx);
        });
        debug!("Aux MCU transfers stopped");
    }

    /// Bytes still expected by the current aux MCU RX transfer.
    pub fn aux_mcu_remaining_rx_bytes(&self) -> u16 {
        self.writeback(ChannelId::AuxMcuRx).btcnt
    }

    pub fn aux_mcu_check_and_clear(&self) -> bool {
        self.flags.check_and_clear(ChannelId::AuxMcuRx)
    }
}
