//! CRC32 of a dataflash region, computed by the DMA CRC unit while the bytes stream off
//! the SPI bus. Only meant for the bootloader: it takes over channels 0 and 1 and leaves
//! the controller in CRC mode, [`DmaEngine::configure`] has to run again afterwards.

use core::hint::spin_loop;
use core::ptr;

use crate::lib_channels::ChannelDescriptor;
use crate::lib_dma::{DmaEngine, EngineMode};
use crate::lib_dmac::{ControlRegister, CrcControl, CrcPolynomial, Dmac};
use crate::lib_resources::{CRC32_SEED, DMA_MAX_BEATS};

impl<D: Dmac> DmaEngine<D> {
    /// Clock `size` bytes out of the SPI data register and return their CRC32.
    ///
    /// Standard CRC-32 (seed `0xFFFFFFFF`, check value `0xCBF43926`): in CRC-32 mode the
    /// controller reads the checksum back bit-reversed and complemented.
    ///
    /// # Safety
    ///
    /// `spi_data` must be the data register of the dataflash SERCOM and nothing else may
    /// be using channels 0 and 1 (or the controller interrupt) while this runs.
    pub unsafe fn compute_crc32(&mut self, spi_data: *mut u8, size: u32) -> u32 {
        // The byte that will be used to read/write spi data.
        let mut scratch: u8 = 0;
        let scratch_addr = ptr::addr_of_mut!(scratch) as usize;

        let rx = ChannelDescriptor::crc_spi_rx(self.triggers.dataflash_rx);
        let tx = ChannelDescriptor::crc_spi_tx(self.triggers.dataflash_tx);

        debug!("CRC32 over {} bytes", size);
        self.mode = EngineMode::Crc;

        // The CRC unit listens to the RX channel, seeded with all ones.
        self.dmac.write_crc_control(CrcControl {
            source: rx.id,
            polynomial: CrcPolynomial::Crc32,
        });
        self.dmac.write_crc_checksum(CRC32_SEED);

        self.bind_tables();
        self.dmac.write_control(ControlRegister {
            dma_enable: true,
            crc_enable: true,
            level_enable: ControlRegister::ALL_LEVELS,
        });
        self.setup_channel(&rx);
        self.setup_channel(&tx);

        // Completion is polled here, the ISR must not fire for these two.
        self.dmac.disable_complete_interrupt(rx.id);
        self.dmac.disable_complete_interrupt(tx.id);

        let mut remaining = size;
        while remaining > 0 {
            let chunk = remaining.min(DMA_MAX_BEATS as u32) as u16;

            self.arm_descriptor(&rx, spi_data as usize, scratch_addr, chunk);
            self.arm_descriptor(&tx, scratch_addr, spi_data as usize, chunk);

            // Wait for transfer to finish.
            while !self.dmac.transfer_complete(rx.id) {
                spin_loop();
            }
            self.dmac.clear_transfer_complete(rx.id);

            remaining -= chunk as u32;
            trace!("CRC32 chunk of {} done, {} left", chunk, remaining);
        }

        while self.dmac.crc_busy() {
            spin_loop();
        }

        // Keep the scratch byte alive until the last beat went through it.
        let _ = ptr::read_volatile(ptr::addr_of!(scratch));

        let crc = self.dmac.crc_checksum();
        info!("CRC32 done: {:x}", crc);
        crc
    }
}
