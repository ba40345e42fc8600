mod common;

use common::{engine, reference_crc32, SimDmac};
use mcu_bridge::lib_channels::ChannelId;
use mcu_bridge::lib_dma::EngineMode;
use mcu_bridge::lib_dmac::CrcPolynomial;

fn flash_contents(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 + (i >> 8)) as u8).collect()
}

fn crc_of(data: &[u8]) -> (u32, SimDmac) {
    let register = 0u8;
    let sim = SimDmac::with_spi(true, &register as *const u8 as usize, data.to_vec());
    let mut engine = engine(&sim);

    let crc = unsafe { engine.compute_crc32(&register as *const u8 as *mut u8, data.len() as u32) };
    assert_eq!(engine.mode(), EngineMode::Crc);
    (crc, sim)
}

#[test]
fn known_value() {
    let (crc, _) = crc_of(b"123456789");
    // CRC-32 check value.
    assert_eq!(crc, 0xCBF4_3926);
}

#[test]
fn small_region() {
    let data = flash_contents(1000);
    let (crc, sim) = crc_of(&data);

    assert_eq!(crc, reference_crc32(&data));
    assert_eq!(sim.spi_tx().len(), 1000);

    let state = sim.state.borrow();
    let control = state.crc_control.unwrap();
    assert_eq!(control.source, ChannelId::AuxMcuRx);
    assert_eq!(control.polynomial, CrcPolynomial::Crc32);
    assert!(state.ctrl.unwrap().crc_enable);
}

#[test]
fn chunk_boundaries() {
    for len in [65_535usize, 65_536] {
        let data = flash_contents(len);
        let (crc, sim) = crc_of(&data);

        assert_eq!(crc, reference_crc32(&data), "len {}", len);
        assert_eq!(sim.state.borrow().crc_beats, len);
    }
}

#[test]
fn region_larger_than_one_transfer() {
    let data = flash_contents(150_000);
    let (crc, sim) = crc_of(&data);

    assert_eq!(crc, reference_crc32(&data));
    // Every byte read was also clocked out.
    assert_eq!(sim.spi_tx().len(), 150_000);

    // Three chunks: 65535 + 65535 + 18930, RX armed before TX each time.
    let state = sim.state.borrow();
    let arms: Vec<_> = state.enable_log.iter().filter(|(_, on)| *on).collect();
    assert_eq!(arms.len(), 6);
    assert_eq!(*arms[0], (ChannelId::AuxMcuRx, true));
    assert_eq!(*arms[1], (ChannelId::CustomFsRx, true));
}

#[test]
fn empty_region_is_the_seed() {
    let (crc, sim) = crc_of(&[]);
    // Untouched seed, complemented on the way out.
    assert_eq!(crc, 0x0000_0000);
    assert!(sim.spi_tx().is_empty());
}

#[test]
fn configure_leaves_crc_mode() {
    let register = 0u8;
    let sim = SimDmac::with_spi(true, &register as *const u8 as usize, vec![0u8; 16]);
    let mut engine = engine(&sim);

    // Channels 0 and 1 come out of configure() with their completion interrupt on.
    assert!(sim.state.borrow().int_enabled[ChannelId::AuxMcuRx.index()]);
    assert!(sim.state.borrow().int_enabled[ChannelId::CustomFsRx.index()]);

    unsafe { engine.compute_crc32(&register as *const u8 as *mut u8, 16) };
    assert_eq!(engine.mode(), EngineMode::Crc);
    assert!(!sim.state.borrow().int_enabled[ChannelId::AuxMcuRx.index()]);
    assert!(!sim.state.borrow().int_enabled[ChannelId::CustomFsRx.index()]);

    // Completions raised while in CRC mode are not turned into flags.
    engine.on_interrupt();
    assert!(!engine.flags().is_set(ChannelId::AuxMcuRx));

    engine.configure();
    assert_eq!(engine.mode(), EngineMode::Transfers);
    assert!(sim.state.borrow().int_enabled[ChannelId::AuxMcuRx.index()]);
    assert!(!sim.state.borrow().ctrl.unwrap().crc_enable);
}
