use mcu_bridge::lib_dma::init_descriptor_tables;
use mcu_bridge::lib_dmac::TransferDescriptor;

#[test]
fn descriptor_tables_are_handed_out_once() {
    let tables = init_descriptor_tables();
    assert_eq!(tables.descriptors.as_ptr() as usize % 16, 0);
    assert_eq!(tables.writeback.as_ptr() as usize % 16, 0);
    assert!(tables
        .descriptors
        .iter()
        .chain(tables.writeback.iter())
        .all(|d| *d == TransferDescriptor::EMPTY));

    // A second owner would let two engines fight over the same controller state.
    assert!(std::panic::catch_unwind(init_descriptor_tables).is_err());
}
