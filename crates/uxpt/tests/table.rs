//! Integration-level coverage of [`purgemem_uxpt::UxPageTable`] through
//! its public surface only.

use purgemem_uxpt::UxPageTable;

#[test]
fn a_freshly_initialized_table_covers_the_requested_range() {
    let page = purgemem_uxpt::page_size();
    let data_addr = 0x4000_0000u64;
    let table = UxPageTable::init(data_addr, page * 3).expect("init");
    assert_eq!(table.covered_len(), page * 3);
}

#[test]
fn concurrent_pin_and_unpin_never_panics_or_deadlocks() {
    let page = purgemem_uxpt::page_size();
    let data_addr = 0x5000_0000u64;
    let table = UxPageTable::init(data_addr, page).expect("init");

    std::thread::scope(|scope| {
        for _ in 0..16 {
            scope.spawn(|| {
                for _ in 0..256 {
                    table.get(data_addr, page).expect("pin");
                    table.put(data_addr, page).expect("unpin");
                }
            });
        }
    });
}

#[test]
fn out_of_range_access_is_rejected_without_touching_any_descriptor() {
    let page = purgemem_uxpt::page_size();
    let data_addr = 0x6000_0000u64;
    let table = UxPageTable::init(data_addr, page).expect("init");

    assert!(table.get(data_addr + page as u64, page).is_err());
    assert!(table.is_present(data_addr, page * 2).is_err());
}
