//! End-to-end tests exercising only the public API, as an external
//! consumer of this crate would.

#[test]
fn create_then_read_round_trips_through_the_public_api() {
    let region = purgemem::Region::create(4096, |buf| {
        buf.fill(0x5A);
        true
    })
    .expect("create region");

    assert_eq!(region.content_size(), 4096);

    let read = region.begin_read().expect("begin read");
    assert!(read.content().iter().all(|&b| b == 0x5A));
    read.end();
}

#[test]
fn append_modify_through_a_write_session_is_visible_to_later_reads() {
    let region = purgemem::Region::create(64, |buf| {
        buf.fill(0);
        true
    })
    .expect("create region");

    {
        let mut write = region.begin_write().expect("begin write");
        region
            .append_modify(&mut write, |buf| {
                buf[0] = 0xAB;
                true
            })
            .expect("append modify");
        write.end();
    }

    let read = region.begin_read().expect("begin read");
    assert_eq!(read.content()[0], 0xAB);
    read.end();
}

#[test]
fn zero_length_regions_are_rejected_at_creation() {
    let err = purgemem::Region::create(0, |_buf| true).unwrap_err();
    assert!(matches!(err, purgemem::PurgeMemError::InvalidArgument));
}

#[test]
fn repeated_read_sessions_see_stable_content_without_an_intervening_purge() {
    let region = purgemem::Region::create(256, |buf| {
        for (i, b) in buf.iter_mut().enumerate() {
            *b = (i % 256) as u8;
        }
        true
    })
    .expect("create region");

    let first: Vec<u8> = {
        let read = region.begin_read().expect("begin read");
        read.content().to_vec()
    };
    let second: Vec<u8> = {
        let read = region.begin_read().expect("begin read");
        read.content().to_vec()
    };
    assert_eq!(first, second);
}

#[test]
fn capability_probe_is_callable_and_stable_across_calls() {
    let first = purgemem::is_enabled();
    let second = purgemem::is_enabled();
    assert_eq!(first, second);
}
