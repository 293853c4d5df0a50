//! Handle lifecycle scenarios over the public pool API.

use scoria::pool::{Handle, Pool, PoolError};

#[test]
fn destroy_then_get_reports_stale() {
    let mut pool = Pool::new();
    let handle = pool.create(42u32);
    assert_eq!(pool.get(handle), Ok(&42));

    assert_eq!(pool.destroy(handle), Ok(42));
    assert_eq!(pool.destroy(handle), Err(PoolError::StaleHandle));
    assert_eq!(pool.get(handle), Err(PoolError::StaleHandle));
}

#[test]
fn freed_slot_is_reused_with_bumped_generation() {
    let mut pool = Pool::new();
    let first = pool.create(1u32);
    pool.destroy(first).unwrap();

    let second = pool.create(2u32);
    assert_eq!(second.index(), first.index());
    assert_eq!(second.generation(), first.generation() + 1);

    // The old handle must never see the new occupant.
    assert_eq!(pool.get(first), Err(PoolError::StaleHandle));
    assert_eq!(pool.get(second), Ok(&2));
}

#[test]
fn invalid_and_out_of_range_handles_are_rejected() {
    let mut pool = Pool::new();
    let live = pool.create("alive");

    assert_eq!(pool.get(Handle::INVALID), Err(PoolError::InvalidHandle));
    let beyond = pool.handle_for_index(live.index() + 1);
    assert!(beyond.empty());
    assert_eq!(pool.get(beyond), Err(PoolError::InvalidHandle));
}

#[test]
fn iteration_yields_holes_for_freed_slots() {
    let mut pool = Pool::new();
    let a = pool.create(10u32);
    let b = pool.create(20u32);
    let c = pool.create(30u32);
    pool.destroy(b).unwrap();

    let slots: Vec<Option<u32>> = pool.iter().map(|s| s.copied()).collect();
    assert_eq!(slots, vec![Some(10), None, Some(30)]);
    assert_eq!(pool.size(), 2);
    assert_eq!(pool.slot_count(), 3);

    // Slot index reconstruction round-trips for live entries only.
    assert_eq!(pool.handle_for_index(a.index()), a);
    assert!(pool.handle_for_index(b.index()).empty());
    assert_eq!(pool.handle_for_index(c.index()), c);
}

#[test]
fn find_by_equality_scans_live_entries() {
    let mut pool = Pool::new();
    pool.create(1u32);
    let target = pool.create(7u32);
    let hole = pool.create(3u32);
    pool.destroy(hole).unwrap();

    assert_eq!(pool.find_by_equality(&7), target);
    assert!(pool.find_by_equality(&3).empty());
}
