//! Hold lifecycle tests: release idempotence, sweeping and late promotion.

#[path = "../common/mod.rs"]
mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use boxoffice::holds;
use common::*;

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[test]
fn test_create_hold_reserves_units() {
    let mut conn = setup_test_db();
    let event = create_test_event(&conn, "Holds");
    let tier = create_test_tier(&conn, &event.id, "GA", 10, 2500);

    let hold = holds::create_hold(&mut conn, &tier.id, 3, "buyer-1", Some("fp-abc"), 600).unwrap();
    assert!(hold.id.starts_with("bx_hold_"));
    assert_eq!(hold.quantity, 3);
    assert_eq!(hold.fingerprint.as_deref(), Some("fp-abc"));
    assert!(hold.expires_at > now());

    let c = counters(&conn, &tier.id);
    assert_eq!((c.available, c.reserved, c.sold), (7, 3, 0));
}

#[test]
fn test_failed_hold_leaves_nothing_behind() {
    let mut conn = setup_test_db();
    let event = create_test_event(&conn, "Holds");
    let tier = create_test_tier(&conn, &event.id, "GA", 2, 2500);

    assert!(matches!(
        holds::create_hold(&mut conn, &tier.id, 3, "buyer-1", None, 600),
        Err(AppError::InsufficientInventory(_))
    ));
    assert_eq!(queries::count_holds_for_tier(&conn, &tier.id).unwrap(), 0);
    assert_eq!(counters(&conn, &tier.id).available, 2);
}

#[test]
fn test_release_is_idempotent() {
    let mut conn = setup_test_db();
    let event = create_test_event(&conn, "Holds");
    let tier = create_test_tier(&conn, &event.id, "GA", 10, 2500);
    let hold = holds::create_hold(&mut conn, &tier.id, 4, "buyer-1", None, 600).unwrap();

    assert!(holds::release_hold(&mut conn, &hold.id).unwrap());
    assert!(!holds::release_hold(&mut conn, &hold.id).unwrap());
    assert!(!holds::release_hold(&mut conn, &hold.id).unwrap());

    let c = counters(&conn, &tier.id);
    assert_eq!((c.available, c.reserved, c.sold), (10, 0, 0));
    assert!(queries::get_hold_by_id(&conn, &hold.id).unwrap().is_none());
}

#[test]
fn test_concurrent_release_applies_once() {
    let app = create_test_app();
    let (tier_id, hold_id) = {
        let mut conn = app.conn();
        let event = create_test_event(&conn, "Holds");
        let tier = create_test_tier(&conn, &event.id, "GA", 10, 2500);
        let hold = holds::create_hold(&mut conn, &tier.id, 2, "buyer-1", None, 600).unwrap();
        (tier.id, hold.id)
    };

    let workers = 8;
    let barrier = Arc::new(Barrier::new(workers));
    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let pool = app.state.db.clone();
            let barrier = barrier.clone();
            let hold_id = hold_id.clone();
            thread::spawn(move || {
                barrier.wait();
                let mut conn = pool.get().unwrap();
                holds::release_hold(&mut conn, &hold_id).unwrap()
            })
        })
        .collect();

    let released = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|released| *released)
        .count();

    assert_eq!(released, 1, "exactly one release should win");
    let c = counters(&app.conn(), &tier_id);
    assert_eq!((c.available, c.reserved, c.sold), (10, 0, 0));
}

#[test]
fn test_sweep_releases_only_expired_holds() {
    let mut conn = setup_test_db();
    let event = create_test_event(&conn, "Holds");
    let tier = create_test_tier(&conn, &event.id, "GA", 10, 2500);

    let stale = holds::create_hold(&mut conn, &tier.id, 2, "buyer-1", None, 600).unwrap();
    let live = holds::create_hold(&mut conn, &tier.id, 3, "buyer-2", None, 600).unwrap();
    expire_hold(&conn, &stale.id);

    assert_eq!(holds::sweep_expired_holds(&mut conn, now()).unwrap(), 1);
    assert_eq!(holds::sweep_expired_holds(&mut conn, now()).unwrap(), 0);

    assert!(queries::get_hold_by_id(&conn, &stale.id).unwrap().is_none());
    assert!(queries::get_hold_by_id(&conn, &live.id).unwrap().is_some());
    let c = counters(&conn, &tier.id);
    assert_eq!((c.available, c.reserved, c.sold), (7, 3, 0));
}

#[test]
fn test_concurrent_sweeps_release_each_hold_once() {
    let app = create_test_app();
    let tier_id = {
        let mut conn = app.conn();
        let event = create_test_event(&conn, "Holds");
        let tier = create_test_tier(&conn, &event.id, "GA", 10, 2500);
        for i in 0..4 {
            let hold = holds::create_hold(&mut conn, &tier.id, 2, &format!("buyer-{}", i), None, 600).unwrap();
            expire_hold(&conn, &hold.id);
        }
        tier.id
    };

    let sweepers = 2;
    let barrier = Arc::new(Barrier::new(sweepers));
    let handles: Vec<_> = (0..sweepers)
        .map(|_| {
            let pool = app.state.db.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                let mut conn = pool.get().unwrap();
                holds::sweep_expired_holds(&mut conn, now()).unwrap()
            })
        })
        .collect();

    let released: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

    assert_eq!(released, 4, "each expired hold is released by exactly one sweeper");
    let conn = app.conn();
    let c = counters(&conn, &tier_id);
    assert_eq!((c.available, c.reserved, c.sold), (10, 0, 0));
    assert_eq!(queries::count_holds_for_tier(&conn, &tier_id).unwrap(), 0);
}

#[test]
fn test_promote_moves_reserved_to_sold() {
    let mut conn = setup_test_db();
    let event = create_test_event(&conn, "Holds");
    let tier = create_test_tier(&conn, &event.id, "GA", 10, 2500);
    let hold = holds::create_hold(&mut conn, &tier.id, 2, "buyer-1", None, 600).unwrap();

    let promoted = holds::promote_hold(&conn, &hold.id, now()).unwrap();
    assert_eq!(promoted.id, hold.id);

    let c = counters(&conn, &tier.id);
    assert_eq!((c.available, c.reserved, c.sold), (8, 0, 2));

    // Already consumed
    assert!(matches!(
        holds::promote_hold(&conn, &hold.id, now()),
        Err(AppError::HoldExpired(_))
    ));
    assert!(!holds::release_hold(&mut conn, &hold.id).unwrap());
}

#[test]
fn test_promote_after_sweep_is_hold_expired() {
    let mut conn = setup_test_db();
    let event = create_test_event(&conn, "Holds");
    let tier = create_test_tier(&conn, &event.id, "GA", 10, 2500);
    let hold = holds::create_hold(&mut conn, &tier.id, 2, "buyer-1", None, 600).unwrap();
    expire_hold(&conn, &hold.id);

    holds::sweep_expired_holds(&mut conn, now()).unwrap();

    assert!(matches!(
        holds::promote_hold(&conn, &hold.id, now()),
        Err(AppError::HoldExpired(_))
    ));
    let c = counters(&conn, &tier.id);
    assert_eq!((c.available, c.reserved, c.sold), (10, 0, 0));
}

#[test]
fn test_promote_expired_unswept_hold_releases_units() {
    let mut conn = setup_test_db();
    let event = create_test_event(&conn, "Holds");
    let tier = create_test_tier(&conn, &event.id, "GA", 10, 2500);
    let hold = holds::create_hold(&mut conn, &tier.id, 2, "buyer-1", None, 600).unwrap();
    expire_hold(&conn, &hold.id);

    assert!(matches!(
        holds::promote_hold(&conn, &hold.id, now()),
        Err(AppError::HoldExpired(_))
    ));

    // Claimed and returned, the sweeper has nothing left to do
    let c = counters(&conn, &tier.id);
    assert_eq!((c.available, c.reserved, c.sold), (10, 0, 0));
    assert_eq!(holds::sweep_expired_holds(&mut conn, now()).unwrap(), 0);
}
