use super::*;

fn id(n: usize) -> MessageId {
    MessageId::new(format!("m{n}"))
}

#[test]
fn admit_accepts_first_sighting_only() {
    let mut ledger = DedupLedger::new(100, 20);
    assert!(ledger.admit(&id(1)));
    assert!(!ledger.admit(&id(1)));
    assert!(ledger.seen(&id(1)));
    assert_eq!(ledger.len(), 1);
}

#[test]
fn overflow_evicts_oldest_batch_in_insertion_order() {
    let mut ledger = DedupLedger::new(100, 20);
    for n in 0..100 {
        ledger.remember(id(n));
    }
    assert_eq!(ledger.len(), 100);

    ledger.remember(id(100));
    assert_eq!(ledger.len(), 81);
    for n in 0..20 {
        assert!(!ledger.seen(&id(n)), "m{n} should have been evicted");
    }
    for n in 20..=100 {
        assert!(ledger.seen(&id(n)), "m{n} should still be tracked");
    }
}

#[test]
fn lookups_do_not_refresh_age() {
    let mut ledger = DedupLedger::new(3, 1);
    ledger.remember(id(1));
    ledger.remember(id(2));
    ledger.remember(id(3));
    assert!(ledger.seen(&id(1)));
    assert!(!ledger.admit(&id(1)));

    ledger.remember(id(4));
    assert!(!ledger.seen(&id(1)));
    assert!(ledger.seen(&id(2)));
}

#[test]
fn remember_is_idempotent() {
    let mut ledger = DedupLedger::new(2, 1);
    assert!(ledger.remember(id(1)));
    assert!(!ledger.remember(id(1)));
    assert_eq!(ledger.len(), 1);
}

#[test]
fn evict_batch_is_clamped_to_capacity() {
    let mut ledger = DedupLedger::new(2, 50);
    ledger.remember(id(1));
    ledger.remember(id(2));
    ledger.remember(id(3));
    assert_eq!(ledger.len(), 1);
    assert!(!ledger.seen(&id(1)));
    assert!(!ledger.seen(&id(2)));
    assert!(ledger.seen(&id(3)));

    ledger.clear();
    assert!(ledger.is_empty());
    assert!(ledger.admit(&id(3)));
}
