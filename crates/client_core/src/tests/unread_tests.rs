use super::*;

#[test]
fn incoming_bumps_thread_and_total_by_one() {
    let mut tally = UnreadTally::default();
    let mut a = 0;
    let mut b = 0;
    for _ in 0..3 {
        tally.record_incoming(&mut a);
    }
    tally.record_incoming(&mut b);
    assert_eq!((a, b, tally.total()), (3, 1, 4));
}

#[test]
fn mark_read_subtracts_the_whole_prior_value() {
    let mut tally = UnreadTally::default();
    tally.rebase(10);
    let mut counter = 4;
    assert_eq!(tally.mark_read(&mut counter), 4);
    assert_eq!(counter, 0);
    assert_eq!(tally.total(), 6);
}

#[test]
fn total_never_underflows() {
    let mut tally = UnreadTally::default();
    let mut counter = 5;
    tally.mark_read(&mut counter);
    assert_eq!(tally.total(), 0);
    tally.forget(3);
    assert_eq!(tally.total(), 0);
}

#[test]
fn recompute_sums_thread_counters() {
    let mut tally = UnreadTally::default();
    tally.rebase(99);
    tally.recompute(&[1, 2, 3]);
    assert_eq!(tally.total(), 6);
}
