use super::*;

const DIRECT: ThreadRef = ThreadRef::Direct(ConversationId(1));
const GROUP: ThreadRef = ThreadRef::Group(GroupId(1));

#[test]
fn selection_moves_through_loading_to_active() {
    let mut focus = Focus::default();
    assert_eq!(focus.phase_of(DIRECT), Phase::Inactive);

    let ticket = focus.select(DIRECT);
    assert_eq!(focus.phase_of(DIRECT), Phase::Loading);
    assert!(focus.activate(&ticket));
    assert_eq!(focus.phase_of(DIRECT), Phase::Active);
}

#[test]
fn one_target_across_both_domains() {
    let mut focus = Focus::default();
    focus.select(DIRECT);
    focus.select(GROUP);
    assert_eq!(focus.direct(), None);
    assert_eq!(focus.group(), Some(GroupId(1)));
    assert_eq!(focus.phase_of(DIRECT), Phase::Inactive);

    focus.select(DIRECT);
    assert_eq!(focus.group(), None);
    assert!(focus.is_focused(DIRECT));
}

#[test]
fn stale_ticket_is_rejected_even_for_the_same_thread() {
    let mut focus = Focus::default();
    let first = focus.select(DIRECT);
    focus.select(GROUP);
    let second = focus.select(DIRECT);

    assert!(!focus.activate(&first));
    assert_eq!(focus.phase_of(DIRECT), Phase::Loading);
    assert!(focus.activate(&second));
}

#[test]
fn clear_if_only_matches_the_current_target() {
    let mut focus = Focus::default();
    let ticket = focus.select(GROUP);
    assert!(!focus.clear_if(DIRECT));
    assert!(focus.clear_if(GROUP));
    assert_eq!(focus.target(), None);
    assert!(!focus.is_current(&ticket));
}
