use super::*;
use crate::test_support::{at, message, ME};
use shared::domain::ConversationId;

const THREAD: ThreadRef = ThreadRef::Direct(ConversationId(10));

fn pending(text: &str) -> PendingSend<MessagePayload> {
    let temp = MessageId::provisional();
    PendingSend {
        thread: THREAD,
        prior_preview: None,
        optimistic_preview: LastMessage {
            text: Some(text.into()),
            sender_id: ME,
            sent_at: at(0),
            system: None,
        },
        record: message(temp.as_str(), 10, 1, text),
        acknowledged: false,
    }
}

#[test]
fn begin_keys_entries_by_the_record_id() {
    let mut reconciliation = Reconciliation::default();
    let first = pending("a");
    let expected = first.record.message_id.clone();
    let a = reconciliation.begin(first);
    let b = reconciliation.begin(pending("b"));
    assert_eq!(a, expected);
    assert!(a.is_provisional());
    assert_ne!(a, b);
    assert_eq!(reconciliation.len(), 2);
}

#[test]
fn entries_leave_exactly_once() {
    let mut reconciliation = Reconciliation::default();
    let temp = reconciliation.begin(pending("hi"));

    assert!(reconciliation.resolve(&temp).is_some());
    assert!(reconciliation.resolve(&temp).is_none());
    assert!(reconciliation.fail(&temp).is_none());
    assert!(reconciliation.is_empty());
}

#[test]
fn records_come_back_in_send_order_per_thread() {
    let mut reconciliation = Reconciliation::default();
    let a = reconciliation.begin(pending("a"));
    let mut elsewhere = pending("x");
    elsewhere.thread = ThreadRef::Direct(ConversationId(11));
    reconciliation.begin(elsewhere);
    let b = reconciliation.begin(pending("b"));

    let ids: Vec<_> = reconciliation
        .records_for(THREAD)
        .into_iter()
        .map(|m| m.message_id)
        .collect();
    assert_eq!(ids, vec![a, b]);
}

#[test]
fn history_echo_settles_the_send() {
    let mut reconciliation = Reconciliation::default();
    let temp = reconciliation.begin(pending("hi"));
    let other = reconciliation.begin(pending("later"));

    let mut echo = message("srv-1", 10, 1, "hi");
    echo.temp_id = Some(temp.clone());
    let settled = reconciliation.settle(THREAD, &[message("m0", 10, 2, "x"), echo]);

    assert_eq!(settled, vec![temp.clone()]);
    assert!(!reconciliation.is_pending(&temp));
    assert!(reconciliation.is_pending(&other));
}

#[test]
fn only_acknowledged_sends_are_forgotten_with_their_thread() {
    let mut reconciliation = Reconciliation::default();
    let acked = reconciliation.begin(pending("a"));
    let in_flight = reconciliation.begin(pending("b"));
    assert!(reconciliation.acknowledge(&acked));
    assert!(!reconciliation.acknowledge(&MessageId::provisional()));
    assert!(reconciliation.is_acknowledged(&acked));

    assert_eq!(reconciliation.forget_acknowledged(|thread| thread != THREAD), 1);
    assert!(!reconciliation.is_pending(&acked));
    assert!(reconciliation.is_pending(&in_flight));
}

#[test]
fn substitution_keeps_list_position() {
    let temp = MessageId::provisional();
    let mut list = vec![
        message("a", 10, 2, "one"),
        message(temp.as_str(), 10, 1, "two"),
        message("c", 10, 2, "three"),
    ];

    let server = MessageId::new("srv-9");
    assert_eq!(substitute_id(&mut list, &temp, &server), Substitution::Replaced);

    let ids: Vec<_> = list.iter().map(|m| m.message_id.as_str()).collect();
    assert_eq!(ids, ["a", "srv-9", "c"]);
    assert_eq!(list[1].content.as_deref(), Some("two"));
}

#[test]
fn substitution_collapses_when_server_id_already_listed() {
    let temp = MessageId::provisional();
    let mut list = vec![
        message(temp.as_str(), 10, 1, "hi"),
        message("srv-1", 10, 1, "hi"),
    ];

    let outcome = substitute_id(&mut list, &temp, &MessageId::new("srv-1"));
    assert_eq!(outcome, Substitution::Collapsed);
    assert_eq!(list.len(), 1);
    assert!(!contains_id(&list, &temp));
}

#[test]
fn substitution_reports_missing_temp() {
    let mut list = vec![message("a", 10, 2, "one")];
    let outcome = substitute_id(
        &mut list,
        &MessageId::provisional(),
        &MessageId::new("srv-2"),
    );
    assert_eq!(outcome, Substitution::Missing);
    assert_eq!(list.len(), 1);
}

#[test]
fn remove_id_drops_only_the_match() {
    let mut list = vec![message("a", 10, 2, "one"), message("b", 10, 2, "two")];
    assert!(remove_id(&mut list, &MessageId::new("a")));
    assert!(!remove_id(&mut list, &MessageId::new("a")));
    assert_eq!(list.len(), 1);
}
