use super::*;
use crate::{
    test_support::{at, group, group_message, member, system_message, ME},
    types::HandleOutcome,
};
use shared::{domain::SystemNoticeKind, protocol::SystemNotice};

const GID: GroupId = GroupId(20);
const THREAD: ThreadRef = ThreadRef::Group(GID);

fn sync_with(list: Vec<GroupSummary>) -> (GroupSync, Focus) {
    let mut sync = GroupSync::new(ME, &ClientSettings::default());
    let mut focus = Focus::default();
    sync.replace_all(list, &mut focus);
    (sync, focus)
}

fn focus_on(sync: &mut GroupSync, focus: &mut Focus, id: GroupId) {
    let ticket = focus.select(ThreadRef::Group(id));
    sync.enter(id);
    sync.finish_loading(id, Vec::new());
    focus.activate(&ticket);
}

fn ids(sync: &GroupSync) -> Vec<&str> {
    sync.messages().iter().map(|m| m.message_id.as_str()).collect()
}

fn notice(kind: SystemNoticeKind, actor: i64, target: Option<i64>) -> SystemNotice {
    SystemNotice {
        kind,
        actor_id: UserId(actor),
        target_id: target.map(UserId),
    }
}

/// Group 20 where I joined at t=50 and the others at t=0.
fn late_joiner_group() -> GroupSummary {
    let mut summary = group(20, 2, &[1, 2, 3], 0);
    for join in &mut summary.joined {
        if join.user_id == ME {
            join.joined_at = at(50);
        }
    }
    summary
}

#[test]
fn unfocused_group_counts_and_entering_resets() {
    let (mut sync, focus) = sync_with(vec![group(20, 2, &[1, 2], 0), group(21, 2, &[1, 2], 0)]);
    for n in 0..3 {
        sync.on_message_received(&group_message(&format!("g{n}"), 20, 2, "x", 10), &focus);
    }
    sync.on_message_received(&group_message("h0", 21, 2, "y", 10), &focus);
    assert_eq!(sync.unread_total(), 4);

    assert_eq!(sync.enter(GID), 3);
    assert_eq!(sync.unread_total(), 1);
}

#[test]
fn system_messages_are_listed_but_never_unread() {
    let (mut sync, focus) = sync_with(vec![group(20, 2, &[1, 2, 3], 0)]);
    let added = system_message(
        "s1",
        20,
        notice(SystemNoticeKind::MemberAdded, 2, Some(3)),
        10,
    );

    let dispatch = sync.on_message_received(&added, &focus);
    assert_eq!(dispatch.outcome, HandleOutcome::Applied);
    assert_eq!(sync.unread_total(), 0);
    assert_eq!(
        sync.group(GID)
            .and_then(|g| g.last_message.as_ref())
            .and_then(|m| m.system.as_ref())
            .map(|s| s.kind),
        Some(SystemNoticeKind::MemberAdded)
    );
    assert_eq!(
        sync.on_message_received(&added, &focus).outcome,
        HandleOutcome::Duplicate
    );
}

#[test]
fn focused_system_message_appends_without_read_receipt() {
    let (mut sync, mut focus) = sync_with(vec![group(20, 2, &[1, 2], 0)]);
    focus_on(&mut sync, &mut focus, GID);

    let dispatch = sync.on_message_received(
        &system_message("s1", 20, notice(SystemNoticeKind::GroupUpdated, 2, None), 10),
        &focus,
    );
    assert_eq!(ids(&sync), ["s1"]);
    assert!(!dispatch
        .effects
        .iter()
        .any(|effect| matches!(effect, Effect::Emit(_))));
}

#[test]
fn focused_regular_message_emits_group_mark_read() {
    let (mut sync, mut focus) = sync_with(vec![group(20, 2, &[1, 2], 0)]);
    focus_on(&mut sync, &mut focus, GID);

    let dispatch = sync.on_message_received(&group_message("g1", 20, 2, "hi", 10), &focus);
    assert!(dispatch
        .effects
        .contains(&Effect::Emit(ClientRequest::GroupMarkRead { group_id: GID })));
}

#[test]
fn history_before_my_join_is_never_shown() {
    let (mut sync, mut focus) = sync_with(vec![late_joiner_group()]);
    focus_on(&mut sync, &mut focus, GID);

    sync.finish_loading(
        GID,
        vec![
            group_message("old", 20, 2, "before you", 10),
            group_message("edge", 20, 2, "at join", 50),
            group_message("new", 20, 2, "after", 60),
        ],
    );
    assert_eq!(ids(&sync), ["edge", "new"]);

    let added = sync.prepend_older(GID, vec![group_message("older", 20, 2, "x", 5)]);
    assert_eq!(added, 0);

    let dispatch = sync.on_message_received(&group_message("late", 20, 2, "x", 20), &focus);
    assert_eq!(dispatch.outcome, HandleOutcome::Ignored);
    assert_eq!(ids(&sync), ["edge", "new"]);

    sync.replace_all(vec![late_joiner_group()], &mut focus);
    assert_eq!(ids(&sync), ["edge", "new"]);
}

#[test]
fn being_added_to_an_unknown_group_inserts_it() {
    let (mut sync, _) = sync_with(Vec::new());
    let summary = group(20, 2, &[1, 2], 0);

    let dispatch = sync.on_members_added(GID, &[member(1)], at(0), Some(&summary));
    assert_eq!(dispatch.outcome, HandleOutcome::Applied);
    assert!(sync.group(GID).is_some());

    let (mut bare, _) = sync_with(Vec::new());
    let dispatch = bare.on_members_added(GID, &[member(1)], at(0), None);
    assert_eq!(dispatch.effects, vec![Effect::RefreshGroups]);

    let dispatch = bare.on_members_added(GroupId(99), &[member(7)], at(0), None);
    assert_eq!(dispatch.outcome, HandleOutcome::Ignored);
}

#[test]
fn member_delta_is_applied_once() {
    let (mut sync, _) = sync_with(vec![group(20, 2, &[1, 2], 0)]);

    let members = [member(3), member(4)];
    assert_eq!(
        sync.on_members_added(GID, &members, at(30), None).outcome,
        HandleOutcome::Applied
    );
    assert_eq!(
        sync.on_members_added(GID, &members, at(30), None).outcome,
        HandleOutcome::Duplicate
    );
    let summary = sync.group(GID).expect("group");
    assert_eq!(
        summary.participant_ids,
        vec![UserId(1), UserId(2), UserId(3), UserId(4)]
    );
    assert!(summary
        .joined
        .iter()
        .any(|j| j.user_id == UserId(4) && j.joined_at == at(30)));
}

#[test]
fn re_adding_me_moves_my_join_time() {
    let (mut sync, mut focus) = sync_with(vec![group(20, 2, &[1, 2, 3], 0)]);
    focus_on(&mut sync, &mut focus, GID);
    sync.on_message_received(&group_message("old", 20, 2, "x", 10), &focus);
    assert_eq!(ids(&sync), ["old"]);

    let dispatch = sync.on_members_added(GID, &[member(1)], at(40), None);
    assert_eq!(dispatch.outcome, HandleOutcome::Applied);
    assert!(dispatch
        .effects
        .contains(&Effect::Notify(ClientEvent::MessagesChanged(THREAD))));
    assert!(ids(&sync).is_empty());

    let summary = sync.group(GID).expect("group");
    assert_eq!(summary.participant_ids.len(), 3);
    assert!(summary
        .joined
        .iter()
        .any(|j| j.user_id == ME && j.joined_at == at(40)));

    assert_eq!(
        sync.on_members_added(GID, &[member(1)], at(40), None).outcome,
        HandleOutcome::Duplicate
    );
    let late = sync.on_message_received(&group_message("pre", 20, 2, "y", 20), &focus);
    assert_eq!(late.outcome, HandleOutcome::Ignored);
}

#[test]
fn removed_member_keeps_fallback_snapshot() {
    let (mut sync, mut focus) = sync_with(vec![group(20, 2, &[1, 2, 3], 0)]);

    let dispatch = sync.on_member_gone(GID, UserId(3), None, &mut focus);
    assert_eq!(dispatch.outcome, HandleOutcome::Applied);
    assert_eq!(
        sync.group(GID).map(|g| g.participant_ids.clone()),
        Some(vec![UserId(1), UserId(2)])
    );
    assert_eq!(
        sync.member(GID, UserId(3)).map(|m| m.first_name.as_str()),
        Some("user3")
    );
    assert_eq!(
        sync.on_member_gone(GID, UserId(3), None, &mut focus).outcome,
        HandleOutcome::Duplicate
    );
}

#[test]
fn admin_leaving_transfers_admin() {
    let (mut sync, mut focus) = sync_with(vec![group(20, 2, &[1, 2, 3], 0)]);
    sync.on_member_gone(GID, UserId(2), Some(UserId(3)), &mut focus);
    assert_eq!(sync.group(GID).map(|g| g.admin_id), Some(UserId(3)));
}

#[test]
fn my_own_removal_drops_the_group_and_focus() {
    let (mut sync, mut focus) = sync_with(vec![group(20, 2, &[1, 2], 0)]);
    focus_on(&mut sync, &mut focus, GID);
    sync.on_message_received(&group_message("g1", 20, 2, "x", 10), &focus);

    let dispatch = sync.on_member_gone(GID, ME, None, &mut focus);
    assert!(dispatch
        .effects
        .contains(&Effect::Notify(ClientEvent::FocusChanged(None))));
    assert!(sync.group(GID).is_none());
    assert!(sync.messages().is_empty());
    assert_eq!(focus.target(), None);
}

#[test]
fn group_update_patches_only_given_fields() {
    let (mut sync, _) = sync_with(vec![group(20, 2, &[1, 2], 0)]);
    sync.on_group_updated(GID, Some("renamed"), None, None);
    let summary = sync.group(GID).expect("group");
    assert_eq!(summary.name, "renamed");
    assert_eq!(summary.admin_id, UserId(2));
    assert_eq!(
        sync.on_group_updated(GroupId(99), Some("x"), None, None)
            .outcome,
        HandleOutcome::Ignored
    );
}

#[test]
fn receipts_drive_aggregate_status() {
    let (mut sync, mut focus) = sync_with(vec![group(20, 1, &[1, 2, 3], 0)]);
    focus_on(&mut sync, &mut focus, GID);
    sync.on_message_received(&group_message("g1", 20, ME.0, "mine", 10), &focus);
    let g1 = MessageId::new("g1");

    assert_eq!(sync.message_status(&g1), Some(MessageStatus::Sent));

    sync.on_message_delivered(GID, &g1, UserId(2), at(11));
    assert_eq!(sync.message_status(&g1), Some(MessageStatus::Sent));
    assert_eq!(
        sync.on_message_delivered(GID, &g1, UserId(2), at(11)).outcome,
        HandleOutcome::Duplicate
    );

    sync.on_message_delivered(GID, &g1, UserId(3), at(12));
    assert_eq!(sync.message_status(&g1), Some(MessageStatus::Delivered));

    sync.on_messages_read(GID, UserId(2), &[g1.clone()], at(13));
    sync.on_messages_read(GID, UserId(3), &[g1.clone()], at(14));
    assert_eq!(sync.message_status(&g1), Some(MessageStatus::Read));
}

#[test]
fn aggregate_status_ignores_the_sender() {
    let mut msg = group_message("g1", 20, 2, "x", 0);
    msg.read_by.push(Receipt {
        user_id: UserId(2),
        at: at(1),
    });
    assert_eq!(aggregate_status(&msg, 2), MessageStatus::Sent);
    msg.read_by.push(Receipt {
        user_id: UserId(1),
        at: at(2),
    });
    assert_eq!(aggregate_status(&msg, 2), MessageStatus::Read);
    assert_eq!(aggregate_status(&msg, 1), MessageStatus::Sent);
}

#[test]
fn message_info_merges_receipts() {
    let (mut sync, mut focus) = sync_with(vec![group(20, 1, &[1, 2], 0)]);
    focus_on(&mut sync, &mut focus, GID);
    sync.on_message_received(&group_message("g1", 20, ME.0, "mine", 10), &focus);

    let info = GroupMessageInfo {
        message_id: MessageId::new("g1"),
        member_count: 2,
        delivered_to: vec![Receipt {
            user_id: UserId(2),
            at: at(11),
        }],
        read_by: vec![Receipt {
            user_id: UserId(2),
            at: at(12),
        }],
    };
    assert!(sync.apply_message_info(GID, &info));
    assert!(!sync.apply_message_info(GID, &info));
    assert_eq!(
        sync.message_status(&MessageId::new("g1")),
        Some(MessageStatus::Read)
    );
}

#[test]
fn group_send_carries_mentions_and_rolls_back() {
    let (mut sync, mut focus) = sync_with(vec![group(20, 2, &[1, 2], 0)]);
    focus_on(&mut sync, &mut focus, GID);

    let draft = MessageDraft {
        text: Some("@all hi".into()),
        mentions_everyone: true,
        ..MessageDraft::default()
    };
    let (temp, request) = sync.begin_send(GID, &draft, &focus).expect("begin send");
    assert!(matches!(
        request,
        ClientRequest::GroupSendMessage { mentions_everyone: true, group_id, .. } if group_id == GID
    ));
    assert_eq!(ids(&sync), [temp.as_str()]);

    assert_eq!(sync.fail_send(&temp), Some(THREAD));
    assert!(sync.messages().is_empty());
    assert!(sync.group(GID).and_then(|g| g.last_message.as_ref()).is_none());
}

#[test]
fn deleted_for_everyone_scrubs_mentions_too() {
    let (mut sync, mut focus) = sync_with(vec![group(20, 2, &[1, 2], 0)]);
    focus_on(&mut sync, &mut focus, GID);
    let mut msg = group_message("g1", 20, 2, "@you", 10);
    msg.mentions_everyone = true;
    sync.on_message_received(&msg, &focus);

    sync.on_message_deleted(GID, &MessageId::new("g1"), true);
    let scrubbed = &sync.messages()[0];
    assert!(scrubbed.deleted_for_everyone);
    assert_eq!(scrubbed.content, None);
    assert!(!scrubbed.mentions_everyone);
}
