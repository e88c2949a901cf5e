use super::*;
use chrono::{Duration, TimeZone};
use shared::domain::{SenderType, UserId};

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).single().expect("valid time")
}

fn client() -> Participant {
    Participant {
        user_id: UserId::from("u1"),
        sender_type: SenderType::Client,
        display_name: "Ali".into(),
    }
}

fn confirmed(id: &str, sender: &str, body: &str, at: DateTime<Utc>) -> Message {
    Message {
        id: MessageId::from(id),
        consultation_id: ConsultationId::from("c1"),
        sender_id: UserId::from(sender),
        sender_type: if sender.starts_with('d') {
            SenderType::Designer
        } else {
            SenderType::Client
        },
        body: body.into(),
        created_at: at,
        sender_name: String::new(),
    }
}

fn assert_sorted(store: &MessageStore) {
    assert!(
        store
            .messages()
            .windows(2)
            .all(|pair| pair[0].created_at <= pair[1].created_at),
        "messages out of order: {:?}",
        store.messages()
    );
}

#[test]
fn confirmation_within_window_replaces_placeholder() {
    let mut store = MessageStore::new(ConsultationId::from("c1"));
    let optimistic = store.insert_optimistic(&client(), "Hello", base_time());
    assert_eq!(store.len(), 1);
    assert!(store.messages()[0].is_pending());

    let outcome = store.merge_confirmed(confirmed(
        "msg-1",
        "u1",
        "Hello",
        base_time() + Duration::milliseconds(1200),
    ));

    assert_eq!(
        outcome,
        MergeOutcome::Confirmed {
            placeholder_id: optimistic.id.clone()
        }
    );
    assert_eq!(store.len(), 1);
    assert_eq!(store.messages()[0].id, MessageId::from("msg-1"));
    assert_eq!(store.messages()[0].sender_name, "Ali");
    assert!(store.get(&optimistic.id).is_none());
    assert_eq!(store.pending().count(), 0);
}

#[test]
fn confirmation_outside_window_is_appended() {
    let mut store = MessageStore::new(ConsultationId::from("c1"));
    store.insert_optimistic(&client(), "Hello", base_time());

    let outcome = store.merge_confirmed(confirmed(
        "msg-1",
        "u1",
        "Hello",
        base_time() + Duration::milliseconds(CONFIRMATION_WINDOW_MS),
    ));

    assert_eq!(outcome, MergeOutcome::Appended);
    assert_eq!(store.len(), 2);
    assert_eq!(store.pending().count(), 1);
}

#[test]
fn confirmation_before_optimistic_timestamp_still_matches() {
    let mut store = MessageStore::new(ConsultationId::from("c1"));
    store.insert_optimistic(&client(), "Hello", base_time());

    let outcome = store.merge_confirmed(confirmed(
        "msg-1",
        "u1",
        "Hello",
        base_time() - Duration::milliseconds(4999),
    ));

    assert!(matches!(outcome, MergeOutcome::Confirmed { .. }));
    assert_eq!(store.len(), 1);
}

#[test]
fn different_sender_or_body_never_confirms() {
    let mut store = MessageStore::new(ConsultationId::from("c1"));
    store.insert_optimistic(&client(), "Hello", base_time());

    assert_eq!(
        store.merge_confirmed(confirmed("msg-1", "d1", "Hello", base_time())),
        MergeOutcome::Appended
    );
    assert_eq!(
        store.merge_confirmed(confirmed("msg-2", "u1", "Hello!", base_time())),
        MergeOutcome::Appended
    );
    assert_eq!(store.len(), 3);
    assert_eq!(store.pending().count(), 1);
}

#[test]
fn redelivery_of_confirmed_message_is_idempotent() {
    let mut store = MessageStore::new(ConsultationId::from("c1"));
    let message = confirmed("msg-7", "d1", "Here is the moodboard", base_time());

    assert_eq!(store.merge_confirmed(message.clone()), MergeOutcome::Appended);
    assert_eq!(store.merge_confirmed(message), MergeOutcome::Duplicate);
    assert_eq!(
        store
            .messages()
            .iter()
            .filter(|m| m.id == MessageId::from("msg-7"))
            .count(),
        1
    );
}

#[test]
fn redelivery_does_not_consume_a_second_identical_placeholder() {
    let mut store = MessageStore::new(ConsultationId::from("c1"));
    store.insert_optimistic(&client(), "ok", base_time());
    store.insert_optimistic(&client(), "ok", base_time() + Duration::milliseconds(300));

    let first = confirmed("msg-1", "u1", "ok", base_time() + Duration::milliseconds(100));
    assert!(matches!(
        store.merge_confirmed(first.clone()),
        MergeOutcome::Confirmed { .. }
    ));
    assert_eq!(store.merge_confirmed(first), MergeOutcome::Duplicate);

    assert_eq!(store.len(), 2);
    assert_eq!(store.pending().count(), 1);
}

#[test]
fn list_stays_sorted_regardless_of_arrival_order() {
    let mut store = MessageStore::new(ConsultationId::from("c1"));
    let arrivals = [
        ("msg-3", 30),
        ("msg-1", 10),
        ("msg-5", 50),
        ("msg-2", 20),
        ("msg-4", 40),
    ];
    for (id, offset) in arrivals {
        store.merge_confirmed(confirmed(
            id,
            "d1",
            id,
            base_time() + Duration::seconds(offset),
        ));
        assert_sorted(&store);
    }
    store.insert_optimistic(&client(), "late draft", base_time() + Duration::seconds(25));
    assert_sorted(&store);

    let ids: Vec<&str> = store.messages().iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids[0], "msg-1");
    assert_eq!(ids[1], "msg-2");
    assert!(ids[2].starts_with("temp-"));
    assert_eq!(ids[5], "msg-5");
}

#[test]
fn confirmed_copy_with_corrected_timestamp_is_resorted() {
    let mut store = MessageStore::new(ConsultationId::from("c1"));
    store.merge_confirmed(confirmed("msg-1", "d1", "first", base_time() + Duration::seconds(2)));
    store.insert_optimistic(&client(), "mine", base_time() + Duration::seconds(3));

    store.merge_confirmed(confirmed("msg-2", "u1", "mine", base_time() + Duration::seconds(1)));

    let ids: Vec<&str> = store.messages().iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["msg-2", "msg-1"]);
}

#[test]
fn seed_history_deduplicates_and_sorts() {
    let mut store = MessageStore::new(ConsultationId::from("c1"));
    store.merge_confirmed(confirmed("msg-2", "d1", "already here", base_time() + Duration::seconds(2)));

    let seeded = store.seed_history(vec![
        confirmed("msg-3", "u1", "three", base_time() + Duration::seconds(3)),
        confirmed("msg-1", "d1", "one", base_time() + Duration::seconds(1)),
        confirmed("msg-2", "d1", "already here", base_time() + Duration::seconds(2)),
    ]);

    assert_eq!(seeded, 2);
    let ids: Vec<&str> = store.messages().iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["msg-1", "msg-2", "msg-3"]);
}

#[test]
fn messages_for_other_consultations_are_ignored() {
    let mut store = MessageStore::new(ConsultationId::from("c2"));
    let outcome = store.merge_confirmed(confirmed("msg-1", "d1", "wrong room", base_time()));
    assert_eq!(outcome, MergeOutcome::Ignored);
    assert!(store.is_empty());
}

#[test]
fn discard_pending_only_removes_placeholders() {
    let mut store = MessageStore::new(ConsultationId::from("c1"));
    let optimistic = store.insert_optimistic(&client(), "draft", base_time());
    store.merge_confirmed(confirmed("msg-1", "d1", "reply", base_time()));

    assert!(!store.discard_pending(&MessageId::from("msg-1")));
    assert!(store.discard_pending(&optimistic.id));
    assert!(!store.discard_pending(&optimistic.id));
    assert_eq!(store.len(), 1);
}
