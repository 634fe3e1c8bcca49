use std::path::PathBuf;

use chrono::{NaiveDate, NaiveDateTime};
use tokio_test::{assert_err, assert_ok};

use super::*;

fn test_journal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("vitrine_test_scheduler");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn open(path: &std::path::Path) -> Scheduler {
    Scheduler::open(path, SchedulingPolicy::default(), Arc::new(NotifyHub::new())).unwrap()
}

fn march(day: u32, h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 3, day)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

fn proposal(
    client_id: Ulid,
    collection_id: Ulid,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> ProposedAppointment {
    ProposedAppointment {
        client_id,
        collection_id,
        start,
        end,
        note: None,
    }
}

async fn seed(s: &Scheduler, name: &str) -> (Ulid, Ulid) {
    let client = Client {
        id: Ulid::new(),
        name: format!("{name} client"),
        email: None,
        phone: None,
    };
    let collection = Collection {
        id: Ulid::new(),
        name: format!("{name} collection"),
        start_date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
        end_date: NaiveDate::from_ymd_opt(2025, 3, 31).unwrap(),
        color: "#336699".into(),
        notes: None,
    };
    let ids = (client.id, collection.id);
    s.register_client(client).await.unwrap();
    s.register_collection(collection).await.unwrap();
    ids
}

async fn new_client(s: &Scheduler, name: &str) -> Ulid {
    let id = Ulid::new();
    s.register_client(Client {
        id,
        name: name.into(),
        email: None,
        phone: None,
    })
    .await
    .unwrap();
    id
}

#[tokio::test]
async fn book_commits_valid_appointment() {
    let s = open(&test_journal_path("book_valid.journal"));
    let (client, collection) = seed(&s, "book").await;

    let booking = s
        .book(proposal(client, collection, march(10, 10, 0), march(10, 12, 0)))
        .await
        .unwrap();
    assert!(booking.report.is_valid);
    assert_eq!(s.get_appointment(&booking.appointment.id), Some(booking.appointment));
}

#[tokio::test]
async fn book_rejects_with_report() {
    let s = open(&test_journal_path("book_reject.journal"));
    let (client, collection) = seed(&s, "reject").await;

    let err = s
        .book(proposal(client, collection, march(10, 13, 30), march(10, 15, 30)))
        .await
        .unwrap_err();
    let EngineError::Rejected(report) = err else {
        panic!("expected rejection, got {err:?}");
    };
    assert!(!report.checks.time_constraints);
    assert_eq!(s.store().appointment_count(), 0);
}

#[tokio::test]
async fn second_overlapping_booking_is_rejected() {
    let s = open(&test_journal_path("overlap.journal"));
    let (ada, collection) = seed(&s, "overlap").await;
    let grace = new_client(&s, "Grace").await;

    assert_ok!(s.book(proposal(ada, collection, march(10, 10, 0), march(10, 12, 0))).await);
    let err = s
        .book(proposal(grace, collection, march(10, 11, 0), march(10, 13, 0)))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "rejected");
}

#[tokio::test]
async fn concurrent_bookings_for_one_slot_admit_exactly_one() {
    let s = Arc::new(open(&test_journal_path("race.journal")));
    let (_, collection) = seed(&s, "race").await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let client = new_client(&s, &format!("racer {i}")).await;
        let s = s.clone();
        handles.push(tokio::spawn(async move {
            s.book(proposal(client, collection, march(12, 14, 0), march(12, 16, 0)))
                .await
        }));
    }
    let mut admitted = 0;
    for h in handles {
        if h.await.unwrap().is_ok() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 1);
    assert_eq!(s.store().appointment_count(), 1);
}

#[tokio::test]
async fn reschedule_onto_own_slot_and_elsewhere() {
    let s = open(&test_journal_path("reschedule.journal"));
    let (client, collection) = seed(&s, "move").await;
    let booked = s
        .book(proposal(client, collection, march(10, 10, 0), march(10, 12, 0)))
        .await
        .unwrap()
        .appointment;

    let same = assert_ok!(s.reschedule(booked.id, booked.to_proposal()).await);
    assert!(same.report.is_valid);

    let moved = s
        .reschedule(booked.id, proposal(client, collection, march(11, 14, 0), march(11, 16, 0)))
        .await
        .unwrap();
    assert_eq!(moved.appointment.id, booked.id);
    assert_eq!(s.get_appointment(&booked.id).unwrap().start, march(11, 14, 0));
    assert_eq!(s.store().appointment_count(), 1);
}

#[tokio::test]
async fn reschedule_unknown_is_not_found() {
    let s = open(&test_journal_path("reschedule_missing.journal"));
    let (client, collection) = seed(&s, "ghost").await;
    let err = s
        .reschedule(Ulid::new(), proposal(client, collection, march(10, 10, 0), march(10, 12, 0)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn cancel_frees_the_slot() {
    let s = open(&test_journal_path("cancel.journal"));
    let (client, collection) = seed(&s, "cancel").await;
    let p = proposal(client, collection, march(10, 10, 0), march(10, 12, 0));
    let booked = s.book(p.clone()).await.unwrap().appointment;

    let cancelled = s.cancel(booked.id).await.unwrap();
    assert_eq!(cancelled, booked);
    assert!(s.get_appointment(&booked.id).is_none());
    assert_ok!(s.book(p).await);
    assert_err!(s.cancel(booked.id).await);
}

#[tokio::test]
async fn note_only_update_skips_validation() {
    let s = open(&test_journal_path("note_update.journal"));
    let (client, collection) = seed(&s, "note").await;
    let booked = s
        .book(proposal(client, collection, march(10, 10, 0), march(10, 12, 0)))
        .await
        .unwrap()
        .appointment;
    // Shrink the agreement so the existing booking no longer matches it.
    s.set_agreement(Agreement {
        client_id: client,
        collection_id: collection,
        visit_duration_minutes: 60,
        priority: 1,
    })
    .await
    .unwrap();

    let report = s
        .apply_update(UpdateRequest::Appointment {
            id: booked.id,
            patch: AppointmentPatch {
                note: Some(Some("ring twice".into())),
                ..Default::default()
            },
        })
        .await
        .unwrap();
    assert!(report.is_none());
    assert_eq!(
        s.get_appointment(&booked.id).unwrap().note.as_deref(),
        Some("ring twice")
    );
}

#[tokio::test]
async fn schedule_update_goes_through_validation() {
    let s = open(&test_journal_path("schedule_update.journal"));
    let (client, collection) = seed(&s, "patch").await;
    let booked = s
        .book(proposal(client, collection, march(10, 10, 0), march(10, 12, 0)))
        .await
        .unwrap()
        .appointment;

    let err = s
        .apply_update(UpdateRequest::Appointment {
            id: booked.id,
            patch: AppointmentPatch {
                start: Some(march(15, 10, 0)),
                end: Some(march(15, 12, 0)),
                ..Default::default()
            },
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "rejected");
    assert_eq!(s.get_appointment(&booked.id).unwrap(), booked);

    let report = s
        .apply_update(UpdateRequest::Appointment {
            id: booked.id,
            patch: AppointmentPatch {
                start: Some(march(11, 9, 0)),
                end: Some(march(11, 11, 0)),
                ..Default::default()
            },
        })
        .await
        .unwrap();
    assert!(report.is_some_and(|r| r.is_valid));
}

#[tokio::test]
async fn collection_update_keeps_period_ordered() {
    let s = open(&test_journal_path("collection_update.journal"));
    let (_, collection) = seed(&s, "period").await;

    let err = s
        .apply_update(UpdateRequest::Collection {
            id: collection,
            patch: CollectionPatch {
                end_date: NaiveDate::from_ymd_opt(2025, 2, 1),
                ..Default::default()
            },
        })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));

    s.apply_update(UpdateRequest::Collection {
        id: collection,
        patch: CollectionPatch {
            name: Some("Renamed".into()),
            notes: Some(Some("ground floor".into())),
            ..Default::default()
        },
    })
    .await
    .unwrap();
    let saved = s.store().get_collection(&collection).unwrap();
    assert_eq!(saved.name, "Renamed");
    assert_eq!(saved.notes.as_deref(), Some("ground floor"));
}

#[tokio::test]
async fn agreement_rules() {
    let s = open(&test_journal_path("agreement.journal"));
    let (client, collection) = seed(&s, "agree").await;
    let agreement = Agreement {
        client_id: client,
        collection_id: collection,
        visit_duration_minutes: 90,
        priority: 4,
    };
    assert!(matches!(
        s.set_agreement(agreement.clone()).await,
        Err(EngineError::InvalidInput(_))
    ));
    assert!(matches!(
        s.set_agreement(Agreement {
            client_id: Ulid::new(),
            priority: 2,
            ..agreement.clone()
        })
        .await,
        Err(EngineError::NotFound(_))
    ));
    s.set_agreement(Agreement {
        priority: 2,
        ..agreement.clone()
    })
    .await
    .unwrap();

    s.apply_update(UpdateRequest::Agreement {
        client_id: client,
        collection_id: collection,
        patch: AgreementPatch {
            visit_duration_minutes: Some(60),
            priority: None,
        },
    })
    .await
    .unwrap();
    let saved = s.store().get_agreement(client, collection).unwrap();
    assert_eq!(saved.visit_duration_minutes, 60);
    assert_eq!(saved.priority, 2);

    // The new duration applies to the next booking.
    assert_ok!(s.book(proposal(client, collection, march(10, 10, 0), march(10, 11, 0))).await);
}

#[tokio::test]
async fn duplicate_registrations_are_refused() {
    let s = open(&test_journal_path("duplicates.journal"));
    let (client, collection) = seed(&s, "dup").await;
    let existing = s.store().get_client(&client).unwrap();
    assert!(matches!(
        s.register_client(existing).await,
        Err(EngineError::AlreadyExists(id)) if id == client
    ));
    let existing = s.store().get_collection(&collection).unwrap();
    assert!(matches!(
        s.register_collection(existing).await,
        Err(EngineError::AlreadyExists(_))
    ));
    assert!(matches!(
        s.register_client(Client {
            id: Ulid::new(),
            name: "   ".into(),
            email: None,
            phone: None,
        })
        .await,
        Err(EngineError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn batch_sees_one_baseline_and_writes_nothing() {
    let s = open(&test_journal_path("batch.journal"));
    let (ada, collection) = seed(&s, "batch").await;
    let grace = new_client(&s, "Grace").await;
    let items = vec![
        (proposal(ada, collection, march(10, 10, 0), march(10, 12, 0)), None),
        (proposal(grace, collection, march(10, 11, 0), march(10, 13, 0)), None),
        (proposal(grace, collection, march(15, 10, 0), march(15, 12, 0)), None),
    ];
    let reports = s.validate_batch(&items).await.unwrap();
    assert!(reports[0].is_valid);
    assert!(reports[1].is_valid);
    assert!(!reports[2].is_valid);
    assert_eq!(s.store().appointment_count(), 0);
}

#[tokio::test]
async fn state_survives_restart() {
    let path = test_journal_path("restart.journal");
    let (client, collection, booked, cancelled);
    {
        let s = open(&path);
        (client, collection) = seed(&s, "restart").await;
        booked = s
            .book(proposal(client, collection, march(10, 10, 0), march(10, 12, 0)))
            .await
            .unwrap()
            .appointment;
        cancelled = s
            .book(proposal(client, collection, march(11, 10, 0), march(11, 12, 0)))
            .await
            .unwrap()
            .appointment;
        s.cancel(cancelled.id).await.unwrap();
    }

    let s = open(&path);
    assert_eq!(s.get_appointment(&booked.id), Some(booked));
    assert!(s.get_appointment(&cancelled.id).is_none());
    assert!(s.store().get_client(&client).is_some());
    assert!(s.store().get_collection(&collection).is_some());
}

#[tokio::test]
async fn compaction_shrinks_journal_and_preserves_state() {
    let path = test_journal_path("compact.journal");
    let kept;
    {
        let s = open(&path);
        let (client, collection) = seed(&s, "compact").await;
        for day in 10..15 {
            let a = s
                .book(proposal(client, collection, march(day, 10, 0), march(day, 12, 0)))
                .await
                .unwrap()
                .appointment;
            s.cancel(a.id).await.unwrap();
        }
        kept = s
            .book(proposal(client, collection, march(17, 10, 0), march(17, 12, 0)))
            .await
            .unwrap()
            .appointment;
        assert_eq!(s.journal_appends_since_compact().await, 13);

        let before = std::fs::metadata(&path).unwrap().len();
        s.compact_journal().await.unwrap();
        let after = std::fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted journal ({after}) should be smaller than {before}");
        assert_eq!(s.journal_appends_since_compact().await, 0);
    }

    let s = open(&path);
    assert_eq!(s.store().appointment_count(), 1);
    assert_eq!(s.get_appointment(&kept.id), Some(kept));
}

#[tokio::test]
async fn listeners_see_committed_changes() {
    let s = open(&test_journal_path("notify.journal"));
    let (client, collection) = seed(&s, "notify").await;
    let mut rx = s.notify.subscribe(collection);

    let booked = s
        .book(proposal(client, collection, march(10, 10, 0), march(10, 12, 0)))
        .await
        .unwrap()
        .appointment;
    assert_eq!(
        rx.recv().await.unwrap(),
        Event::AppointmentBooked { appointment: booked }
    );

    // Rejections publish nothing.
    let _ = s
        .book(proposal(client, collection, march(15, 10, 0), march(15, 12, 0)))
        .await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn moving_between_collections_notifies_both() {
    let s = open(&test_journal_path("notify_move.journal"));
    let (client, from) = seed(&s, "from").await;
    let to = Ulid::new();
    s.register_collection(Collection {
        id: to,
        name: "To".into(),
        start_date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
        end_date: NaiveDate::from_ymd_opt(2025, 3, 31).unwrap(),
        color: "#000000".into(),
        notes: None,
    })
    .await
    .unwrap();
    let booked = s
        .book(proposal(client, from, march(10, 10, 0), march(10, 12, 0)))
        .await
        .unwrap()
        .appointment;

    let mut from_rx = s.notify.subscribe(from);
    let mut to_rx = s.notify.subscribe(to);
    s.reschedule(booked.id, proposal(client, to, march(10, 10, 0), march(10, 12, 0)))
        .await
        .unwrap();
    assert!(matches!(
        from_rx.recv().await.unwrap(),
        Event::AppointmentRescheduled { .. }
    ));
    assert!(matches!(
        to_rx.recv().await.unwrap(),
        Event::AppointmentRescheduled { .. }
    ));
}

#[tokio::test]
async fn lock_table_only_holds_keys_in_use() {
    let s = open(&test_journal_path("lock_table.journal"));
    let (client, collection) = seed(&s, "locks").await;
    assert_eq!(s.locks.len(), 0);

    let err = s
        .book(proposal(client, Ulid::new(), march(10, 10, 0), march(10, 12, 0)))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "rejected");
    assert_eq!(s.locks.len(), 0);

    let strangers: Vec<_> = (0..50)
        .map(|_| {
            let p = proposal(Ulid::new(), Ulid::new(), march(10, 10, 0), march(10, 12, 0));
            (p, None)
        })
        .collect();
    assert_ok!(s.validate_batch(&strangers).await);
    assert_ok!(s.book(proposal(client, collection, march(10, 10, 0), march(10, 12, 0))).await);
    assert_eq!(s.locks.len(), 0);

    let held = s.lock_all([LockKey::Client(client), LockKey::Collection(collection)]).await;
    assert_eq!(s.locks.len(), 2);
    drop(held);
    assert_eq!(s.locks.len(), 0);
}

#[tokio::test]
async fn contended_key_survives_until_last_waiter_leaves() {
    let s = Arc::new(open(&test_journal_path("lock_waiters.journal")));
    let key = LockKey::Client(Ulid::new());

    let held = s.lock_all([key]).await;
    let waiter = {
        let s = s.clone();
        tokio::spawn(async move {
            let _guards = s.lock_all([key]).await;
            s.locks.len()
        })
    };
    tokio::task::yield_now().await;
    drop(held);
    // The waiter still saw its own entry while holding the lock.
    assert_eq!(waiter.await.unwrap(), 1);
    assert_eq!(s.locks.len(), 0);
}

#[tokio::test]
async fn collections_outside_the_calendar_are_refused() {
    let s = open(&test_journal_path("calendar_range.journal"));
    let collection = Collection {
        id: Ulid::new(),
        name: "Forever".into(),
        start_date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
        end_date: NaiveDate::MAX,
        color: "#000000".into(),
        notes: None,
    };
    let err = assert_err!(s.register_collection(collection.clone()).await);
    assert!(matches!(err, EngineError::InvalidInput(_)), "{err:?}");
    assert!(s.store().get_collection(&collection.id).is_none());

    let (client, collection) = seed(&s, "calendar").await;
    let far = NaiveDate::MAX;
    let err = assert_err!(
        s.book(proposal(
            client,
            collection,
            far.and_hms_opt(10, 0, 0).unwrap(),
            far.and_hms_opt(12, 0, 0).unwrap(),
        ))
        .await
    );
    assert_eq!(err.kind(), "invalid_input");

    let err = assert_err!(
        s.apply_update(UpdateRequest::Collection {
            id: collection,
            patch: CollectionPatch {
                start_date: NaiveDate::from_ymd_opt(1200, 1, 1),
                ..Default::default()
            },
        })
        .await
    );
    assert_eq!(err.kind(), "invalid_input");
}
