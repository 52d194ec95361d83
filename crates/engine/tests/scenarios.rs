//! End-to-end check-in flows against the in-memory store

use attendance_common::clock::{Clock, ManualClock};
use attendance_common::config::AttendanceConfig;
use attendance_common::db::models::{CheckInMethod, DayOfWeek, Organization, Session, Subscriber};
use attendance_common::db::{AttendanceStore, MemoryStore};
use attendance_common::errors::{AppError, ErrorKind};
use attendance_engine::{
    AdHocSession, AttendanceEngine, CheckInAction, CheckInRequest, Credential, NewOrganization,
    NewSubscriber, QrCodec, ScheduleDefinition, Target,
};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

/// 2024-01-01 was a Monday
fn monday(hour: u32, minute: u32) -> DateTime<FixedOffset> {
    Utc.with_ymd_and_hms(2024, 1, 1, hour, minute, 0).unwrap().fixed_offset()
}

struct Fixture {
    engine: AttendanceEngine,
    store: Arc<dyn AttendanceStore>,
    clock: ManualClock,
    org: Organization,
}

impl Fixture {
    async fn new() -> Self {
        Self::with_config(AttendanceConfig::default()).await
    }

    async fn with_config(config: AttendanceConfig) -> Self {
        let store: Arc<dyn AttendanceStore> = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(monday(8, 55));
        let engine = AttendanceEngine::new(store.clone(), Arc::new(clock.clone()), &config);
        let org = engine
            .directory()
            .create_organization(NewOrganization {
                name: "Riverside Gym".into(),
                entity_id: "rsg".into(),
            })
            .await
            .unwrap();
        Self { engine, store, clock, org }
    }

    async fn subscriber(&self, first_name: &str) -> Subscriber {
        self.subscriber_in(self.org.id, first_name).await
    }

    async fn subscriber_in(&self, organization_id: Uuid, first_name: &str) -> Subscriber {
        self.engine
            .directory()
            .add_subscriber(
                organization_id,
                NewSubscriber {
                    first_name: first_name.into(),
                    last_name: "Tester".into(),
                    email: None,
                },
            )
            .await
            .unwrap()
    }

    async fn card_for(&self, uid: &str, subscriber: &Subscriber) {
        self.engine.cards().register(subscriber.organization_id, uid).await.unwrap();
        self.engine.cards().assign(uid, subscriber.id).await.unwrap();
    }

    async fn session(&self, methods: &[CheckInMethod]) -> Session {
        self.engine
            .sessions()
            .create(
                self.org.id,
                AdHocSession {
                    name: "Open Mat".into(),
                    description: None,
                    start_time: None,
                    planned_end: None,
                    allowed_methods: methods.iter().copied().collect(),
                },
            )
            .await
            .unwrap()
    }

    async fn records(&self, session_id: Uuid) -> usize {
        self.store.records_for_session(session_id).await.unwrap().len()
    }
}

fn tap(card_uid: &str, session_id: Uuid) -> CheckInRequest {
    CheckInRequest {
        channel: CheckInMethod::Nfc,
        credential: Credential::Card { card_uid: card_uid.into() },
        target: Target::Session { session_id },
    }
}

fn as_subscriber(channel: CheckInMethod, subscriber: &Subscriber, target: Target) -> CheckInRequest {
    CheckInRequest {
        channel,
        credential: Credential::Subscriber { subscriber_id: subscriber.id },
        target,
    }
}

fn monday_class(methods: &[CheckInMethod]) -> ScheduleDefinition {
    ScheduleDefinition {
        name: "Morning Yoga".into(),
        description: None,
        start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        duration_minutes: 60,
        days_of_week: [DayOfWeek::Monday].into_iter().collect(),
        allowed_methods: methods.iter().copied().collect(),
        active: true,
    }
}

#[tokio::test]
async fn test_monday_template_expands_to_nine_oclock() {
    let fx = Fixture::new().await;
    let template = fx
        .engine
        .schedules()
        .create(fx.org.id, monday_class(&[CheckInMethod::Nfc]))
        .await
        .unwrap();

    let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let session = assert_ok!(fx.engine.schedules().ensure_instance_for(&template, date).await);
    assert_eq!(session.start_time, monday(9, 0));
    assert_eq!(session.scheduled_end, Some(monday(10, 0)));
    assert_eq!(session.end_time, None);
    assert_eq!(session.scheduled_session_id, Some(template.id));

    let tuesday = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
    let err = assert_err!(fx.engine.schedules().ensure_instance_for(&template, tuesday).await);
    assert_eq!(err.kind(), ErrorKind::PolicyViolation);
}

#[tokio::test]
async fn test_tap_debounce_checkout_and_close() {
    let fx = Fixture::new().await;
    let sam = fx.subscriber("Sam").await;
    let tess = fx.subscriber("Tess").await;
    fx.card_for("04:A1:B2:C3", &sam).await;
    let session = fx.session(&[CheckInMethod::Nfc]).await;

    // first tap checks in
    let first = assert_ok!(fx.engine.resolve(tap("04A1B2C3", session.id)).await);
    assert_eq!(first.action, CheckInAction::CheckIn);
    assert!(!first.debounced);
    assert_eq!(first.subscriber_name, "Sam Tester");
    assert_eq!(fx.records(session.id).await, 1);
    assert!(fx.engine.ledger().find_open_record(sam.id, session.id).await.unwrap().is_some());

    // reader reports the same tap again a second later
    fx.clock.advance(Duration::seconds(1));
    let repeat = assert_ok!(fx.engine.resolve(tap("04 a1 b2 c3", session.id)).await);
    assert_eq!(repeat.action, CheckInAction::CheckIn);
    assert!(repeat.debounced);
    assert_eq!(repeat.record, first.record);
    assert_eq!(fx.records(session.id).await, 1);

    // two hours later is a real check-out
    fx.clock.advance(Duration::hours(2));
    let out = assert_ok!(fx.engine.resolve(tap("04A1B2C3", session.id)).await);
    assert_eq!(out.action, CheckInAction::CheckOut);
    assert_eq!(out.record.id, first.record.id);
    assert_eq!(out.record.check_out_time, Some(fx.clock.now()));
    assert_eq!(out.record.check_out_method, Some(CheckInMethod::Nfc));
    assert_eq!(fx.records(session.id).await, 1);

    // admin closes the session
    assert_ok!(fx.engine.sessions().close(session.id).await);
    fx.clock.advance(Duration::minutes(1));
    let err = assert_err!(fx.engine.resolve(tap("04A1B2C3", session.id)).await);
    assert!(matches!(err, AppError::SessionClosed { .. }));
    assert_eq!(err.public_message(), "Session has ended");
    assert_eq!(fx.records(session.id).await, 1);

    // closing twice is rejected
    let err = assert_err!(fx.engine.sessions().close(session.id).await);
    assert!(matches!(err, AppError::AlreadyClosed { .. }));

    // Tess never tapped
    let absent = assert_ok!(fx.engine.reports().absentees(session.id).await);
    let absent_ids: Vec<Uuid> = absent.iter().map(|s| s.id).collect();
    assert_eq!(absent_ids, vec![tess.id]);
}

#[tokio::test]
async fn test_channel_policy_leaves_ledger_untouched() {
    let fx = Fixture::new().await;
    let sam = fx.subscriber("Sam").await;
    let session = fx.session(&[CheckInMethod::Nfc]).await;

    let err = assert_err!(
        fx.engine
            .resolve(as_subscriber(CheckInMethod::Wifi, &sam, Target::Session { session_id: session.id }))
            .await
    );
    assert!(matches!(err, AppError::MethodNotAllowed { .. }));
    assert_eq!(err.kind(), ErrorKind::PolicyViolation);
    assert_eq!(fx.records(session.id).await, 0);

    // NFC without a card never reaches the session
    let err = assert_err!(
        fx.engine
            .resolve(as_subscriber(CheckInMethod::Nfc, &sam, Target::Session { session_id: session.id }))
            .await
    );
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(fx.records(session.id).await, 0);
}

#[tokio::test]
async fn test_card_failures() {
    let fx = Fixture::new().await;
    let sam = fx.subscriber("Sam").await;
    let session = fx.session(&[CheckInMethod::Nfc]).await;

    let err = assert_err!(fx.engine.resolve(tap("DEADBEEF", session.id)).await);
    assert!(matches!(err, AppError::CardNotFound { .. }));
    assert!(err.public_message().starts_with("Card not recognized"));

    fx.engine.cards().register(fx.org.id, "CAFE01").await.unwrap();
    let err = assert_err!(fx.engine.resolve(tap("CAFE01", session.id)).await);
    assert!(matches!(err, AppError::CardUnassigned { .. }));

    fx.engine.cards().assign("CAFE01", sam.id).await.unwrap();
    fx.engine.cards().set_active("CAFE01", false).await.unwrap();
    let err = assert_err!(fx.engine.resolve(tap("CAFE01", session.id)).await);
    assert!(matches!(err, AppError::CardInactive { .. }));
    assert_eq!(fx.records(session.id).await, 0);
}

#[tokio::test]
async fn test_card_uniqueness() {
    let fx = Fixture::new().await;
    let first = fx.subscriber("First").await;
    let second = fx.subscriber("Second").await;
    fx.engine.cards().register(fx.org.id, "AAAA").await.unwrap();
    fx.engine.cards().register(fx.org.id, "BBBB").await.unwrap();

    assert_ok!(fx.engine.cards().assign("AAAA", first.id).await);

    let err = assert_err!(fx.engine.cards().assign("AAAA", second.id).await);
    assert!(matches!(err, AppError::CardAlreadyAssigned { .. }));

    let err = assert_err!(fx.engine.cards().assign("BBBB", first.id).await);
    assert!(matches!(err, AppError::SubscriberAlreadyHasCard { .. }));

    let err = assert_err!(fx.engine.cards().register(fx.org.id, "aa:aa").await);
    assert!(matches!(err, AppError::CardAlreadyRegistered { .. }));

    // freeing the card makes it assignable again
    assert_ok!(fx.engine.cards().unassign("AAAA").await);
    assert_ok!(fx.engine.cards().assign("AAAA", second.id).await);

    let stats = fx.engine.cards().statistics(fx.org.id).await.unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.assigned, 1);
    assert_eq!(stats.unassigned, 1);

    assert_eq!(fx.engine.cards().delete_all(fx.org.id).await.unwrap(), 2);
    assert!(fx.engine.cards().list(fx.org.id, false).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_scheduled_target_expands_once_per_day() {
    let fx = Fixture::new().await;
    let sam = fx.subscriber("Sam").await;
    let tess = fx.subscriber("Tess").await;
    fx.card_for("0001", &sam).await;
    fx.card_for("0002", &tess).await;
    let template = fx
        .engine
        .schedules()
        .create(fx.org.id, monday_class(&[CheckInMethod::Nfc]))
        .await
        .unwrap();

    let target = Target::Scheduled { scheduled_session_id: template.id };
    let a = assert_ok!(
        fx.engine
            .resolve(CheckInRequest {
                channel: CheckInMethod::Nfc,
                credential: Credential::Card { card_uid: "0001".into() },
                target: target.clone(),
            })
            .await
    );
    let b = assert_ok!(
        fx.engine
            .resolve(CheckInRequest {
                channel: CheckInMethod::Nfc,
                credential: Credential::Card { card_uid: "0002".into() },
                target,
            })
            .await
    );
    assert_eq!(a.session_id, b.session_id);
    assert_eq!(a.session_name, "Morning Yoga");

    let stats = fx.engine.reports().session_stats(a.session_id).await.unwrap();
    assert_eq!(stats.checked_in, 2);
    assert_eq!(stats.unique_attendees, 2);

    // a deactivated template keeps today's instance but expands no further
    fx.engine.schedules().deactivate(template.id).await.unwrap();
    assert_ok!(fx.engine.schedules().ensure_instance_today(template.id).await);
    let next_monday = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap();
    let template = fx.engine.schedules().get(template.id).await.unwrap();
    let err = assert_err!(fx.engine.schedules().ensure_instance_for(&template, next_monday).await);
    assert!(matches!(err, AppError::ScheduleInactive { .. }));
}

#[tokio::test]
async fn test_qr_check_in_and_stale_code() {
    let fx = Fixture::new().await;
    let sam = fx.subscriber("Sam").await;
    let mut definition = monday_class(&[CheckInMethod::Qr]);
    definition.days_of_week = [DayOfWeek::Monday, DayOfWeek::Tuesday].into_iter().collect();
    let template = fx.engine.schedules().create(fx.org.id, definition).await.unwrap();

    let payload = fx.engine.qr_payload_for_template(template.id, None).await.unwrap();
    let outcome = assert_ok!(
        fx.engine
            .resolve(as_subscriber(
                CheckInMethod::Qr,
                &sam,
                Target::Qr { payload: QrCodec::deep_link(&payload) },
            ))
            .await
    );
    assert_eq!(outcome.action, CheckInAction::CheckIn);
    let session = fx.engine.sessions().get(outcome.session_id).await.unwrap();
    assert_eq!(session.scheduled_date, NaiveDate::from_ymd_opt(2024, 1, 1));

    // Monday's printout is useless on Tuesday
    fx.clock.advance(Duration::days(1));
    let err = assert_err!(
        fx.engine
            .resolve(as_subscriber(CheckInMethod::Qr, &sam, Target::Qr { payload }))
            .await
    );
    assert!(matches!(err, AppError::QrCodeExpired));

    let garbage = assert_err!(
        fx.engine
            .resolve(as_subscriber(CheckInMethod::Qr, &sam, Target::Qr { payload: "AMS1.s.x.y.z".into() }))
            .await
    );
    assert!(matches!(garbage, AppError::InvalidQrCode));
}

#[tokio::test]
async fn test_session_qr_requires_qr_channel() {
    let fx = Fixture::new().await;
    let session = fx.session(&[CheckInMethod::Nfc]).await;
    let err = assert_err!(fx.engine.qr_payload_for_session(session.id).await);
    assert!(matches!(err, AppError::MethodNotAllowed { .. }));

    let session = fx.session(&[CheckInMethod::Qr, CheckInMethod::Nfc]).await;
    let payload = assert_ok!(fx.engine.qr_payload_for_session(session.id).await);
    let decoded = fx.engine.qr().decode(&payload, fx.engine.schedules().today()).unwrap();
    assert_eq!(decoded.organization_id, fx.org.id);
}

#[tokio::test]
async fn test_cross_organization_rejected() {
    let fx = Fixture::new().await;
    let session = fx.session(&[CheckInMethod::MobileNfc, CheckInMethod::Qr]).await;

    let other = fx
        .engine
        .directory()
        .create_organization(NewOrganization {
            name: "Downtown Dojo".into(),
            entity_id: "ddj".into(),
        })
        .await
        .unwrap();
    let outsider = fx.subscriber_in(other.id, "Olly").await;

    let err = assert_err!(
        fx.engine
            .resolve(as_subscriber(
                CheckInMethod::MobileNfc,
                &outsider,
                Target::Session { session_id: session.id },
            ))
            .await
    );
    assert!(matches!(err, AppError::OrganizationMismatch));

    let payload = fx.engine.qr_payload_for_session(session.id).await.unwrap();
    let err = assert_err!(
        fx.engine
            .resolve(as_subscriber(CheckInMethod::Qr, &outsider, Target::Qr { payload }))
            .await
    );
    assert!(matches!(err, AppError::OrganizationMismatch));
    assert_eq!(fx.records(session.id).await, 0);
}

#[tokio::test]
async fn test_active_target_uses_latest_open_session() {
    let fx = Fixture::new().await;
    let sam = fx.subscriber("Sam").await;

    let err = assert_err!(
        fx.engine
            .resolve(as_subscriber(CheckInMethod::Bluetooth, &sam, Target::Active))
            .await
    );
    assert!(matches!(err, AppError::NoActiveSession));

    fx.session(&[CheckInMethod::Bluetooth]).await;
    fx.clock.advance(Duration::minutes(5));
    let latest = fx.session(&[CheckInMethod::Bluetooth]).await;

    let outcome = assert_ok!(
        fx.engine
            .resolve(as_subscriber(CheckInMethod::Bluetooth, &sam, Target::Active))
            .await
    );
    assert_eq!(outcome.session_id, latest.id);
}

#[tokio::test]
async fn test_single_cycle_without_reentry() {
    let fx = Fixture::new().await;
    let sam = fx.subscriber("Sam").await;
    let session = fx.session(&[CheckInMethod::Wifi]).await;
    let request = as_subscriber(CheckInMethod::Wifi, &sam, Target::Session { session_id: session.id });

    assert_eq!(fx.engine.resolve(request.clone()).await.unwrap().action, CheckInAction::CheckIn);
    fx.clock.advance(Duration::minutes(30));
    assert_eq!(fx.engine.resolve(request.clone()).await.unwrap().action, CheckInAction::CheckOut);
    fx.clock.advance(Duration::minutes(30));

    let err = assert_err!(fx.engine.resolve(request).await);
    assert!(matches!(err, AppError::AttendanceCompleted { .. }));
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_eq!(fx.records(session.id).await, 1);
}

#[tokio::test]
async fn test_reentry_alternates() {
    let config = AttendanceConfig { allow_reentry: true, ..AttendanceConfig::default() };
    let fx = Fixture::with_config(config).await;
    let sam = fx.subscriber("Sam").await;
    let session = fx.session(&[CheckInMethod::Wifi]).await;
    let request = as_subscriber(CheckInMethod::Wifi, &sam, Target::Session { session_id: session.id });

    let mut actions = Vec::new();
    for _ in 0..6 {
        actions.push(fx.engine.resolve(request.clone()).await.unwrap().action);
        fx.clock.advance(Duration::minutes(10));
    }
    let expected: Vec<CheckInAction> = (0..6)
        .map(|i| if i % 2 == 0 { CheckInAction::CheckIn } else { CheckInAction::CheckOut })
        .collect();
    assert_eq!(actions, expected);
    assert_eq!(fx.records(session.id).await, 3);
}

#[tokio::test]
async fn test_sweep_closes_at_planned_end() {
    let fx = Fixture::new().await;
    let sam = fx.subscriber("Sam").await;
    let planned_end = monday(10, 0);
    let session = fx
        .engine
        .sessions()
        .create(
            fx.org.id,
            AdHocSession {
                name: "Seminar".into(),
                description: Some("Guest instructor".into()),
                start_time: Some(monday(9, 0)),
                planned_end: Some(planned_end),
                allowed_methods: [CheckInMethod::Wifi].into_iter().collect(),
            },
        )
        .await
        .unwrap();

    let request = as_subscriber(CheckInMethod::Wifi, &sam, Target::Session { session_id: session.id });
    assert_ok!(fx.engine.resolve(request.clone()).await);

    // overdue but not yet swept: still accepts the check-out
    fx.clock.set(monday(10, 5));
    let out = assert_ok!(fx.engine.resolve(request.clone()).await);
    assert_eq!(out.action, CheckInAction::CheckOut);

    fx.clock.set(monday(10, 10));
    let report = fx.engine.sweep().await.unwrap();
    assert_eq!(report.sessions_closed, 1);
    assert_eq!(report.debounce_entries, 0);

    let closed = fx.engine.sessions().get(session.id).await.unwrap();
    assert_eq!(closed.end_time, Some(planned_end));

    let err = assert_err!(fx.engine.resolve(request).await);
    assert!(matches!(err, AppError::SessionClosed { .. }));
    assert_eq!(fx.engine.sweep().await.unwrap().sessions_closed, 0);
}

#[tokio::test]
async fn test_history_and_attendance_report() {
    let fx = Fixture::new().await;
    let sam = fx.subscriber("Sam").await;
    fx.card_for("0A0B", &sam).await;
    let first = fx.session(&[CheckInMethod::Nfc]).await;
    let second = fx.session(&[CheckInMethod::Nfc, CheckInMethod::MobileNfc]).await;

    fx.engine.resolve(tap("0A0B", first.id)).await.unwrap();
    fx.clock.advance(Duration::minutes(45));
    fx.engine.resolve(tap("0A0B", first.id)).await.unwrap();
    fx.engine
        .resolve(CheckInRequest {
            channel: CheckInMethod::MobileNfc,
            credential: Credential::Card { card_uid: "0A0B".into() },
            target: Target::Session { session_id: second.id },
        })
        .await
        .unwrap();

    let history = fx
        .engine
        .reports()
        .subscriber_history(sam.id, monday(0, 0), monday(23, 59))
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    let done = history.iter().find(|h| h.session_id == first.id).unwrap();
    assert_eq!(done.duration_secs, Some(45 * 60));
    assert!(!done.ongoing);
    let ongoing = history.iter().find(|h| h.session_id == second.id).unwrap();
    assert_eq!(ongoing.duration_secs, None);
    assert!(ongoing.ongoing);
    assert_eq!(ongoing.check_in_method, CheckInMethod::MobileNfc);

    // empty window and inverted window
    let empty = fx
        .engine
        .reports()
        .subscriber_history(sam.id, monday(0, 0), monday(1, 0))
        .await
        .unwrap();
    assert!(empty.is_empty());
    assert!(fx
        .engine
        .reports()
        .subscriber_history(sam.id, monday(2, 0), monday(1, 0))
        .await
        .is_err());

    let attendance = fx.engine.reports().session_attendance(first.id).await.unwrap();
    assert_eq!(attendance.stats.checked_out, 1);
    assert_eq!(attendance.attendees.len(), 1);
    assert_eq!(attendance.attendees[0].subscriber_name, "Sam Tester");
    assert_eq!(attendance.attendees[0].duration_secs, Some(45 * 60));
}
