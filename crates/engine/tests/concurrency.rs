//! Racing resolutions and expansions

use attendance_common::clock::ManualClock;
use attendance_common::config::AttendanceConfig;
use attendance_common::db::models::{CheckInMethod, DayOfWeek, Session, Subscriber};
use attendance_common::db::{AttendanceStore, MemoryStore};
use attendance_common::errors::AppError;
use attendance_engine::{
    AdHocSession, AttendanceEngine, CheckInAction, CheckInRequest, Credential, NewOrganization,
    NewSubscriber, ScheduleDefinition, Target,
};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use futures::future::join_all;
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::Arc;
use uuid::Uuid;

const PROXIMITY: [CheckInMethod; 3] = [
    CheckInMethod::MobileNfc,
    CheckInMethod::Wifi,
    CheckInMethod::Bluetooth,
];

fn monday_morning() -> DateTime<FixedOffset> {
    Utc.with_ymd_and_hms(2024, 1, 1, 8, 30, 0).unwrap().fixed_offset()
}

async fn setup(allow_reentry: bool) -> (AttendanceEngine, Arc<dyn AttendanceStore>, ManualClock, Uuid) {
    let store: Arc<dyn AttendanceStore> = Arc::new(MemoryStore::new());
    let clock = ManualClock::new(monday_morning());
    let config = AttendanceConfig { allow_reentry, ..AttendanceConfig::default() };
    let engine = AttendanceEngine::new(store.clone(), Arc::new(clock.clone()), &config);
    let org = engine
        .directory()
        .create_organization(NewOrganization {
            name: "Harbor Pool".into(),
            entity_id: "hbp".into(),
        })
        .await
        .unwrap();
    (engine, store, clock, org.id)
}

async fn member(engine: &AttendanceEngine, org: Uuid) -> Subscriber {
    engine
        .directory()
        .add_subscriber(
            org,
            NewSubscriber {
                first_name: "Robin".into(),
                last_name: "Lane".into(),
                email: Some("robin@example.com".into()),
            },
        )
        .await
        .unwrap()
}

async fn open_session(engine: &AttendanceEngine, org: Uuid) -> Session {
    let mut methods = PROXIMITY.to_vec();
    methods.push(CheckInMethod::Nfc);
    engine
        .sessions()
        .create(
            org,
            AdHocSession {
                name: "Lap Swim".into(),
                description: None,
                start_time: None,
                planned_end: None,
                allowed_methods: methods.into_iter().collect(),
            },
        )
        .await
        .unwrap()
}

async fn open_records(store: &Arc<dyn AttendanceStore>, session_id: Uuid) -> usize {
    store
        .records_for_session(session_id)
        .await
        .unwrap()
        .iter()
        .filter(|r| r.is_open())
        .count()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_channels_leave_one_open_record() {
    let (engine, store, _clock, org) = setup(true).await;
    let subscriber = member(&engine, org).await;
    engine.cards().register(org, "5EED").await.unwrap();
    engine.cards().assign("5EED", subscriber.id).await.unwrap();
    let session = open_session(&engine, org).await;

    let mut requests: Vec<CheckInRequest> = (0..24)
        .map(|i| {
            if i % 4 == 0 {
                CheckInRequest {
                    channel: CheckInMethod::Nfc,
                    credential: Credential::Card { card_uid: "5EED".into() },
                    target: Target::Session { session_id: session.id },
                }
            } else {
                CheckInRequest {
                    channel: PROXIMITY[i % PROXIMITY.len()],
                    credential: Credential::Subscriber { subscriber_id: subscriber.id },
                    target: Target::Session { session_id: session.id },
                }
            }
        })
        .collect();
    requests.shuffle(&mut rand::thread_rng());

    let tasks = requests.into_iter().map(|request| {
        let engine = engine.clone();
        tokio::spawn(async move { engine.resolve(request).await })
    });
    let outcomes: Vec<_> = join_all(tasks).await.into_iter().map(|r| r.unwrap()).collect();

    // losers of a race may see the record already closed, never a crash
    assert!(outcomes.iter().any(|o| o.is_ok()));
    assert!(open_records(&store, session.id).await <= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_identical_taps_resolve_once() {
    let (engine, store, _clock, org) = setup(false).await;
    let subscriber = member(&engine, org).await;
    engine.cards().register(org, "C0FFEE").await.unwrap();
    engine.cards().assign("C0FFEE", subscriber.id).await.unwrap();
    let session = open_session(&engine, org).await;

    let tasks = (0..10).map(|_| {
        let engine = engine.clone();
        let request = CheckInRequest {
            channel: CheckInMethod::Nfc,
            credential: Credential::Card { card_uid: "C0:FF:EE".into() },
            target: Target::Session { session_id: session.id },
        };
        tokio::spawn(async move { engine.resolve(request).await })
    });
    let outcomes: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();

    assert!(outcomes.iter().all(|o| o.action == CheckInAction::CheckIn));
    assert_eq!(outcomes.iter().filter(|o| !o.debounced).count(), 1);
    assert_eq!(store.records_for_session(session.id).await.unwrap().len(), 1);
    assert_eq!(open_records(&store, session.id).await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_check_outs_never_surface_a_conflict() {
    let (engine, store, clock, org) = setup(false).await;
    let subscriber = member(&engine, org).await;
    engine.cards().register(org, "B0A7").await.unwrap();
    engine.cards().assign("B0A7", subscriber.id).await.unwrap();
    let session = open_session(&engine, org).await;

    let check_in = engine
        .resolve(CheckInRequest {
            channel: CheckInMethod::Nfc,
            credential: Credential::Card { card_uid: "B0A7".into() },
            target: Target::Session { session_id: session.id },
        })
        .await
        .unwrap();
    assert_eq!(check_in.action, CheckInAction::CheckIn);
    clock.advance(Duration::minutes(50));

    let tasks = (0..12).map(|i| {
        let engine = engine.clone();
        let request = CheckInRequest {
            channel: PROXIMITY[i % PROXIMITY.len()],
            credential: Credential::Subscriber { subscriber_id: subscriber.id },
            target: Target::Session { session_id: session.id },
        };
        tokio::spawn(async move { engine.resolve(request).await })
    });
    let outcomes: Vec<_> = join_all(tasks).await.into_iter().map(|r| r.unwrap()).collect();

    let mut closed_ids = Vec::new();
    for outcome in &outcomes {
        match outcome {
            Ok(o) => {
                assert_eq!(o.action, CheckInAction::CheckOut);
                closed_ids.push(o.record.id);
            }
            // arrived after the cycle was already complete
            Err(e) => assert!(matches!(e, AppError::AttendanceCompleted { .. }), "{e:?}"),
        }
    }
    assert!(!closed_ids.is_empty());
    assert!(closed_ids.iter().all(|id| *id == check_in.record.id));
    assert_eq!(open_records(&store, session.id).await, 0);
    assert_eq!(store.records_for_session(session.id).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_expansion_creates_one_session() {
    let (engine, store, _clock, org) = setup(false).await;
    let template = engine
        .schedules()
        .create(
            org,
            ScheduleDefinition {
                name: "Aqua Aerobics".into(),
                description: None,
                start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                duration_minutes: 45,
                days_of_week: [DayOfWeek::Monday].into_iter().collect(),
                allowed_methods: [CheckInMethod::Wifi].into_iter().collect(),
                active: true,
            },
        )
        .await
        .unwrap();
    let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();

    let tasks = (0..32).map(|_| {
        let engine = engine.clone();
        let template = template.clone();
        tokio::spawn(async move { engine.schedules().ensure_instance_for(&template, date).await })
    });
    let sessions: Vec<Session> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();

    let first = sessions[0].id;
    assert!(sessions.iter().all(|s| s.id == first));
    assert_eq!(store.list_open_sessions(org).await.unwrap().len(), 1);
    assert_eq!(
        store.find_session_for_date(template.id, date).await.unwrap().map(|s| s.id),
        Some(first)
    );
}

#[tokio::test]
async fn test_toggle_alternates_across_random_channels() {
    let (engine, _store, clock, org) = setup(true).await;
    let subscriber = member(&engine, org).await;
    let session = open_session(&engine, org).await;
    let mut rng = rand::thread_rng();

    let mut last = None;
    for _ in 0..40 {
        let channel = *PROXIMITY.choose(&mut rng).unwrap();
        let outcome = engine
            .resolve(CheckInRequest {
                channel,
                credential: Credential::Subscriber { subscriber_id: subscriber.id },
                target: Target::Session { session_id: session.id },
            })
            .await
            .unwrap();
        assert!(!outcome.debounced);
        assert_ne!(Some(outcome.action), last);
        last = Some(outcome.action);

        // always outside the debounce window
        clock.advance(Duration::seconds(rng.gen_range(5..600)));
    }
}
