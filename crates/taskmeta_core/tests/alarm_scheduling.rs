use rusqlite::Connection;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use taskmeta_core::db::open_db_in_memory;
use taskmeta_core::{
    AlarmPayload, AlarmRecord, AlarmScheduler, AlarmState, AlarmVariant, Clock, ReconcileError,
    SqliteMetadataStore, TaskId, TimerError, TimerKey, TimerResult, TimerService, NO_ALARM,
};
use uuid::Uuid;

const HOUR_MS: i64 = 3_600_000;
const NINE_AM: i64 = 1_700_000_000_000;
const TEN_AM: i64 = NINE_AM + HOUR_MS;
const ELEVEN_AM: i64 = NINE_AM + 2 * HOUR_MS;
const NOON: i64 = NINE_AM + 3 * HOUR_MS;

struct FixedClock(i64);

impl Clock for FixedClock {
    fn now_ms(&self) -> i64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerCall {
    Arm(TimerKey, i64),
    Cancel(TimerKey),
}

#[derive(Default)]
struct RecordingTimers {
    calls: Mutex<Vec<TimerCall>>,
    pending: Mutex<HashMap<TimerKey, i64>>,
    failing_key: Mutex<Option<TimerKey>>,
}

impl RecordingTimers {
    fn calls(&self) -> Vec<TimerCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn clear_calls(&self) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn pending(&self) -> HashMap<TimerKey, i64> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn fail_on(&self, key: TimerKey) {
        *self
            .failing_key
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(key);
    }
}

impl TimerService for RecordingTimers {
    fn arm(&self, key: TimerKey, fire_at_ms: i64, _payload: AlarmPayload) -> TimerResult<()> {
        if *self
            .failing_key
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            == Some(key)
        {
            return Err(TimerError::Unavailable(format!("refusing {key}")));
        }
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(TimerCall::Arm(key, fire_at_ms));
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, fire_at_ms);
        Ok(())
    }

    fn cancel(&self, key: TimerKey) -> TimerResult<()> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(TimerCall::Cancel(key));
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key);
        Ok(())
    }
}

fn insert_atom(conn: &Connection, atom_type: &str, status: Option<&str>, deleted: bool) -> TaskId {
    let task_id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO atoms (uuid, type, task_status, is_deleted) VALUES (?1, ?2, ?3, ?4);",
        rusqlite::params![task_id.to_string(), atom_type, status, i64::from(deleted)],
    )
    .unwrap();
    task_id
}

fn active_task(conn: &Connection) -> TaskId {
    insert_atom(conn, "task", Some("todo"), false)
}

fn insert_raw_alarm(conn: &Connection, task_id: TaskId, attributes: &str) -> i64 {
    conn.query_row(
        "INSERT INTO metadata (atom_uuid, kind, attributes, created_at)
         VALUES (?1, 'alarm', ?2, 1)
         RETURNING id;",
        rusqlite::params![task_id.to_string(), attributes],
        |row| row.get(0),
    )
    .unwrap()
}

fn alarm(id: i64, fire_at_ms: i64) -> AlarmRecord {
    AlarmRecord {
        id,
        task_id: Uuid::new_v4(),
        fire_at_ms,
        variant: AlarmVariant::Single,
    }
}

#[test]
fn sentinel_fire_time_cancels_and_never_arms() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteMetadataStore::try_new(&conn).unwrap();
    let timers = RecordingTimers::default();
    let scheduler = AlarmScheduler::new(store, &timers, FixedClock(NINE_AM));

    assert_eq!(
        scheduler.schedule_alarm(&alarm(7, 0)).unwrap(),
        AlarmState::Cancelled
    );
    assert_eq!(
        scheduler.schedule_alarm(&alarm(8, NO_ALARM)).unwrap(),
        AlarmState::Cancelled
    );

    assert_eq!(
        timers.calls(),
        vec![
            TimerCall::Cancel(TimerKey::for_alarm(7)),
            TimerCall::Cancel(TimerKey::for_alarm(8)),
        ]
    );
}

#[test]
fn past_or_current_fire_time_is_left_unscheduled() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteMetadataStore::try_new(&conn).unwrap();
    let timers = RecordingTimers::default();
    let scheduler = AlarmScheduler::new(store, &timers, FixedClock(NINE_AM));

    assert_eq!(
        scheduler.schedule_alarm(&alarm(1, NINE_AM - 1)).unwrap(),
        AlarmState::Unscheduled
    );
    assert_eq!(
        scheduler.schedule_alarm(&alarm(2, NINE_AM)).unwrap(),
        AlarmState::Unscheduled
    );
    assert!(timers.calls().is_empty());
}

#[test]
fn future_fire_time_arms_timer_keyed_by_record() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteMetadataStore::try_new(&conn).unwrap();
    let timers = RecordingTimers::default();
    let scheduler = AlarmScheduler::new(store, &timers, FixedClock(NINE_AM));

    assert_eq!(
        scheduler.schedule_alarm(&alarm(3, TEN_AM)).unwrap(),
        AlarmState::Armed
    );
    assert_eq!(
        scheduler.schedule_alarm(&alarm(3, ELEVEN_AM)).unwrap(),
        AlarmState::Armed
    );
    assert_eq!(
        timers.pending(),
        HashMap::from([(TimerKey::for_alarm(3), ELEVEN_AM)])
    );
}

#[test]
fn synchronize_alarms_applies_minimal_timer_changes() {
    let conn = open_db_in_memory().unwrap();
    let task_id = active_task(&conn);
    let store = SqliteMetadataStore::try_new(&conn).unwrap();
    let timers = RecordingTimers::default();
    let scheduler = AlarmScheduler::new(store, &timers, FixedClock(NINE_AM));

    assert!(scheduler
        .synchronize_alarms(task_id, [TEN_AM, ELEVEN_AM])
        .unwrap());
    let first = scheduler.alarms_for_task(task_id).unwrap();
    assert_eq!(
        first.iter().map(|a| a.fire_at_ms).collect::<Vec<_>>(),
        vec![TEN_AM, ELEVEN_AM]
    );
    let ten_key = TimerKey::for_alarm(first[0].id);
    let eleven_id = first[1].id;
    assert_eq!(timers.pending().len(), 2);
    timers.clear_calls();

    assert!(scheduler
        .synchronize_alarms(task_id, [ELEVEN_AM, NOON])
        .unwrap());
    let second = scheduler.alarms_for_task(task_id).unwrap();
    assert_eq!(
        second.iter().map(|a| a.fire_at_ms).collect::<Vec<_>>(),
        vec![ELEVEN_AM, NOON]
    );
    assert_eq!(second[0].id, eleven_id);
    let noon_key = TimerKey::for_alarm(second[1].id);

    let calls = timers.calls();
    assert_eq!(calls.first(), Some(&TimerCall::Cancel(ten_key)));
    assert!(calls.contains(&TimerCall::Arm(noon_key, NOON)));
    assert_eq!(
        timers.pending(),
        HashMap::from([
            (TimerKey::for_alarm(eleven_id), ELEVEN_AM),
            (noon_key, NOON),
        ])
    );

    timers.clear_calls();
    assert!(!scheduler
        .synchronize_alarms(task_id, [NOON, ELEVEN_AM, NOON])
        .unwrap());
    assert!(timers.calls().is_empty());
}

#[test]
fn clearing_alarms_cancels_every_timer() {
    let conn = open_db_in_memory().unwrap();
    let task_id = active_task(&conn);
    let store = SqliteMetadataStore::try_new(&conn).unwrap();
    let timers = RecordingTimers::default();
    let scheduler = AlarmScheduler::new(store, &timers, FixedClock(NINE_AM));

    scheduler
        .synchronize_alarms(task_id, [TEN_AM, NOON])
        .unwrap();
    assert!(scheduler
        .synchronize_alarms(task_id, std::iter::empty())
        .unwrap());

    assert!(timers.pending().is_empty());
    assert!(scheduler.alarms_for_task(task_id).unwrap().is_empty());
}

#[test]
fn negative_fire_time_is_rejected_without_side_effects() {
    let conn = open_db_in_memory().unwrap();
    let task_id = active_task(&conn);
    let store = SqliteMetadataStore::try_new(&conn).unwrap();
    let timers = RecordingTimers::default();
    let scheduler = AlarmScheduler::new(store, &timers, FixedClock(NINE_AM));

    scheduler.synchronize_alarms(task_id, [TEN_AM]).unwrap();
    timers.clear_calls();

    let err = scheduler
        .synchronize_alarms(task_id, [NOON, -5])
        .unwrap_err();
    assert!(matches!(err, ReconcileError::Validation(_)));
    assert!(timers.calls().is_empty());
    assert_eq!(scheduler.alarms_for_task(task_id).unwrap().len(), 1);
}

#[test]
fn rescan_skips_inactive_parents() {
    let conn = open_db_in_memory().unwrap();
    let active = active_task(&conn);
    let done = insert_atom(&conn, "task", Some("done"), false);
    let cancelled = insert_atom(&conn, "task", Some("cancelled"), false);
    let deleted = insert_atom(&conn, "task", Some("todo"), true);
    let note = insert_atom(&conn, "note", None, false);
    let alarm_json = format!("{{\"time\":{NOON},\"type\":\"single\"}}");
    let active_alarm = insert_raw_alarm(&conn, active, &alarm_json);
    for parent in [done, cancelled, deleted, note] {
        insert_raw_alarm(&conn, parent, &alarm_json);
    }

    let store = SqliteMetadataStore::try_new(&conn).unwrap();
    let timers = RecordingTimers::default();
    let summary = AlarmScheduler::new(store, &timers, FixedClock(NINE_AM))
        .schedule_all_alarms()
        .unwrap();

    assert_eq!(summary.armed, 1);
    assert_eq!(summary.total(), 1);
    assert_eq!(
        timers.calls(),
        vec![TimerCall::Arm(TimerKey::for_alarm(active_alarm), NOON)]
    );
}

#[test]
fn one_bad_alarm_does_not_stop_the_batch() {
    let conn = open_db_in_memory().unwrap();
    let task_id = active_task(&conn);
    insert_raw_alarm(&conn, task_id, "{not json");
    insert_raw_alarm(&conn, task_id, "{\"type\":\"single\"}");
    let refused = insert_raw_alarm(&conn, task_id, &format!("{{\"time\":{TEN_AM}}}"));
    let past = insert_raw_alarm(&conn, task_id, &format!("{{\"time\":{}}}", NINE_AM - HOUR_MS));
    let sentinel = insert_raw_alarm(&conn, task_id, "{\"time\":0}");
    let good = insert_raw_alarm(
        &conn,
        task_id,
        &format!("{{\"time\":{NOON},\"type\":\"repeating\"}}"),
    );

    let store = SqliteMetadataStore::try_new(&conn).unwrap();
    let timers = RecordingTimers::default();
    timers.fail_on(TimerKey::for_alarm(refused));
    let summary = AlarmScheduler::new(store, &timers, FixedClock(NINE_AM))
        .schedule_all_alarms()
        .unwrap();

    assert_eq!(summary.armed, 1);
    assert_eq!(summary.cancelled, 1);
    assert_eq!(summary.unscheduled, 1);
    assert_eq!(summary.failed, 3);
    assert_eq!(
        timers.calls(),
        vec![
            TimerCall::Cancel(TimerKey::for_alarm(sentinel)),
            TimerCall::Arm(TimerKey::for_alarm(good), NOON),
        ]
    );
    assert!(!timers.pending().contains_key(&TimerKey::for_alarm(past)));
}

#[test]
fn alarms_for_task_orders_by_fire_time_and_skips_malformed() {
    let conn = open_db_in_memory().unwrap();
    let task_id = active_task(&conn);
    insert_raw_alarm(&conn, task_id, &format!("{{\"time\":{NOON}}}"));
    insert_raw_alarm(&conn, task_id, "{\"time\":\"soon\"}");
    insert_raw_alarm(
        &conn,
        task_id,
        &format!("{{\"time\":{TEN_AM},\"type\":\"repeating\"}}"),
    );

    let store = SqliteMetadataStore::try_new(&conn).unwrap();
    let timers = RecordingTimers::default();
    let alarms = AlarmScheduler::new(store, &timers, FixedClock(NINE_AM))
        .alarms_for_task(task_id)
        .unwrap();

    assert_eq!(alarms.len(), 2);
    assert_eq!(alarms[0].fire_at_ms, TEN_AM);
    assert_eq!(alarms[0].variant, AlarmVariant::Repeating);
    assert_eq!(alarms[1].fire_at_ms, NOON);
    assert_eq!(alarms[1].variant, AlarmVariant::Single);
    assert!(timers.calls().is_empty());
}

#[test]
fn synchronizing_a_finished_task_persists_without_arming() {
    let conn = open_db_in_memory().unwrap();
    let task_id = insert_atom(&conn, "task", Some("done"), false);
    let store = SqliteMetadataStore::try_new(&conn).unwrap();
    let timers = RecordingTimers::default();
    let scheduler = AlarmScheduler::new(store, &timers, FixedClock(NINE_AM));

    assert!(scheduler.synchronize_alarms(task_id, [NOON]).unwrap());
    assert_eq!(scheduler.alarms_for_task(task_id).unwrap().len(), 1);
    assert!(timers.calls().is_empty());
}
