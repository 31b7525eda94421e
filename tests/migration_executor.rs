use rosterd::audit::{AuditError, AuditEvent, AuditLogger, AuditSink, MemoryAuditSink};
use rosterd::backup::{BackupManager, MemoryBackupStorage};
use rosterd::model::{
    Batch, Class, Dataset, EntityKind, Schedule, Student, Test, TestResult, SYSTEM_USER_ID,
};
use rosterd::store::{ClearOutcome, MemoryStore, Store, StoreError};
use rosterd::{AbortReason, MigrationError, MigrationExecutor, Phase, Recovery};
use std::sync::mpsc;

/// Delegates to a [`MemoryStore`], with hooks to inject failures.
#[derive(Default)]
struct Harness {
    inner: MemoryStore,
    fail_insert_of: Option<EntityKind>,
    orphan_after_commit: bool,
    fail_begin_after_orphan: bool,
    fail_begin: bool,
}

impl Harness {
    fn new() -> Self {
        Harness {
            inner: MemoryStore::new(),
            ..Default::default()
        }
    }
}

impl Store for Harness {
    fn begin(&mut self) -> Result<(), StoreError> {
        if self.fail_begin {
            return Err(StoreError::Unavailable("connection lost".into()));
        }
        self.inner.begin()
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.inner.commit()?;
        if self.orphan_after_commit {
            // An outside writer slips in a row pointing at nothing.
            self.orphan_after_commit = false;
            self.inner.contents_mut().schedules.push(Schedule {
                id: "intruder".into(),
                class_id: "ghost".into(),
                day_of_week: Some(3),
                ..Default::default()
            });
            self.fail_begin = self.fail_begin_after_orphan;
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        self.inner.rollback()
    }

    fn clear(&mut self, kind: EntityKind) -> Result<ClearOutcome, StoreError> {
        self.inner.clear(kind)
    }

    fn insert(&mut self, batch: Batch<'_>) -> Result<usize, StoreError> {
        if self.fail_insert_of == Some(batch.kind()) {
            return Err(StoreError::Unavailable(format!(
                "injected failure inserting {}",
                batch.kind()
            )));
        }
        self.inner.insert(batch)
    }

    fn read_all(&self) -> Result<Dataset, StoreError> {
        self.inner.read_all()
    }
}

type Engine<S> = MigrationExecutor<S, MemoryBackupStorage>;

fn engine<S: Store>(store: S) -> (Engine<S>, MemoryAuditSink) {
    let sink = MemoryAuditSink::new();
    let audit = AuditLogger::new().with_sink(sink.clone());
    (
        MigrationExecutor::new(store, BackupManager::new(MemoryBackupStorage::new()), audit),
        sink,
    )
}

fn student(id: &str) -> Student {
    Student {
        id: id.into(),
        name: format!("Student {}", id),
        email: format!("{}@school.test", id),
        ..Default::default()
    }
}

fn scenario() -> Dataset {
    Dataset {
        students: vec![student("s1")],
        classes: vec![Class {
            id: "c1".into(),
            name: "Biology".into(),
            capacity: 20,
            enrolled_students: vec!["s1".into()],
            ..Default::default()
        }],
        schedules: vec![Schedule {
            id: "sch1".into(),
            class_id: "c1".into(),
            day_of_week: Some(1),
            ..Default::default()
        }],
        ..Default::default()
    }
}

fn with_tests(mut ds: Dataset) -> Dataset {
    ds.students.push(student("s2"));
    ds.tests.push(Test {
        id: "t1".into(),
        class_id: "c1".into(),
        title: "Cells quiz".into(),
        date: Some("2024-11-04".into()),
        max_score: Some(10.0),
    });
    ds.test_results.push(TestResult {
        id: "r1".into(),
        test_id: "t1".into(),
        student_id: "s2".into(),
        score: Some(8.5),
        feedback: None,
    });
    ds
}

#[test]
fn valid_dataset_commits_with_exact_counts() {
    let (engine, _) = engine(MemoryStore::new());
    let ds = scenario();
    let result = engine.migrate_all_data(&ds).expect("not busy");

    assert!(result.success, "{:?}", result.message);
    assert_eq!(result.phase, Phase::Committed);
    assert_eq!(result.recovery, Recovery::None);
    assert_eq!(result.counts, ds.counts());
    assert_eq!(result.counts[&EntityKind::Student], 1);
    assert_eq!(result.counts[&EntityKind::Class], 1);
    assert_eq!(result.counts[&EntityKind::Schedule], 1);
    assert!(result.errors.is_empty());
    assert_eq!(
        result.phases,
        vec![
            Phase::Idle,
            Phase::Validating,
            Phase::BackingUp,
            Phase::Applying,
            Phase::PostVerifying,
            Phase::Committed,
        ]
    );

    let backup_id = result.backup_id.expect("backup id on success");
    assert_eq!(engine.list_backups().expect("list"), vec![backup_id]);

    let store = engine.into_store();
    assert_eq!(store.contents().users.len(), 1);
    assert_eq!(store.contents().users[0].id, SYSTEM_USER_ID);
    assert_eq!(store.contents().students, ds.students);
}

#[test]
fn result_serializes_for_callers() {
    let (engine, _) = engine(MemoryStore::new());
    let result = engine.migrate_all_data(&scenario()).expect("not busy");
    let v = serde_json::to_value(&result).expect("serialize result");
    assert_eq!(v["success"], true);
    assert_eq!(v["phase"], "committed");
    assert_eq!(v["recovery"], "none");
    assert_eq!(v["counts"]["students"], 1);
    assert_eq!(v["counts"]["classEnrollments"], 0);
    assert!(v["elapsedMs"].is_u64());
    assert!(v["backupId"].is_string());
}

#[test]
fn validation_failure_has_no_side_effects() {
    let (engine, _) = engine(MemoryStore::new());
    engine.migrate_all_data(&scenario()).expect("seed run");
    let before = engine.counts().expect("counts");
    let backups_before = engine.list_backups().expect("list").len();

    let mut bad = scenario();
    bad.schedules[0].class_id = "missing".into();
    let result = engine.migrate_all_data(&bad).expect("not busy");

    assert!(!result.success);
    assert_eq!(result.abort_reason(), Some(AbortReason::Validation));
    assert_eq!(result.recovery, Recovery::None);
    assert_eq!(result.backup_id, None);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].entity, EntityKind::Schedule);
    assert_eq!(result.errors[0].field, "classId");
    assert!(result.errors[0].message.contains("non-existent class"));
    assert_eq!(
        *result.phases.last().expect("phases"),
        Phase::Aborted(AbortReason::Validation)
    );

    assert_eq!(engine.counts().expect("counts"), before);
    assert_eq!(engine.list_backups().expect("list").len(), backups_before);
}

#[test]
fn negative_capacity_is_rejected() {
    let (engine, _) = engine(MemoryStore::new());
    let mut bad = scenario();
    bad.classes[0].capacity = -1;
    let result = engine.migrate_all_data(&bad).expect("not busy");
    assert_eq!(result.abort_reason(), Some(AbortReason::Validation));
    assert!(result
        .errors
        .iter()
        .any(|e| e.field == "capacity" && e.message.contains("greater than 0")));
    assert!(engine.into_store().contents().is_empty());
}

#[test]
fn failure_inserting_test_results_rolls_everything_back() {
    let (engine, _) = engine(Harness::new());
    engine.migrate_all_data(&scenario()).expect("seed run");
    let before = engine.counts().expect("counts");

    engine
        .with_store(|s| s.fail_insert_of = Some(EntityKind::TestResult))
        .expect("not busy");
    let result = engine
        .migrate_all_data(&with_tests(scenario()))
        .expect("not busy");

    assert!(!result.success);
    assert_eq!(result.abort_reason(), Some(AbortReason::ApplyFailed));
    assert_eq!(result.recovery, Recovery::AutoRollback);
    assert!(result.backup_id.is_some());
    assert!(result
        .message
        .as_deref()
        .unwrap_or_default()
        .contains("injected failure"));

    assert_eq!(engine.counts().expect("counts"), before);
    let store = engine.into_store();
    assert!(!store.inner.in_transaction());
    assert!(store.inner.contents().tests.is_empty());
}

#[test]
fn begin_failure_reports_no_recovery_needed() {
    let (engine, _) = engine(Harness::new());
    engine.with_store(|s| s.fail_begin = true).expect("not busy");
    let result = engine.migrate_all_data(&scenario()).expect("not busy");
    assert_eq!(result.abort_reason(), Some(AbortReason::ApplyFailed));
    assert_eq!(result.recovery, Recovery::None);
}

#[test]
fn backup_failure_aborts_before_any_write() {
    let (engine, _) = engine(MemoryStore::new());
    engine.backups().storage().set_unavailable(true);

    let result = engine.migrate_all_data(&scenario()).expect("not busy");
    assert_eq!(result.abort_reason(), Some(AbortReason::BackupFailed));
    assert_eq!(result.recovery, Recovery::None);
    assert_eq!(result.backup_id, None);
    assert!(engine.into_store().contents().is_empty());
}

#[test]
fn post_verify_failure_restores_the_backup() {
    let (engine, _) = engine(Harness::new());
    engine.migrate_all_data(&scenario()).expect("seed run");
    let before = engine.with_store(|s| s.read_all()).expect("not busy").expect("read");

    engine
        .with_store(|s| s.orphan_after_commit = true)
        .expect("not busy");
    let result = engine
        .migrate_all_data(&with_tests(scenario()))
        .expect("not busy");

    assert!(!result.success);
    assert_eq!(result.abort_reason(), Some(AbortReason::PostVerifyFailed));
    assert_eq!(result.recovery, Recovery::RestoredFromBackup);
    assert!(result
        .errors
        .iter()
        .any(|e| e.entity_id == "intruder" && e.field == "classId"));

    let after = engine.with_store(|s| s.read_all()).expect("not busy").expect("read");
    assert_eq!(after, before);
}

#[test]
fn failed_restore_after_post_verify_is_reported() {
    let (engine, _) = engine(Harness::new());
    engine
        .with_store(|s| {
            s.orphan_after_commit = true;
            s.fail_begin_after_orphan = true;
        })
        .expect("not busy");
    let result = engine.migrate_all_data(&scenario()).expect("not busy");

    assert_eq!(result.abort_reason(), Some(AbortReason::PostVerifyFailed));
    assert_eq!(result.recovery, Recovery::RestoreFailed);
    let message = result.message.expect("message");
    assert!(message.contains("restore of backup"), "{}", message);
    assert!(result.backup_id.is_some());
}

#[test]
fn explicit_restore_refuses_tampered_backup() {
    let (engine, sink) = engine(MemoryStore::new());
    let first = engine.migrate_all_data(&scenario()).expect("seed run");
    let second = engine
        .migrate_all_data(&with_tests(scenario()))
        .expect("second run");
    assert!(first.success && second.success);
    let before = engine.counts().expect("counts");

    let id = second.backup_id.expect("backup id");
    assert!(engine.backups().storage().tamper(&id, |b| {
        b.snapshot = br#"{"students":[]}"#.to_vec();
    }));

    match engine.restore(&id) {
        Err(MigrationError::Backup(e)) => assert!(e.is_integrity(), "{}", e),
        other => panic!("expected integrity failure, got {:?}", other.map(|_| ())),
    }
    assert_eq!(engine.counts().expect("counts"), before);
    assert!(sink.events().iter().any(|e| {
        e.message == "restore finished" && e.fields["integrityFailure"] == true
    }));
}

#[test]
fn explicit_restore_rewinds_to_backup() {
    let (engine, _) = engine(MemoryStore::new());
    engine.migrate_all_data(&scenario()).expect("seed run");
    let snapshot = engine.counts().expect("counts");
    let second = engine
        .migrate_all_data(&with_tests(scenario()))
        .expect("second run");

    let restored = engine
        .restore(&second.backup_id.expect("backup id"))
        .expect("restore");
    assert_eq!(restored[&EntityKind::Test], 0);
    assert_eq!(engine.counts().expect("counts"), snapshot);
}

/// Blocks in `begin` until released, so a second call can observe the lock.
struct Gated {
    inner: MemoryStore,
    entered: Option<mpsc::Sender<()>>,
    release: Option<mpsc::Receiver<()>>,
}

impl Store for Gated {
    fn begin(&mut self) -> Result<(), StoreError> {
        if let (Some(entered), Some(release)) = (self.entered.take(), self.release.take()) {
            entered.send(()).expect("signal entered");
            release.recv().expect("wait for release");
        }
        self.inner.begin()
    }
    fn commit(&mut self) -> Result<(), StoreError> {
        self.inner.commit()
    }
    fn rollback(&mut self) -> Result<(), StoreError> {
        self.inner.rollback()
    }
    fn clear(&mut self, kind: EntityKind) -> Result<ClearOutcome, StoreError> {
        self.inner.clear(kind)
    }
    fn insert(&mut self, batch: Batch<'_>) -> Result<usize, StoreError> {
        self.inner.insert(batch)
    }
    fn read_all(&self) -> Result<Dataset, StoreError> {
        self.inner.read_all()
    }
}

#[test]
fn concurrent_migration_fails_fast_with_busy() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let (engine, _) = engine(Gated {
        inner: MemoryStore::new(),
        entered: Some(entered_tx),
        release: Some(release_rx),
    });
    let ds = scenario();

    std::thread::scope(|scope| {
        let first = scope.spawn(|| engine.migrate_all_data(&ds));
        entered_rx.recv().expect("first run reached apply");

        assert!(matches!(
            engine.migrate_all_data(&ds),
            Err(MigrationError::Busy)
        ));
        assert!(matches!(engine.restore("anything"), Err(MigrationError::Busy)));
        assert!(matches!(engine.list_backups(), Err(MigrationError::Busy)));

        release_tx.send(()).expect("release first run");
        let first = first.join().expect("join").expect("first run not busy");
        assert!(first.success);
    });

    assert!(engine.migrate_all_data(&ds).expect("lock released").success);
}

struct BrokenSink;

impl AuditSink for BrokenSink {
    fn append(&self, _event: &AuditEvent) -> Result<(), AuditError> {
        Err(AuditError::Poisoned)
    }
}

#[test]
fn audit_trail_covers_every_transition() {
    let (engine, sink) = engine(MemoryStore::new());
    let result = engine.migrate_all_data(&scenario()).expect("not busy");

    let events = sink.events();
    assert_eq!(events.first().expect("events").message, "migration started");
    let last = events.last().expect("events");
    assert_eq!(last.message, "migration finished");
    assert_eq!(last.fields["success"], true);
    assert_eq!(last.fields["runId"], result.run_id.as_str());

    let transitions = events
        .iter()
        .filter(|e| e.message == "phase transition")
        .count();
    assert_eq!(transitions, result.phases.len() - 1);
    assert!(events
        .iter()
        .all(|e| e.fields["runId"] == result.run_id.as_str()));
}

#[test]
fn broken_audit_sink_never_fails_a_migration() {
    let audit = AuditLogger::new().with_sink(BrokenSink);
    let engine = MigrationExecutor::new(
        MemoryStore::new(),
        BackupManager::new(MemoryBackupStorage::new()),
        audit,
    );
    let result = engine.migrate_all_data(&scenario()).expect("not busy");
    assert!(result.success);
    assert!(engine.audit().failures() > 0);
}
