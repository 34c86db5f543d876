//! Whole-night closing scenarios against a temporary directory tree and an
//! in-memory database.

use nightfall_closer::{
    AutoConfirm, CloseError, CloseOutcome, ClosingOrchestrator, NightLock, NoRemoteSync,
    ReconcileAction, RemoteSync, RemoteSyncError, TerminalPrompt,
};
use nightfall_db::{
    insert_record, Assignments, BackendError, DbConnection, DuckDbRecordStore, RecordStore,
    RunFileRecord, TableNames,
};
use nightfall_protocol::{
    NightContext, NightDate, NightPaths, NightfallConfig, ProductKind, RunKind, Sequence, StepSpec,
};
use nightfall_runner::{HistoryEntry, HistoryLedger};
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

struct Fixture {
    _tmp: TempDir,
    config: NightfallConfig,
    store: DuckDbRecordStore,
}

fn fixture() -> Fixture {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    let mut config = NightfallConfig::default();
    config.paths.analysis_dir = root.join("running_analysis");
    config.paths.destination_root = root.join("data");
    config.paths.closer_dir = root.join("Closer");
    config.paths.raw_dir = root.join("R0");
    config.paths.systematics_dir = root.join("systematics");
    config.paths.night_summary_dir = root.join("NightSummary");
    config.steps.pedcalib = vec![StepSpec::new("CALIB", "true", ProductKind::Calib)];
    config.steps.data = vec![StepSpec::new("R0_TO_DL1", "true", ProductKind::Dl1)];

    let tables = TableNames {
        analysis: config.database.analysis_table.clone(),
        summary: config.database.summary_table.clone(),
        files: config.database.files_table.clone(),
    };
    let store = DuckDbRecordStore::new(DbConnection::open_duckdb_memory().unwrap(), &tables)
        .unwrap();
    Fixture {
        _tmp: tmp,
        config,
        store,
    }
}

fn night() -> NightContext {
    NightContext::new("LST1", NightDate::parse("2020_01_17").unwrap())
}

impl Fixture {
    fn paths<'a>(&'a self, ctx: &NightContext) -> NightPaths<'a> {
        NightPaths::new(&self.config, ctx)
    }

    fn staging(&self) -> PathBuf {
        let dir = self.paths(&night()).analysis_dir();
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_summary(&self, text: &str) {
        let file = self.paths(&night()).night_summary_file();
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(file, text).unwrap();
    }

    fn finish(&self, run_id: u32, kind: RunKind, exit_code: i32) {
        let seq = Sequence::new(0, "LST1", run_id, kind, 1, self.staging());
        let (step, product) = match kind {
            RunKind::Pedcalib => ("CALIB", ProductKind::Calib),
            RunKind::Data => ("R0_TO_DL1", ProductKind::Dl1),
        };
        let mut ledger = HistoryLedger::open(seq.history_file(".history")).unwrap();
        ledger
            .record(HistoryEntry::now(
                &seq.run_str(),
                step,
                self.config.product_id(product),
                "in",
                "cfg",
                exit_code,
            ))
            .unwrap();
    }

    fn stage(&self, name: &str, content: &str) -> PathBuf {
        let path = self.staging().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn destination(&self, concept: &str, name: &str) -> PathBuf {
        let spec = self.config.concept(concept).unwrap();
        self.paths(&night()).destination_dir(spec).unwrap().join(name)
    }

    fn close(&self, ctx: &NightContext) -> Result<CloseOutcome, CloseError> {
        let mut operator = AutoConfirm;
        ClosingOrchestrator::new(&self.config, ctx, &self.store, &mut operator, &NoRemoteSync)
            .run()
    }

    fn count(&self, table: &str) -> i64 {
        self.store
            .connection()
            .query_scalar(&format!("SELECT COUNT(*) FROM {}", table), &[])
            .unwrap()
    }

    fn lock(&self) -> NightLock {
        NightLock::for_night(&self.paths(&night()))
    }
}

#[test]
fn empty_night_closes() {
    let fx = fixture();
    fx.write_summary("# no observations\n");

    let outcome = fx.close(&night()).unwrap();

    match &outcome {
        CloseOutcome::Closed { lock_created, .. } => assert!(lock_created),
        other => panic!("expected a closed night, got {:?}", other),
    }
    assert!(outcome.reconciled().decisions.is_empty());
    assert_eq!(outcome.report().sequences, 0);
    assert!(fx.lock().is_day_closed());
    assert!(fx.lock().read_report().unwrap().contains("SEQUENCES: 0\n"));
    assert_eq!(fx.count("night_analysis"), 1);
    assert_eq!(fx.count("night_summary"), 1);
}

#[test]
fn closed_night_is_not_closed_twice() {
    let fx = fixture();
    fx.write_summary("");
    fx.close(&night()).unwrap();

    let err = fx.close(&night()).unwrap_err();

    assert!(matches!(err, CloseError::AlreadyClosed { .. }));
    assert!(err.is_abort());
    assert_eq!(err.exit_code(), 1);
}

#[test]
fn missing_night_summary_is_fatal() {
    let fx = fixture();

    let err = fx.close(&night()).unwrap_err();

    assert!(matches!(err, CloseError::MissingNightSummary(_)));
    assert_eq!(err.exit_code(), 2);
    assert!(!fx.lock().is_day_closed());
    assert_eq!(fx.count("night_summary"), 0);
}

#[test]
fn neither_reason_nor_summary_is_unexpected() {
    let fx = fixture();
    let mut ctx = night();
    ctx.use_night_summary = false;

    let err = fx.close(&ctx).unwrap_err();

    assert_eq!(err.exit_code(), 9);
}

#[test]
fn reason_closes_night_without_data() {
    let fx = fixture();
    let mut ctx = night();
    ctx.reason = Some("bad weather".into());

    fx.close(&ctx).unwrap();

    assert!(fx.lock().is_day_closed());
    let comment: String = fx
        .store
        .connection()
        .query_scalar("SELECT comments FROM night_analysis", &[])
        .unwrap();
    assert_eq!(comment, "bad weather");
}

#[test]
fn empty_reason_asks_the_operator() {
    let fx = fixture();
    let mut ctx = night();
    ctx.reason = Some(String::new());
    let mut operator = TerminalPrompt::new(Cursor::new("dome closed by wind\n"), std::io::sink());

    ClosingOrchestrator::new(&fx.config, &ctx, &fx.store, &mut operator, &NoRemoteSync)
        .run()
        .unwrap();

    let comment: String = fx
        .store
        .connection()
        .query_scalar("SELECT comments FROM night_analysis", &[])
        .unwrap();
    assert_eq!(comment, "dome closed by wind");
}

#[test]
fn declining_an_unfinished_night_leaves_it_open() {
    let fx = fixture();
    fx.write_summary("01805 1 PEDCALIB\n01807 3 DATA\n");
    fx.finish(1805, RunKind::Pedcalib, 0);
    fx.finish(1807, RunKind::Data, 1);
    let staged = fx.stage("dl1_LST-1.Run01807.0000.h5", "dl1");
    let mut operator = TerminalPrompt::new(Cursor::new("n\n"), std::io::sink());

    let err = ClosingOrchestrator::new(&fx.config, &night(), &fx.store, &mut operator, &NoRemoteSync)
        .run()
        .unwrap_err();

    assert!(matches!(err, CloseError::UserAbort { .. }));
    assert_eq!(err.exit_code(), 3);
    assert!(staged.exists());
    assert!(!fx.lock().is_day_closed());
    assert_eq!(fx.count("night_summary"), 0);
}

#[test]
fn non_interactive_closes_unfinished_night() {
    let fx = fixture();
    fx.write_summary("01807 3 DATA\n");
    let mut ctx = night();
    ctx.non_interactive = true;
    let mut operator = TerminalPrompt::new(Cursor::new(""), std::io::sink());

    ClosingOrchestrator::new(&fx.config, &ctx, &fx.store, &mut operator, &NoRemoteSync)
        .run()
        .unwrap();

    assert!(fx.lock().is_day_closed());
}

#[test]
fn finished_night_promotes_products() {
    let fx = fixture();
    fx.write_summary("01805 1 PEDCALIB\n01807 3 DATA\n");
    fx.finish(1805, RunKind::Pedcalib, 0);
    fx.finish(1807, RunKind::Data, 0);
    let pedestal = fx.stage("drs4_pedestal.Run01805.0000.h5", "ped");
    let dl1 = fx.stage("dl1_LST-1.Run01807.0000.h5", "dl1");
    let dl2 = fx.stage("dl2_LST-1.Run01807.0000.h5", "dl2");
    let stray = fx.stage("dl2_LST-1.Run09999.0000.h5", "stray");

    let outcome = fx.close(&night()).unwrap();

    assert!(!pedestal.exists() && !dl1.exists() && !dl2.exists());
    assert_eq!(
        fs::read_to_string(fx.destination("PEDESTAL", "drs4_pedestal.Run01805.0000.h5")).unwrap(),
        "ped"
    );
    assert!(fx.destination("DL1AB", "dl1_LST-1.Run01807.0000.h5").exists());
    assert!(fx.destination("DL2", "dl2_LST-1.Run01807.0000.h5").exists());
    assert!(stray.exists(), "unowned files stay staged");
    assert_eq!(outcome.reconciled().count(ReconcileAction::Moved), 3);
    assert_eq!(outcome.reconciled().count(ReconcileAction::Unowned), 1);
    assert!(fx.staging().join("sequence_LST1_01805.closed").exists());
    assert!(fx.staging().join("sequence_LST1_01807.closed").exists());
    assert_eq!(fx.count("run_files"), 3);

    let lock = fx.lock().read_report().unwrap();
    assert!(lock.contains("SEQUENCES: 2\n"));
    assert!(lock.contains("FILES_RAW: 4\n"));
    assert!(lock.contains("FILES_DL2: 2\n"));
}

#[test]
fn reclosing_a_reconciled_night_changes_nothing() {
    let fx = fixture();
    fx.write_summary("01807 3 DATA\n");
    fx.finish(1807, RunKind::Data, 0);
    fx.stage("dl2_LST-1.Run01807.0000.h5", "dl2");
    fx.close(&night()).unwrap();
    fs::remove_file(fx.lock().path()).unwrap();

    let again = fx.close(&night()).unwrap();

    assert!(again.reconciled().is_noop());
    assert_eq!(fx.count("run_files"), 1);
    assert_eq!(fx.count("night_analysis"), 1);
    assert_eq!(fx.count("night_summary"), 1);
}

#[test]
fn staged_symlink_to_promoted_file_is_dropped() {
    let fx = fixture();
    fx.write_summary("01807 3 DATA\n");
    fx.finish(1807, RunKind::Data, 0);
    let name = "dl1_LST-1.Run01807.0000.h5";
    let destination = fx.destination("DL1AB", name);
    fs::create_dir_all(destination.parent().unwrap()).unwrap();
    fs::write(&destination, "dl1").unwrap();
    let staged = fx.staging().join(name);
    std::os::unix::fs::symlink(&destination, &staged).unwrap();

    let outcome = fx.close(&night()).unwrap();

    assert!(staged.symlink_metadata().is_err());
    assert_eq!(fs::read_to_string(&destination).unwrap(), "dl1");
    let decision = &outcome.reconciled().decisions[0];
    assert_eq!(decision.action, ReconcileAction::LinkRemoved);
    assert!(decision.action.is_reconciled());
}

#[test]
fn identical_copy_is_dropped_and_conflict_kept() {
    let fx = fixture();
    fx.write_summary("01807 3 DATA\n");
    fx.finish(1807, RunKind::Data, 0);
    for (name, staged, promoted) in [
        ("dl2_LST-1.Run01807.0000.h5", "same", "same"),
        ("dl2_LST-1.Run01807.0001.h5", "new", "old"),
    ] {
        let destination = fx.destination("DL2", name);
        fs::create_dir_all(destination.parent().unwrap()).unwrap();
        fs::write(&destination, promoted).unwrap();
        fx.stage(name, staged);
    }

    let outcome = fx.close(&night()).unwrap();

    assert!(!fx.staging().join("dl2_LST-1.Run01807.0000.h5").exists());
    assert_eq!(
        fs::read_to_string(fx.staging().join("dl2_LST-1.Run01807.0001.h5")).unwrap(),
        "new"
    );
    assert_eq!(
        fs::read_to_string(fx.destination("DL2", "dl2_LST-1.Run01807.0001.h5")).unwrap(),
        "old"
    );
    assert_eq!(outcome.reconciled().count(ReconcileAction::DuplicateRemoved), 1);
    assert_eq!(outcome.reconciled().conflicts().count(), 1);
    assert!(fx.lock().is_day_closed());
}

#[test]
fn single_sequence_close_touches_only_that_run() {
    let fx = fixture();
    fx.write_summary("01807 3 DATA\n01809 2 DATA\n");
    fx.finish(1807, RunKind::Data, 0);
    fx.finish(1809, RunKind::Data, 0);
    let wanted = fx.stage("dl1_LST-1.Run01807.0000.h5", "a");
    let other = fx.stage("dl1_LST-1.Run01809.0000.h5", "b");
    let mut ctx = night();
    ctx.sequence_to_close = Some("1807".into());

    let outcome = fx.close(&ctx).unwrap();

    assert!(matches!(outcome, CloseOutcome::Partial { ref sequence, .. } if sequence == "1807"));
    assert!(wanted.exists(), "partial close copies");
    assert!(fx.destination("DL1AB", "dl1_LST-1.Run01807.0000.h5").exists());
    assert!(other.exists());
    assert!(!fx.destination("DL1AB", "dl1_LST-1.Run01809.0000.h5").exists());
    assert_eq!(outcome.reconciled().count(ReconcileAction::Copied), 1);
    assert!(!fx.lock().is_day_closed());
    assert_eq!(fx.count("night_analysis"), 0);
    assert_eq!(fx.count("night_summary"), 1);
}

#[test]
fn simulation_mutates_nothing() {
    let fx = fixture();
    fx.write_summary("01807 3 DATA\n");
    fx.finish(1807, RunKind::Data, 0);
    let staged = fx.stage("dl2_LST-1.Run01807.0000.h5", "dl2");
    let mut ctx = night();
    ctx.simulate = true;

    let outcome = fx.close(&ctx).unwrap();

    assert!(matches!(outcome, CloseOutcome::Closed { lock_created: false, .. }));
    assert_eq!(outcome.reconciled().count(ReconcileAction::Moved), 1);
    assert!(staged.exists());
    assert!(!fx.destination("DL2", "dl2_LST-1.Run01807.0000.h5").exists());
    assert!(!fx.staging().join("sequence_LST1_01807.closed").exists());
    assert!(!fx.lock().is_day_closed());
    assert_eq!(fx.count("night_summary"), 0);
    assert_eq!(fx.count("run_files"), 0);
}

struct Unreachable;

impl RemoteSync for Unreachable {
    fn sync(&self, _lock: &Path, _ctx: &NightContext) -> Result<(), RemoteSyncError> {
        Err(RemoteSyncError::Failed {
            command: "scp".into(),
            code: Some(255),
        })
    }
}

#[test]
fn remote_sync_failure_does_not_reopen_the_night() {
    let fx = fixture();
    fx.write_summary("");
    let mut operator = AutoConfirm;

    let outcome = ClosingOrchestrator::new(&fx.config, &night(), &fx.store, &mut operator, &Unreachable)
        .run()
        .unwrap();

    assert!(matches!(outcome, CloseOutcome::Closed { lock_created: true, .. }));
    assert!(fx.lock().is_day_closed());
}

/// Delegates to the real store but loses every write to one table.
struct LostTable<'a> {
    store: &'a DuckDbRecordStore,
    table: &'static str,
}

impl RecordStore for LostTable<'_> {
    fn update_or_insert(
        &self,
        table: &str,
        assignments: &Assignments,
        conditions: &Assignments,
    ) -> Result<i64, BackendError> {
        if table == self.table {
            return Err(BackendError::Database("connection reset".into()));
        }
        self.store.update_or_insert(table, assignments, conditions)
    }

    fn insert(&self, table: &str, assignments: &Assignments) -> Result<i64, BackendError> {
        if table == self.table {
            return Err(BackendError::Database("connection reset".into()));
        }
        self.store.insert(table, assignments)
    }
}

#[test]
fn retry_after_persistence_failure_counts_promoted_files() {
    let fx = fixture();
    fx.write_summary("01807 3 DATA\n");
    fx.finish(1807, RunKind::Data, 0);
    let name = "dl2_LST-1.Run01807.0000.h5";
    fx.stage(name, "dl2");
    let broken = LostTable {
        store: &fx.store,
        table: "night_analysis",
    };
    let mut operator = AutoConfirm;

    let err = ClosingOrchestrator::new(&fx.config, &night(), &broken, &mut operator, &NoRemoteSync)
        .run()
        .unwrap_err();

    assert!(matches!(err, CloseError::Persistence(_)));
    assert_eq!(err.exit_code(), 4);
    assert!(fx.destination("DL2", name).exists());
    assert!(!fx.lock().is_day_closed());

    let outcome = fx.close(&night()).unwrap();

    assert!(outcome.reconciled().is_noop());
    assert_eq!(outcome.report().counts_map()["DL2"], 1);
    assert!(fx.lock().read_report().unwrap().contains("FILES_DL2: 1\n"));
    let counts: String = fx
        .store
        .connection()
        .query_scalar("SELECT concept_counts FROM night_analysis", &[])
        .unwrap();
    assert!(counts.contains(r#""DL2":1"#), "{}", counts);
}

#[test]
fn blocked_destination_fails_only_its_concept() {
    let fx = fixture();
    fx.write_summary("01807 3 DATA\n");
    fx.finish(1807, RunKind::Data, 0);
    let dl1 = fx.stage("dl1_LST-1.Run01807.0000.h5", "dl1");
    let dl2 = fx.stage("dl2_LST-1.Run01807.0000.h5", "dl2");
    let root = &fx.config.paths.destination_root;
    fs::create_dir_all(root).unwrap();
    fs::write(root.join("DL2"), "not a directory").unwrap();

    let err = fx.close(&night()).unwrap_err();

    match &err {
        CloseError::Reconcile(concepts) => assert_eq!(concepts, &vec!["DL2".to_string()]),
        other => panic!("expected a failed concept, got {:?}", other),
    }
    assert!(!dl1.exists());
    assert!(fx.destination("DL1AB", "dl1_LST-1.Run01807.0000.h5").exists());
    assert!(dl2.exists(), "failed concept leaves its files staged");
    assert_eq!(fx.count("run_files"), 1);
    assert_eq!(fx.count("night_summary"), 0);
    assert!(!fx.lock().is_day_closed());
}

#[test]
fn interrupted_registration_is_not_duplicated() {
    let fx = fixture();
    fx.write_summary("01807 3 DATA\n");
    fx.finish(1807, RunKind::Data, 0);
    let name = "dl2_LST-1.Run01807.0000.h5";
    fx.stage(name, "dl2");
    let destination = fx.destination("DL2", name);
    // Left behind by a close that registered the file but never moved it.
    insert_record(
        &fx.store,
        "run_files",
        &RunFileRecord {
            telescope: "LST1".into(),
            night: "2020_01_17".into(),
            run_id: 1807,
            concept: "DL2".into(),
            file_name: name.into(),
            destination: destination.display().to_string(),
            size_bytes: 0,
            checksum: String::new(),
        },
    )
    .unwrap();

    fx.close(&night()).unwrap();

    assert!(destination.exists());
    assert_eq!(fx.count("run_files"), 1);
    let checksum: String = fx
        .store
        .connection()
        .query_scalar("SELECT checksum FROM run_files", &[])
        .unwrap();
    assert_eq!(checksum, blake3::hash(b"dl2").to_hex().to_string());
}
