//! Integration tests for remesh-batch
//!
//! End-to-end runs use a small shell script as the external worker
//! (raw mode: PROG INPUT OUTPUT VOXEL), so no Blender is required.
//! All state lives in a tempdir.

#![cfg(unix)]

use remesh_batch::catalog::JobId;
use remesh_batch::config::{BatchConfig, ExecMode, ShardStrategy, WorkerCommand};
use remesh_batch::ledger::CompletionLedger;
use remesh_batch::progress::ProgressStore;
use remesh_batch::runner::BatchCoordinator;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tempfile::{tempdir, TempDir};

/// Write an executable stub worker script
fn write_stub_worker(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    path
}

/// A worker that copies input to output and exits 0
fn copying_worker(dir: &Path) -> PathBuf {
    write_stub_worker(dir, "copy_worker.sh", "cp \"$1\" \"$2\"")
}

/// A worker that always fails with a diagnostic on stderr
fn failing_worker(dir: &Path) -> PathBuf {
    write_stub_worker(dir, "fail_worker.sh", "echo 'remesh exploded' >&2\nexit 3")
}

/// Populate an input tree with small mesh stand-ins
fn populate_meshes(root: &Path, names: &[&str]) {
    for name in names {
        let path = root.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, format!("mesh {name}")).unwrap();
    }
}

/// Build a single-rank test configuration around a tempdir
fn test_config(dir: &TempDir, worker_program: &Path) -> BatchConfig {
    let state_dir = dir.path().join("state");
    BatchConfig {
        input_root: dir.path().join("meshes"),
        output_root: dir.path().join("remeshes"),
        cache_path: state_dir.join("relative_file_list.txt"),
        ledger_path: state_dir.join("completed.ledger"),
        cost_cache_path: state_dir.join("file_sizes.json"),
        state_dir,
        extensions: vec!["obj".to_string()],
        exclude_patterns: Vec::new(),
        worker_count: 2,
        mode: ExecMode::Dynamic,
        strategy: ShardStrategy::RoundRobin,
        sample_every: 1,
        limit: None,
        force: false,
        retry_failed: false,
        max_retries: 3,
        flush_interval: Duration::from_secs(600),
        rank: 0,
        world_size: 1,
        worker: WorkerCommand {
            program: worker_program.display().to_string(),
            script: PathBuf::from("unused.py"),
            raw: true,
            voxel_size: 0.005,
        },
        show_progress: false,
        verbose: false,
    }
}

const MESHES: &[&str] = &["chairs/a.obj", "chairs/b.obj", "tables/c.obj"];

#[test]
fn test_full_run_produces_outputs_and_state() {
    let dir = tempdir().unwrap();
    populate_meshes(&dir.path().join("meshes"), MESHES);
    let config = test_config(&dir, &copying_worker(dir.path()));

    let result = BatchCoordinator::new(config.clone()).run(None).unwrap();

    assert_eq!(result.shard_size, 3);
    assert_eq!(result.dispatched, 3);
    assert_eq!(result.completed, 3);
    assert_eq!(result.failed, 0);
    assert!(!result.interrupted);

    for name in MESHES {
        let out = config.output_root.join(name);
        assert!(out.exists(), "missing output {}", out.display());
    }

    // Catalog cache written once, ordered
    let cache = fs::read_to_string(&config.cache_path).unwrap();
    let lines: Vec<&str> = cache.lines().collect();
    assert_eq!(lines, vec!["chairs/a.obj", "chairs/b.obj", "tables/c.obj"]);

    // Progress records every completion
    let progress = ProgressStore::load(&config.progress_path());
    for name in MESHES {
        assert!(progress.record().is_completed(&JobId::new(*name)));
    }

    // Final flush put everything in the ledger
    let ledger = CompletionLedger::open(&config.ledger_path);
    assert_eq!(ledger.len(), 3);
}

#[test]
fn test_resume_dispatches_nothing() {
    let dir = tempdir().unwrap();
    populate_meshes(&dir.path().join("meshes"), MESHES);
    let config = test_config(&dir, &copying_worker(dir.path()));

    let first = BatchCoordinator::new(config.clone()).run(None).unwrap();
    assert_eq!(first.completed, 3);

    let second = BatchCoordinator::new(config).run(None).unwrap();
    assert!(second.nothing_to_do());
    assert_eq!(second.skipped_completed, 3);
    assert_eq!(second.completed, 0);
}

#[test]
fn test_fixed_mode_runs_everything() {
    let dir = tempdir().unwrap();
    populate_meshes(&dir.path().join("meshes"), MESHES);
    let mut config = test_config(&dir, &copying_worker(dir.path()));
    config.mode = ExecMode::Fixed;

    let result = BatchCoordinator::new(config).run(None).unwrap();
    assert_eq!(result.completed, 3);
}

#[test]
fn test_failures_are_recorded_and_retried_to_ceiling() {
    let dir = tempdir().unwrap();
    populate_meshes(&dir.path().join("meshes"), &["chairs/a.obj"]);
    let config = test_config(&dir, &failing_worker(dir.path()));

    // Three passes: fail, retry-fail, retry-fail (retry count hits 3)
    for pass in 1..=3 {
        let result = BatchCoordinator::new(config.clone()).run(None).unwrap();
        assert_eq!(result.dispatched, 1, "pass {pass} should dispatch");
        assert_eq!(result.failed, 1);
        assert_eq!(result.completed, 0);
    }

    let progress = ProgressStore::load(&config.progress_path());
    assert_eq!(progress.record().retries(&JobId::new("chairs/a.obj")), 3);

    // Fourth pass: retry ceiling reached, permanently skipped
    let result = BatchCoordinator::new(config.clone()).run(None).unwrap();
    assert!(result.nothing_to_do());
    assert_eq!(result.skipped_exhausted, 1);

    // Failed jobs never enter the ledger
    let ledger = CompletionLedger::open(&config.ledger_path);
    assert!(ledger.is_empty());
}

#[test]
fn test_ledger_entry_skips_without_invoking_worker() {
    let dir = tempdir().unwrap();
    populate_meshes(&dir.path().join("meshes"), &["chairs/a.obj", "chairs/b.obj"]);
    let config = test_config(&dir, &copying_worker(dir.path()));

    // Another rank already completed chairs/a.obj
    fs::create_dir_all(&config.state_dir).unwrap();
    fs::write(&config.ledger_path, "# seeded by rank 1\nchairs/a.obj\n").unwrap();

    let result = BatchCoordinator::new(config.clone()).run(None).unwrap();
    assert_eq!(result.skipped_completed, 1);
    assert_eq!(result.completed, 1);

    // The ledger-listed job was never executed: no output produced
    assert!(!config.output_root.join("chairs/a.obj").exists());
    assert!(config.output_root.join("chairs/b.obj").exists());
}

#[test]
fn test_existing_output_skips_job() {
    let dir = tempdir().unwrap();
    populate_meshes(&dir.path().join("meshes"), &["chairs/a.obj", "chairs/b.obj"]);
    let config = test_config(&dir, &copying_worker(dir.path()));

    // chairs/b.obj already remeshed by an earlier deployment
    let existing = config.output_root.join("chairs/b.obj");
    fs::create_dir_all(existing.parent().unwrap()).unwrap();
    fs::write(&existing, "prior output").unwrap();

    let result = BatchCoordinator::new(config).run(None).unwrap();
    assert_eq!(result.skipped_output_exists, 1);
    assert_eq!(result.completed, 1);

    // The pre-existing output was not overwritten
    assert_eq!(fs::read_to_string(&existing).unwrap(), "prior output");
}

#[test]
fn test_force_reruns_completed_jobs() {
    let dir = tempdir().unwrap();
    populate_meshes(&dir.path().join("meshes"), MESHES);
    let mut config = test_config(&dir, &copying_worker(dir.path()));

    let first = BatchCoordinator::new(config.clone()).run(None).unwrap();
    assert_eq!(first.completed, 3);

    config.force = true;
    let second = BatchCoordinator::new(config).run(None).unwrap();
    assert_eq!(second.dispatched, 3);
    assert_eq!(second.completed, 3);
}

#[test]
fn test_retry_failed_mode_only_takes_failed_jobs() {
    let dir = tempdir().unwrap();
    populate_meshes(&dir.path().join("meshes"), &["chairs/a.obj", "chairs/b.obj"]);

    // Seed one failure by hand; chairs/b.obj stays pending
    let config = test_config(&dir, &copying_worker(dir.path()));
    let mut progress = ProgressStore::load(&config.progress_path());
    progress.mark_failed(&JobId::new("chairs/a.obj"));
    progress.save().unwrap();

    let mut retry_config = config.clone();
    retry_config.retry_failed = true;
    let result = BatchCoordinator::new(retry_config).run(None).unwrap();

    assert_eq!(result.dispatched, 1);
    assert_eq!(result.completed, 1);
    assert!(config.output_root.join("chairs/a.obj").exists());
    assert!(!config.output_root.join("chairs/b.obj").exists());
}

#[test]
fn test_limit_caps_dispatch() {
    let dir = tempdir().unwrap();
    populate_meshes(&dir.path().join("meshes"), MESHES);
    let mut config = test_config(&dir, &copying_worker(dir.path()));
    config.limit = Some(2);

    let result = BatchCoordinator::new(config).run(None).unwrap();
    assert_eq!(result.shard_size, 2);
    assert_eq!(result.completed, 2);
}

#[test]
fn test_interrupt_before_dispatch_is_resumable() {
    let dir = tempdir().unwrap();
    populate_meshes(&dir.path().join("meshes"), MESHES);
    let config = test_config(&dir, &copying_worker(dir.path()));

    // Interrupt arrives before any job is admitted
    let coordinator = BatchCoordinator::new(config.clone());
    coordinator.shutdown_flag().store(true, Ordering::SeqCst);
    let result = coordinator.run(None).unwrap();

    assert!(result.interrupted);
    assert_eq!(result.completed, 0);

    // The exact same command resumes and finishes the pending work
    let resumed = BatchCoordinator::new(config).run(None).unwrap();
    assert!(!resumed.interrupted);
    assert_eq!(resumed.completed, 3);
}

#[test]
fn test_interrupt_mid_run_persists_in_flight_outcomes() {
    let dir = tempdir().unwrap();
    let names = ["a/0.obj", "a/1.obj", "a/2.obj", "a/3.obj", "a/4.obj", "a/5.obj"];
    populate_meshes(&dir.path().join("meshes"), &names);

    let slow_worker = write_stub_worker(dir.path(), "slow.sh", "sleep 0.5\ncp \"$1\" \"$2\"");
    let mut config = test_config(&dir, &slow_worker);
    config.worker_count = 1;

    let coordinator = BatchCoordinator::new(config.clone());
    let flag = coordinator.shutdown_flag();
    let interrupter = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(200));
        flag.store(true, Ordering::SeqCst);
    });

    let result = coordinator.run(None).unwrap();
    interrupter.join().unwrap();

    assert!(result.interrupted);
    assert!(result.completed < names.len() as u64, "interrupt came too late");

    // Whatever finished in flight is durably recorded
    let progress = ProgressStore::load(&config.progress_path());
    assert_eq!(progress.record().completed.len() as u64, result.completed);

    // Re-invoking the same command picks up exactly the pending jobs
    let resumed = BatchCoordinator::new(config).run(None).unwrap();
    assert!(!resumed.interrupted);
    assert_eq!(result.completed + resumed.completed, names.len() as u64);
}

#[test]
fn test_two_ranks_partition_and_share_ledger() {
    let dir = tempdir().unwrap();
    populate_meshes(
        &dir.path().join("meshes"),
        &["a/0.obj", "a/1.obj", "a/2.obj", "a/3.obj", "a/4.obj"],
    );

    let worker = copying_worker(dir.path());
    let mut rank0 = test_config(&dir, &worker);
    rank0.world_size = 2;
    let mut rank1 = rank0.clone();
    rank1.rank = 1;

    let r0 = BatchCoordinator::new(rank0.clone()).run(None).unwrap();
    let r1 = BatchCoordinator::new(rank1).run(None).unwrap();

    // Round-robin over 5 jobs: rank 0 gets 3, rank 1 gets 2
    assert_eq!(r0.completed, 3);
    assert_eq!(r1.completed, 2);

    // Both ranks flushed into one shared ledger
    let ledger = CompletionLedger::open(&rank0.ledger_path);
    assert_eq!(ledger.len(), 5);

    // A third process (any rank) sees everything as done
    let again = BatchCoordinator::new(rank0).run(None).unwrap();
    assert!(again.nothing_to_do());
}

#[test]
fn test_size_balanced_run_completes_and_caches_costs() {
    let dir = tempdir().unwrap();
    populate_meshes(&dir.path().join("meshes"), MESHES);
    let mut config = test_config(&dir, &copying_worker(dir.path()));
    config.strategy = ShardStrategy::SizeBalanced;

    let result = BatchCoordinator::new(config.clone()).run(None).unwrap();
    assert_eq!(result.completed, 3);
    assert!(config.cost_cache_path.exists());
}

#[test]
fn test_corrupt_progress_recovers_as_empty() {
    let dir = tempdir().unwrap();
    populate_meshes(&dir.path().join("meshes"), &["chairs/a.obj"]);
    let config = test_config(&dir, &copying_worker(dir.path()));

    fs::create_dir_all(&config.state_dir).unwrap();
    fs::write(config.progress_path(), "not json at all").unwrap();

    let result = BatchCoordinator::new(config.clone()).run(None).unwrap();
    assert_eq!(result.completed, 1);

    let progress = ProgressStore::load(&config.progress_path());
    assert!(progress.record().is_completed(&JobId::new("chairs/a.obj")));
}

#[test]
fn test_failure_diagnostic_reaches_progress_state() {
    let dir = tempdir().unwrap();
    populate_meshes(&dir.path().join("meshes"), &["chairs/a.obj"]);
    let config = test_config(&dir, &failing_worker(dir.path()));

    let result = BatchCoordinator::new(config.clone()).run(None).unwrap();
    assert_eq!(result.failed, 1);

    let progress = ProgressStore::load(&config.progress_path());
    assert_eq!(progress.record().retries(&JobId::new("chairs/a.obj")), 1);
    assert!(!progress.record().is_completed(&JobId::new("chairs/a.obj")));
}
