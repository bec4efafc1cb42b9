mod common;

use common::{Harness, Reply, DUMP};
use myfleet::backup::{sha256_file, ArtifactStatus, DumpMode};
use myfleet::confirm::AssumeNo;
use myfleet::error::RestorePhase;
use myfleet::exec::StdinSource;
use myfleet::supervisor::UnitStatus;
use myfleet::{Error, ErrorKind, LifecycleState};
use std::path::Path;
use std::sync::Arc;

fn entries(dir: &Path) -> Vec<String> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    }
}

#[tokio::test]
async fn test_backup_of_running_instance() {
    let h = Harness::new();
    let record = h.running("prod01", 3306).await;
    h.executor.on("mysqldump", &[], Reply::ok(DUMP));

    let artifact = h.controller.backup("prod01", None).await.unwrap();

    assert_eq!(artifact.status, ArtifactStatus::Complete);
    assert_eq!(artifact.mode, DumpMode::SingleTransaction);
    assert_eq!(artifact.size_bytes, DUMP.len() as u64);
    assert!(artifact.path.starts_with(&record.backup_dir));
    let (digest, _) = sha256_file(&artifact.dump_path()).unwrap();
    assert_eq!(artifact.sha256, digest);

    let dump = h
        .executor
        .calls()
        .into_iter()
        .find(|c| c.program == "mysqldump")
        .unwrap();
    assert!(dump.args.iter().any(|a| a == "--single-transaction"));
    assert!(dump.args[0].starts_with("--defaults-extra-file="));

    let listed = h.controller.list_backups("prod01", None).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].path, artifact.path);
    assert_eq!(listed[0].sha256, artifact.sha256);
}

#[tokio::test]
async fn test_failed_dump_leaves_nothing_behind() {
    let h = Harness::new();
    let record = h.running("prod01", 3306).await;
    h.executor.on(
        "mysqldump",
        &[],
        Reply {
            exit_code: Some(2),
            stdout: "-- MySQL dump 10.13\nCREATE DATABASE app;\n".to_string(),
            stderr: "mysqldump: Got error: 2013: Lost connection to MySQL server during query"
                .to_string(),
        },
    );

    let err = h.controller.backup("prod01", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExternalTool);

    assert!(h.controller.list_backups("prod01", None).unwrap().is_empty());
    assert!(
        entries(&record.backup_dir).is_empty(),
        "left behind: {:?}",
        entries(&record.backup_dir)
    );
}

#[tokio::test]
async fn test_dump_without_trailer_is_rejected() {
    let h = Harness::new();
    let record = h.running("prod01", 3306).await;
    h.executor.on(
        "mysqldump",
        &[],
        Reply::ok("-- MySQL dump 10.13\nCREATE DATABASE app;\nINSERT INTO app.t VALUES (1);\n"),
    );

    let err = h.controller.backup("prod01", None).await.unwrap_err();
    assert!(matches!(err, Error::ExternalTool { .. }));
    assert!(h.controller.list_backups("prod01", None).unwrap().is_empty());
    assert!(entries(&record.backup_dir).is_empty());
}

#[tokio::test]
async fn test_backup_of_stopped_instance_starts_and_stops_it() {
    let h = Harness::new();
    let record = h.provision("prod01", 3306).await;
    h.executor.on("mysqldump", &[], Reply::ok(DUMP));

    let artifact = h.controller.backup("prod01", None).await.unwrap();

    assert_eq!(artifact.mode, DumpMode::Quiesced);
    assert_eq!(h.supervisor.unit(&record.service_unit), UnitStatus::Stopped);
    assert_eq!(
        h.controller.get("prod01").unwrap().lifecycle_state,
        LifecycleState::Stopped
    );
    assert!(h.executor.count("mysqladmin") >= 1);
    let dump = h
        .executor
        .calls()
        .into_iter()
        .find(|c| c.program == "mysqldump")
        .unwrap();
    assert!(!dump.args.iter().any(|a| a == "--single-transaction"));
}

#[tokio::test]
async fn test_backup_to_custom_directory() {
    let h = Harness::new();
    h.running("prod01", 3306).await;
    h.executor.on("mysqldump", &[], Reply::ok(DUMP));
    let target = h.root().join("offsite");

    let artifact = h
        .controller
        .backup("prod01", Some(&target))
        .await
        .unwrap();
    assert!(artifact.path.starts_with(&target));

    assert!(h.controller.list_backups("prod01", None).unwrap().is_empty());
    assert_eq!(
        h.controller
            .list_backups("prod01", Some(&target))
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn test_backup_requires_stopped_or_running() {
    let h = Harness::new();
    h.supervisor.fail("install");
    let _ = h
        .controller
        .init(myfleet::InitRequest::new("prod01").port(3306))
        .await;

    let err = h.controller.backup("prod01", None).await.unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_restore_verifies_and_streams_dump() {
    let h = Harness::new();
    h.running("prod01", 3306).await;
    h.executor.on("mysqldump", &[], Reply::ok(DUMP));
    let artifact = h.controller.backup("prod01", None).await.unwrap();

    let summary = h
        .controller
        .restore("prod01", &artifact.path)
        .await
        .unwrap();
    assert!(summary.checksum_verified);
    assert_eq!(summary.dump_path, artifact.dump_path());

    let streamed = h
        .executor
        .calls()
        .into_iter()
        .any(|c| c.program == "mysql" && c.stdin == StdinSource::File(artifact.dump_path()));
    assert!(streamed);
}

#[tokio::test]
async fn test_restore_rejects_tampered_dump() {
    let h = Harness::new();
    h.running("prod01", 3306).await;
    h.executor.on("mysqldump", &[], Reply::ok(DUMP));
    let artifact = h.controller.backup("prod01", None).await.unwrap();
    std::fs::write(artifact.dump_path(), "DROP DATABASE app;\n-- Dump completed\n").unwrap();

    let err = h
        .controller
        .restore("prod01", &artifact.path)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::RestoreFailed {
            phase: RestorePhase::BeforeExecution,
            ..
        }
    ));
    let streamed = h
        .executor
        .calls()
        .iter()
        .any(|c| matches!(c.stdin, StdinSource::File(_)));
    assert!(!streamed);
}

#[tokio::test]
async fn test_restore_failure_mid_stream() {
    let h = Harness::new();
    h.running("prod01", 3306).await;
    let dump = h.root().join("manual.sql");
    std::fs::write(&dump, DUMP).unwrap();
    h.executor.on(
        "mysql",
        &["--defaults-extra-file="],
        Reply::fail(1, "ERROR 1064 (42000) at line 2: You have an error in your SQL syntax"),
    );

    let err = h.controller.restore("prod01", &dump).await.unwrap_err();
    assert!(matches!(
        err,
        Error::RestoreFailed {
            phase: RestorePhase::DuringExecution,
            ..
        }
    ));
    assert_eq!(err.kind(), ErrorKind::ExternalTool);
}

#[tokio::test]
async fn test_restore_bare_dump_is_unverified() {
    let h = Harness::new();
    h.running("prod01", 3306).await;
    let dump = h.root().join("manual.sql");
    std::fs::write(&dump, DUMP).unwrap();

    let summary = h.controller.restore("prod01", &dump).await.unwrap();
    assert!(!summary.checksum_verified);
}

#[tokio::test]
async fn test_restore_requires_running() {
    let h = Harness::new();
    h.provision("prod01", 3306).await;
    let dump = h.root().join("manual.sql");
    std::fs::write(&dump, DUMP).unwrap();

    let err = h.controller.restore("prod01", &dump).await.unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_declined_restore_is_aborted() {
    let h = Harness::with_confirm(Arc::new(AssumeNo));
    h.running("prod01", 3306).await;
    let dump = h.root().join("manual.sql");
    std::fs::write(&dump, DUMP).unwrap();

    let err = h.controller.restore("prod01", &dump).await.unwrap_err();
    assert!(matches!(err, Error::Aborted));
    assert_eq!(h.executor.count("mysql"), 0);
}

#[tokio::test]
async fn test_restore_missing_artifact() {
    let h = Harness::new();
    h.running("prod01", 3306).await;

    let err = h
        .controller
        .restore("prod01", &h.root().join("nope"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::RestoreFailed {
            phase: RestorePhase::BeforeExecution,
            ..
        }
    ));
}

#[tokio::test]
async fn test_truncated_dump_is_not_listed() {
    let h = Harness::new();
    h.running("prod01", 3306).await;
    h.executor.on("mysqldump", &[], Reply::ok(DUMP));
    let artifact = h.controller.backup("prod01", None).await.unwrap();
    assert_eq!(h.controller.list_backups("prod01", None).unwrap().len(), 1);

    std::fs::write(artifact.dump_path(), "-- MySQL dump 10.13\n").unwrap();

    assert!(h.controller.list_backups("prod01", None).unwrap().is_empty());
}
