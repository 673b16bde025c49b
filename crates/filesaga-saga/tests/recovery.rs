//! Crash recovery from journal states left behind by an interrupted process.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use filesaga_core::{
    EngineConfig, FileOperation, OperationRequest, StepCheckpoint, StepStatus, Transaction,
    TransactionStatus,
};
use filesaga_executor::FileSystemStepExecutor;
use filesaga_journal::{FileSystemJournalStore, JournalError, JournalStore, StepUpdate};
use filesaga_saga::{Engine, EngineError, RecoveryRunner};
use tempfile::TempDir;

fn setup() -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("failed to create temp dir");
    let journal_dir = dir.path().join(".journal");
    (dir, journal_dir)
}

fn write(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("failed to create parent");
    }
    fs::write(path, contents).expect("failed to write file");
}

fn mv(from: &Path, to: &Path) -> FileOperation {
    FileOperation::Move {
        source: from.to_path_buf(),
        destination: to.to_path_buf(),
    }
}

fn runner(journal: &Arc<FileSystemJournalStore>) -> RecoveryRunner {
    RecoveryRunner::new(
        journal.clone(),
        Arc::new(FileSystemStepExecutor::new(2, Duration::from_secs(10))),
    )
}

async fn started(journal: &FileSystemJournalStore, operations: Vec<FileOperation>) -> Transaction {
    let txn = Transaction::new(operations);
    journal.begin(&txn).await.expect("begin");
    journal
        .set_status(txn.id, TransactionStatus::Executing)
        .await
        .expect("executing");
    txn
}

#[tokio::test]
async fn executing_entry_with_unrecorded_step_is_rolled_back() -> anyhow::Result<()> {
    let (dir, journal_dir) = setup();
    let journal = Arc::new(FileSystemJournalStore::open(&journal_dir)?);
    let a = dir.path().join("a.txt");
    let b = dir.path().join("b.txt");
    let c = dir.path().join("c.txt");
    let folder = dir.path().join("folder");
    write(&a, "alpha");
    write(&b, "beta");
    write(&c, "gamma");
    let txn = started(
        &journal,
        vec![
            mv(&a, &folder.join("a.txt")),
            mv(&b, &folder.join("b.txt")),
            mv(&c, &folder.join("c.txt")),
        ],
    )
    .await;
    fs::create_dir_all(&folder)?;
    fs::rename(&a, folder.join("a.txt"))?;
    journal
        .record_step_result(txn.id, 0, StepUpdate::applied())
        .await?;
    // Crash after the second rename, before its result was journaled.
    fs::rename(&b, folder.join("b.txt"))?;

    let report = runner(&journal).run().await?;

    assert_eq!(report.recovered.len(), 1);
    let recovered = &report.recovered[0];
    assert_eq!(recovered.found_status, TransactionStatus::Executing);
    assert_eq!(recovered.final_status, TransactionStatus::RolledBack);
    assert_eq!(fs::read_to_string(&a)?, "alpha");
    assert_eq!(fs::read_to_string(&b)?, "beta");
    assert_eq!(fs::read_to_string(&c)?, "gamma");
    assert!(!folder.join("a.txt").exists());
    assert!(!folder.join("b.txt").exists());

    let stored = journal.load(txn.id).await?.expect("entry");
    assert_eq!(stored.status, TransactionStatus::RolledBack);
    assert_eq!(stored.steps[0].status, StepStatus::Reverted);
    assert_eq!(stored.steps[1].status, StepStatus::Failed);
    assert!(stored.steps[1].in_doubt);
    assert_eq!(stored.steps[2].status, StepStatus::Pending);
    Ok(())
}

#[tokio::test]
async fn recovery_twice_changes_nothing_more() -> anyhow::Result<()> {
    let (dir, journal_dir) = setup();
    let journal = Arc::new(FileSystemJournalStore::open(&journal_dir)?);
    let a = dir.path().join("a.txt");
    let moved = dir.path().join("folder/a.txt");
    write(&a, "alpha");
    let txn = started(&journal, vec![mv(&a, &moved)]).await;
    fs::create_dir_all(dir.path().join("folder"))?;
    fs::rename(&a, &moved)?;
    journal
        .record_step_result(txn.id, 0, StepUpdate::applied())
        .await?;

    let first = runner(&journal).run().await?;
    let after_first = fs::read_to_string(&a)?;
    let second = runner(&journal).run().await?;

    assert_eq!(first.recovered.len(), 1);
    assert!(second.is_clean());
    assert_eq!(fs::read_to_string(&a)?, after_first);
    assert!(!moved.exists());
    Ok(())
}

#[tokio::test]
async fn pending_entry_is_closed_without_touching_files() -> anyhow::Result<()> {
    let (dir, journal_dir) = setup();
    let journal = Arc::new(FileSystemJournalStore::open(&journal_dir)?);
    let a = dir.path().join("a.txt");
    write(&a, "alpha");
    let txn = Transaction::new(vec![mv(&a, &dir.path().join("b.txt"))]);
    journal.begin(&txn).await?;

    let report = runner(&journal).run().await?;

    assert_eq!(report.recovered[0].found_status, TransactionStatus::Pending);
    assert!(report.recovered[0].rollback_results.is_empty());
    assert_eq!(
        journal.load(txn.id).await?.expect("entry").status,
        TransactionStatus::RolledBack
    );
    assert_eq!(fs::read_to_string(&a)?, "alpha");
    Ok(())
}

#[tokio::test]
async fn interrupted_rollback_resumes_past_reverted_steps() -> anyhow::Result<()> {
    let (dir, journal_dir) = setup();
    let journal = Arc::new(FileSystemJournalStore::open(&journal_dir)?);
    let a = dir.path().join("a.txt");
    let b = dir.path().join("b.txt");
    let folder = dir.path().join("folder");
    write(&folder.join("a.txt"), "alpha");
    write(&b, "beta");
    let txn = started(
        &journal,
        vec![
            mv(&a, &folder.join("a.txt")),
            mv(&b, &folder.join("b.txt")),
            mv(&dir.path().join("x"), &folder.join("x")),
        ],
    )
    .await;
    journal
        .record_step_result(txn.id, 0, StepUpdate::applied())
        .await?;
    journal
        .record_step_result(txn.id, 1, StepUpdate::applied())
        .await?;
    journal
        .record_step_result(txn.id, 2, StepUpdate::failed("source missing"))
        .await?;
    journal
        .set_status(txn.id, TransactionStatus::RollingBack)
        .await?;
    journal
        .record_step_result(txn.id, 1, StepUpdate::reverted())
        .await?;

    let report = runner(&journal).run().await?;

    let recovered = &report.recovered[0];
    assert_eq!(recovered.found_status, TransactionStatus::RollingBack);
    assert_eq!(recovered.rollback_results.len(), 1);
    assert_eq!(recovered.rollback_results[0].step, 0);
    assert_eq!(fs::read_to_string(&a)?, "alpha");
    assert_eq!(fs::read_to_string(&b)?, "beta");
    Ok(())
}

#[tokio::test]
async fn interrupted_cross_device_move_drops_the_duplicate() -> anyhow::Result<()> {
    let (dir, journal_dir) = setup();
    let journal = Arc::new(FileSystemJournalStore::open(&journal_dir)?);
    let source = dir.path().join("a.txt");
    let destination = dir.path().join("usb/a.txt");
    write(&source, "alpha");
    let txn = started(&journal, vec![mv(&source, &destination)]).await;
    write(&destination, "alpha");
    journal
        .record_checkpoint(txn.id, 0, StepCheckpoint::CopyCompleted)
        .await?;

    let report = runner(&journal).run().await?;

    assert_eq!(
        report.recovered[0].final_status,
        TransactionStatus::RolledBack
    );
    assert_eq!(fs::read_to_string(&source)?, "alpha");
    assert!(!destination.exists());
    Ok(())
}

#[tokio::test]
async fn in_doubt_copy_keeps_a_destination_that_differs() -> anyhow::Result<()> {
    let (dir, journal_dir) = setup();
    let journal = Arc::new(FileSystemJournalStore::open(&journal_dir)?);
    let source = dir.path().join("a.txt");
    let destination = dir.path().join("b.txt");
    write(&source, "alpha");
    write(&destination, "someone else's file");
    started(
        &journal,
        vec![FileOperation::Copy {
            source: source.clone(),
            destination: destination.clone(),
        }],
    )
    .await;

    let report = runner(&journal).run().await?;

    assert_eq!(
        report.recovered[0].final_status,
        TransactionStatus::RolledBack
    );
    assert_eq!(fs::read_to_string(&destination)?, "someone else's file");
    Ok(())
}

#[tokio::test]
async fn unrestorable_move_is_reported_for_manual_attention() -> anyhow::Result<()> {
    let (dir, journal_dir) = setup();
    let journal = Arc::new(FileSystemJournalStore::open(&journal_dir)?);
    let a = dir.path().join("a.txt");
    let moved = dir.path().join("folder/a.txt");
    let txn = started(&journal, vec![mv(&a, &moved)]).await;
    journal
        .record_step_result(txn.id, 0, StepUpdate::applied())
        .await?;
    // The moved file vanished before recovery ran.

    let report = runner(&journal).run().await?;

    assert!(report.needs_attention());
    let recovered = &report.recovered[0];
    assert_eq!(recovered.final_status, TransactionStatus::PartiallyRolledBack);
    assert_eq!(recovered.unreverted.len(), 1);
    assert_eq!(recovered.unreverted[0].original_path, a);
    Ok(())
}

#[tokio::test]
async fn engine_open_recovers_then_prunes() -> anyhow::Result<()> {
    let (dir, journal_dir) = setup();
    let a = dir.path().join("a.txt");
    let moved = dir.path().join("folder/a.txt");
    write(&a, "alpha");
    {
        let journal = FileSystemJournalStore::open(&journal_dir)?;
        let txn = started(&journal, vec![mv(&a, &moved)]).await;
        fs::create_dir_all(dir.path().join("folder"))?;
        fs::rename(&a, &moved)?;
        journal
            .record_step_result(txn.id, 0, StepUpdate::applied())
            .await?;
    }
    let config = EngineConfig::with_journal_dir(&journal_dir).set_retention(Duration::ZERO);

    let (engine, report) = Engine::open(config).await?;

    assert_eq!(report.recovered.len(), 1);
    assert_eq!(report.pruned, 1);
    assert_eq!(fs::read_to_string(&a)?, "alpha");
    assert!(engine.journal().list().await?.is_empty());

    let outcome = engine
        .coordinator()
        .execute(vec![OperationRequest::move_file(&a, &moved)])
        .await;
    assert!(outcome.is_success());
    Ok(())
}

#[tokio::test]
async fn engine_refuses_a_journal_held_by_someone_else() -> anyhow::Result<()> {
    let (_dir, journal_dir) = setup();
    let _held = FileSystemJournalStore::open(&journal_dir)?;

    let result = Engine::open(EngineConfig::with_journal_dir(&journal_dir)).await;

    assert!(matches!(
        result,
        Err(EngineError::Journal(JournalError::Locked { .. }))
    ));
    Ok(())
}
