use std::sync::Arc;

use anyhow::Result;
use patrol_chain_data::models::{
    BlockWindow, ChainRecord, CheckKind, Evidence, MissedBlockReason, RecordKey, ResultStatus, Subject,
    ValidationResult,
};
use patrol_chain_data::{normalize_database_url, ChainDataStore, Error};

fn result_at(subject: &str, evaluated_at: i64, evidence: Vec<RecordKey>) -> ValidationResult {
    ValidationResult::new(
        Subject::new(subject),
        BlockWindow::new(1, 10).unwrap(),
        evaluated_at,
        0.25,
        ResultStatus::Valid,
        vec![Evidence {
            check: CheckKind::Velocity,
            score: 0.25,
            records: evidence,
            detail: String::new(),
        }],
    )
    .unwrap()
}

#[tokio::test]
async fn test_append_is_idempotent() -> Result<()> {
    let store = ChainDataStore::create_in_memory().await?;
    let record = ChainRecord::transfer(5, 1, 1_000, "alice", "bob", 10);

    assert!(store.append(&record).await?);
    assert!(!store.append(&record).await?);

    let mut changed = record.clone();
    changed.amount = 99;
    assert!(!store.append(&changed).await?);

    let window = BlockWindow::new(0, 10)?;
    let records = store.get_records(&Subject::new("alice"), window).await?;
    assert_eq!(records, vec![record]);
    Ok(())
}

#[tokio::test]
async fn test_get_records_ordered_and_filtered() -> Result<()> {
    let store = ChainDataStore::create_in_memory().await?;
    store
        .append_all(&[
            ChainRecord::transfer(7, 2, 0, "alice", "carol", 1),
            ChainRecord::transfer(3, 0, 0, "bob", "alice", 2),
            ChainRecord::transfer(7, 0, 0, "dave", "erin", 3),
            ChainRecord::stake_added(7, 1, 0, "alice", "hot", 81, 4),
            ChainRecord::transfer(20, 0, 0, "alice", "bob", 5),
        ])
        .await?;

    let records = store
        .get_records(&Subject::new("alice"), BlockWindow::new(0, 10)?)
        .await?;
    let keys: Vec<_> = records.iter().map(|r| (r.block_height, r.extrinsic_index)).collect();
    assert_eq!(keys, vec![(3, 0), (7, 1), (7, 2)]);

    let by_delegate = store.get_records(&Subject::new("hot"), BlockWindow::new(0, 10)?).await?;
    assert_eq!(by_delegate.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_ingestion_ledger() -> Result<()> {
    let store = ChainDataStore::create_in_memory().await?;
    let window = BlockWindow::new(10, 14)?;
    assert_eq!(store.missing_heights(window).await?, vec![10, 11, 12, 13, 14]);
    assert_eq!(store.highest_ingested_block().await?, None);

    // block 11 is seen but empty; it must not count as missing
    store
        .store_blocks(&[10, 11, 12], &[ChainRecord::transfer(10, 0, 0, "a", "b", 1)])
        .await?;
    assert_eq!(store.missing_heights(window).await?, vec![13, 14]);
    assert_eq!(store.highest_ingested_block().await?, Some(12));

    store.mark_ingested(&[13, 14]).await?;
    assert!(store.missing_heights(window).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_result_versions_increase() -> Result<()> {
    let store = ChainDataStore::create_in_memory().await?;
    store.append(&ChainRecord::transfer(2, 0, 0, "acct", "b", 1)).await?;
    let key = RecordKey { block_height: 2, extrinsic_index: 0 };

    assert_eq!(store.put_result(&result_at("acct", 100, vec![key])).await?, 1);
    assert_eq!(store.put_result(&result_at("acct", 100, vec![key])).await?, 2);
    assert_eq!(store.put_result(&result_at("acct", 200, vec![])).await?, 3);
    assert_eq!(store.put_result(&result_at("other", 50, vec![])).await?, 1);

    let latest = store.get_latest_result(&Subject::new("acct")).await?.unwrap();
    assert_eq!(latest.version, 3);
    assert_eq!(latest.evaluated_at, 200);
    assert!(latest.verify_digest());

    let history = store.get_result_history(&Subject::new("acct")).await?;
    let versions: Vec<u64> = history.iter().map(|r| r.version).collect();
    assert_eq!(versions, vec![1, 2, 3]);
    assert_eq!(history[0].evidence[0].records, vec![key]);
    Ok(())
}

#[tokio::test]
async fn test_out_of_order_result_rejected() -> Result<()> {
    let store = ChainDataStore::create_in_memory().await?;
    store.put_result(&result_at("acct", 500, vec![])).await?;

    match store.put_result(&result_at("acct", 400, vec![])).await {
        Err(Error::OutOfOrder { latest, attempted, .. }) => {
            assert_eq!(latest, 500);
            assert_eq!(attempted, 400);
        }
        other => panic!("expected OutOfOrder, got {:?}", other),
    }
    assert_eq!(store.get_result_history(&Subject::new("acct")).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_result_citing_unknown_record_rejected() -> Result<()> {
    let store = ChainDataStore::create_in_memory().await?;
    let ghost = RecordKey { block_height: 99, extrinsic_index: 0 };
    assert!(matches!(
        store.put_result(&result_at("acct", 1, vec![ghost])).await,
        Err(Error::InvalidData(_))
    ));
    assert!(store.get_latest_result(&Subject::new("acct")).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_concurrent_writers_get_distinct_versions() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = Arc::new(ChainDataStore::create_in_directory(dir.path()).await?);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.put_result(&result_at("acct", 1_000, vec![])).await
        }));
    }
    let mut versions = Vec::new();
    for handle in handles {
        versions.push(handle.await??);
    }
    versions.sort();
    assert_eq!(versions, (1..=8).collect::<Vec<u64>>());
    assert_eq!(store.subjects_being_written(), 0);
    Ok(())
}

#[tokio::test]
async fn test_subject_locks_do_not_accumulate() -> Result<()> {
    let store = ChainDataStore::create_in_memory().await?;
    for i in 0..50 {
        store.put_result(&result_at(&format!("acct-{}", i), 1, vec![])).await?;
    }
    assert_eq!(store.subjects_being_written(), 0);

    // rejected writes release their lock too
    assert!(store.put_result(&result_at("acct-0", 0, vec![])).await.is_err());
    let ghost = RecordKey { block_height: 9, extrinsic_index: 9 };
    assert!(store.put_result(&result_at("acct-1", 5, vec![ghost])).await.is_err());
    assert_eq!(store.subjects_being_written(), 0);
    Ok(())
}

#[tokio::test]
async fn test_recent_subjects_ordered_by_activity() -> Result<()> {
    let store = ChainDataStore::create_in_memory().await?;
    store
        .append_all(&[
            ChainRecord::transfer(1, 0, 0, "alice", "bob", 1),
            ChainRecord::transfer(2, 0, 0, "alice", "carol", 1),
            ChainRecord::transfer(3, 0, 0, "bob", "alice", 1),
            ChainRecord::transfer(50, 0, 0, "zed", "zed2", 1),
        ])
        .await?;
    let subjects = store.recent_subjects(BlockWindow::new(0, 10)?, 2).await?;
    assert_eq!(subjects, vec![Subject::new("alice"), Subject::new("bob")]);
    Ok(())
}

#[tokio::test]
async fn test_missed_block_ledger() -> Result<()> {
    let store = ChainDataStore::create_in_memory().await?;
    store
        .add_missed_blocks(&[5, 6], MissedBlockReason::Unavailable, Some("timeout"))
        .await?;
    store.add_missed_blocks(&[6, 9], MissedBlockReason::Gap, None).await?;
    assert_eq!(store.get_missed_blocks().await?.len(), 4);
    assert_eq!(store.retryable_missed_blocks().await?, vec![5, 6, 9]);

    // ingested since it was missed
    store.mark_ingested(&[9]).await?;
    assert_eq!(store.retryable_missed_blocks().await?, vec![5, 6]);

    assert_eq!(store.remove_missed_blocks(&[6]).await?, 2);
    assert_eq!(store.retryable_missed_blocks().await?, vec![5]);
    Ok(())
}

#[tokio::test]
async fn test_prune_keeps_results() -> Result<()> {
    let store = ChainDataStore::create_in_memory().await?;
    store
        .store_blocks(
            &[1, 2, 3],
            &[
                ChainRecord::transfer(1, 0, 0, "a", "b", 1),
                ChainRecord::transfer(3, 0, 0, "a", "b", 1),
            ],
        )
        .await?;
    store.put_result(&result_at("a", 1, vec![RecordKey { block_height: 1, extrinsic_index: 0 }])).await?;

    assert_eq!(store.prune_records_before(3).await?, 1);
    assert_eq!(store.missing_heights(BlockWindow::new(1, 3)?).await?, vec![1, 2]);
    assert_eq!(store.get_result_history(&Subject::new("a")).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_migrations_are_idempotent() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = ChainDataStore::create_in_directory(dir.path()).await?;
    assert_eq!(store.schema_version().await?, ChainDataStore::latest_schema_version());
    assert_eq!(store.migrate().await?, 0);
    store.append(&ChainRecord::transfer(1, 0, 0, "a", "b", 1)).await?;
    store.close().await;

    let reopened = ChainDataStore::create_in_directory(dir.path()).await?;
    assert_eq!(reopened.migrate().await?, 0);
    let records = reopened.get_records(&Subject::new("a"), BlockWindow::new(0, 5)?).await?;
    assert_eq!(records.len(), 1);
    Ok(())
}

#[test]
fn test_database_url_normalization() {
    assert_eq!(normalize_database_url("sqlite+aiosqlite:///patrol.db").unwrap(), "sqlite://patrol.db");
    assert_eq!(
        normalize_database_url("sqlite+aiosqlite:////var/lib/patrol.db").unwrap(),
        "sqlite:///var/lib/patrol.db"
    );
    assert_eq!(normalize_database_url("sqlite::memory:").unwrap(), "sqlite::memory:");
    assert!(normalize_database_url("postgresql://localhost/patrol").is_err());
}
