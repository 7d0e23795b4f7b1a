use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite};

use crate::migrations;
use crate::models::{
    BlockWindow, ChainRecord, Evidence, MissedBlock, MissedBlockReason, ResultStatus, Subject,
    ValidationResult,
};
use crate::{from_sql_int, now_millis, to_sql_int, Error, Result};

const DEFAULT_MAX_CONNECTIONS: u32 = 8;

type SubjectLocks = Mutex<HashMap<Subject, Arc<tokio::sync::Mutex<()>>>>;

/// Rewrites the accepted `DB_URL` spellings into one sqlx understands.
///
/// `sqlite+aiosqlite:///rel.db` and `sqlite+aiosqlite:////abs.db` follow the
/// SQLAlchemy convention of three slashes before the path.
pub fn normalize_database_url(url: &str) -> Result<String> {
    let url = url.trim();
    if let Some(path) = url.strip_prefix("sqlite+aiosqlite:///") {
        return Ok(format!("sqlite://{}", path));
    }
    if url.starts_with("sqlite:") {
        return Ok(url.to_string());
    }
    let scheme = url.split(':').next().unwrap_or_default();
    Err(Error::InvalidData(format!(
        "unsupported database url scheme '{}'; only sqlite urls are supported",
        scheme
    )))
}

/// Durable store for chain records, the ingestion ledger, validation results
/// and missed blocks.
pub struct ChainDataStore {
    pool: SqlitePool,
    url: String,
    subject_locks: SubjectLocks,
}

/// A writer's claim on one subject's lock. The map entry goes away with the
/// last claim, so the map only holds subjects being written right now.
struct SubjectLease<'a> {
    locks: &'a SubjectLocks,
    subject: Subject,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for SubjectLease<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // the map and this lease are the only holders left
        let last = locks
            .get(&self.subject)
            .map_or(false, |held| Arc::ptr_eq(held, &self.lock) && Arc::strong_count(held) == 2);
        if last {
            locks.remove(&self.subject);
        }
    }
}

impl ChainDataStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let url = normalize_database_url(url)?;
        let options = SqliteConnectOptions::from_str(&url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;
        Self::from_pool(pool, url).await
    }

    pub async fn create_in_directory(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .map_err(|e| Error::StorageUnavailable(format!("cannot create {}: {}", dir.display(), e)))?;
        Self::connect(&format!("sqlite://{}", dir.join("patrol.db").display())).await
    }

    // one connection, otherwise every pooled connection gets its own empty database
    pub async fn create_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::from_pool(pool, "sqlite::memory:".to_string()).await
    }

    async fn from_pool(pool: SqlitePool, url: String) -> Result<Self> {
        let applied = migrations::migrate(&pool).await?;
        log::debug!("store {} ready, {} migrations applied", url, applied);
        Ok(Self {
            pool,
            url,
            subject_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn migrate(&self) -> Result<usize> {
        migrations::migrate(&self.pool).await
    }

    pub async fn schema_version(&self) -> Result<i64> {
        let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_migrations")
            .fetch_one(&self.pool)
            .await?;
        Ok(version.unwrap_or(0))
    }

    pub fn latest_schema_version() -> i64 {
        migrations::latest_version()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ---- chain records ----

    /// Inserts the record unless its key is already present. Returns whether a row was written.
    pub async fn append(&self, record: &ChainRecord) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        insert_record(&mut conn, record, now_millis()).await
    }

    pub async fn append_all(&self, records: &[ChainRecord]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let now = now_millis();
        let mut inserted = 0;
        for record in records {
            if insert_record(&mut tx, record, now).await? {
                inserted += 1;
            }
        }
        tx.commit().await?;
        Ok(inserted)
    }

    pub async fn mark_ingested(&self, heights: &[u64]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        mark_heights(&mut tx, heights, now_millis()).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Appends `records` and marks `heights` ingested in one transaction, so a
    /// height is never marked without its records.
    pub async fn store_blocks(&self, heights: &[u64], records: &[ChainRecord]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let now = now_millis();
        let mut inserted = 0;
        for record in records {
            if insert_record(&mut tx, record, now).await? {
                inserted += 1;
            }
        }
        mark_heights(&mut tx, heights, now).await?;
        tx.commit().await?;
        Ok(inserted)
    }

    /// Heights in `window` that were never ingested, ascending.
    pub async fn missing_heights(&self, window: BlockWindow) -> Result<Vec<u64>> {
        let rows: Vec<i64> = sqlx::query_scalar(
            "SELECT block_height FROM ingested_blocks WHERE block_height BETWEEN ? AND ? ORDER BY block_height",
        )
        .bind(to_sql_int(window.from())?)
        .bind(to_sql_int(window.to())?)
        .fetch_all(&self.pool)
        .await?;
        let seen = rows
            .into_iter()
            .map(from_sql_int)
            .collect::<Result<BTreeSet<u64>>>()?;
        Ok(window.heights().filter(|h| !seen.contains(h)).collect())
    }

    pub async fn highest_ingested_block(&self) -> Result<Option<u64>> {
        let height: Option<i64> = sqlx::query_scalar("SELECT MAX(block_height) FROM ingested_blocks")
            .fetch_one(&self.pool)
            .await?;
        height.map(from_sql_int).transpose()
    }

    /// Records naming `subject` as source, destination, owner or delegate,
    /// ordered by `(block_height, extrinsic_index)`.
    pub async fn get_records(&self, subject: &Subject, window: BlockWindow) -> Result<Vec<ChainRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM chain_records
             WHERE block_height BETWEEN ? AND ?
               AND (source = ? OR destination = ? OR owner = ? OR delegate = ?)
             ORDER BY block_height, extrinsic_index",
        )
        .bind(to_sql_int(window.from())?)
        .bind(to_sql_int(window.to())?)
        .bind(subject.as_str())
        .bind(subject.as_str())
        .bind(subject.as_str())
        .bind(subject.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(record_from_row).collect()
    }

    pub async fn get_window_records(&self, window: BlockWindow) -> Result<Vec<ChainRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM chain_records WHERE block_height BETWEEN ? AND ? ORDER BY block_height, extrinsic_index",
        )
        .bind(to_sql_int(window.from())?)
        .bind(to_sql_int(window.to())?)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(record_from_row).collect()
    }

    /// Accounts appearing in `window`, most active first, ties broken by address.
    pub async fn recent_subjects(&self, window: BlockWindow, limit: usize) -> Result<Vec<Subject>> {
        let from = to_sql_int(window.from())?;
        let to = to_sql_int(window.to())?;
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT account, COUNT(*) AS activity FROM (
                SELECT source AS account FROM chain_records WHERE block_height BETWEEN ? AND ? AND source IS NOT NULL
                UNION ALL
                SELECT destination FROM chain_records WHERE block_height BETWEEN ? AND ? AND destination IS NOT NULL
                UNION ALL
                SELECT owner FROM chain_records WHERE block_height BETWEEN ? AND ? AND owner IS NOT NULL
             )
             GROUP BY account
             ORDER BY activity DESC, account ASC
             LIMIT ?",
        )
        .bind(from)
        .bind(to)
        .bind(from)
        .bind(to)
        .bind(from)
        .bind(to)
        .bind(to_sql_int(limit as u64)?)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(account, _)| Subject::new(account)).collect())
    }

    /// Deletes records and ingestion marks below `height`. Results are kept.
    pub async fn prune_records_before(&self, height: u64) -> Result<u64> {
        let height = to_sql_int(height)?;
        let mut tx = self.pool.begin().await?;
        let deleted = sqlx::query("DELETE FROM chain_records WHERE block_height < ?")
            .bind(height)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM ingested_blocks WHERE block_height < ?")
            .bind(height)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(deleted)
    }

    // ---- validation results ----

    fn subject_lock(&self, subject: &Subject) -> SubjectLease<'_> {
        let mut locks = self.subject_locks.lock().unwrap_or_else(|e| e.into_inner());
        let lock = locks
            .entry(subject.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        SubjectLease {
            locks: &self.subject_locks,
            subject: subject.clone(),
            lock,
        }
    }

    /// Subjects with a result write in flight or queued.
    pub fn subjects_being_written(&self) -> usize {
        self.subject_locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Persists `result` as the subject's next version and returns that version.
    ///
    /// Writes for one subject are serialized. A result evaluated before the
    /// subject's latest is rejected with `OutOfOrder`, and one citing records
    /// the store does not hold is rejected as invalid.
    pub async fn put_result(&self, result: &ValidationResult) -> Result<u64> {
        let lease = self.subject_lock(&result.subject);
        let _guard = lease.lock.lock().await;

        let mut tx = self.pool.begin().await?;
        let latest: Option<(i64, i64)> = sqlx::query_as(
            "SELECT version, evaluated_at FROM validation_results WHERE subject = ? ORDER BY version DESC LIMIT 1",
        )
        .bind(result.subject.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        if let Some((_, latest_at)) = latest {
            if result.evaluated_at < latest_at {
                return Err(Error::OutOfOrder {
                    subject: result.subject.to_string(),
                    latest: latest_at,
                    attempted: result.evaluated_at,
                });
            }
        }

        for key in result.evidence_keys() {
            let found: Option<i64> = sqlx::query_scalar(
                "SELECT 1 FROM chain_records WHERE block_height = ? AND extrinsic_index = ?",
            )
            .bind(to_sql_int(key.block_height)?)
            .bind(i64::from(key.extrinsic_index))
            .fetch_optional(&mut *tx)
            .await?;
            if found.is_none() {
                return Err(Error::InvalidData(format!(
                    "result for {} cites record {} which is not stored",
                    result.subject, key
                )));
            }
        }

        let version = latest.map(|(v, _)| v + 1).unwrap_or(1);
        sqlx::query(
            "INSERT INTO validation_results
                (subject, version, window_from, window_to, evaluated_at, score, status, evidence, evidence_digest)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(result.subject.as_str())
        .bind(version)
        .bind(to_sql_int(result.window.from())?)
        .bind(to_sql_int(result.window.to())?)
        .bind(result.evaluated_at)
        .bind(result.score)
        .bind(result.status.as_str())
        .bind(serde_json::to_string(&result.evidence)?)
        .bind(result.evidence_digest.as_str())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        from_sql_int(version)
    }

    pub async fn get_latest_result(&self, subject: &Subject) -> Result<Option<ValidationResult>> {
        let row = sqlx::query("SELECT * FROM validation_results WHERE subject = ? ORDER BY version DESC LIMIT 1")
            .bind(subject.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(result_from_row).transpose()
    }

    /// Every version for `subject`, oldest first.
    pub async fn get_result_history(&self, subject: &Subject) -> Result<Vec<ValidationResult>> {
        let rows = sqlx::query("SELECT * FROM validation_results WHERE subject = ? ORDER BY version ASC")
            .bind(subject.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(result_from_row).collect()
    }

    // ---- missed blocks ----

    pub async fn add_missed_blocks(
        &self,
        heights: &[u64],
        reason: MissedBlockReason,
        error_message: Option<&str>,
    ) -> Result<()> {
        if heights.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        let now = now_millis();
        for height in heights {
            sqlx::query(
                "INSERT INTO missed_blocks (id, block_height, created_at, reason, error_message) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(to_sql_int(*height)?)
            .bind(now)
            .bind(reason.as_str())
            .bind(error_message)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        log::warn!("recorded {} missed blocks ({})", heights.len(), reason.as_str());
        Ok(())
    }

    /// Distinct missed heights not ingested since, ascending.
    pub async fn retryable_missed_blocks(&self) -> Result<Vec<u64>> {
        let rows: Vec<i64> = sqlx::query_scalar(
            "SELECT DISTINCT m.block_height FROM missed_blocks m
             WHERE NOT EXISTS (SELECT 1 FROM ingested_blocks i WHERE i.block_height = m.block_height)
             ORDER BY m.block_height",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(from_sql_int).collect()
    }

    pub async fn get_missed_blocks(&self) -> Result<Vec<MissedBlock>> {
        let rows = sqlx::query("SELECT * FROM missed_blocks ORDER BY block_height, created_at")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| -> Result<MissedBlock> {
                Ok(MissedBlock {
                    id: row.try_get("id")?,
                    block_height: from_sql_int(row.try_get("block_height")?)?,
                    created_at: row.try_get("created_at")?,
                    reason: row.try_get::<String, _>("reason")?.parse()?,
                    error_message: row.try_get("error_message")?,
                })
            })
            .collect()
    }

    pub async fn remove_missed_blocks(&self, heights: &[u64]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut removed = 0;
        for height in heights {
            removed += sqlx::query("DELETE FROM missed_blocks WHERE block_height = ?")
                .bind(to_sql_int(*height)?)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(removed)
    }
}

async fn insert_record(conn: &mut sqlx::SqliteConnection, record: &ChainRecord, now: i64) -> Result<bool> {
    let done = sqlx::query::<Sqlite>(
        "INSERT OR IGNORE INTO chain_records
            (block_height, extrinsic_index, timestamp, kind, source, destination, owner, amount, net_uid, delegate, ingested_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(to_sql_int(record.block_height)?)
    .bind(i64::from(record.extrinsic_index))
    .bind(record.timestamp)
    .bind(record.kind.as_str())
    .bind(record.source.as_deref())
    .bind(record.destination.as_deref())
    .bind(record.owner.as_deref())
    .bind(to_sql_int(record.amount)?)
    .bind(record.net_uid.map(i64::from))
    .bind(record.delegate.as_deref())
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(done.rows_affected() == 1)
}

async fn mark_heights(conn: &mut sqlx::SqliteConnection, heights: &[u64], now: i64) -> Result<()> {
    for height in heights {
        sqlx::query("INSERT OR IGNORE INTO ingested_blocks (block_height, ingested_at) VALUES (?, ?)")
            .bind(to_sql_int(*height)?)
            .bind(now)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

fn record_from_row(row: &SqliteRow) -> Result<ChainRecord> {
    let extrinsic_index: i64 = row.try_get("extrinsic_index")?;
    let net_uid: Option<i64> = row.try_get("net_uid")?;
    Ok(ChainRecord {
        block_height: from_sql_int(row.try_get("block_height")?)?,
        extrinsic_index: u32::try_from(extrinsic_index)
            .map_err(|_| Error::InvalidData(format!("extrinsic index {} out of range", extrinsic_index)))?,
        timestamp: row.try_get("timestamp")?,
        kind: row.try_get::<String, _>("kind")?.parse()?,
        source: row.try_get("source")?,
        destination: row.try_get("destination")?,
        owner: row.try_get("owner")?,
        amount: from_sql_int(row.try_get("amount")?)?,
        net_uid: net_uid
            .map(|n| u16::try_from(n).map_err(|_| Error::InvalidData(format!("net uid {} out of range", n))))
            .transpose()?,
        delegate: row.try_get("delegate")?,
    })
}

fn result_from_row(row: &SqliteRow) -> Result<ValidationResult> {
    let evidence: Vec<Evidence> = serde_json::from_str(&row.try_get::<String, _>("evidence")?)?;
    let status: ResultStatus = row.try_get::<String, _>("status")?.parse()?;
    Ok(ValidationResult {
        subject: Subject::new(row.try_get::<String, _>("subject")?),
        window: BlockWindow::new(
            from_sql_int(row.try_get("window_from")?)?,
            from_sql_int(row.try_get("window_to")?)?,
        )?,
        version: from_sql_int(row.try_get("version")?)?,
        evaluated_at: row.try_get("evaluated_at")?,
        score: row.try_get("score")?,
        status,
        evidence,
        evidence_digest: row.try_get("evidence_digest")?,
    })
}
