use sqlx::SqlitePool;

use crate::{now_millis, Result};

pub(crate) struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub statements: &'static [&'static str],
}

pub(crate) const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_chain_records",
        statements: &[
            "CREATE TABLE IF NOT EXISTS chain_records (
                block_height INTEGER NOT NULL,
                extrinsic_index INTEGER NOT NULL,
                timestamp INTEGER NOT NULL,
                kind TEXT NOT NULL,
                source TEXT,
                destination TEXT,
                owner TEXT,
                amount INTEGER NOT NULL,
                net_uid INTEGER,
                delegate TEXT,
                ingested_at INTEGER NOT NULL,
                PRIMARY KEY (block_height, extrinsic_index)
            )",
            "CREATE INDEX IF NOT EXISTS idx_chain_records_source ON chain_records (source, block_height)",
            "CREATE INDEX IF NOT EXISTS idx_chain_records_destination ON chain_records (destination, block_height)",
            "CREATE INDEX IF NOT EXISTS idx_chain_records_owner ON chain_records (owner, block_height)",
        ],
    },
    Migration {
        version: 2,
        name: "create_ingested_blocks",
        statements: &["CREATE TABLE IF NOT EXISTS ingested_blocks (
                block_height INTEGER PRIMARY KEY,
                ingested_at INTEGER NOT NULL
            )"],
    },
    Migration {
        version: 3,
        name: "create_validation_results",
        statements: &["CREATE TABLE IF NOT EXISTS validation_results (
                subject TEXT NOT NULL,
                version INTEGER NOT NULL,
                window_from INTEGER NOT NULL,
                window_to INTEGER NOT NULL,
                evaluated_at INTEGER NOT NULL,
                score REAL NOT NULL,
                status TEXT NOT NULL,
                evidence TEXT NOT NULL,
                evidence_digest TEXT NOT NULL,
                PRIMARY KEY (subject, version)
            )"],
    },
    Migration {
        version: 4,
        name: "create_missed_blocks",
        statements: &[
            "CREATE TABLE IF NOT EXISTS missed_blocks (
                id TEXT PRIMARY KEY,
                block_height INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                reason TEXT NOT NULL,
                error_message TEXT
            )",
            "CREATE INDEX IF NOT EXISTS idx_missed_blocks_height ON missed_blocks (block_height)",
        ],
    },
    Migration {
        version: 5,
        name: "index_chain_records_delegate",
        statements: &["CREATE INDEX IF NOT EXISTS idx_chain_records_delegate ON chain_records (delegate, block_height)"],
    },
];

/// Applies every migration not yet recorded in `schema_migrations`, in order.
/// Returns how many ran.
pub(crate) async fn migrate(pool: &SqlitePool) -> Result<usize> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    let mut applied = 0;
    for migration in MIGRATIONS {
        let mut tx = pool.begin().await?;
        let done: Option<i64> = sqlx::query_scalar("SELECT version FROM schema_migrations WHERE version = ?")
            .bind(migration.version)
            .fetch_optional(&mut *tx)
            .await?;
        if done.is_some() {
            continue;
        }
        for statement in migration.statements {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        sqlx::query("INSERT INTO schema_migrations (version, name, applied_at) VALUES (?, ?, ?)")
            .bind(migration.version)
            .bind(migration.name)
            .bind(now_millis())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        log::info!("applied migration {} {}", migration.version, migration.name);
        applied += 1;
    }
    Ok(applied)
}

pub(crate) fn latest_version() -> i64 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}
