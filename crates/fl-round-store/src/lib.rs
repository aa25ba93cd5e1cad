//! Durable, queryable log of completed rounds.
//!
//! Connection pooling, migration-on-connect, and typed query methods over
//! an embedded SQLite file, so the whole Round Store lives in one
//! directory and survives a process restart without an external database
//! server.

use fl_common::round::{ClientCounts, Durations, RoundRecord, RoundStatus};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("invalid stored round status: {0}")]
    InvalidStatus(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Filters applied (AND-composed) when querying round history.
#[derive(Debug, Clone, Default)]
pub struct RoundFilter {
    pub start_round: Option<u64>,
    pub end_round: Option<u64>,
    pub min_accuracy: Option<f64>,
    pub max_accuracy: Option<f64>,
}

/// The round store. Safe to clone and share across tasks: `SqlitePool`
/// already pools connections and every write is a single atomic
/// upsert statement, so readers never observe a partially-written record.
#[derive(Debug, Clone)]
pub struct RoundStore {
    pool: SqlitePool,
}

impl RoundStore {
    /// Open (creating if necessary) a round store under `storage_dir`.
    pub async fn open(storage_dir: &str) -> StoreResult<Self> {
        tokio::fs::create_dir_all(storage_dir).await.ok();
        let db_path = Path::new(storage_dir).join("rounds.sqlite3");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rounds (
                round_number        INTEGER PRIMARY KEY,
                status              TEXT NOT NULL,
                timestamp           TEXT NOT NULL,
                accuracy            REAL NOT NULL,
                loss                REAL NOT NULL,
                model_size_bytes    INTEGER NOT NULL,
                duration_total      REAL NOT NULL,
                duration_aggregation REAL NOT NULL,
                duration_evaluation REAL NOT NULL,
                duration_avg_client_train REAL NOT NULL,
                duration_avg_client_eval  REAL NOT NULL,
                clients_successful  INTEGER NOT NULL,
                clients_failed      INTEGER NOT NULL,
                clients_total       INTEGER NOT NULL,
                raw_metrics         TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        info!(path = %db_path.display(), "round store opened");
        Ok(Self { pool })
    }

    /// Open an in-memory store, useful for tests that don't care about
    /// restart survival.
    #[cfg(any(test, feature = "test-util"))]
    pub async fn open_in_memory() -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        sqlx::query(
            r#"
            CREATE TABLE rounds (
                round_number        INTEGER PRIMARY KEY,
                status              TEXT NOT NULL,
                timestamp           TEXT NOT NULL,
                accuracy            REAL NOT NULL,
                loss                REAL NOT NULL,
                model_size_bytes    INTEGER NOT NULL,
                duration_total      REAL NOT NULL,
                duration_aggregation REAL NOT NULL,
                duration_evaluation REAL NOT NULL,
                duration_avg_client_train REAL NOT NULL,
                duration_avg_client_eval  REAL NOT NULL,
                clients_successful  INTEGER NOT NULL,
                clients_failed      INTEGER NOT NULL,
                clients_total       INTEGER NOT NULL,
                raw_metrics         TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    /// Upsert by `round_number`; a repeated write with the same number
    /// replaces the prior record rather than duplicating it.
    pub async fn store(&self, record: &RoundRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO rounds (
                round_number, status, timestamp, accuracy, loss, model_size_bytes,
                duration_total, duration_aggregation, duration_evaluation,
                duration_avg_client_train, duration_avg_client_eval,
                clients_successful, clients_failed, clients_total, raw_metrics
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(round_number) DO UPDATE SET
                status = excluded.status,
                timestamp = excluded.timestamp,
                accuracy = excluded.accuracy,
                loss = excluded.loss,
                model_size_bytes = excluded.model_size_bytes,
                duration_total = excluded.duration_total,
                duration_aggregation = excluded.duration_aggregation,
                duration_evaluation = excluded.duration_evaluation,
                duration_avg_client_train = excluded.duration_avg_client_train,
                duration_avg_client_eval = excluded.duration_avg_client_eval,
                clients_successful = excluded.clients_successful,
                clients_failed = excluded.clients_failed,
                clients_total = excluded.clients_total,
                raw_metrics = excluded.raw_metrics
            "#,
        )
        .bind(record.round_number as i64)
        .bind(record.status.as_str())
        .bind(record.timestamp.to_rfc3339())
        .bind(record.accuracy)
        .bind(record.loss)
        .bind(record.model_size_bytes as i64)
        .bind(record.durations.total)
        .bind(record.durations.aggregation)
        .bind(record.durations.evaluation)
        .bind(record.durations.avg_client_train)
        .bind(record.durations.avg_client_eval)
        .bind(record.client_counts.successful as i64)
        .bind(record.client_counts.failed as i64)
        .bind(record.client_counts.total as i64)
        .bind(record.raw_metrics.to_string())
        .execute(&self.pool)
        .await?;

        debug!(round_number = record.round_number, status = record.status.as_str(), "round record stored");
        Ok(())
    }

    /// Ascending-round-number history matching `filter`, capped at `limit`
    /// and offset by `offset`. The control API is responsible for capping
    /// `limit` at 10,000 before calling through.
    pub async fn range(
        &self,
        filter: &RoundFilter,
        limit: u32,
        offset: u32,
    ) -> StoreResult<Vec<RoundRecord>> {
        let (clause, binds) = filter.to_where_clause();
        let sql = format!(
            "SELECT * FROM rounds {clause} ORDER BY round_number ASC LIMIT ? OFFSET ?"
        );
        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = bind.apply(query);
        }
        query = query.bind(limit as i64).bind(offset as i64);

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_record).collect()
    }

    /// Total count of rounds matching `filter`, for pagination.
    pub async fn count(&self, filter: &RoundFilter) -> StoreResult<u64> {
        let (clause, binds) = filter.to_where_clause();
        let sql = format!("SELECT COUNT(*) as n FROM rounds {clause}");
        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = bind.apply(query);
        }
        let row = query.fetch_one(&self.pool).await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as u64)
    }

    /// Highest stored `round_number`, or 0 if the store is empty.
    pub async fn latest_number(&self) -> StoreResult<u64> {
        let row = sqlx::query("SELECT COALESCE(MAX(round_number), 0) as n FROM rounds")
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as u64)
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> StoreResult<RoundRecord> {
        let status_str: String = row.try_get("status")?;
        let status = RoundStatus::parse(&status_str)
            .ok_or_else(|| StoreError::InvalidStatus(status_str.clone()))?;
        let timestamp_str: String = row.try_get("timestamp")?;
        let timestamp = chrono::DateTime::parse_from_rfc3339(&timestamp_str)
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .unwrap_or_else(|_| chrono::Utc::now());
        let raw_metrics_str: String = row.try_get("raw_metrics")?;
        let raw_metrics =
            serde_json::from_str(&raw_metrics_str).unwrap_or(serde_json::Value::Null);

        Ok(RoundRecord {
            round_number: row.try_get::<i64, _>("round_number")? as u64,
            status,
            timestamp,
            accuracy: row.try_get("accuracy")?,
            loss: row.try_get("loss")?,
            model_size_bytes: row.try_get::<i64, _>("model_size_bytes")? as u64,
            durations: Durations {
                total: row.try_get("duration_total")?,
                aggregation: row.try_get("duration_aggregation")?,
                evaluation: row.try_get("duration_evaluation")?,
                avg_client_train: row.try_get("duration_avg_client_train")?,
                avg_client_eval: row.try_get("duration_avg_client_eval")?,
            },
            client_counts: ClientCounts {
                successful: row.try_get::<i64, _>("clients_successful")? as u32,
                failed: row.try_get::<i64, _>("clients_failed")? as u32,
                total: row.try_get::<i64, _>("clients_total")? as u32,
            },
            raw_metrics,
        })
    }
}

enum Bind {
    I64(i64),
    F64(f64),
}

impl Bind {
    fn apply<'a>(
        &'a self,
        query: sqlx::query::Query<'a, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'a>>,
    ) -> sqlx::query::Query<'a, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'a>> {
        match self {
            Bind::I64(v) => query.bind(*v),
            Bind::F64(v) => query.bind(*v),
        }
    }
}

impl RoundFilter {
    fn to_where_clause(&self) -> (String, Vec<Bind>) {
        let mut clauses = Vec::new();
        let mut binds = Vec::new();

        if let Some(start) = self.start_round {
            clauses.push("round_number >= ?".to_string());
            binds.push(Bind::I64(start as i64));
        }
        if let Some(end) = self.end_round {
            clauses.push("round_number <= ?".to_string());
            binds.push(Bind::I64(end as i64));
        }
        if let Some(min_acc) = self.min_accuracy {
            clauses.push("accuracy >= ?".to_string());
            binds.push(Bind::F64(min_acc));
        }
        if let Some(max_acc) = self.max_accuracy {
            clauses.push("accuracy <= ?".to_string());
            binds.push(Bind::F64(max_acc));
        }

        if clauses.is_empty() {
            (String::new(), binds)
        } else {
            (format!("WHERE {}", clauses.join(" AND ")), binds)
        }
    }
}
