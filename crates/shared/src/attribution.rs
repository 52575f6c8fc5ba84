//! UTM attribution store
//!
//! Maps a payment contract id to the marketing attribution captured on the
//! first purchase, so that later recurring payments (which carry no UTM data
//! of their own) can be attributed to the same source.
//!
//! Every operation opens its own short-lived SQLite connection and closes it
//! afterwards. SQLite serializes the single-row writes; concurrent `put`s on
//! the same contract id settle to last-writer-wins.

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode};
use sqlx::{ConnectOptions, Connection, FromRow};
use time::OffsetDateTime;

use crate::error::StoreResult;
use crate::timestamp;

/// How long a connection waits on a locked database before giving up
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS utm_metrics (
        contract_id TEXT PRIMARY KEY,
        utm_source TEXT NOT NULL,
        utm_content TEXT,
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    )
"#;

const NORMALIZE_LEGACY_TIMESTAMPS: [&str; 2] = [
    r#"
    UPDATE utm_metrics
    SET created_at = strftime('%Y-%m-%dT%H:%M:%S', created_at) || '.000000Z'
    WHERE length(created_at) = 19 AND substr(created_at, 11, 1) = ' '
    "#,
    r#"
    UPDATE utm_metrics
    SET updated_at = strftime('%Y-%m-%dT%H:%M:%S', updated_at) || '.000000Z'
    WHERE length(updated_at) = 19 AND substr(updated_at, 11, 1) = ' '
    "#,
];

/// Attribution captured for a contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributionRecord {
    pub contract_id: String,
    /// Attribution channel (`utm_source`); doubles as the downstream client id
    pub source: String,
    /// Free-form `utm_content`, empty when the provider sent none
    pub content: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Result of touching a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchOutcome {
    Updated,
    NotFound,
}

#[derive(Debug, FromRow)]
struct AttributionRow {
    contract_id: String,
    utm_source: String,
    utm_content: Option<String>,
    created_at: Option<String>,
    updated_at: Option<String>,
}

impl AttributionRow {
    fn into_record(self) -> StoreResult<AttributionRecord> {
        let created_raw = self.created_at.unwrap_or_default();
        let created_at = timestamp::decode("created_at", &created_raw)?;
        let updated_at = match self.updated_at.as_deref() {
            Some(raw) => timestamp::decode("updated_at", raw)?,
            None => created_at,
        };

        Ok(AttributionRecord {
            contract_id: self.contract_id,
            source: self.utm_source,
            content: self.utm_content.unwrap_or_default(),
            created_at,
            updated_at,
        })
    }
}

/// Durable contract id → attribution mapping backed by a SQLite file
#[derive(Debug, Clone)]
pub struct AttributionStore {
    options: SqliteConnectOptions,
}

impl AttributionStore {
    /// Point the store at a database file. The file is created on first use.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        Self { options }
    }

    async fn connect(&self) -> StoreResult<SqliteConnection> {
        Ok(self.options.connect().await?)
    }

    /// Create the table, or bring an older table up to the current schema.
    ///
    /// Older deployments created `utm_metrics` without `updated_at`. The
    /// column is added in place and back-filled from `created_at`.
    pub async fn migrate(&self) -> StoreResult<()> {
        let mut conn = self.connect().await?;
        let mut tx = conn.begin().await?;

        sqlx::query(CREATE_TABLE).execute(&mut *tx).await?;

        let columns: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM pragma_table_info('utm_metrics')")
                .fetch_all(&mut *tx)
                .await?;

        if !columns.iter().any(|(name,)| name == "updated_at") {
            tracing::info!("Adding updated_at column to utm_metrics table");

            // SQLite rejects non-constant defaults on ALTER TABLE ADD COLUMN
            sqlx::query("ALTER TABLE utm_metrics ADD COLUMN updated_at TIMESTAMP")
                .execute(&mut *tx)
                .await?;

            let backfilled = sqlx::query(
                "UPDATE utm_metrics SET updated_at = created_at WHERE updated_at IS NULL",
            )
            .execute(&mut *tx)
            .await?;

            tracing::info!(
                rows = backfilled.rows_affected(),
                "Back-filled updated_at from created_at"
            );
        }

        // Older deployments wrote `YYYY-MM-DD HH:MM:SS`, which does not sort
        // against the fixed-width layout as text
        let mut normalized = 0;
        for statement in NORMALIZE_LEGACY_TIMESTAMPS {
            normalized += sqlx::query(statement)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        if normalized > 0 {
            tracing::info!(
                values = normalized,
                "Rewrote legacy timestamps in fixed-width layout"
            );
        }

        tx.commit().await?;
        conn.close().await?;

        tracing::info!("Attribution store initialized");
        Ok(())
    }

    /// Insert or fully replace the record for `contract_id`.
    ///
    /// Replacing resets `created_at` as well as `updated_at`.
    pub async fn put(&self, contract_id: &str, source: &str, content: &str) -> StoreResult<()> {
        let now = timestamp::encode(OffsetDateTime::now_utc())?;
        let mut conn = self.connect().await?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO utm_metrics
                (contract_id, utm_source, utm_content, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            "#,
        )
        .bind(contract_id)
        .bind(source)
        .bind(content)
        .bind(&now)
        .execute(&mut conn)
        .await?;

        conn.close().await?;

        Ok(())
    }

    /// Point lookup. A missing row is `Ok(None)`, not an error.
    pub async fn get(&self, contract_id: &str) -> StoreResult<Option<AttributionRecord>> {
        let mut conn = self.connect().await?;

        let row: Option<AttributionRow> = sqlx::query_as(
            r#"
            SELECT contract_id, utm_source, utm_content, created_at, updated_at
            FROM utm_metrics
            WHERE contract_id = ?1
            "#,
        )
        .bind(contract_id)
        .fetch_optional(&mut conn)
        .await?;

        conn.close().await?;

        row.map(AttributionRow::into_record).transpose()
    }

    /// Set `updated_at` to now without touching any other column.
    ///
    /// Never creates a row, and never moves `updated_at` backwards. The
    /// comparison is on `julianday`, so rows in either timestamp layout are
    /// ordered by time rather than by text.
    pub async fn touch(&self, contract_id: &str) -> StoreResult<TouchOutcome> {
        let now = timestamp::encode(OffsetDateTime::now_utc())?;
        let mut conn = self.connect().await?;

        let result = sqlx::query(
            r#"
            UPDATE utm_metrics
            SET updated_at = CASE
                WHEN julianday(updated_at) IS NULL OR julianday(updated_at) < julianday(?1) THEN ?1
                ELSE updated_at
            END
            WHERE contract_id = ?2
            "#,
        )
        .bind(&now)
        .bind(contract_id)
        .execute(&mut conn)
        .await?;

        conn.close().await?;

        if result.rows_affected() == 0 {
            Ok(TouchOutcome::NotFound)
        } else {
            Ok(TouchOutcome::Updated)
        }
    }

    /// Number of stored records
    pub async fn count(&self) -> StoreResult<i64> {
        let mut conn = self.connect().await?;
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM utm_metrics")
            .fetch_one(&mut conn)
            .await?;
        conn.close().await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use tempfile::TempDir;

    async fn setup_store() -> (TempDir, AttributionStore) {
        let dir = TempDir::new().unwrap();
        let store = AttributionStore::open(dir.path().join("utm_metrics.db"));
        store.migrate().await.unwrap();
        (dir, store)
    }

    async fn pause() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let (_dir, store) = setup_store().await;

        store.put("C1", "ads1", "Subscription 3 months").await.unwrap();

        let record = store.get("C1").await.unwrap().unwrap();
        assert_eq!(record.contract_id, "C1");
        assert_eq!(record.source, "ads1");
        assert_eq!(record.content, "Subscription 3 months");
        assert_eq!(record.created_at, record.updated_at);
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let (_dir, store) = setup_store().await;
        assert!(store.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_replaces_existing_record() {
        let (_dir, store) = setup_store().await;

        store.put("C1", "s1", "c1").await.unwrap();
        let first = store.get("C1").await.unwrap().unwrap();

        pause().await;
        store.put("C1", "s2", "c2").await.unwrap();
        let second = store.get("C1").await.unwrap().unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(second.source, "s2");
        assert_eq!(second.content, "c2");
        assert!(
            second.created_at > first.created_at,
            "Replacing must reset created_at"
        );
    }

    #[tokio::test]
    async fn test_touch_only_moves_updated_at() {
        let (_dir, store) = setup_store().await;

        store.put("P1", "ads1", "Subscription 6 months").await.unwrap();
        let before = store.get("P1").await.unwrap().unwrap();

        pause().await;
        let outcome = store.touch("P1").await.unwrap();
        assert_eq!(outcome, TouchOutcome::Updated);

        let after = store.get("P1").await.unwrap().unwrap();
        assert_eq!(after.source, before.source);
        assert_eq!(after.content, before.content);
        assert_eq!(after.created_at, before.created_at);
        assert!(after.updated_at > before.updated_at);
    }

    #[tokio::test]
    async fn test_touch_missing_creates_nothing() {
        let (_dir, store) = setup_store().await;

        let outcome = store.touch("ghost").await.unwrap();
        assert_eq!(outcome, TouchOutcome::NotFound);
        assert!(store.get("ghost").await.unwrap().is_none());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_touch_never_moves_backwards() {
        let (_dir, store) = setup_store().await;
        store.put("P1", "ads1", "").await.unwrap();

        let future = "2999-01-01T00:00:00.000000Z";
        let mut conn = store.connect().await.unwrap();
        sqlx::query("UPDATE utm_metrics SET updated_at = ?1 WHERE contract_id = 'P1'")
            .bind(future)
            .execute(&mut conn)
            .await
            .unwrap();
        conn.close().await.unwrap();

        store.touch("P1").await.unwrap();

        let record = store.get("P1").await.unwrap().unwrap();
        assert_eq!(record.updated_at, timestamp::decode("updated_at", future).unwrap());
    }

    async fn set_raw_timestamps(store: &AttributionStore, contract_id: &str, value: &str) {
        let mut conn = store.connect().await.unwrap();
        sqlx::query("UPDATE utm_metrics SET created_at = ?1, updated_at = ?1 WHERE contract_id = ?2")
            .bind(value)
            .bind(contract_id)
            .execute(&mut conn)
            .await
            .unwrap();
        conn.close().await.unwrap();
    }

    async fn raw_timestamps(store: &AttributionStore, contract_id: &str) -> (String, String) {
        let mut conn = store.connect().await.unwrap();
        let row: (String, String) =
            sqlx::query_as("SELECT created_at, updated_at FROM utm_metrics WHERE contract_id = ?1")
                .bind(contract_id)
                .fetch_one(&mut conn)
                .await
                .unwrap();
        conn.close().await.unwrap();
        row
    }

    fn legacy_layout(ts: OffsetDateTime) -> String {
        let format = time::macros::format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second]"
        );
        ts.format(format).unwrap()
    }

    #[tokio::test]
    async fn test_touch_keeps_later_legacy_timestamp() {
        let (_dir, store) = setup_store().await;
        store.put("P1", "ads1", "").await.unwrap();

        // ' ' sorts below 'T', so a text comparison would overwrite this
        let later = legacy_layout(OffsetDateTime::now_utc() + time::Duration::hours(3));
        set_raw_timestamps(&store, "P1", &later).await;
        let before = store.get("P1").await.unwrap().unwrap();

        assert_eq!(store.touch("P1").await.unwrap(), TouchOutcome::Updated);

        let after = store.get("P1").await.unwrap().unwrap();
        assert_eq!(after.updated_at, before.updated_at);
    }

    #[tokio::test]
    async fn test_touch_advances_earlier_legacy_timestamp() {
        let (_dir, store) = setup_store().await;
        store.put("P1", "ads1", "").await.unwrap();

        let earlier = legacy_layout(OffsetDateTime::now_utc() - time::Duration::hours(3));
        set_raw_timestamps(&store, "P1", &earlier).await;
        let before = store.get("P1").await.unwrap().unwrap();

        store.touch("P1").await.unwrap();

        let after = store.get("P1").await.unwrap().unwrap();
        assert!(after.updated_at > before.updated_at);
    }

    #[tokio::test]
    async fn test_migrate_rewrites_legacy_timestamps() {
        let (_dir, store) = setup_store().await;
        store.put("P1", "ads1", "").await.unwrap();
        set_raw_timestamps(&store, "P1", "2026-10-18 14:51:01").await;

        store.migrate().await.unwrap();

        let (created, updated) = raw_timestamps(&store, "P1").await;
        assert_eq!(created, "2026-10-18T14:51:01.000000Z");
        assert_eq!(updated, "2026-10-18T14:51:01.000000Z");
    }

    #[tokio::test]
    async fn test_concurrent_puts_on_same_id_last_writer_wins() {
        let (_dir, store) = setup_store().await;

        let writes: Vec<(String, String)> = (0..8)
            .map(|i| (format!("src{}", i), format!("Subscription {} months", i)))
            .collect();

        let mut handles = Vec::new();
        for (source, content) in writes.clone() {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.put("C1", &source, &content).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.count().await.unwrap(), 1);
        let record = store.get("C1").await.unwrap().unwrap();
        assert!(
            writes.contains(&(record.source.clone(), record.content.clone())),
            "stored pair {:?} was never written",
            (record.source, record.content)
        );
    }

    #[tokio::test]
    async fn test_migrate_adds_updated_at_to_legacy_table() {
        let dir = TempDir::new().unwrap();
        let store = AttributionStore::open(dir.path().join("legacy.db"));

        let mut conn = store.connect().await.unwrap();
        sqlx::query(
            r#"
            CREATE TABLE utm_metrics (
                contract_id TEXT PRIMARY KEY,
                utm_source TEXT NOT NULL,
                utm_content TEXT,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&mut conn)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO utm_metrics VALUES ('OLD', 'legacy_src', NULL, '2023-05-01 12:00:00')",
        )
        .execute(&mut conn)
        .await
        .unwrap();
        conn.close().await.unwrap();

        store.migrate().await.unwrap();
        // A second run must be a no-op
        store.migrate().await.unwrap();

        let record = store.get("OLD").await.unwrap().unwrap();
        assert_eq!(record.source, "legacy_src");
        assert_eq!(record.content, "");
        assert_eq!(record.updated_at, record.created_at);

        assert_eq!(store.touch("OLD").await.unwrap(), TouchOutcome::Updated);
        let touched = store.get("OLD").await.unwrap().unwrap();
        assert!(touched.updated_at > touched.created_at);
    }

    #[tokio::test]
    async fn test_concurrent_puts_on_distinct_ids() {
        let (_dir, store) = setup_store().await;

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .put(&format!("C{}", i), "ads", "Subscription 1 month")
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.count().await.unwrap(), 8);
    }

    #[tokio::test]
    async fn test_unreachable_location_is_storage_error() {
        let dir = TempDir::new().unwrap();
        let store = AttributionStore::open(dir.path().join("missing").join("utm.db"));

        let err = store.put("C1", "ads", "").await.unwrap_err();
        assert!(matches!(err, StoreError::Database(_)));
    }
}
