//! SQLite-based reading storage.
//!
//! `SqliteReadingStore` keeps a single connection behind a mutex and runs every
//! statement on the blocking pool, so async callers never block the runtime.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::model::{Reading, ReadingDraft};
use crate::store::{ReadingStore, StoreError, StoreResult};

const SELECT_READINGS: &str =
    "SELECT id, city, temperature, wind_speed, created_at FROM readings";

/// SQLite-based reading storage.
#[derive(Clone)]
pub struct SqliteReadingStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteReadingStore {
    /// Open (or create) a store at the given path.
    ///
    /// Creates the database file and schema if they don't exist.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Create an in-memory store. Contents are lost on drop.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> StoreResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS readings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                city TEXT NOT NULL,
                temperature REAL NOT NULL,
                wind_speed REAL NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_readings_city ON readings(city);
            "#,
        )?;
        Ok(())
    }

    /// Convert a database row to a Reading.
    fn row_to_reading(row: &rusqlite::Row) -> rusqlite::Result<Reading> {
        let created_at_str: String = row.get(4)?;
        let created_at = DateTime::parse_from_rfc3339(&created_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    4,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?;

        Ok(Reading {
            id: row.get(0)?,
            city: row.get(1)?,
            temperature: row.get(2)?,
            wind_speed: row.get(3)?,
            created_at,
        })
    }

    fn insert(conn: &Connection, draft: &ReadingDraft) -> StoreResult<Reading> {
        draft.validate()?;

        let created_at = Utc::now();
        conn.execute(
            "INSERT INTO readings (city, temperature, wind_speed, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                draft.city,
                draft.temperature,
                draft.wind_speed,
                created_at.to_rfc3339()
            ],
        )?;

        Ok(Reading {
            id: conn.last_insert_rowid(),
            city: draft.city.clone(),
            temperature: draft.temperature,
            wind_speed: draft.wind_speed,
            created_at,
        })
    }

    /// Run `op` against the connection on the blocking pool.
    async fn run<T, F>(&self, op: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || op(&*conn.lock()))
            .await
            .map_err(|e| StoreError::storage(format!("store task failed: {}", e)))?
    }

    /// Get a reading by ID.
    ///
    /// Returns `None` if the reading doesn't exist.
    pub async fn get(&self, id: i64) -> StoreResult<Option<Reading>> {
        self.run(move |conn| {
            let sql = format!("{} WHERE id = ?1", SELECT_READINGS);
            conn.query_row(&sql, params![id], Self::row_to_reading)
                .optional()
                .map_err(StoreError::from)
        })
        .await
    }

    /// List all readings in creation order.
    pub async fn list(&self) -> StoreResult<Vec<Reading>> {
        self.run(|conn| {
            let sql = format!("{} ORDER BY id", SELECT_READINGS);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], Self::row_to_reading)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
        })
        .await
    }

    /// Get the reading count.
    pub async fn count(&self) -> StoreResult<usize> {
        self.run(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM readings", [], |row| row.get(0))?;
            Ok(count as usize)
        })
        .await
    }
}

#[async_trait]
impl ReadingStore for SqliteReadingStore {
    async fn create(&self, draft: ReadingDraft) -> StoreResult<Reading> {
        let reading = self.run(move |conn| Self::insert(conn, &draft)).await?;
        tracing::debug!("Stored reading {} for {}", reading.id, reading.city);
        Ok(reading)
    }
}
