//! Storage layer for the activity tracker.
//!
//! Provides persistence for daily aggregates, limit configurations, and
//! warning flags using `rusqlite`.
//!
//! # Thread Safety
//!
//! The [`Database`] type wraps a `rusqlite::Connection`, which is `Send` but not `Sync`.
//! A `Database` instance can be moved between threads but cannot be shared
//! across threads without external synchronization.
//!
//! # Schema
//!
//! Days are stored as TEXT day keys (`YYYY-MM-DD`, local to the
//! configured schedule) and timestamps as ISO 8601 UTC text, so
//! lexicographic ordering matches chronological ordering.
//!
//! Writes to `daily_stats` are commutative upserts: time deltas and
//! visit counts add, `last_seen` takes the maximum. Replaying writes in
//! a different order converges to the same row, which is what lets the
//! engine retry failed credits later without coordination.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;

use dwell_core::{
    AggregateStore, ContextStat, DayKey, LimitConfig, LimitRegistry, RangeEntry, StoreError,
};

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A stored day key failed to parse.
    #[error("invalid day key in row: {0}")]
    DayKeyParse(#[from] dwell_core::InvalidDayKey),
    /// A stored timestamp failed to parse.
    #[error("invalid timestamp in row for {context}: {timestamp}")]
    TimestampParse {
        context: String,
        timestamp: String,
        #[source]
        source: chrono::ParseError,
    },
    /// A stored limit configuration is invalid.
    #[error("invalid limit row for {context}: {source}")]
    InvalidLimit {
        context: String,
        #[source]
        source: dwell_core::ConfigError,
    },
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Sqlite(e) => Self::Unavailable(e.to_string()),
            DbError::DayKeyParse(_) => Self::CorruptRecord {
                day: String::new(),
                context: String::new(),
                message: err.to_string(),
            },
            DbError::TimestampParse {
                ref context,
                ref timestamp,
                ..
            } => Self::CorruptRecord {
                day: String::new(),
                context: context.clone(),
                message: format!("unparseable timestamp {timestamp}"),
            },
            DbError::InvalidLimit { context, source } => Self::CorruptRecord {
                day: String::new(),
                context,
                message: source.to_string(),
            },
        }
    }
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Connection,
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(context: &str, raw: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|source| DbError::TimestampParse {
            context: context.to_string(),
            timestamp: raw.to_string(),
            source,
        })
}

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        tracing::debug!(path = %path.display(), "database opened");
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        self.conn.execute_batch(
            "
            -- Per-day, per-context usage aggregates.
            -- day: local day key, 'YYYY-MM-DD'
            -- last_seen: ISO 8601 UTC timestamp
            CREATE TABLE IF NOT EXISTS daily_stats (
                day TEXT NOT NULL,
                context TEXT NOT NULL,
                total_time_ms INTEGER NOT NULL DEFAULT 0,
                visits INTEGER NOT NULL DEFAULT 0,
                last_seen TEXT NOT NULL,
                PRIMARY KEY (day, context)
            );

            CREATE INDEX IF NOT EXISTS idx_daily_stats_context ON daily_stats(context);

            CREATE TABLE IF NOT EXISTS limits (
                context TEXT PRIMARY KEY,
                daily_limit_ms INTEGER,
                weekly_limit_ms INTEGER,
                enabled INTEGER NOT NULL DEFAULT 1
            );

            -- Warning flags already shown to the user, keyed by day so
            -- stale rows are trivially ignored after a rollover.
            CREATE TABLE IF NOT EXISTS warnings (
                day TEXT NOT NULL,
                context TEXT NOT NULL,
                PRIMARY KEY (day, context)
            );
            ",
        )?;
        Ok(())
    }

    /// Adds `delta_ms` to the aggregate for (`day`, `context`) and
    /// returns the updated row.
    pub fn credit_time(
        &mut self,
        day: DayKey,
        context: &str,
        delta_ms: i64,
        now: DateTime<Utc>,
    ) -> Result<ContextStat, DbError> {
        let now_text = format_ts(now);
        self.conn.execute(
            "
            INSERT INTO daily_stats (day, context, total_time_ms, visits, last_seen)
            VALUES (?1, ?2, MAX(?3, 0), 0, ?4)
            ON CONFLICT (day, context) DO UPDATE SET
                total_time_ms = total_time_ms + MAX(?3, 0),
                last_seen = MAX(last_seen, ?4)
            ",
            params![day.to_string(), context, delta_ms, now_text],
        )?;
        self.get_stat(day, context)?
            .ok_or_else(|| DbError::Sqlite(rusqlite::Error::QueryReturnedNoRows))
    }

    /// Increments the visit count for (`day`, `context`).
    pub fn increment_visit(
        &mut self,
        day: DayKey,
        context: &str,
        now: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let now_text = format_ts(now);
        self.conn.execute(
            "
            INSERT INTO daily_stats (day, context, total_time_ms, visits, last_seen)
            VALUES (?1, ?2, 0, 1, ?3)
            ON CONFLICT (day, context) DO UPDATE SET
                visits = visits + 1,
                last_seen = MAX(last_seen, ?3)
            ",
            params![day.to_string(), context, now_text],
        )?;
        Ok(())
    }

    /// Fetches a single aggregate row, if present.
    pub fn get_stat(&self, day: DayKey, context: &str) -> Result<Option<ContextStat>, DbError> {
        let row = self
            .conn
            .query_row(
                "
                SELECT total_time_ms, visits, last_seen
                FROM daily_stats
                WHERE day = ?1 AND context = ?2
                ",
                params![day.to_string(), context],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;
        match row {
            None => Ok(None),
            Some((total_time_ms, visits, last_seen)) => {
                let last_seen = parse_ts(context, &last_seen)?;
                Ok(Some(ContextStat {
                    total_time_ms,
                    visits,
                    last_seen,
                }))
            }
        }
    }

    /// Lists aggregates over an inclusive day range, optionally for a
    /// single context, ordered by day then context.
    pub fn get_range(
        &self,
        context: Option<&str>,
        first: DayKey,
        last: DayKey,
    ) -> Result<Vec<RangeEntry>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT day, context, total_time_ms, visits, last_seen
            FROM daily_stats
            WHERE day >= ?1 AND day <= ?2 AND (?3 IS NULL OR context = ?3)
            ORDER BY day ASC, context ASC
            ",
        )?;
        let rows = stmt.query_map(
            params![first.to_string(), last.to_string(), context],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                ))
            },
        )?;
        let mut entries = Vec::new();
        for row in rows {
            let (day, context, total_time_ms, visits, last_seen) = row?;
            let day: DayKey = day.parse()?;
            let last_seen = parse_ts(&context, &last_seen)?;
            entries.push(RangeEntry {
                day,
                context,
                stat: ContextStat {
                    total_time_ms,
                    visits,
                    last_seen,
                },
            });
        }
        Ok(entries)
    }

    /// Loads all stored limits into a registry.
    pub fn load_limits(&self) -> Result<LimitRegistry, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT context, daily_limit_ms, weekly_limit_ms, enabled
            FROM limits
            ORDER BY context ASC
            ",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<i64>>(1)?,
                row.get::<_, Option<i64>>(2)?,
                row.get::<_, bool>(3)?,
            ))
        })?;
        let mut registry = LimitRegistry::new();
        for row in rows {
            let (context, daily_limit_ms, weekly_limit_ms, enabled) = row?;
            let config = LimitConfig {
                daily_limit_ms,
                weekly_limit_ms,
                enabled,
            };
            registry
                .set(&context, config)
                .map_err(|source| DbError::InvalidLimit {
                    context: context.clone(),
                    source,
                })?;
        }
        Ok(registry)
    }

    /// Stores or replaces the limit for a context.
    pub fn save_limit(&mut self, context: &str, config: &LimitConfig) -> Result<(), DbError> {
        self.conn.execute(
            "
            INSERT OR REPLACE INTO limits (context, daily_limit_ms, weekly_limit_ms, enabled)
            VALUES (?1, ?2, ?3, ?4)
            ",
            params![
                context,
                config.daily_limit_ms,
                config.weekly_limit_ms,
                config.enabled
            ],
        )?;
        Ok(())
    }

    /// Removes the limit for a context. Returns whether a row existed.
    pub fn remove_limit(&mut self, context: &str) -> Result<bool, DbError> {
        let removed = self
            .conn
            .execute("DELETE FROM limits WHERE context = ?1", params![context])?;
        Ok(removed > 0)
    }

    /// Contexts already warned on the given day, sorted.
    pub fn warned_contexts(&self, day: DayKey) -> Result<Vec<String>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT context FROM warnings WHERE day = ?1 ORDER BY context ASC",
        )?;
        let rows = stmt.query_map(params![day.to_string()], |row| row.get::<_, String>(0))?;
        let mut contexts = Vec::new();
        for row in rows {
            contexts.push(row?);
        }
        Ok(contexts)
    }

    /// Replaces the warning flags for a day with the given set and
    /// drops flags from earlier days.
    pub fn save_warnings(&mut self, day: DayKey, contexts: &[String]) -> Result<(), DbError> {
        let day_text = day.to_string();
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM warnings WHERE day != ?1", params![day_text])?;
        tx.execute("DELETE FROM warnings WHERE day = ?1", params![day_text])?;
        {
            let mut stmt =
                tx.prepare("INSERT INTO warnings (day, context) VALUES (?1, ?2)")?;
            for context in contexts {
                stmt.execute(params![day_text, context])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Deletes aggregates and warning flags for days strictly older
    /// than `cutoff`. Whole day buckets are removed, never partial
    /// rows. Returns the number of aggregate rows deleted.
    pub fn cleanup(&mut self, cutoff: DayKey) -> Result<usize, DbError> {
        let cutoff_text = cutoff.to_string();
        let tx = self.conn.transaction()?;
        let deleted = tx.execute(
            "DELETE FROM daily_stats WHERE day < ?1",
            params![cutoff_text],
        )?;
        tx.execute("DELETE FROM warnings WHERE day < ?1", params![cutoff_text])?;
        tx.commit()?;
        tracing::debug!(%cutoff, deleted, "retention cleanup applied");
        Ok(deleted)
    }
}

impl AggregateStore for Database {
    fn credit_time(
        &mut self,
        day: DayKey,
        context: &str,
        delta_ms: i64,
        now: DateTime<Utc>,
    ) -> Result<ContextStat, StoreError> {
        Self::credit_time(self, day, context, delta_ms, now).map_err(Into::into)
    }

    fn increment_visit(
        &mut self,
        day: DayKey,
        context: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        Self::increment_visit(self, day, context, now).map_err(Into::into)
    }

    fn get_stat(&self, day: DayKey, context: &str) -> Result<Option<ContextStat>, StoreError> {
        Self::get_stat(self, day, context).map_err(Into::into)
    }

    fn get_range(
        &self,
        context: Option<&str>,
        first: DayKey,
        last: DayKey,
    ) -> Result<Vec<RangeEntry>, StoreError> {
        Self::get_range(self, context, first, last).map_err(Into::into)
    }
}
