use rusqlite::{Connection, params};
use thiserror::Error;

use crate::domain::reading::Point;

pub const LATEST_SCHEMA_VERSION: u32 = 1;

const MIGRATIONS: &[(u32, &str)] = &[(
    1,
    r#"
CREATE TABLE IF NOT EXISTS points (
    series TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    value REAL NOT NULL,
    PRIMARY KEY (series, timestamp)
) WITHOUT ROWID;
"#,
)];

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database operation failed: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("unsupported schema version {current}; latest supported is {latest}")]
    UnsupportedSchemaVersion { current: u32, latest: u32 },
}

/// Durable destination for converted points.
pub trait PointSink {
    /// Stores the batch and returns how many points were written.
    fn write(&mut self, points: &[Point]) -> Result<usize, DbError>;
}

pub fn open_connection(path: &str) -> Result<Connection, DbError> {
    Connection::open(path).map_err(DbError::from)
}

pub fn run_migrations(connection: &mut Connection) -> Result<(), DbError> {
    let current_version = schema_version(connection)?;

    if current_version > LATEST_SCHEMA_VERSION {
        return Err(DbError::UnsupportedSchemaVersion {
            current: current_version,
            latest: LATEST_SCHEMA_VERSION,
        });
    }

    let transaction = connection.transaction()?;

    for (version, sql) in MIGRATIONS {
        if *version > current_version {
            transaction.execute_batch(sql)?;
            transaction.pragma_update(None, "user_version", version)?;
        }
    }

    transaction.commit()?;

    Ok(())
}

pub fn schema_version(connection: &Connection) -> Result<u32, DbError> {
    let version = connection.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

/// Writes the batch in one transaction. A point whose `(series, timestamp)`
/// already exists replaces the stored value, so overlapping windows never
/// produce duplicates.
pub fn upsert_points(connection: &mut Connection, points: &[Point]) -> Result<usize, DbError> {
    let transaction = connection.transaction()?;

    {
        let mut statement = transaction.prepare(
            "INSERT INTO points (series, timestamp, value) VALUES (?1, ?2, ?3)
             ON CONFLICT (series, timestamp) DO UPDATE SET value = excluded.value",
        )?;
        for point in points {
            statement.execute(params![point.series, point.timestamp, point.value])?;
        }
    }

    transaction.commit()?;

    Ok(points.len())
}

#[cfg(test)]
pub fn list_points(
    connection: &Connection,
    series: &str,
    limit: u32,
) -> Result<Vec<Point>, DbError> {
    let mut statement = connection.prepare(
        "SELECT series, timestamp, value
         FROM points
         WHERE series = ?1
         ORDER BY timestamp ASC
         LIMIT ?2",
    )?;

    let rows = statement.query_map(params![series, i64::from(limit)], |row| {
        Ok(Point {
            series: row.get(0)?,
            timestamp: row.get(1)?,
            value: row.get(2)?,
        })
    })?;

    let mut points = Vec::new();
    for row in rows {
        points.push(row?);
    }

    Ok(points)
}

pub fn count_points(connection: &Connection) -> Result<i64, DbError> {
    let count = connection.query_row("SELECT COUNT(*) FROM points", [], |row| row.get(0))?;
    Ok(count)
}

pub struct SqlitePointSink {
    connection: Connection,
}

impl SqlitePointSink {
    pub fn open(path: &str) -> Result<Self, DbError> {
        let mut connection = open_connection(path)?;
        run_migrations(&mut connection)?;
        Ok(Self { connection })
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}

impl PointSink for SqlitePointSink {
    fn write(&mut self, points: &[Point]) -> Result<usize, DbError> {
        upsert_points(&mut self.connection, points)
    }
}
