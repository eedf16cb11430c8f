//! SQLite connection for the local record repository.
//!
//! Opens the database, applies WAL pragmas and brings the schema up to date.
//! The applied schema version is kept in `PRAGMA user_version`.

use crate::Error;
use std::path::Path;
use tokio_rusqlite::Connection;

/// Schema steps in order; step `n` leaves the database at version `n + 1`.
const SCHEMA: &[&str] = &[include_str!("../../migrations/001_apps.sql")];

const PRAGMAS: &str = "PRAGMA journal_mode=WAL;
     PRAGMA synchronous=NORMAL;
     PRAGMA temp_store=MEMORY;
     PRAGMA foreign_keys=ON;";

/// Handle to the local apps database.
///
/// Wraps a tokio-rusqlite Connection that runs statements on a background
/// thread, so clones share one connection.
#[derive(Clone, Debug)]
pub struct AppDb {
    pub(crate) conn: Connection,
}

impl AppDb {
    /// Open a database at `path`, creating the file and its parent
    /// directory when missing.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let conn = Connection::open(path).await.map_err(|e| Error::Database(e.into()))?;
        Self::prepare(conn).await
    }

    /// Open an in-memory database for testing.
    pub async fn open_in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| Error::Database(e.into()))?;
        Self::prepare(conn).await
    }

    async fn prepare(conn: Connection) -> Result<Self, Error> {
        conn.call(|conn| {
            conn.execute_batch(PRAGMAS)?;
            Ok(())
        })
        .await
        .map_err(Error::Database)?;

        migrate(&conn).await?;
        tracing::debug!("apps database ready");

        Ok(Self { conn })
    }
}

async fn migrate(conn: &Connection) -> Result<(), Error> {
    conn.call(|conn| -> Result<(), Error> {
        let applied: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0)).map_err(Error::from)?;
        let applied = usize::try_from(applied).unwrap_or(0);

        for (step, sql) in SCHEMA.iter().enumerate().skip(applied) {
            let version = step as i64 + 1;
            conn.execute_batch(sql)
                .map_err(|e| Error::MigrationFailed(format!("version {version}: {e}")))?;
            conn.execute_batch(&format!("PRAGMA user_version = {version}")).map_err(Error::from)?;
            tracing::info!(version, "applied schema version");
        }
        Ok(())
    })
    .await
    .map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_in_memory() {
        let db = AppDb::open_in_memory().await.unwrap();
        let version = db
            .conn
            .call(|conn| conn.query_row("SELECT sqlite_version()", [], |row| row.get::<_, String>(0)))
            .await
            .unwrap();
        assert!(!version.is_empty());
    }

    #[tokio::test]
    async fn test_schema_applied_once() {
        let db = AppDb::open_in_memory().await.unwrap();
        migrate(&db.conn).await.unwrap();

        let (version, has_apps) = db
            .conn
            .call(|conn| -> Result<(i64, bool), tokio_rusqlite::rusqlite::Error> {
                let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
                let has_apps: bool = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='apps')",
                    [],
                    |row| row.get(0),
                )?;
                Ok((version, has_apps))
            })
            .await
            .unwrap();

        assert_eq!(version, SCHEMA.len() as i64);
        assert!(has_apps);
    }

    #[tokio::test]
    async fn test_reopen_keeps_schema_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("apps.db");
        drop(AppDb::open(&path).await.unwrap());

        let db = AppDb::open(&path).await.unwrap();
        let version = db
            .conn
            .call(|conn| conn.query_row("PRAGMA user_version", [], |row| row.get::<_, i64>(0)))
            .await
            .unwrap();
        assert_eq!(version, SCHEMA.len() as i64);
    }

    #[tokio::test]
    async fn test_open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("apps.db");
        AppDb::open(&path).await.unwrap();
        assert!(path.exists());
    }
}
