pub mod models;
pub mod queries;

use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::TrackId;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration failed: {0}")]
    Migration(String),
    #[error("Track {0} not found")]
    TrackNotFound(TrackId),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// How long a writer waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Schema version written to `PRAGMA user_version`.
const SCHEMA_VERSION: i32 = 1;

/// Published tracks and the votes cast on them.
pub struct Database {
    pub conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn.busy_timeout(BUSY_TIMEOUT)?;
        // WAL lets the leaderboard read while a vote is being written
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        self.migrate()?;
        Ok(())
    }

    fn migrate(&self) -> Result<()> {
        let version: i32 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if version > SCHEMA_VERSION {
            return Err(DbError::Migration(format!(
                "database schema v{version} is newer than supported v{SCHEMA_VERSION}"
            )));
        }
        if version == SCHEMA_VERSION {
            return Ok(());
        }
        if version < 1 {
            self.migrate_v1()?;
        }

        self.conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        log::info!("Migrated database schema v{} -> v{}", version, SCHEMA_VERSION);
        Ok(())
    }

    /// V1: tracks + votes. `likes` caches the number of vote rows per track.
    fn migrate_v1(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS tracks (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_user_id   INTEGER NOT NULL,
                audio_ref       TEXT NOT NULL,
                title           TEXT,
                likes           INTEGER NOT NULL DEFAULT 0 CHECK (likes >= 0),
                created_at      TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_tracks_rank ON tracks(likes DESC, created_at DESC);
            CREATE INDEX IF NOT EXISTS idx_tracks_owner ON tracks(owner_user_id);

            CREATE TABLE IF NOT EXISTS votes (
                user_id     INTEGER NOT NULL,
                track_id    INTEGER NOT NULL REFERENCES tracks(id) ON DELETE CASCADE,
                created_at  TEXT NOT NULL,
                UNIQUE(user_id, track_id)
            );

            CREATE INDEX IF NOT EXISTS idx_votes_track ON votes(track_id);
            ",
        )?;
        Ok(())
    }
}
