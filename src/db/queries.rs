use super::models::{LeaderboardStats, NewTrack, RankedTrack, Track, VoteOutcome};
use super::{Database, DbError, Result};
use crate::{TrackId, UserId};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{OptionalExtension, Row, Transaction, TransactionBehavior, params};

/// Leaderboard size when the caller doesn't ask for one.
pub const DEFAULT_TOP_LIMIT: usize = 10;

const TRACK_COLUMNS: &str = "id, owner_user_id, audio_ref, title, likes, created_at";

/// Fixed-width UTC timestamp so that text order is time order.
fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

fn track_from_row(row: &Row) -> rusqlite::Result<Track> {
    let created: String = row.get(5)?;
    let created_at = DateTime::parse_from_rfc3339(&created)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?
        .with_timezone(&Utc);
    Ok(Track {
        id: row.get(0)?,
        owner_user_id: row.get(1)?,
        audio_ref: row.get(2)?,
        title: row.get(3)?,
        like_count: row.get(4)?,
        created_at,
    })
}

impl Database {
    /// Record a published clip with zero likes. Returns the new track id.
    pub fn publish(&self, t: &NewTrack) -> Result<TrackId> {
        self.publish_at(t, Utc::now())
    }

    /// Same as [`Database::publish`] with an explicit creation time.
    pub fn publish_at(&self, t: &NewTrack, created_at: DateTime<Utc>) -> Result<TrackId> {
        self.conn.execute(
            "INSERT INTO tracks (owner_user_id, audio_ref, title, likes, created_at)
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![t.owner_user_id, t.audio_ref, t.title, format_timestamp(created_at)],
        )?;
        let id = self.conn.last_insert_rowid();
        log::info!("Published track {} for user {}", id, t.owner_user_id);
        Ok(id)
    }

    /// Like a track at most once per user.
    ///
    /// The vote row and the `likes` increment commit together or not at all.
    /// The write lock is taken up front (IMMEDIATE); concurrent voters wait
    /// on the busy timeout.
    pub fn vote(&self, user_id: UserId, track_id: TrackId) -> Result<VoteOutcome> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;

        let exists = tx
            .query_row("SELECT 1 FROM tracks WHERE id = ?1", params![track_id], |_| Ok(()))
            .optional()?
            .is_some();
        if !exists {
            return Err(DbError::TrackNotFound(track_id));
        }

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO votes (user_id, track_id, created_at) VALUES (?1, ?2, ?3)",
            params![user_id, track_id, format_timestamp(Utc::now())],
        )?;
        if inserted == 0 {
            tx.rollback()?;
            log::debug!("User {} already liked track {}", user_id, track_id);
            return Ok(VoteOutcome::AlreadyVoted);
        }

        tx.execute(
            "UPDATE tracks SET likes = likes + 1 WHERE id = ?1",
            params![track_id],
        )?;
        tx.commit()?;

        log::debug!("User {} liked track {}", user_id, track_id);
        Ok(VoteOutcome::Accepted)
    }

    /// Look up a single track.
    pub fn track(&self, id: TrackId) -> Result<Option<Track>> {
        let sql = format!("SELECT {TRACK_COLUMNS} FROM tracks WHERE id = ?1");
        let track = self
            .conn
            .query_row(&sql, params![id], track_from_row)
            .optional()?;
        Ok(track)
    }

    /// The `limit` most-liked tracks; ties go to the newer track.
    pub fn top_tracks(&self, limit: usize) -> Result<Vec<RankedTrack>> {
        let sql = format!(
            "SELECT {TRACK_COLUMNS} FROM tracks
             ORDER BY likes DESC, created_at DESC, id DESC
             LIMIT ?1"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let tracks = stmt
            .query_map(params![limit as i64], track_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(tracks
            .into_iter()
            .enumerate()
            .map(|(i, track)| RankedTrack { rank: i + 1, track })
            .collect())
    }

    /// Number of vote rows for a track (the source of truth behind `likes`).
    pub fn vote_count(&self, track_id: TrackId) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM votes WHERE track_id = ?1",
            params![track_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn stats(&self) -> Result<LeaderboardStats> {
        let (total_tracks, distinct_owners) = self.conn.query_row(
            "SELECT COUNT(*), COUNT(DISTINCT owner_user_id) FROM tracks",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let total_votes = self
            .conn
            .query_row("SELECT COUNT(*) FROM votes", [], |row| row.get(0))?;

        Ok(LeaderboardStats {
            total_tracks,
            total_votes,
            distinct_owners,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn new_track(owner: UserId, audio_ref: &str) -> NewTrack {
        NewTrack {
            owner_user_id: owner,
            audio_ref: audio_ref.to_string(),
            title: Some("night drive (slowed)".to_string()),
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_publish_and_retrieve() {
        let db = Database::open_in_memory().unwrap();
        let id = db.publish(&new_track(7, "file-abc")).unwrap();
        assert!(id > 0);

        let t = db.track(id).unwrap().unwrap();
        assert_eq!(t.owner_user_id, 7);
        assert_eq!(t.audio_ref, "file-abc");
        assert_eq!(t.like_count, 0);
        assert_eq!(t.title.as_deref(), Some("night drive (slowed)"));
        assert!(db.track(id + 100).unwrap().is_none());
    }

    #[test]
    fn test_ids_are_monotonic() {
        let db = Database::open_in_memory().unwrap();
        let a = db.publish(&new_track(1, "a")).unwrap();
        let b = db.publish(&new_track(1, "b")).unwrap();
        assert!(b > a);
    }

    #[test]
    fn test_vote_twice_counts_once() {
        let db = Database::open_in_memory().unwrap();
        let id = db.publish(&new_track(1, "a")).unwrap();

        assert_eq!(db.vote(42, id).unwrap(), VoteOutcome::Accepted);
        assert_eq!(db.vote(42, id).unwrap(), VoteOutcome::AlreadyVoted);

        assert_eq!(db.track(id).unwrap().unwrap().like_count, 1);
        assert_eq!(db.vote_count(id).unwrap(), 1);
    }

    #[test]
    fn test_two_users_count_twice() {
        let db = Database::open_in_memory().unwrap();
        let id = db.publish(&new_track(1, "a")).unwrap();

        assert_eq!(db.vote(10, id).unwrap(), VoteOutcome::Accepted);
        assert_eq!(db.vote(11, id).unwrap(), VoteOutcome::Accepted);

        assert_eq!(db.track(id).unwrap().unwrap().like_count, 2);
        assert_eq!(db.vote_count(id).unwrap(), 2);
    }

    #[test]
    fn test_vote_on_unknown_track_leaves_no_row() {
        let db = Database::open_in_memory().unwrap();
        let err = db.vote(10, 999).unwrap_err();
        assert!(matches!(err, DbError::TrackNotFound(999)));
        assert_eq!(db.vote_count(999).unwrap(), 0);
        assert_eq!(db.stats().unwrap().total_votes, 0);
    }

    #[test]
    fn test_owner_can_like_own_track() {
        let db = Database::open_in_memory().unwrap();
        let id = db.publish(&new_track(5, "a")).unwrap();
        assert_eq!(db.vote(5, id).unwrap(), VoteOutcome::Accepted);
    }

    #[test]
    fn test_top_tracks_empty() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.top_tracks(DEFAULT_TOP_LIMIT).unwrap().is_empty());
    }

    #[test]
    fn test_top_tracks_orders_by_likes_then_newest() {
        let db = Database::open_in_memory().unwrap();
        let old = db.publish_at(&new_track(1, "old"), at(0)).unwrap();
        let mid = db.publish_at(&new_track(1, "mid"), at(10)).unwrap();
        let new = db.publish_at(&new_track(1, "new"), at(20)).unwrap();
        let hot = db.publish_at(&new_track(1, "hot"), at(5)).unwrap();

        for user in 1..=3 {
            db.vote(user, hot).unwrap();
        }
        db.vote(1, old).unwrap();
        db.vote(1, mid).unwrap();

        let top = db.top_tracks(10).unwrap();
        let ids: Vec<TrackId> = top.iter().map(|r| r.track.id).collect();
        // hot (3), then mid/old tied at 1 → newer first, then new (0)
        assert_eq!(ids, vec![hot, mid, old, new]);
        assert_eq!(top.iter().map(|r| r.rank).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
        assert_eq!(top[0].track.like_count, 3);
    }

    #[test]
    fn test_top_tracks_respects_limit() {
        let db = Database::open_in_memory().unwrap();
        for i in 0..15 {
            db.publish_at(&new_track(1, &format!("t{i}")), at(i)).unwrap();
        }
        let top = db.top_tracks(DEFAULT_TOP_LIMIT).unwrap();
        assert_eq!(top.len(), 10);
        // No likes anywhere: pure recency order
        assert_eq!(top[0].track.audio_ref, "t14");
        assert!(db.top_tracks(0).unwrap().is_empty());
    }

    #[test]
    fn test_timestamp_round_trips_through_row() {
        let db = Database::open_in_memory().unwrap();
        let ts = Utc.timestamp_opt(1_700_000_000, 123_456_000).unwrap();
        let id = db.publish_at(&new_track(1, "a"), ts).unwrap();
        assert_eq!(db.track(id).unwrap().unwrap().created_at, ts);
    }

    #[test]
    fn test_concurrent_voters_keep_count_consistent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("votes.db");
        let db = Database::open(&path).unwrap();
        let id = db.publish(&new_track(1, "a")).unwrap();

        // Users 0..8 each try twice from separate connections.
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let conn = Database::open(&path).unwrap();
                    conn.vote(i % 8, id).unwrap()
                })
            })
            .collect();

        let outcomes: Vec<VoteOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let accepted = outcomes.iter().filter(|o| **o == VoteOutcome::Accepted).count();
        assert_eq!(accepted, 8);

        assert_eq!(db.track(id).unwrap().unwrap().like_count, 8);
        assert_eq!(db.vote_count(id).unwrap(), 8);
    }

    #[test]
    fn test_stats() {
        let db = Database::open_in_memory().unwrap();
        let a = db.publish(&new_track(1, "a")).unwrap();
        db.publish(&new_track(2, "b")).unwrap();
        db.publish(&new_track(2, "c")).unwrap();
        db.vote(9, a).unwrap();

        let stats = db.stats().unwrap();
        assert_eq!(stats.total_tracks, 3);
        assert_eq!(stats.distinct_owners, 2);
        assert_eq!(stats.total_votes, 1);
    }
}
