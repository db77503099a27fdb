use chrono::{DateTime, Utc};

use crate::{TrackId, UserId};

/// Data for publishing a freshly rendered clip.
pub struct NewTrack {
    pub owner_user_id: UserId,
    /// Opaque handle of the delivered media, as returned by the transport.
    pub audio_ref: String,
    pub title: Option<String>,
}

/// A track row read from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub id: TrackId,
    pub owner_user_id: UserId,
    pub audio_ref: String,
    pub title: Option<String>,
    pub like_count: i64,
    pub created_at: DateTime<Utc>,
}

/// Result of a like. A repeat like is an expected outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Accepted,
    AlreadyVoted,
}

/// One leaderboard line: 1-based rank plus the track it points at.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedTrack {
    pub rank: usize,
    pub track: Track,
}

/// Aggregate counts for the `stats` command.
#[derive(Debug, Default)]
pub struct LeaderboardStats {
    pub total_tracks: i64,
    pub total_votes: i64,
    pub distinct_owners: i64,
}
