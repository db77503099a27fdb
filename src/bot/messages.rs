//! User-facing texts.

use super::ProcessError;
use crate::session::StepKind;
use crate::{SUPPORTED_EXTENSIONS, TrackId};

pub const DEFAULT_TITLE: &str = "Processed track";
pub const PERFORMER: &str = "Processed by remixbot";

pub const UPLOAD_PROMPT: &str = "Send me an audio file to remix (WAV or FLAC, up to 50 MB).";
pub const UPLOAD_REMINDER: &str = "Still waiting for your audio file.";
pub const IN_PROGRESS: &str =
    "You already have a clip in progress. Upload a new file to replace it or send /cancel.";
pub const NO_SESSION: &str = "Send /start or an audio file to begin.";
pub const RENDERING: &str = "Rendering your clip, this can take a moment...";
pub const CANCELLED: &str = "Cancelled. Send /start to remix another clip.";
pub const NOTHING_TO_CANCEL: &str = "Nothing to cancel.";
pub const EXPIRED: &str = "Your unfinished session expired. Send /start to begin again.";
pub const DOWNLOAD_FAILED: &str = "Couldn't download that file. Please try again.";
pub const VOTE_REPEAT: &str = "You already liked this track!";
pub const EMPTY_TOP: &str = "No tracks on the leaderboard yet. Be the first!";
pub const STORAGE_UNAVAILABLE: &str = "The leaderboard is unavailable right now. Try again shortly.";

/// Full instructions shown the first time a step is entered.
pub fn guide(kind: StepKind) -> Option<&'static str> {
    match kind {
        StepKind::Upload => Some(UPLOAD_PROMPT),
        StepKind::Speed => Some(
            "Let's shape the sound in three steps:\n\
             1. Speed\n\
             2. Echo\n\
             3. Bass\n\
             \n\
             Step 1/3: playback speed. Send a number from 0.1 to 2.0:\n\
             - 0.5 = half speed\n\
             - 0.7 = nice and slow\n\
             - 1.0 = original\n\
             - 1.3 = 30% faster\n\
             Example: 0.8",
        ),
        StepKind::Reverb => Some(
            "Step 2/3: echo. Send two numbers separated by a space:\n\
             1. Delay in ms (10-1000)\n\
             2. Level (0-1)\n\
             Examples: 150 0.4 (light echo), 300 0.7 (cave)",
        ),
        StepKind::Bass => Some(
            "Step 3/3: bass. Send a number from -20 to +20:\n\
             - -10 = thin\n\
             - 0 = unchanged\n\
             - +10 = heavy\n\
             Example: -5",
        ),
        StepKind::Confirm => Some("All set! Send /process to render or /cancel to start over."),
        StepKind::Processing => None,
    }
}

pub fn too_large(size: u64, limit: u64) -> String {
    format!(
        "That file is {:.1} MB; the limit is {:.0} MB.",
        size as f64 / 1_048_576.0,
        limit as f64 / 1_048_576.0
    )
}

pub fn undecodable() -> String {
    format!(
        "Couldn't read that audio. Supported formats: {}.",
        SUPPORTED_EXTENSIONS.join(", ").to_uppercase()
    )
}

pub fn published(track_id: TrackId) -> String {
    format!("Done! Published as track #{track_id}. Like tracks in /top, or /start to make another.")
}

pub fn liked(track_id: TrackId, likes: i64) -> String {
    format!("Your like counts! Track #{track_id} now has {likes} likes.")
}

/// Acknowledgement for a recorded like whose new total couldn't be read back.
pub fn liked_without_count(track_id: TrackId) -> String {
    format!("Your like counts! Thanks for voting on track #{track_id}.")
}

pub fn unknown_track(track_id: TrackId) -> String {
    format!("Track #{track_id} doesn't exist.")
}

/// Text for a render that ended without a published track.
pub fn failure(err: &ProcessError) -> String {
    match err {
        ProcessError::ResourceLimitExceeded { size, limit, .. } => {
            format!("The result is too big to send. {}", too_large(*size, *limit))
        }
        ProcessError::Pipeline(_) | ProcessError::Encode(_) => {
            "Something went wrong while processing your audio. Send /start to try again.".to_string()
        }
        ProcessError::StorageUnavailable(_) => STORAGE_UNAVAILABLE.to_string(),
        ProcessError::Transport(_) => "Couldn't send the result. Please try again.".to_string(),
    }
}
