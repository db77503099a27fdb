//! Event dispatch between the chat transport and the core.
//!
//! The dispatcher owns the session registry and the track store and handles
//! one event at a time. Confirmation only queues a render on the worker pool;
//! finished renders are picked up by [`Bot::poll_completions`] (or
//! [`Bot::wait_for_completion`]), which delivers and publishes them.

pub mod messages;
pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::audio::PipelineError;
use crate::audio::codec::{Codec, CodecError};
use crate::config::AppConfig;
use crate::db::models::{NewTrack, VoteOutcome};
use crate::db::{Database, DbError};
use crate::session::registry::SessionRegistry;
use crate::session::{Session, Step, StepKind};
use crate::{TrackId, UserId};
use worker::{Completion, Job, Rendered, WorkerPool};

/// Inbound events, already parsed and routed by the transport.
#[derive(Debug, Clone)]
pub enum Event {
    Start {
        user_id: UserId,
    },
    Upload {
        user_id: UserId,
        audio_ref: String,
        declared_size_bytes: u64,
        file_name: Option<String>,
    },
    Text {
        user_id: UserId,
        text: String,
    },
    Confirm {
        user_id: UserId,
    },
    Cancel {
        user_id: UserId,
    },
    Vote {
        user_id: UserId,
        track_id: TrackId,
    },
    TopRequest {
        user_id: UserId,
    },
}

impl Event {
    pub fn user_id(&self) -> UserId {
        match self {
            Event::Start { user_id }
            | Event::Upload { user_id, .. }
            | Event::Text { user_id, .. }
            | Event::Confirm { user_id }
            | Event::Cancel { user_id }
            | Event::Vote { user_id, .. }
            | Event::TopRequest { user_id } => *user_id,
        }
    }
}

/// Metadata attached to a delivered clip.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioMetadata {
    pub title: String,
    pub performer: String,
    pub duration_secs: u64,
}

/// One leaderboard line as sent to the user.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedEntry {
    pub rank: usize,
    pub track_id: TrackId,
    pub audio_ref: String,
    pub like_count: i64,
}

#[derive(Error, Debug)]
#[error("Transport error: {0}")]
pub struct TransportError(pub String);

/// The chat side: media download plus the three outbound message kinds.
pub trait Transport {
    /// Fetch the bytes behind an uploaded file reference.
    fn fetch_media(&mut self, audio_ref: &str) -> Result<Vec<u8>, TransportError>;
    fn send_text(&mut self, user_id: UserId, text: &str) -> Result<(), TransportError>;
    /// Deliver an encoded clip. Returns the transport's handle for it, which
    /// is what gets published.
    fn send_audio(
        &mut self,
        user_id: UserId,
        audio: &[u8],
        metadata: &AudioMetadata,
    ) -> Result<String, TransportError>;
    fn send_ranked_list(
        &mut self,
        user_id: UserId,
        entries: &[RankedEntry],
    ) -> Result<(), TransportError>;
}

/// Ways a confirmed render can end without a published track.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("{what} is {size} bytes, over the {limit} byte limit")]
    ResourceLimitExceeded {
        what: &'static str,
        size: u64,
        limit: u64,
    },
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("Encode failure: {0}")]
    Encode(#[from] CodecError),
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] DbError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub struct BotSettings {
    pub workers: usize,
    pub max_media_bytes: u64,
    pub top_limit: usize,
}

impl BotSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            workers: config.resolve_workers(),
            max_media_bytes: config.max_media_bytes,
            top_limit: config.leaderboard.top_limit,
        }
    }
}

pub struct Bot<T: Transport, C: Codec + 'static> {
    transport: T,
    codec: Arc<C>,
    db: Database,
    sessions: SessionRegistry,
    pool: WorkerPool,
    settings: BotSettings,
    next_ticket: u64,
}

impl<T: Transport, C: Codec + 'static> Bot<T, C> {
    pub fn new(
        transport: T,
        codec: C,
        db: Database,
        sessions: SessionRegistry,
        settings: BotSettings,
    ) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = WorkerPool::new(settings.workers)?;
        log::info!("Render pool ready with {} workers", pool.threads());
        Ok(Self {
            transport,
            codec: Arc::new(codec),
            db,
            sessions,
            pool,
            settings,
            next_ticket: 1,
        })
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Handle one inbound event. Only transport failures are returned;
    /// everything else is answered in chat.
    pub fn handle(&mut self, event: Event) -> Result<(), TransportError> {
        self.reap_idle_sessions();

        match event {
            Event::Start { user_id } => self.on_start(user_id),
            Event::Upload {
                user_id,
                audio_ref,
                declared_size_bytes,
                file_name,
            } => self.on_upload(user_id, &audio_ref, declared_size_bytes, file_name),
            Event::Text { user_id, text } => self.on_text(user_id, &text),
            Event::Confirm { user_id } => self.on_confirm(user_id),
            Event::Cancel { user_id } => self.on_cancel(user_id),
            Event::Vote { user_id, track_id } => self.on_vote(user_id, track_id),
            Event::TopRequest { user_id } => self.on_top(user_id),
        }
    }

    /// Deliver every render that has finished. Never blocks.
    pub fn poll_completions(&mut self) -> Result<usize, TransportError> {
        let mut handled = 0;
        while let Some(done) = self.pool.try_next() {
            self.on_completion(done)?;
            handled += 1;
        }
        Ok(handled)
    }

    /// Wait up to `timeout` for one render to finish and deliver it.
    pub fn wait_for_completion(&mut self, timeout: Duration) -> Result<bool, TransportError> {
        match self.pool.next_timeout(timeout) {
            Some(done) => {
                self.on_completion(done)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drop idle sessions and tell their users. A notice that can't be
    /// delivered is logged and skipped; it never blocks other users.
    pub fn reap_idle_sessions(&mut self) -> usize {
        let reaped = self.sessions.reap_idle();
        for &user_id in &reaped {
            if let Err(e) = self.transport.send_text(user_id, messages::EXPIRED) {
                log::warn!("Expiry notice to user {} not delivered: {}", user_id, e);
            }
        }
        reaped.len()
    }

    fn on_start(&mut self, user_id: UserId) -> Result<(), TransportError> {
        let (session, _) = self.sessions.get_or_create(user_id);
        if session.step() != Step::AwaitingUpload {
            return self.transport.send_text(user_id, messages::IN_PROGRESS);
        }
        if session.mark_guide(StepKind::Upload) {
            self.transport.send_text(user_id, messages::UPLOAD_PROMPT)
        } else {
            self.transport.send_text(user_id, messages::UPLOAD_REMINDER)
        }
    }

    fn on_upload(
        &mut self,
        user_id: UserId,
        audio_ref: &str,
        declared_size: u64,
        file_name: Option<String>,
    ) -> Result<(), TransportError> {
        let limit = self.settings.max_media_bytes;
        if declared_size > limit {
            log::warn!("User {} upload rejected: {} bytes", user_id, declared_size);
            return self
                .transport
                .send_text(user_id, &messages::too_large(declared_size, limit));
        }

        let bytes = match self.transport.fetch_media(audio_ref) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("User {} upload {} not fetched: {}", user_id, audio_ref, e);
                return self.transport.send_text(user_id, messages::DOWNLOAD_FAILED);
            }
        };
        if bytes.len() as u64 > limit {
            log::warn!("User {} upload rejected: {} bytes", user_id, bytes.len());
            return self
                .transport
                .send_text(user_id, &messages::too_large(bytes.len() as u64, limit));
        }

        let source = match self.decode_upload(&bytes) {
            Ok(source) => source,
            Err(e) => {
                log::warn!("User {} upload {} not decodable: {}", user_id, audio_ref, e);
                return self.transport.send_text(user_id, &messages::undecodable());
            }
        };
        log::info!(
            "User {} uploaded {} ms at {} Hz, {} ch",
            user_id,
            source.duration_ms(),
            source.frame_rate,
            source.channels
        );

        let now = self.sessions.now();
        let mut session = match self.sessions.destroy(user_id) {
            Some(existing) if existing.step() == Step::AwaitingUpload => existing,
            Some(old) => {
                log::info!("User {} replaced a {:?} session", user_id, old.step().kind());
                Session::new(user_id, now)
            }
            None => Session::new(user_id, now),
        };
        session.touch(now);

        let entered = match session.attach_upload(source, file_name) {
            Ok(kind) => kind,
            Err(e) => return self.transport.send_text(user_id, &e.to_string()),
        };
        self.sessions.insert(session);
        self.enter_step(user_id, entered)
    }

    fn decode_upload(&self, bytes: &[u8]) -> Result<crate::audio::AudioBuffer, PipelineError> {
        let source = self
            .codec
            .decode(bytes)
            .map_err(|e| PipelineError::Decode(e.to_string()))?;
        source.validate()?;
        if source.frames() == 0 {
            return Err(PipelineError::Decode("no audio frames".into()));
        }
        Ok(source)
    }

    fn on_text(&mut self, user_id: UserId, text: &str) -> Result<(), TransportError> {
        let Some(session) = self.sessions.active(user_id) else {
            return self.transport.send_text(user_id, messages::NO_SESSION);
        };
        match session.submit_text(text) {
            Ok(entered) => {
                log::debug!("User {} moved to {:?}", user_id, entered);
                self.enter_step(user_id, entered)
            }
            Err(failure) => {
                log::debug!("User {} input rejected: {}", user_id, failure);
                self.transport.send_text(user_id, &failure.to_string())
            }
        }
    }

    /// Send the guide for a newly entered step unless this session already saw it.
    fn enter_step(&mut self, user_id: UserId, kind: StepKind) -> Result<(), TransportError> {
        let first_time = self
            .sessions
            .active(user_id)
            .is_some_and(|s| s.mark_guide(kind));
        match messages::guide(kind) {
            Some(text) if first_time => self.transport.send_text(user_id, text),
            _ => Ok(()),
        }
    }

    fn on_confirm(&mut self, user_id: UserId) -> Result<(), TransportError> {
        let ticket = self.next_ticket;
        let Some(session) = self.sessions.active(user_id) else {
            return self.transport.send_text(user_id, messages::NO_SESSION);
        };
        match session.begin_processing(ticket) {
            Ok((source, params)) => {
                self.next_ticket += 1;
                self.pool.submit(
                    Job {
                        ticket,
                        user_id,
                        source,
                        params,
                    },
                    Arc::clone(&self.codec),
                );
                self.transport.send_text(user_id, messages::RENDERING)
            }
            Err(failure) => self.transport.send_text(user_id, &failure.to_string()),
        }
    }

    fn on_cancel(&mut self, user_id: UserId) -> Result<(), TransportError> {
        match self.sessions.destroy(user_id) {
            Some(session) => {
                log::info!("User {} cancelled at {:?}", user_id, session.step().kind());
                self.transport.send_text(user_id, messages::CANCELLED)
            }
            None => self.transport.send_text(user_id, messages::NOTHING_TO_CANCEL),
        }
    }

    fn on_vote(&mut self, user_id: UserId, track_id: TrackId) -> Result<(), TransportError> {
        let reply = match self.db.vote(user_id, track_id) {
            Ok(VoteOutcome::Accepted) => match self.db.track(track_id) {
                Ok(Some(track)) => messages::liked(track_id, track.like_count),
                Ok(None) => messages::unknown_track(track_id),
                Err(e) => {
                    log::warn!("Like count lookup for track {} failed: {}", track_id, e);
                    messages::liked_without_count(track_id)
                }
            },
            Ok(VoteOutcome::AlreadyVoted) => messages::VOTE_REPEAT.to_string(),
            Err(DbError::TrackNotFound(id)) => messages::unknown_track(id),
            Err(e) => {
                log::error!("Vote by user {} on track {} failed: {}", user_id, track_id, e);
                messages::STORAGE_UNAVAILABLE.to_string()
            }
        };
        self.transport.send_text(user_id, &reply)
    }

    fn on_top(&mut self, user_id: UserId) -> Result<(), TransportError> {
        let ranked = match self.db.top_tracks(self.settings.top_limit) {
            Ok(ranked) => ranked,
            Err(e) => {
                log::error!("Leaderboard query failed: {}", e);
                return self.transport.send_text(user_id, messages::STORAGE_UNAVAILABLE);
            }
        };
        if ranked.is_empty() {
            return self.transport.send_text(user_id, messages::EMPTY_TOP);
        }

        let entries: Vec<RankedEntry> = ranked
            .into_iter()
            .map(|r| RankedEntry {
                rank: r.rank,
                track_id: r.track.id,
                audio_ref: r.track.audio_ref,
                like_count: r.track.like_count,
            })
            .collect();
        self.transport.send_ranked_list(user_id, &entries)
    }

    fn on_completion(&mut self, done: Completion) -> Result<(), TransportError> {
        let current = self
            .sessions
            .lookup(done.user_id)
            .and_then(|s| s.processing_ticket());
        if current != Some(done.ticket) {
            log::debug!(
                "Dropping render {} for user {}: session moved on",
                done.ticket,
                done.user_id
            );
            return Ok(());
        }

        // Success or failure, the session ends here.
        let title = self
            .sessions
            .destroy(done.user_id)
            .and_then(|s| s.title().map(str::to_string));

        match self.deliver(done.user_id, title, done.result) {
            Ok(track_id) => self
                .transport
                .send_text(done.user_id, &messages::published(track_id)),
            Err(e) => {
                log::warn!("Render {} for user {} failed: {}", done.ticket, done.user_id, e);
                self.transport.send_text(done.user_id, &messages::failure(&e))
            }
        }
    }

    /// Size-check, send, then publish. Nothing is published unless the clip
    /// was delivered.
    fn deliver(
        &mut self,
        user_id: UserId,
        title: Option<String>,
        result: Result<Rendered, ProcessError>,
    ) -> Result<TrackId, ProcessError> {
        let rendered = result?;
        let size = rendered.bytes.len() as u64;
        if size > self.settings.max_media_bytes {
            return Err(ProcessError::ResourceLimitExceeded {
                what: "rendered clip",
                size,
                limit: self.settings.max_media_bytes,
            });
        }

        let metadata = AudioMetadata {
            title: title.unwrap_or_else(|| messages::DEFAULT_TITLE.to_string()),
            performer: messages::PERFORMER.to_string(),
            duration_secs: rendered.duration_ms / 1000,
        };
        let audio_ref = self
            .transport
            .send_audio(user_id, &rendered.bytes, &metadata)?;

        let track_id = self.db.publish(&NewTrack {
            owner_user_id: user_id,
            audio_ref,
            title: Some(metadata.title),
        })?;
        Ok(track_id)
    }
}
