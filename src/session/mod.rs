//! Per-user configuration dialogue.
//!
//! A session walks strictly forward through
//! upload → speed → echo → bass → confirm. Each [`Step`] variant carries only
//! the parameters collected so far, so a field can never be filled out of
//! order. Rejected input leaves the step untouched.

pub mod registry;

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::UserId;
use crate::audio::effects::{BASS_GAIN_RANGE_DB, SPEED_RANGE};
use crate::audio::{AudioBuffer, EffectParameters, Reverb};

/// Identifies a step independent of the data it carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    Upload,
    Speed,
    Reverb,
    Bass,
    Confirm,
    Processing,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    AwaitingUpload,
    AwaitingSpeed,
    AwaitingReverb { speed: f64 },
    AwaitingBass { speed: f64, reverb: Reverb },
    ReadyToProcess(EffectParameters),
    /// Handed to the worker pool; `ticket` identifies the job.
    Processing { ticket: u64 },
}

impl Step {
    pub fn kind(&self) -> StepKind {
        match self {
            Step::AwaitingUpload => StepKind::Upload,
            Step::AwaitingSpeed => StepKind::Speed,
            Step::AwaitingReverb { .. } => StepKind::Reverb,
            Step::AwaitingBass { .. } => StepKind::Bass,
            Step::ReadyToProcess(_) => StepKind::Confirm,
            Step::Processing { .. } => StepKind::Processing,
        }
    }
}

/// Input that doesn't fit the current step. The message doubles as the
/// short re-prompt sent back to the user.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationFailure {
    #[error("Speed must be a number from 0.1 to 2.0. Example: 0.7")]
    Speed,
    #[error("Echo needs two numbers: delay 10-1000 ms and level 0-1. Example: 200 0.5")]
    Reverb,
    #[error("Bass must be a number from -20 to 20. Example: -5")]
    Bass,
    #[error("Waiting for an audio file (WAV or FLAC).")]
    ExpectedUpload,
    #[error("All set. Send /process to render or /cancel to start over.")]
    ExpectedConfirm,
    #[error("This session already has its audio file. Send /cancel to start over.")]
    AlreadyUploaded,
    #[error("Still setting up: finish the current step before /process.")]
    NotReady,
    #[error("Your clip is rendering, hang on.")]
    Busy,
}

pub struct Session {
    user_id: UserId,
    step: Step,
    source: Option<AudioBuffer>,
    title: Option<String>,
    guides_shown: HashSet<StepKind>,
    last_activity: DateTime<Utc>,
}

impl Session {
    /// A fresh session waiting for its upload.
    pub fn new(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            step: Step::AwaitingUpload,
            source: None,
            title: None,
            guides_shown: HashSet::new(),
            last_activity: now,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity = now;
    }

    /// Ticket of the in-flight render, if any.
    pub fn processing_ticket(&self) -> Option<u64> {
        match self.step {
            Step::Processing { ticket } => Some(ticket),
            _ => None,
        }
    }

    /// Take ownership of the decoded upload and move on to the speed step.
    pub fn attach_upload(
        &mut self,
        source: AudioBuffer,
        title: Option<String>,
    ) -> Result<StepKind, ValidationFailure> {
        if self.step != Step::AwaitingUpload {
            return Err(ValidationFailure::AlreadyUploaded);
        }
        self.source = Some(source);
        self.title = title;
        self.step = Step::AwaitingSpeed;
        Ok(StepKind::Speed)
    }

    /// Validate `text` against the current step and advance on success.
    /// Returns the step just entered.
    pub fn submit_text(&mut self, text: &str) -> Result<StepKind, ValidationFailure> {
        let next = match self.step {
            Step::AwaitingUpload => return Err(ValidationFailure::ExpectedUpload),
            Step::AwaitingSpeed => Step::AwaitingReverb {
                speed: parse_speed(text)?,
            },
            Step::AwaitingReverb { speed } => Step::AwaitingBass {
                speed,
                reverb: parse_reverb(text)?,
            },
            Step::AwaitingBass { speed, reverb } => {
                let gain = parse_bass(text)?;
                let params =
                    EffectParameters::new(speed, reverb, gain).ok_or(ValidationFailure::Bass)?;
                Step::ReadyToProcess(params)
            }
            Step::ReadyToProcess(_) => return Err(ValidationFailure::ExpectedConfirm),
            Step::Processing { .. } => return Err(ValidationFailure::Busy),
        };
        self.step = next;
        Ok(next.kind())
    }

    /// Confirm: hand out the source buffer and parameters for rendering.
    /// The session keeps only the job ticket from here on.
    pub fn begin_processing(
        &mut self,
        ticket: u64,
    ) -> Result<(AudioBuffer, EffectParameters), ValidationFailure> {
        let params = match self.step {
            Step::ReadyToProcess(params) => params,
            Step::Processing { .. } => return Err(ValidationFailure::Busy),
            Step::AwaitingUpload => return Err(ValidationFailure::ExpectedUpload),
            _ => return Err(ValidationFailure::NotReady),
        };
        let source = self.source.take().ok_or(ValidationFailure::ExpectedUpload)?;
        self.step = Step::Processing { ticket };
        Ok((source, params))
    }

    /// Record that the guide for `kind` is being sent. Returns false when it
    /// was already sent in this session.
    pub fn mark_guide(&mut self, kind: StepKind) -> bool {
        self.guides_shown.insert(kind)
    }

    pub fn guide_shown(&self, kind: StepKind) -> bool {
        self.guides_shown.contains(&kind)
    }
}

pub fn parse_speed(text: &str) -> Result<f64, ValidationFailure> {
    let speed: f64 = text.trim().parse().map_err(|_| ValidationFailure::Speed)?;
    if SPEED_RANGE.contains(&speed) {
        Ok(speed)
    } else {
        Err(ValidationFailure::Speed)
    }
}

/// Exactly two numbers: delay (ms, truncated) and decay.
pub fn parse_reverb(text: &str) -> Result<Reverb, ValidationFailure> {
    let parts: Vec<&str> = text.split_whitespace().collect();
    let [delay, decay] = parts.as_slice() else {
        return Err(ValidationFailure::Reverb);
    };
    let delay: f64 = delay.parse().map_err(|_| ValidationFailure::Reverb)?;
    let decay: f64 = decay.parse().map_err(|_| ValidationFailure::Reverb)?;
    Reverb::new(delay, decay).ok_or(ValidationFailure::Reverb)
}

pub fn parse_bass(text: &str) -> Result<f64, ValidationFailure> {
    let gain: f64 = text.trim().parse().map_err(|_| ValidationFailure::Bass)?;
    if BASS_GAIN_RANGE_DB.contains(&gain) {
        Ok(gain)
    } else {
        Err(ValidationFailure::Bass)
    }
}
