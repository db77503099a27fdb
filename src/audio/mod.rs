pub mod codec;
pub mod effects;

use thiserror::Error;

pub use effects::{EffectParameters, Reverb};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Decode failure: {0}")]
    Decode(String),
    #[error("Transform failure: {0}")]
    Transform(String),
}

/// Decoded PCM audio: interleaved signed 16-bit samples at a fixed frame rate.
///
/// Container formats never reach this type; the codec turns bytes into an
/// `AudioBuffer` and back.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub samples: Vec<i16>,
    pub channels: u16,
    pub frame_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<i16>, channels: u16, frame_rate: u32) -> Self {
        Self {
            samples,
            channels,
            frame_rate,
        }
    }

    /// A buffer of digital silence lasting `frames` frames.
    pub fn silent(frames: usize, channels: u16, frame_rate: u32) -> Self {
        Self::new(vec![0; frames * channels as usize], channels, frame_rate)
    }

    /// Check the structural invariants the effects rely on.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.channels == 0 {
            return Err(PipelineError::Decode("buffer has zero channels".into()));
        }
        if self.frame_rate == 0 {
            return Err(PipelineError::Decode("buffer has zero frame rate".into()));
        }
        if self.samples.len() % self.channels as usize != 0 {
            return Err(PipelineError::Decode(format!(
                "{} samples do not divide into {} channels",
                self.samples.len(),
                self.channels
            )));
        }
        Ok(())
    }

    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    /// Duration in whole milliseconds (floor).
    pub fn duration_ms(&self) -> u64 {
        if self.frame_rate == 0 {
            return 0;
        }
        self.frames() as u64 * 1000 / self.frame_rate as u64
    }

    /// Number of frames covering `ms` milliseconds at this buffer's rate.
    pub fn ms_to_frames(&self, ms: u64) -> usize {
        (ms * self.frame_rate as u64 / 1000) as usize
    }

    /// The last `frames` frames as a new buffer.
    pub fn tail(&self, frames: usize) -> Self {
        let ch = self.channels as usize;
        let start = self.frames().saturating_sub(frames) * ch;
        Self::new(self.samples[start..].to_vec(), self.channels, self.frame_rate)
    }

    /// Append another buffer with the same layout.
    pub fn append(&mut self, other: &AudioBuffer) {
        self.samples.extend_from_slice(&other.samples);
    }

    /// Largest absolute sample value.
    pub fn peak(&self) -> u16 {
        self.samples
            .iter()
            .map(|s| s.unsigned_abs())
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_and_frames() {
        let buf = AudioBuffer::silent(8000, 2, 8000);
        assert_eq!(buf.frames(), 8000);
        assert_eq!(buf.samples.len(), 16000);
        assert_eq!(buf.duration_ms(), 1000);
        assert_eq!(buf.ms_to_frames(150), 1200);
    }

    #[test]
    fn test_validate_rejects_ragged_buffer() {
        let buf = AudioBuffer::new(vec![1, 2, 3], 2, 44100);
        assert!(matches!(buf.validate(), Err(PipelineError::Decode(_))));

        let buf = AudioBuffer::new(vec![1, 2], 2, 0);
        assert!(matches!(buf.validate(), Err(PipelineError::Decode(_))));

        assert!(AudioBuffer::new(vec![1, 2], 2, 44100).validate().is_ok());
    }

    #[test]
    fn test_tail_and_peak() {
        let buf = AudioBuffer::new(vec![1, -2, 3, -4, 5, -6], 2, 10);
        let tail = buf.tail(2);
        assert_eq!(tail.samples, vec![3, -4, 5, -6]);
        assert_eq!(buf.peak(), 6);
        assert_eq!(buf.tail(10).samples.len(), 6);
    }
}
