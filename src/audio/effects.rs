//! The fixed speed → echo → bass chain applied to every rendered clip.
//!
//! The cutoffs, the `decay × 20` dB echo gain, the `delay / 2` overlay offset
//! and the bounce count fix how the output sounds.

use std::f64::consts::PI;
use std::ops::RangeInclusive;

use super::{AudioBuffer, PipelineError};

pub const SPEED_RANGE: RangeInclusive<f64> = 0.1..=2.0;
pub const REVERB_DELAY_RANGE_MS: RangeInclusive<f64> = 10.0..=1000.0;
pub const REVERB_DECAY_RANGE: RangeInclusive<f64> = 0.0..=1.0;
pub const BASS_GAIN_RANGE_DB: RangeInclusive<f64> = -20.0..=20.0;

/// Low-pass cutoff used when cutting bass.
const BASS_CUT_CUTOFF_HZ: f64 = 200.0;
/// Low-pass cutoff used to isolate the band that gets boosted.
const BASS_BOOST_CUTOFF_HZ: f64 = 150.0;
/// Echo gain in dB per unit of decay.
const ECHO_GAIN_DB_PER_DECAY: f64 = 20.0;
/// How many times the delayed copy is laid over the signal.
const ECHO_BOUNCES: usize = 2;

/// Echo settings: delay in whole milliseconds and a 0–1 decay level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reverb {
    pub delay_ms: u32,
    pub decay: f64,
}

impl Reverb {
    /// Validate bounds; the delay is truncated to whole milliseconds.
    pub fn new(delay_ms: f64, decay: f64) -> Option<Self> {
        if REVERB_DELAY_RANGE_MS.contains(&delay_ms) && REVERB_DECAY_RANGE.contains(&decay) {
            Some(Self {
                delay_ms: delay_ms.trunc() as u32,
                decay,
            })
        } else {
            None
        }
    }
}

/// Fully resolved pipeline input. Only constructible with every field in range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectParameters {
    speed: f64,
    reverb: Reverb,
    bass_gain_db: f64,
}

impl EffectParameters {
    pub fn new(speed: f64, reverb: Reverb, bass_gain_db: f64) -> Option<Self> {
        let reverb = Reverb::new(reverb.delay_ms as f64, reverb.decay)?;
        if SPEED_RANGE.contains(&speed) && BASS_GAIN_RANGE_DB.contains(&bass_gain_db) {
            Some(Self {
                speed,
                reverb,
                bass_gain_db,
            })
        } else {
            None
        }
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn reverb(&self) -> Reverb {
        self.reverb
    }

    pub fn bass_gain_db(&self) -> f64 {
        self.bass_gain_db
    }
}

/// Run the full chain: speed, then echo, then bass.
pub fn process(audio: &AudioBuffer, params: &EffectParameters) -> Result<AudioBuffer, PipelineError> {
    audio.validate()?;
    let slowed = apply_slow(audio, params.speed())?;
    let echoed = apply_reverb(&slowed, params.reverb())?;
    Ok(adjust_bass(&echoed, params.bass_gain_db()))
}

/// Pitch-and-tempo change: play the samples at `frame_rate × speed`, then
/// resample back to the original rate with linear interpolation.
pub fn apply_slow(audio: &AudioBuffer, speed: f64) -> Result<AudioBuffer, PipelineError> {
    if speed == 1.0 {
        return Ok(audio.clone());
    }
    if !speed.is_finite() || speed <= 0.0 {
        return Err(PipelineError::Transform(format!("invalid speed {speed}")));
    }

    let virtual_rate = (audio.frame_rate as f64 * speed) as u32;
    if virtual_rate == 0 {
        return Err(PipelineError::Transform(format!(
            "speed {speed} collapses {} Hz to zero",
            audio.frame_rate
        )));
    }

    let ch = audio.channels as usize;
    let frames = audio.frames();
    let out_frames = (frames as u64 * audio.frame_rate as u64 / virtual_rate as u64) as usize;
    let step = virtual_rate as f64 / audio.frame_rate as f64;

    let mut samples = Vec::with_capacity(out_frames * ch);
    for i in 0..out_frames {
        let pos = i as f64 * step;
        let idx = (pos as usize).min(frames - 1);
        let next = (idx + 1).min(frames - 1);
        let frac = pos - idx as f64;
        for c in 0..ch {
            let a = audio.samples[idx * ch + c] as f64;
            let b = audio.samples[next * ch + c] as f64;
            samples.push((a + (b - a) * frac).round() as i16);
        }
    }

    Ok(AudioBuffer::new(samples, audio.channels, audio.frame_rate))
}

/// One-tap echo: the last `delay_ms` of the clip, padded with `delay_ms` of
/// silence and gained by `decay × 20` dB, is laid over the clip twice
/// starting `delay_ms / 2` in. The clip length never changes.
pub fn apply_reverb(audio: &AudioBuffer, reverb: Reverb) -> Result<AudioBuffer, PipelineError> {
    let delay_frames = audio.ms_to_frames(reverb.delay_ms as u64);
    if delay_frames == 0 {
        return Err(PipelineError::Transform(format!(
            "{} ms delay is shorter than one frame at {} Hz",
            reverb.delay_ms, audio.frame_rate
        )));
    }
    if audio.frames() < delay_frames {
        return Err(PipelineError::Transform(format!(
            "clip of {} ms is shorter than the {} ms echo delay",
            audio.duration_ms(),
            reverb.delay_ms
        )));
    }

    let mut delayed = audio.tail(delay_frames);
    delayed.append(&AudioBuffer::silent(delay_frames, audio.channels, audio.frame_rate));
    let delayed = apply_gain(&delayed, reverb.decay * ECHO_GAIN_DB_PER_DECAY);

    let position = audio.ms_to_frames(reverb.delay_ms as u64 / 2);
    Ok(overlay(audio, &delayed, position, ECHO_BOUNCES))
}

/// Bass shaping around a single low-pass filter.
///
/// A negative gain keeps only the low band (below 200 Hz) and turns it down,
/// which drops the highs as well. A positive gain boosts the band below
/// 150 Hz and sums it onto the untouched signal. Zero is the identity.
pub fn adjust_bass(audio: &AudioBuffer, gain_db: f64) -> AudioBuffer {
    if gain_db < 0.0 {
        apply_gain(&low_pass_filter(audio, BASS_CUT_CUTOFF_HZ), gain_db)
    } else if gain_db > 0.0 {
        let boosted = apply_gain(&low_pass_filter(audio, BASS_BOOST_CUTOFF_HZ), gain_db);
        mix(audio, &boosted)
    } else {
        audio.clone()
    }
}

/// Scale every sample by `gain_db`; the float→i16 cast saturates.
pub fn apply_gain(audio: &AudioBuffer, gain_db: f64) -> AudioBuffer {
    let factor = 10f64.powf(gain_db / 20.0);
    let samples = audio
        .samples
        .iter()
        .map(|&s| (s as f64 * factor) as i16)
        .collect();
    AudioBuffer::new(samples, audio.channels, audio.frame_rate)
}

/// Single-pole RC low-pass, per channel. The first frame passes through.
pub fn low_pass_filter(audio: &AudioBuffer, cutoff_hz: f64) -> AudioBuffer {
    let ch = audio.channels as usize;
    let frames = audio.frames();
    if frames == 0 {
        return audio.clone();
    }

    let rc = 1.0 / (cutoff_hz * 2.0 * PI);
    let dt = 1.0 / audio.frame_rate as f64;
    let alpha = dt / (rc + dt);

    let mut out = audio.samples.clone();
    let mut last: Vec<f64> = audio.samples[..ch].iter().map(|&s| s as f64).collect();
    for i in 1..frames {
        for (c, prev) in last.iter_mut().enumerate() {
            let offset = i * ch + c;
            *prev += alpha * (audio.samples[offset] as f64 - *prev);
            out[offset] = *prev as i16;
        }
    }

    AudioBuffer::new(out, audio.channels, audio.frame_rate)
}

/// Lay `top` over `base` starting at frame `position`, `times` times back to
/// back. Anything past the end of `base` is cut off.
fn overlay(base: &AudioBuffer, top: &AudioBuffer, position: usize, times: usize) -> AudioBuffer {
    let ch = base.channels as usize;
    let total = base.frames();
    let mut out = base.samples.clone();
    let mut pos = position.min(total);

    for _ in 0..times {
        let len = top.frames().min(total - pos);
        if len == 0 {
            break;
        }
        for (o, t) in out[pos * ch..(pos + len) * ch]
            .iter_mut()
            .zip(&top.samples[..len * ch])
        {
            *o = o.saturating_add(*t);
        }
        pos += len;
    }

    AudioBuffer::new(out, base.channels, base.frame_rate)
}

/// Sample-wise saturating sum of two buffers of the same layout.
fn mix(a: &AudioBuffer, b: &AudioBuffer) -> AudioBuffer {
    let samples = a
        .samples
        .iter()
        .zip(&b.samples)
        .map(|(x, y)| x.saturating_add(*y))
        .collect();
    AudioBuffer::new(samples, a.channels, a.frame_rate)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Mono sine at `freq` Hz, amplitude 10000.
    pub(crate) fn sine(freq: f64, frame_rate: u32, duration_ms: u64) -> AudioBuffer {
        let frames = (duration_ms * frame_rate as u64 / 1000) as usize;
        let samples = (0..frames)
            .map(|i| {
                let t = i as f64 / frame_rate as f64;
                (10000.0 * (2.0 * PI * freq * t).sin()) as i16
            })
            .collect();
        AudioBuffer::new(samples, 1, frame_rate)
    }

    fn params(speed: f64, delay: f64, decay: f64, bass: f64) -> EffectParameters {
        EffectParameters::new(speed, Reverb::new(delay, decay).unwrap(), bass).unwrap()
    }

    #[test]
    fn test_speed_one_is_identity() {
        let buf = sine(440.0, 8000, 500);
        let out = apply_slow(&buf, 1.0).unwrap();
        assert_eq!(out, buf);
        assert_eq!(out.duration_ms(), 500);
        assert_eq!(out.frame_rate, 8000);
    }

    #[test]
    fn test_half_speed_doubles_length() {
        let buf = sine(440.0, 8000, 1000);
        let out = apply_slow(&buf, 0.5).unwrap();
        assert_eq!(out.frames(), 16000);
        assert_eq!(out.duration_ms(), 2000);
        assert_eq!(out.frame_rate, 8000);

        let fast = apply_slow(&buf, 2.0).unwrap();
        assert_eq!(fast.duration_ms(), 500);
    }

    #[test]
    fn test_slow_interpolates_between_frames() {
        let buf = AudioBuffer::new(vec![0, 100], 1, 4);
        let out = apply_slow(&buf, 0.5).unwrap();
        assert_eq!(out.samples, vec![0, 50, 100, 100]);
    }

    #[test]
    fn test_slow_keeps_channels_apart() {
        let buf = AudioBuffer::new(vec![0, 1000, 100, 1000], 2, 4);
        let out = apply_slow(&buf, 0.5).unwrap();
        assert_eq!(out.channels, 2);
        assert_eq!(out.samples, vec![0, 1000, 50, 1000, 100, 1000, 100, 1000]);
    }

    #[test]
    fn test_reverb_preserves_length_and_places_echoes() {
        // 1 frame per ms: a 10-frame burst at the very end of a 1 s clip.
        let mut samples = vec![0i16; 1000];
        for s in &mut samples[990..] {
            *s = 1000;
        }
        let buf = AudioBuffer::new(samples, 1, 1000);

        let out = apply_reverb(&buf, Reverb::new(100.0, 0.0).unwrap()).unwrap();
        assert_eq!(out.duration_ms(), buf.duration_ms());

        // Delayed copy = last 100 frames + 100 silent frames, laid at 50 and 250.
        assert_eq!(out.samples[139], 0);
        assert_eq!(out.samples[140], 1000);
        assert_eq!(out.samples[149], 1000);
        assert_eq!(out.samples[150], 0);
        assert_eq!(out.samples[340], 1000);
        assert!(out.samples[450..990].iter().all(|&s| s == 0));
        assert_eq!(out.samples[995], 1000);
    }

    #[test]
    fn test_reverb_gain_scales_with_decay() {
        let mut samples = vec![0i16; 1000];
        for s in &mut samples[990..] {
            *s = 1000;
        }
        let buf = AudioBuffer::new(samples, 1, 1000);

        // decay 0.5 → +10 dB → ×3.1623
        let out = apply_reverb(&buf, Reverb::new(100.0, 0.5).unwrap()).unwrap();
        assert_eq!(out.samples[140], 3162);
    }

    #[test]
    fn test_reverb_on_clip_shorter_than_delay_fails() {
        let buf = sine(440.0, 8000, 50);
        let err = apply_reverb(&buf, Reverb::new(100.0, 0.5).unwrap()).unwrap_err();
        assert!(matches!(err, PipelineError::Transform(_)));
    }

    #[test]
    fn test_reverb_never_shortens() {
        let buf = sine(220.0, 8000, 2000);
        for (delay, decay) in [(10.0, 0.0), (150.0, 0.5), (1000.0, 1.0)] {
            let out = apply_reverb(&buf, Reverb::new(delay, decay).unwrap()).unwrap();
            assert!(out.duration_ms() >= buf.duration_ms());
        }
    }

    #[test]
    fn test_bass_zero_is_identity() {
        let buf = sine(440.0, 8000, 300);
        assert_eq!(adjust_bass(&buf, 0.0), buf);
    }

    #[test]
    fn test_bass_cut_never_exceeds_input_peak() {
        let buf = sine(60.0, 8000, 500);
        for gain in [-0.5, -5.0, -20.0] {
            let out = adjust_bass(&buf, gain);
            assert_eq!(out.duration_ms(), buf.duration_ms());
            assert!(out.peak() <= buf.peak());
        }
    }

    #[test]
    fn test_bass_boost_sums_low_band_onto_signal() {
        // A constant signal sits entirely in the low band.
        let buf = AudioBuffer::new(vec![1000; 400], 1, 8000);
        let out = adjust_bass(&buf, 6.0);
        // 1000 + trunc(1000 × 10^(6/20)) = 1000 + 1995
        assert!(out.samples.iter().all(|&s| s == 2995));
    }

    #[test]
    fn test_low_pass_attenuates_highs() {
        let samples = (0..4410).map(|i| if i % 2 == 0 { 10000 } else { -10000 }).collect();
        let buf = AudioBuffer::new(samples, 1, 44100);
        let out = low_pass_filter(&buf, 200.0);
        assert_eq!(out.samples[0], 10000);
        let settled = AudioBuffer::new(out.samples[2000..].to_vec(), 1, 44100);
        assert!(settled.peak() < 1000);
    }

    #[test]
    fn test_gain_saturates() {
        let buf = AudioBuffer::new(vec![20000, -20000, 100], 1, 8000);
        let out = apply_gain(&buf, 20.0);
        assert_eq!(out.samples, vec![i16::MAX, i16::MIN, 1000]);
    }

    #[test]
    fn test_parameters_reject_out_of_range() {
        assert!(Reverb::new(9.9, 0.5).is_none());
        assert!(Reverb::new(10.0, 1.1).is_none());
        assert_eq!(Reverb::new(150.9, 0.5).unwrap().delay_ms, 150);
        let reverb = Reverb::new(150.0, 0.5).unwrap();
        assert!(EffectParameters::new(0.05, reverb, 0.0).is_none());
        assert!(EffectParameters::new(1.0, reverb, 20.5).is_none());
        assert!(EffectParameters::new(f64::NAN, reverb, 0.0).is_none());
        assert!(EffectParameters::new(2.0, reverb, -20.0).is_some());
    }

    #[test]
    fn test_full_chain_duration_follows_speed() {
        // 10 s at 8 kHz, speed 0.7 → 80000 × 8000 / 5600 = 114285 frames.
        let buf = sine(220.0, 8000, 10_000);
        let out = process(&buf, &params(0.7, 150.0, 0.5, -5.0)).unwrap();
        assert_eq!(out.frames(), 114_285);
        assert_eq!(out.duration_ms(), 14_285);
        assert_eq!(out.frame_rate, 8000);
        assert_eq!(out.channels, 1);
    }

    #[test]
    fn test_process_is_deterministic() {
        let buf = sine(330.0, 8000, 1000);
        let p = params(0.8, 200.0, 0.3, 4.0);
        assert_eq!(process(&buf, &p).unwrap(), process(&buf, &p).unwrap());
    }

    #[test]
    fn test_process_rejects_malformed_buffer() {
        let buf = AudioBuffer::new(vec![1, 2, 3], 2, 8000);
        let err = process(&buf, &params(1.0, 100.0, 0.5, 0.0)).unwrap_err();
        assert!(matches!(err, PipelineError::Decode(_)));
    }
}
