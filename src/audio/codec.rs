use std::io::Cursor;

use thiserror::Error;

use super::AudioBuffer;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
    #[error("FLAC error: {0}")]
    Flac(#[from] claxon::Error),
    #[error("Invalid stream: {0}")]
    Invalid(String),
}

/// Container encode/decode, kept outside the effects chain.
pub trait Codec: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<AudioBuffer, CodecError>;
    fn encode(&self, audio: &AudioBuffer) -> Result<Vec<u8>, CodecError>;
    /// File extension of encoded output, without the dot.
    fn extension(&self) -> &'static str;
}

/// Decodes WAV (hound) and FLAC (claxon) by sniffing the header; always encodes 16-bit WAV.
#[derive(Debug, Default, Clone, Copy)]
pub struct WavCodec;

impl Codec for WavCodec {
    fn decode(&self, bytes: &[u8]) -> Result<AudioBuffer, CodecError> {
        if bytes.starts_with(b"RIFF") {
            decode_wav(bytes)
        } else if bytes.starts_with(b"fLaC") {
            decode_flac(bytes)
        } else {
            let head: String = bytes
                .iter()
                .take(4)
                .map(|b| format!("{b:02x}"))
                .collect();
            Err(CodecError::UnsupportedFormat(format!("unrecognised header {head}")))
        }
    }

    fn encode(&self, audio: &AudioBuffer) -> Result<Vec<u8>, CodecError> {
        let spec = hound::WavSpec {
            channels: audio.channels,
            sample_rate: audio.frame_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut out = Vec::with_capacity(44 + audio.samples.len() * 2);
        {
            let mut writer = hound::WavWriter::new(Cursor::new(&mut out), spec)?;
            for &s in &audio.samples {
                writer.write_sample(s)?;
            }
            writer.finalize()?;
        }
        Ok(out)
    }

    fn extension(&self) -> &'static str {
        "wav"
    }
}

fn decode_wav(bytes: &[u8]) -> Result<AudioBuffer, CodecError> {
    let reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();

    let samples: Vec<i16> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
            .collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let bits = spec.bits_per_sample as u32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| to_i16(v, bits)))
                .collect::<Result<_, _>>()?
        }
    };

    Ok(AudioBuffer::new(samples, spec.channels, spec.sample_rate))
}

fn decode_flac(bytes: &[u8]) -> Result<AudioBuffer, CodecError> {
    let mut reader = claxon::FlacReader::new(Cursor::new(bytes))?;
    let info = reader.streaminfo();
    let channels = u16::try_from(info.channels)
        .map_err(|_| CodecError::Invalid(format!("{} channels", info.channels)))?;
    let bits = info.bits_per_sample;

    let samples = reader
        .samples()
        .map(|s| s.map(|v| to_i16(v, bits)))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(AudioBuffer::new(samples, channels, info.sample_rate))
}

/// Rescale an integer sample of `bits` width to 16 bits.
fn to_i16(v: i32, bits: u32) -> i16 {
    if bits > 16 {
        (v >> (bits - 16)) as i16
    } else {
        (v << (16 - bits)) as i16
    }
}
