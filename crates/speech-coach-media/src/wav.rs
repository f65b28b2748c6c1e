//! Pure-Rust WAV transcoder for deployments without ffmpeg.
//!
//! Only accepts WAV input. Output is 16-bit mono PCM at the source sample rate.

use std::io::Cursor;

use tracing::debug;

use speech_coach_core::error::{Result, SpeechCoachError};

use crate::transcode::AudioTranscoder;

/// Decoded mono PCM.
#[derive(Debug, Clone, PartialEq)]
pub struct Pcm {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl Pcm {
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / self.sample_rate as u64
    }

    fn index_at(&self, ms: u64) -> usize {
        let idx = ms.saturating_mul(self.sample_rate as u64) / 1000;
        (idx as usize).min(self.samples.len())
    }
}

/// Decode WAV bytes to mono 16-bit PCM, averaging channels.
pub fn decode_wav(data: &[u8]) -> Result<Pcm> {
    let mut reader = hound::WavReader::new(Cursor::new(data))
        .map_err(|e| SpeechCoachError::Media(format!("failed to parse WAV: {e}")))?;
    let spec = reader.spec();

    let raw: Vec<i16> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| SpeechCoachError::Media(format!("failed to read WAV samples: {e}")))?,
        (hound::SampleFormat::Float, 32) => reader
            .samples::<f32>()
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| SpeechCoachError::Media(format!("failed to read WAV samples: {e}")))?,
        (format, bits) => {
            return Err(SpeechCoachError::Media(format!(
                "unsupported WAV sample format {format:?} at {bits} bits"
            )));
        }
    };

    let channels = spec.channels.max(1) as usize;
    let samples = if channels == 1 {
        raw
    } else {
        raw.chunks_exact(channels)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                (sum / channels as i32) as i16
            })
            .collect()
    };

    Ok(Pcm {
        samples,
        sample_rate: spec.sample_rate,
    })
}

/// Wrap raw 16-bit mono PCM in a WAV container.
pub fn pcm_to_wav(pcm: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let encode_err = |e: hound::Error| SpeechCoachError::Media(format!("failed to encode WAV: {e}"));

    let mut cursor = Cursor::new(Vec::with_capacity(44 + pcm.len() * 2));
    let mut writer = hound::WavWriter::new(&mut cursor, spec).map_err(encode_err)?;
    for &sample in pcm {
        writer.write_sample(sample).map_err(encode_err)?;
    }
    writer.finalize().map_err(encode_err)?;
    Ok(cursor.into_inner())
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WavTranscoder;

impl AudioTranscoder for WavTranscoder {
    fn output_format(&self) -> &'static str {
        "wav"
    }

    fn normalize(&self, input: &[u8], input_format: &str) -> Result<Vec<u8>> {
        if input_format != "wav" {
            return Err(SpeechCoachError::Media(format!(
                "cannot decode {input_format} without ffmpeg"
            )));
        }
        let pcm = decode_wav(input)?;
        if pcm.samples.is_empty() {
            return Err(SpeechCoachError::Media("recording contains no audio".into()));
        }
        pcm_to_wav(&pcm.samples, pcm.sample_rate)
    }

    fn slice(&self, input: &[u8], start_ms: u64, end_ms: u64) -> Result<Vec<u8>> {
        let pcm = decode_wav(input)?;
        let start = pcm.index_at(start_ms);
        let end = pcm.index_at(end_ms);
        if end <= start {
            debug!(start_ms, end_ms, duration_ms = pcm.duration_ms(), "Slice window is empty");
            return Ok(Vec::new());
        }
        pcm_to_wav(&pcm.samples[start..end], pcm.sample_rate)
    }
}
