//! Bounded worker pool for blocking transcode work.

use std::sync::Arc;

use futures::future::try_join_all;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use speech_coach_core::config::PipelineConfig;
use speech_coach_core::error::{Result, SpeechCoachError};

use crate::audio::{AudioFile, EncodedAudio};
use crate::transcode::{AudioTranscoder, FfmpegTranscoder};
use crate::wav::WavTranscoder;

/// Runs an [`AudioTranscoder`] on tokio's blocking pool, at most `workers`
/// jobs at a time across all pipeline runs sharing the pool.
#[derive(Clone)]
pub struct TranscodePool {
    transcoder: Arc<dyn AudioTranscoder>,
    permits: Arc<Semaphore>,
}

impl TranscodePool {
    pub fn new(transcoder: Arc<dyn AudioTranscoder>, workers: usize) -> Self {
        Self {
            transcoder,
            permits: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    /// ffmpeg when it can be executed, otherwise the WAV-only transcoder.
    pub fn from_config(config: &PipelineConfig) -> Self {
        let ffmpeg = FfmpegTranscoder::new(config.ffmpeg_path.as_ref().map(Into::into));
        let transcoder: Arc<dyn AudioTranscoder> = if ffmpeg.is_available() {
            info!(workers = config.transcode_workers, "Transcoding with ffmpeg");
            Arc::new(ffmpeg)
        } else {
            warn!("ffmpeg not found; only WAV uploads can be analysed");
            Arc::new(WavTranscoder)
        };
        Self::new(transcoder, config.transcode_workers)
    }

    pub fn output_format(&self) -> &'static str {
        self.transcoder.output_format()
    }

    async fn run<F>(&self, job: F) -> Result<Vec<u8>>
    where
        F: FnOnce(&dyn AudioTranscoder) -> Result<Vec<u8>> + Send + 'static,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| SpeechCoachError::Media("transcode pool closed".into()))?;
        let transcoder = self.transcoder.clone();
        tokio::task::spawn_blocking(move || job(&*transcoder))
            .await
            .map_err(|e| SpeechCoachError::Media(format!("transcode task panicked: {e}")))?
    }

    /// Re-encode an upload into the stored format.
    pub async fn normalize(&self, file: &AudioFile) -> Result<EncodedAudio> {
        if file.is_empty() {
            return Err(SpeechCoachError::Validation("audio file is empty".into()));
        }
        let input = file.data.clone();
        let input_format = file.extension();
        debug!(%input_format, bytes = input.len(), "Normalizing upload");
        let output = self
            .run(move |t| t.normalize(&input, &input_format))
            .await?;
        Ok(EncodedAudio::new(output, self.output_format()))
    }

    /// Cut one clip per `(start, end)` range in seconds, in order. Ranges are
    /// clamped to the recording; an empty range yields an empty clip.
    pub async fn slice_chunks(
        &self,
        audio: &EncodedAudio,
        ranges: &[(f64, f64)],
    ) -> Result<Vec<EncodedAudio>> {
        let jobs = ranges.iter().map(|&(start, end)| {
            let input = audio.data.clone();
            let start_ms = to_millis(start);
            let end_ms = to_millis(end);
            async move {
                if end_ms <= start_ms {
                    debug!(start_ms, end_ms, "Empty chunk range, skipping slice");
                    return Ok(EncodedAudio::new(Vec::new(), self.output_format()));
                }
                let output = self
                    .run(move |t| t.slice(&input, start_ms, end_ms))
                    .await?;
                Ok::<_, SpeechCoachError>(EncodedAudio::new(output, self.output_format()))
            }
        });
        try_join_all(jobs).await
    }
}

fn to_millis(seconds: f64) -> u64 {
    if seconds.is_finite() && seconds > 0.0 {
        (seconds * 1000.0).round() as u64
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wav::{WavTranscoder, decode_wav, pcm_to_wav};

    fn pool() -> TranscodePool {
        TranscodePool::new(Arc::new(WavTranscoder), 2)
    }

    #[test]
    fn test_to_millis() {
        assert_eq!(to_millis(1.2345), 1235);
        assert_eq!(to_millis(-1.0), 0);
        assert_eq!(to_millis(f64::NAN), 0);
    }

    #[tokio::test]
    async fn test_normalize_rejects_empty_upload() {
        let err = pool()
            .normalize(&AudioFile::new(Vec::<u8>::new(), None, None))
            .await
            .unwrap_err();
        assert!(matches!(err, SpeechCoachError::Validation(_)));
    }

    #[tokio::test]
    async fn test_normalize_and_slice_in_order() {
        let samples: Vec<i16> = (0..3000).map(|i| (i % 1000) as i16).collect();
        let upload = AudioFile::new(
            pcm_to_wav(&samples, 1000).unwrap(),
            Some("answer.wav".into()),
            Some("audio/wav".into()),
        );
        let pool = pool();
        let normalized = pool.normalize(&upload).await.unwrap();
        assert_eq!(normalized.format, "wav");

        let clips = pool
            .slice_chunks(&normalized, &[(0.0, 1.0), (1.0, 2.5), (2.5, 3.0)])
            .await
            .unwrap();
        let lens: Vec<usize> = clips
            .iter()
            .map(|c| decode_wav(&c.data).unwrap().samples.len())
            .collect();
        assert_eq!(lens, vec![1000, 1500, 500]);
    }

    #[tokio::test]
    async fn test_out_of_range_chunks_yield_empty_clips() {
        let normalized = EncodedAudio::new(pcm_to_wav(&[0; 1000], 1000).unwrap(), "wav");
        let clips = pool()
            .slice_chunks(&normalized, &[(0.5, 1.4), (1.0, 1.0), (5.0, 6.0)])
            .await
            .unwrap();
        assert_eq!(clips.len(), 3);
        assert_eq!(decode_wav(&clips[0].data).unwrap().samples.len(), 500);
        assert!(clips[1].data.is_empty());
        assert!(clips[2].data.is_empty());
        assert!(clips.iter().all(|c| c.format == "wav"));
    }

    #[tokio::test]
    async fn test_slice_failure_fails_the_batch() {
        let garbage = EncodedAudio::new(b"not a wav file".to_vec(), "wav");
        let result = pool()
            .slice_chunks(&garbage, &[(0.0, 0.5), (0.5, 1.0)])
            .await;
        assert!(matches!(result, Err(SpeechCoachError::Media(_))));
    }
}
