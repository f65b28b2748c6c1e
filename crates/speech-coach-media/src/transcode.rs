//! Blocking transcoders. Run them through [`crate::TranscodePool`], never
//! directly on the async runtime.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use tracing::debug;

use speech_coach_core::error::{Result, SpeechCoachError};

/// Converts uploads to the stored format and cuts time ranges out of it.
pub trait AudioTranscoder: Send + Sync {
    /// Extension of the format `normalize` and `slice` produce.
    fn output_format(&self) -> &'static str;

    /// Re-encode `input` (container given by `input_format`) to the output format.
    fn normalize(&self, input: &[u8], input_format: &str) -> Result<Vec<u8>>;

    /// Cut `[start_ms, end_ms)` out of normalized audio. The window is clamped
    /// to the recording; an empty window yields no bytes.
    fn slice(&self, input: &[u8], start_ms: u64, end_ms: u64) -> Result<Vec<u8>>;
}

/// Transcoder backed by the `ffmpeg` binary, producing mono MP3.
pub struct FfmpegTranscoder {
    binary: PathBuf,
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new(None)
    }
}

impl FfmpegTranscoder {
    pub fn new(binary: Option<PathBuf>) -> Self {
        Self {
            binary: binary.unwrap_or_else(|| PathBuf::from("ffmpeg")),
        }
    }

    /// Whether the binary can be executed.
    pub fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|s| s.success())
    }

    /// Pipe `input` through ffmpeg with the given arguments, returning stdout.
    fn run(&self, args: &[String], input: &[u8]) -> Result<Vec<u8>> {
        let mut child = Command::new(&self.binary)
            .args(["-hide_banner", "-loglevel", "error"])
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SpeechCoachError::Media(format!("failed to start {}: {e}", self.binary.display())))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| SpeechCoachError::Media("ffmpeg stdin unavailable".into()))?;
        let input = input.to_vec();
        // Feed stdin from another thread so a full stdout pipe cannot deadlock us.
        let writer = std::thread::spawn(move || stdin.write_all(&input));

        let output = child
            .wait_with_output()
            .map_err(|e| SpeechCoachError::Media(format!("ffmpeg failed: {e}")))?;
        let write_result = writer
            .join()
            .map_err(|_| SpeechCoachError::Media("ffmpeg stdin writer panicked".into()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SpeechCoachError::Media(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        // A broken pipe is fine once ffmpeg has exited successfully.
        if let Err(e) = write_result {
            debug!(%e, "ffmpeg closed stdin early");
        }
        if output.stdout.is_empty() {
            return Err(SpeechCoachError::Media("ffmpeg produced no output".into()));
        }
        Ok(output.stdout)
    }
}

fn mp3_output_args() -> Vec<String> {
    ["-vn", "-ac", "1", "-codec:a", "libmp3lame", "-b:a", "128k", "-f", "mp3", "pipe:1"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn seconds(ms: u64) -> String {
    format!("{}.{:03}", ms / 1000, ms % 1000)
}

impl AudioTranscoder for FfmpegTranscoder {
    fn output_format(&self) -> &'static str {
        "mp3"
    }

    fn normalize(&self, input: &[u8], input_format: &str) -> Result<Vec<u8>> {
        debug!(input_format, bytes = input.len(), "Transcoding to mp3");
        let mut args = vec!["-i".to_string(), "pipe:0".to_string()];
        args.extend(mp3_output_args());
        self.run(&args, input)
    }

    fn slice(&self, input: &[u8], start_ms: u64, end_ms: u64) -> Result<Vec<u8>> {
        if end_ms <= start_ms {
            return Ok(Vec::new());
        }
        let mut args = vec![
            "-i".to_string(),
            "pipe:0".to_string(),
            "-ss".to_string(),
            seconds(start_ms),
            "-to".to_string(),
            seconds(end_ms),
        ];
        args.extend(mp3_output_args());
        self.run(&args, input)
    }
}
