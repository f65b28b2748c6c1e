//! Media handling: uploaded audio, transcoding, and time-range slicing.

pub mod audio;
pub mod pool;
pub mod transcode;
pub mod wav;

pub use audio::{AudioFile, EncodedAudio};
pub use pool::TranscodePool;
pub use transcode::{AudioTranscoder, FfmpegTranscoder};
pub use wav::WavTranscoder;
