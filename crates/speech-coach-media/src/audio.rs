//! Audio payloads moving through the pipeline.

use bytes::Bytes;

const KNOWN_EXTENSIONS: [&str; 6] = ["webm", "mp4", "m4a", "mp3", "ogg", "wav"];

/// An uploaded recording as received from the client.
#[derive(Debug, Clone)]
pub struct AudioFile {
    pub data: Bytes,
    pub filename: Option<String>,
    pub content_type: Option<String>,
}

impl AudioFile {
    pub fn new(data: impl Into<Bytes>, filename: Option<String>, content_type: Option<String>) -> Self {
        Self {
            data: data.into(),
            filename,
            content_type,
        }
    }

    /// File extension from the filename, then the content type, defaulting to webm.
    pub fn extension(&self) -> String {
        if let Some(ext) = self
            .filename
            .as_deref()
            .and_then(|f| f.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| KNOWN_EXTENSIONS.contains(&ext.as_str()))
        {
            return ext;
        }

        let essence = self
            .content_type
            .as_deref()
            .and_then(|ct| ct.split(';').next())
            .map(|ct| ct.trim().to_ascii_lowercase());
        match essence.as_deref() {
            Some("audio/mp4") => "mp4",
            Some("audio/mpeg") | Some("audio/mp3") => "mp3",
            Some("audio/ogg") => "ogg",
            Some("audio/wav") | Some("audio/x-wav") | Some("audio/wave") => "wav",
            _ => "webm",
        }
        .to_string()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Encoded audio with its container format.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedAudio {
    pub data: Bytes,
    /// Extension of the container, e.g. "mp3".
    pub format: String,
}

impl EncodedAudio {
    pub fn new(data: impl Into<Bytes>, format: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            format: format.into(),
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self.format.as_str() {
            "mp3" => "audio/mpeg",
            "wav" => "audio/wav",
            "ogg" => "audio/ogg",
            "mp4" | "m4a" => "audio/mp4",
            _ => "audio/webm",
        }
    }
}
