//! Configuration loading and validation.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::{Question, Tier};

/// Top-level speech-coach configuration, loaded from a JSON5 file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub providers: Vec<ProviderConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub routing: Option<RoutingConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<StoreConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<PipelineConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub scoring: Option<ScoringConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub questions: Vec<Question>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

// --- Providers ---

/// Backends that implement the analysis capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Gemini,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Gemini => "gemini",
        }
    }

    /// Environment variable consulted when no key is configured.
    pub fn default_api_key_env(self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Gemini => "GEMINI_API_KEY",
        }
    }
}

/// Configuration for a single AI backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: ProviderKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcription_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_model: Option<String>,
}

impl ProviderConfig {
    /// A provider entry with no explicit settings.
    pub fn new(id: ProviderKind) -> Self {
        Self {
            id,
            api_key_env: None,
            api_key: None,
            base_url: None,
            transcription_model: None,
            audio_model: None,
            text_model: None,
        }
    }

    /// Resolve the API key: `api_key` field first, then the `api_key_env`
    /// variable, then the provider's conventional variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env).or_else(|| {
            std::env::var(self.id.default_api_key_env())
                .ok()
                .filter(|v| !v.is_empty())
        })
    }
}

/// Ordered backend preference per capability. The first entry is primary,
/// the rest are fallbacks tried in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default = "default_transcribe_route")]
    pub transcribe: Vec<ProviderKind>,
    #[serde(default = "default_audio_route")]
    pub evaluate_full: Vec<ProviderKind>,
    #[serde(default = "default_audio_route")]
    pub evaluate_chunk: Vec<ProviderKind>,
    #[serde(default = "default_text_route")]
    pub segment: Vec<ProviderKind>,
    #[serde(default = "default_text_route")]
    pub extend_viewpoints: Vec<ProviderKind>,
}

fn default_transcribe_route() -> Vec<ProviderKind> {
    vec![ProviderKind::OpenAi]
}

fn default_audio_route() -> Vec<ProviderKind> {
    vec![ProviderKind::Gemini, ProviderKind::OpenAi]
}

fn default_text_route() -> Vec<ProviderKind> {
    vec![ProviderKind::OpenAi, ProviderKind::Gemini]
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            transcribe: default_transcribe_route(),
            evaluate_full: default_audio_route(),
            evaluate_chunk: default_audio_route(),
            segment: default_text_route(),
            extend_viewpoints: default_text_route(),
        }
    }
}

impl RoutingConfig {
    /// All routes with their capability names.
    pub fn routes(&self) -> [(&'static str, &[ProviderKind]); 5] {
        [
            ("transcribe", &self.transcribe),
            ("evaluate_full", &self.evaluate_full),
            ("evaluate_chunk", &self.evaluate_chunk),
            ("segment", &self.segment),
            ("extend_viewpoints", &self.extend_viewpoints),
        ]
    }
}

/// ElevenLabs voice cloning / text-to-speech.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoiceConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_format: Option<String>,
}

impl VoiceConfig {
    /// Direct key, then `api_key_env`, then `ELEVENLABS_API_KEY`.
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env).or_else(|| {
            std::env::var("ELEVENLABS_API_KEY")
                .ok()
                .filter(|v| !v.is_empty())
        })
    }
}

// --- Storage ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for stored audio (default: `~/.speech_coach/blobs`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,

    /// Base URL used to build presigned links (default: `http://127.0.0.1:<port>`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing_secret: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing_secret_env: Option<String>,

    /// Lifetime of presigned URLs in seconds (default: 3600).
    #[serde(default = "default_presign_ttl")]
    pub presign_ttl_secs: u64,
}

fn default_presign_ttl() -> u64 {
    3600
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: None,
            public_base_url: None,
            signing_secret: None,
            signing_secret_env: None,
            presign_ttl_secs: default_presign_ttl(),
        }
    }
}

impl StorageConfig {
    pub fn resolve_signing_secret(&self) -> Option<String> {
        resolve_secret_field(&self.signing_secret, &self.signing_secret_env)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// JSON state file. In-memory when omitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

// --- Server ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_port() -> u16 {
    8000
}

// --- Pipeline ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Capacity of the per-run event channel (default: 64).
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// How long the event consumer waits before re-checking the producer (default: 200ms).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Concurrent blocking transcode jobs (default: 2).
    #[serde(default = "default_transcode_workers")]
    pub transcode_workers: usize,

    /// Max characters of each prior-chunk synopsis (default: 160).
    #[serde(default = "default_synopsis_chars")]
    pub synopsis_chars: usize,

    /// Per-attempt provider timeout. No timeout when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_timeout_secs: Option<u64>,

    /// Fail the run when the event consumer goes away.
    #[serde(default)]
    pub cancel_on_disconnect: bool,

    /// ffmpeg binary used for transcoding (default: `ffmpeg` on PATH).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ffmpeg_path: Option<String>,
}

fn default_event_buffer() -> usize {
    64
}

fn default_poll_interval_ms() -> u64 {
    200
}

fn default_transcode_workers() -> usize {
    2
}

fn default_synopsis_chars() -> usize {
    160
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            event_buffer: default_event_buffer(),
            poll_interval_ms: default_poll_interval_ms(),
            transcode_workers: default_transcode_workers(),
            synopsis_chars: default_synopsis_chars(),
            provider_timeout_secs: None,
            cancel_on_disconnect: false,
            ffmpeg_path: None,
        }
    }
}

// --- Scoring ---

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierThreshold {
    pub min_total: u32,
    pub tier: Tier,
}

/// Fixed scoring formula parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_max_sub_score")]
    pub max_sub_score: f64,

    #[serde(default = "default_full_scale")]
    pub full_scale: u32,

    /// Checked in order; the first threshold met wins, otherwise `fallback_tier`.
    #[serde(default = "default_tiers")]
    pub tiers: Vec<TierThreshold>,

    #[serde(default = "default_fallback_tier")]
    pub fallback_tier: Tier,
}

fn default_max_sub_score() -> f64 {
    10.0
}

fn default_full_scale() -> u32 {
    30
}

fn default_tiers() -> Vec<TierThreshold> {
    vec![
        TierThreshold { min_total: 24, tier: Tier::Excellent },
        TierThreshold { min_total: 18, tier: Tier::Good },
        TierThreshold { min_total: 14, tier: Tier::Fair },
    ]
}

fn default_fallback_tier() -> Tier {
    Tier::Weak
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            max_sub_score: default_max_sub_score(),
            full_scale: default_full_scale(),
            tiers: default_tiers(),
            fallback_tier: default_fallback_tier(),
        }
    }
}

// --- Logging ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "speech_coach_pipeline=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").expect("static regex");
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let substituted = substitute_env_vars(&raw);

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| crate::error::SpeechCoachError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Default config file path.
    pub fn default_path() -> PathBuf {
        data_dir().join("config.json")
    }

    pub fn server_port(&self) -> u16 {
        self.server.as_ref().map(|s| s.port).unwrap_or_else(default_port)
    }

    pub fn server_bind(&self) -> String {
        self.server
            .as_ref()
            .and_then(|s| s.bind.clone())
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }

    pub fn routing(&self) -> RoutingConfig {
        self.routing.clone().unwrap_or_default()
    }

    pub fn pipeline(&self) -> PipelineConfig {
        self.pipeline.clone().unwrap_or_default()
    }

    pub fn scoring(&self) -> ScoringConfig {
        self.scoring.clone().unwrap_or_default()
    }

    pub fn storage(&self) -> StorageConfig {
        self.storage.clone().unwrap_or_default()
    }

    /// Directory holding stored audio blobs.
    pub fn blob_root(&self) -> PathBuf {
        self.storage
            .as_ref()
            .and_then(|s| s.root.as_ref())
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir().join("blobs"))
    }

    /// Base URL for presigned links.
    pub fn public_base_url(&self) -> String {
        self.storage
            .as_ref()
            .and_then(|s| s.public_base_url.clone())
            .unwrap_or_else(|| format!("http://127.0.0.1:{}", self.server_port()))
            .trim_end_matches('/')
            .to_string()
    }

    pub fn store_path(&self) -> Option<PathBuf> {
        self.store
            .as_ref()
            .and_then(|s| s.path.as_ref())
            .map(PathBuf::from)
    }

    /// Find a provider config by kind.
    pub fn provider(&self, kind: ProviderKind) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.id == kind)
    }

    /// Get a config value by dotted path (e.g. "server.port", "pipeline.event_buffer").
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        for p in &self.providers {
            if p.resolve_api_key().is_none() {
                warnings.push(format!(
                    "Provider '{}' has no API key configured",
                    p.id.as_str()
                ));
            }
        }

        let configured: HashSet<ProviderKind> = self.providers.iter().map(|p| p.id).collect();
        for (capability, route) in self.routing().routes() {
            if route.is_empty() {
                if capability == "extend_viewpoints" {
                    warnings.push("No route for extend_viewpoints; reports will omit viewpoint extensions".into());
                } else {
                    errors.push(format!("Route for {capability} is empty"));
                }
                continue;
            }
            for kind in route {
                if !configured.contains(kind) {
                    warnings.push(format!(
                        "Route {capability} references provider '{}' which is not configured",
                        kind.as_str()
                    ));
                }
            }
        }

        if self
            .voice
            .as_ref()
            .is_some_and(|v| v.resolve_api_key().is_none())
        {
            warnings.push("Voice section present but no ElevenLabs API key; resynthesis disabled".into());
        }

        let scoring = self.scoring();
        if !(scoring.max_sub_score.is_finite() && scoring.max_sub_score > 0.0) {
            errors.push("scoring.max_sub_score must be a positive number".into());
        }
        if scoring.full_scale == 0 {
            errors.push("scoring.full_scale must be greater than 0".into());
        }
        if scoring
            .tiers
            .windows(2)
            .any(|w| w[0].min_total < w[1].min_total)
        {
            errors.push("scoring.tiers must be ordered from highest to lowest threshold".into());
        }

        if let Some(server) = &self.server {
            if server.port == 0 {
                errors.push("Server port cannot be 0".to_string());
            }
        }

        let mut seen = HashSet::new();
        for q in &self.questions {
            if !seen.insert(q.question_id.as_str()) {
                errors.push(format!("Duplicate question id '{}'", q.question_id));
            }
        }

        (warnings, errors)
    }
}

/// Base directory for speech-coach data: `~/.speech_coach/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".speech_coach")
}
