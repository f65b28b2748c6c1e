use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::Value;

use speech_coach_core::config::{Config, ServerConfig};
use speech_coach_core::protocol::AnalysisEvent;
use speech_coach_core::store::{AnalysisStore, FileStore};
use speech_coach_gateway::{AppState, start_gateway};
use speech_coach_media::AudioFile;
use speech_coach_pipeline::AnalysisRequest;

mod logging;

#[derive(Parser)]
#[command(
    name = "speech-coach",
    about = "Spoken-answer analysis: transcription, scoring and chunk-level coaching",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve {
        /// Port to listen on (default: 8000)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Analyze a recorded answer and print pipeline events
    Analyze {
        /// Audio file (webm, mp4, mp3, ogg or wav)
        file: PathBuf,

        /// Question the recording answers
        #[arg(short, long)]
        question: String,

        /// Owner of the recording
        #[arg(long)]
        user: Option<String>,

        /// Print raw NDJSON events instead of progress lines
        #[arg(long)]
        json: bool,
    },

    /// Show an analysis task by task id or recording id
    Task { id: String },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Check the configuration for problems
    Validate,
    /// Get a specific config value
    Get { key: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load(&config_path)?;

    logging::init(&config.logging.clone().unwrap_or_default(), cli.verbose)?;
    tracing::debug!(path = %config_path.display(), "Loaded config");

    match cli.command {
        Commands::Serve { port } => {
            if let Some(port) = port {
                match config.server.as_mut() {
                    Some(server) => server.port = port,
                    None => {
                        config.server = Some(ServerConfig {
                            bind: None,
                            port,
                            cors_origins: Vec::new(),
                        })
                    }
                }
            }
            let (_, errors) = config.validate();
            if !errors.is_empty() {
                anyhow::bail!("invalid configuration: {}", errors.join("; "));
            }
            let state = AppState::from_config(config).await?;
            start_gateway(Arc::new(state)).await?;
        }
        Commands::Analyze {
            file,
            question,
            user,
            json,
        } => analyze(config, file, question, user, json).await?,
        Commands::Task { id } => {
            let Some(path) = config.store_path() else {
                anyhow::bail!("no store path configured; task lookup needs a persistent store");
            };
            let store = FileStore::open(path).await?;
            let task = match store.get_task(&id).await? {
                Some(task) => Some(task),
                None => store.get_task_for_recording(&id).await?,
            };
            match task {
                Some(task) => println!("{}", serde_json::to_string_pretty(&task)?),
                None => anyhow::bail!("no analysis task found for {id}"),
            }
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Validate => {
                let (warnings, errors) = config.validate();
                for w in &warnings {
                    println!("warning: {w}");
                }
                for e in &errors {
                    println!("error: {e}");
                }
                if !errors.is_empty() {
                    anyhow::bail!("{} configuration error(s)", errors.len());
                }
                println!("Config OK: {}", config_path.display());
            }
            ConfigAction::Get { key } => match config.get_path(&key) {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => anyhow::bail!("no config value at {key}"),
            },
        },
    }

    Ok(())
}

async fn analyze(
    config: Config,
    file: PathBuf,
    question_id: String,
    user_id: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let data = tokio::fs::read(&file).await?;
    let filename = file.file_name().map(|n| n.to_string_lossy().into_owned());
    let full_scale = config.scoring().full_scale;
    let state = AppState::from_config(config).await?;

    let mut events = state.pipeline.start(AnalysisRequest {
        question_id,
        user_id,
        audio: AudioFile::new(data, filename, None),
    });

    let mut failure = None;
    while let Some(event) = events.next_event().await {
        if json {
            print!("{}", event.to_ndjson()?);
        } else {
            print_progress(&event, full_scale)?;
        }
        if let AnalysisEvent::Error { message, .. } = &event {
            failure = Some(message.clone());
        }
    }
    state.gateway.shutdown();

    match failure {
        Some(message) => anyhow::bail!("analysis failed: {message}"),
        None => Ok(()),
    }
}

fn print_progress(event: &AnalysisEvent, full_scale: u32) -> anyhow::Result<()> {
    let value = serde_json::to_value(event)?;
    match event {
        AnalysisEvent::Step { .. } => {
            println!(
                "[{}] {}",
                value["name"].as_str().unwrap_or_default(),
                value["status"].as_str().unwrap_or_default()
            );
        }
        AnalysisEvent::Completed {
            report,
            recording_ref,
            audio_url,
        } => {
            let global = &report.global_evaluation;
            println!(
                "Score: {}/{full_scale} ({})",
                global.total_score,
                value["report"]["global_evaluation"]["level"]
                    .as_str()
                    .unwrap_or_default()
            );
            println!("{}", global.overall_summary);
            for chunk in &report.chunks {
                println!(
                    "  #{} {} [{:.1}s-{:.1}s] {}",
                    chunk.chunk_id,
                    chunk.chunk_type.as_str(),
                    chunk.time_range[0],
                    chunk.time_range[1],
                    chunk.feedback.overview
                );
            }
            println!("Recording: {recording_ref}");
            println!("Audio: {audio_url}");
        }
        AnalysisEvent::Error { message, .. } => {
            let step = match &value["step"] {
                Value::String(s) => s.as_str(),
                _ => "-",
            };
            eprintln!("[{step}] error: {message}");
        }
    }
    Ok(())
}
