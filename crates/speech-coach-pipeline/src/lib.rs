//! Analysis pipeline: turns one recorded answer into a report while
//! streaming progress events.

pub mod channel;
pub mod orchestrator;
pub mod report;
pub mod sequencer;
pub mod voice;

pub use channel::{EventSender, EventStream, event_channel};
pub use orchestrator::{AnalysisOutcome, AnalysisRequest, PipelineOrchestrator, PipelineSettings};
pub use report::{ReportParts, assemble};
pub use sequencer::{ChunkAnalysisSequencer, RollingContext};
pub use voice::VoiceResynthesizer;
