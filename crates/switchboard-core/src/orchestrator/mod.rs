//! Per-message chat pipeline: session resolution, persistence, and the
//! streamed AI reply.

pub mod guard;
pub mod message_store;
pub mod orchestrator;

pub use guard::GenerationGuard;
pub use message_store::{InMemoryMessageStore, MessageStore};
pub use orchestrator::{ChatAccepted, InboundChat, OrchestratorSettings, StreamingOrchestrator};
