//! Application services - Provider routing and the orchestrator facade

mod context;
mod fallback;
mod orchestrator;
mod provider_manager;
mod stt_manager;
mod tts_manager;

pub use context::VoiceContext;
pub use orchestrator::{LifecycleState, VoiceOrchestrator};
pub use provider_manager::{ProviderHealthStatus, ProviderManager};
pub use stt_manager::SttManager;
pub use tts_manager::TtsManager;
