//! Real-time voice synchronization for murmur
//!
//! This crate provides:
//! - Energy based voiced/unvoiced classification of microphone blocks
//! - Turn segmentation that gates audio forwarding to a conversational service
//! - Viseme scheduling that keeps mouth shapes in step with synthesized speech
//! - A voice session tying the pieces to their external collaborators
//! - Microphone capture via `cpal` (feature: `backend-cpal`)

pub mod classifier;
pub mod clock;
pub mod error;
pub mod framer;
pub mod scheduler;
pub mod segmenter;
pub mod session;
pub mod traits;
pub mod types;

#[cfg(feature = "backend-cpal")]
pub mod cpal_backend;

#[cfg(not(feature = "backend-cpal"))]
pub mod dummy_backend;

pub use classifier::EnergyClassifier;
pub use clock::PlaybackClock;
pub use error::SyncError;
pub use framer::BlockFramer;
pub use scheduler::{SchedulerConfig, SchedulerStats, VisemeDisposition, VisemeScheduler};
pub use segmenter::{SegmenterConfig, TurnSegmenter, TurnState};
pub use session::{SessionConfig, SessionEvent, VoiceSession};
pub use traits::{
    BlockSource, ChannelConversationSink, ConversationMessage, ConversationSink, MouthShapeSink,
    SpeechSynthesizer,
};
pub use types::{
    AudioBlock, ShapeId, SynthesisEvent, TurnSignal, UtteranceId, VisemeEvent, VoicingDecision,
};

// Default capture backend
#[cfg(feature = "backend-cpal")]
pub use cpal_backend::CpalBlockSource as MicrophoneSource;

#[cfg(not(feature = "backend-cpal"))]
pub use dummy_backend::DummyBlockSource as MicrophoneSource;
