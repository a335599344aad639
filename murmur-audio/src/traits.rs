use anyhow::Result;
use tokio::sync::mpsc;

use crate::error::SyncError;
use crate::types::{AudioBlock, ShapeId, UtteranceId};

/// Source of fixed-size microphone blocks
pub trait BlockSource: Send {
    /// Start capturing and return a channel of blocks
    fn start(&mut self) -> Result<mpsc::UnboundedReceiver<AudioBlock>>;
}

/// Turn-based conversational service that receives gated user audio
pub trait ConversationSink: Send {
    fn activity_start(&mut self) -> Result<(), SyncError>;
    fn activity_end(&mut self) -> Result<(), SyncError>;
    fn send_audio(&mut self, block: &AudioBlock) -> Result<(), SyncError>;
}

/// Speech synthesis service. Results come back as `SynthesisEvent`s.
pub trait SpeechSynthesizer: Send {
    fn speak(&mut self, utterance: UtteranceId, text: &str) -> Result<(), SyncError>;
}

/// Visual output showing the current mouth shape
pub trait MouthShapeSink: Send + Sync {
    fn set_mouth_shape(&self, shape: ShapeId);
}

impl<F> MouthShapeSink for F
where
    F: Fn(ShapeId) + Send + Sync,
{
    fn set_mouth_shape(&self, shape: ShapeId) {
        self(shape)
    }
}

/// Messages forwarded to a conversational service over a channel
#[derive(Debug, Clone, PartialEq)]
pub enum ConversationMessage {
    ActivityStart,
    Audio(AudioBlock),
    ActivityEnd,
}

/// `ConversationSink` backed by an unbounded tokio channel.
/// Sending fails with `TransportFailure` once the receiver is dropped.
pub struct ChannelConversationSink {
    tx: mpsc::UnboundedSender<ConversationMessage>,
}

impl ChannelConversationSink {
    pub fn new(tx: mpsc::UnboundedSender<ConversationMessage>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ConversationMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    fn send(&self, message: ConversationMessage) -> Result<(), SyncError> {
        self.tx
            .send(message)
            .map_err(|_| SyncError::TransportFailure("conversation channel closed".to_string()))
    }
}

impl ConversationSink for ChannelConversationSink {
    fn activity_start(&mut self) -> Result<(), SyncError> {
        self.send(ConversationMessage::ActivityStart)
    }

    fn activity_end(&mut self) -> Result<(), SyncError> {
        self.send(ConversationMessage::ActivityEnd)
    }

    fn send_audio(&mut self, block: &AudioBlock) -> Result<(), SyncError> {
        self.send(ConversationMessage::Audio(block.clone()))
    }
}
