//! Voice session wiring
//!
//! Routes microphone blocks through the turn segmenter, hands reply text to
//! the synthesizer, and feeds synthesis events into the viseme scheduler.
//! Everything runs on one logical timeline; `run` selects over the three
//! input channels and handles one event at a time.

use std::sync::Arc;

use config::Settings;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::scheduler::{SchedulerConfig, VisemeScheduler};
use crate::segmenter::{SegmenterConfig, TurnSegmenter, TurnState};
use crate::traits::{ConversationSink, MouthShapeSink, SpeechSynthesizer};
use crate::types::{AudioBlock, SynthesisEvent, TurnSignal, UtteranceId, VisemeEvent};

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub segmenter: SegmenterConfig,
    pub scheduler: SchedulerConfig,
    /// Cancel the reply being spoken when the user starts a new turn
    pub barge_in: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for SessionConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            segmenter: SegmenterConfig::from(&settings.vad),
            scheduler: SchedulerConfig::from(&settings.lipsync),
            barge_in: settings.lipsync.barge_in,
        }
    }
}

/// Events from the voice session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// User speech confirmed, turn opened
    TurnStarted,
    /// Trailing silence confirmed, turn closed
    TurnEnded,
    /// Synthesis was requested for a reply
    Speaking(UtteranceId),
    /// Synthesis finished; the mouth closes once the last viseme has played
    SpeechCompleted(UtteranceId),
    /// Reply cut off because the user started talking
    Interrupted(UtteranceId),
    Error(String),
}

pub struct VoiceSession<C, S> {
    segmenter: TurnSegmenter,
    scheduler: VisemeScheduler,
    conversation: C,
    synthesizer: S,
    barge_in: bool,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
}

impl<C, S> VoiceSession<C, S>
where
    C: ConversationSink,
    S: SpeechSynthesizer,
{
    /// Create a session and its event stream. Spawns the scheduler driver,
    /// so this must run inside a Tokio runtime.
    pub fn new(
        config: SessionConfig,
        conversation: C,
        synthesizer: S,
        mouth: Arc<dyn MouthShapeSink>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let session = Self {
            segmenter: TurnSegmenter::new(config.segmenter),
            scheduler: VisemeScheduler::spawn(config.scheduler, mouth),
            conversation,
            synthesizer,
            barge_in: config.barge_in,
            event_tx,
        };
        (session, event_rx)
    }

    pub fn turn_state(&self) -> TurnState {
        self.segmenter.state()
    }

    pub fn segmenter(&self) -> &TurnSegmenter {
        &self.segmenter
    }

    pub fn scheduler(&self) -> &VisemeScheduler {
        &self.scheduler
    }

    pub fn conversation(&self) -> &C {
        &self.conversation
    }

    pub fn synthesizer(&self) -> &S {
        &self.synthesizer
    }

    /// Classify and route one microphone block
    pub fn handle_block(&mut self, block: AudioBlock) {
        match self.segmenter.process_block(block, &mut self.conversation) {
            Ok(Some(TurnSignal::TurnStart)) => {
                if self.barge_in {
                    self.interrupt();
                }
                self.emit(SessionEvent::TurnStarted);
            }
            Ok(Some(TurnSignal::TurnEnd)) => self.emit(SessionEvent::TurnEnded),
            Ok(None) => {}
            Err(e) => warn!("Dropping audio block: {}", e),
        }
    }

    /// Speak a reply. A reply still in flight is superseded.
    pub fn handle_reply(&mut self, text: &str) -> Result<UtteranceId> {
        let id = self.scheduler.begin_utterance();

        if let Err(e) = self.synthesizer.speak(id, text) {
            warn!(utterance = %id, "Synthesizer rejected reply: {}", e);
            self.scheduler.cancel_utterance(id);
            self.emit(SessionEvent::Error(e.to_string()));
            return Err(e);
        }

        debug!(utterance = %id, chars = text.len(), "Reply sent to synthesizer");
        self.emit(SessionEvent::Speaking(id));
        Ok(id)
    }

    pub fn handle_synthesis_event(&mut self, event: SynthesisEvent) -> Result<()> {
        if self.scheduler.current_utterance() != Some(event.utterance()) {
            debug!(utterance = %event.utterance(), "Synthesis event for inactive utterance");
        }
        match event {
            SynthesisEvent::Started { utterance } | SynthesisEvent::AudioChunk { utterance, .. } => {
                self.scheduler
                    .on_audio_chunk_delivered(utterance, Instant::now());
            }
            SynthesisEvent::Viseme {
                utterance,
                offset_ticks,
                shape,
            } => {
                self.scheduler
                    .on_viseme_event(utterance, VisemeEvent::from_ticks(offset_ticks, shape));
            }
            SynthesisEvent::Completed { utterance } => {
                if self.scheduler.end_utterance(utterance) {
                    self.emit(SessionEvent::SpeechCompleted(utterance));
                }
            }
            SynthesisEvent::Failed { utterance, reason } => {
                if let Err(e) = self.scheduler.fail_utterance(utterance, &reason) {
                    self.emit(SessionEvent::Error(e.to_string()));
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Process input until every channel is closed, then return the session
    pub async fn run(
        mut self,
        mut blocks: mpsc::UnboundedReceiver<AudioBlock>,
        mut replies: mpsc::UnboundedReceiver<String>,
        mut synthesis: mpsc::UnboundedReceiver<SynthesisEvent>,
    ) -> Self {
        info!("Voice session started");
        loop {
            tokio::select! {
                Some(block) = blocks.recv() => self.handle_block(block),
                Some(text) = replies.recv() => {
                    if let Err(e) = self.handle_reply(&text) {
                        warn!("Reply dropped: {}", e);
                    }
                }
                Some(event) = synthesis.recv() => {
                    if let Err(e) = self.handle_synthesis_event(event) {
                        warn!("Utterance aborted: {}", e);
                    }
                }
                else => break,
            }
        }
        info!("Voice session ended, all inputs closed");
        self
    }

    fn interrupt(&mut self) {
        let Some(id) = self.scheduler.current_utterance() else {
            return;
        };
        if self.scheduler.cancel_utterance(id) {
            info!(utterance = %id, "Reply interrupted by user speech");
            self.emit(SessionEvent::Interrupted(id));
        }
    }

    fn emit(&self, event: SessionEvent) {
        if self.event_tx.send(event).is_err() {
            debug!("Session event dropped, receiver gone");
        }
    }
}
