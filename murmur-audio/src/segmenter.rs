//! Turn segmentation: a small state machine over voicing decisions that
//! opens and closes conversational turns and gates audio forwarding.

use config::VadSettings;
use tracing::{debug, info, warn};

use crate::classifier::EnergyClassifier;
use crate::error::{Result, SyncError};
use crate::traits::ConversationSink;
use crate::types::{AudioBlock, TurnSignal};

#[derive(Debug, Clone, PartialEq)]
pub struct SegmenterConfig {
    pub energy_threshold: f32,
    /// Voiced run needed to open a turn
    pub startup_ms: u64,
    /// Silent run needed to close a turn
    pub shutdown_ms: u64,
    /// Forward every block of the confirming voiced run on turn start
    pub forward_preroll: bool,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self::from(&VadSettings::default())
    }
}

impl From<&VadSettings> for SegmenterConfig {
    fn from(settings: &VadSettings) -> Self {
        Self {
            energy_threshold: settings.energy_threshold,
            startup_ms: settings.startup_ms,
            shutdown_ms: settings.shutdown_ms,
            forward_preroll: settings.forward_preroll,
        }
    }
}

/// `Starting` and `Ending` are entered and left within a single block, so
/// callers only ever observe `Idle` or `Active` between calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Starting,
    Active,
    Ending,
}

pub struct TurnSegmenter {
    classifier: EnergyClassifier,
    config: SegmenterConfig,
    state: TurnState,
    voiced_run_ms: f64,
    silent_run_ms: f64,
    /// Blocks of the current voiced run while Idle
    preroll: Vec<AudioBlock>,
    transport_failures: u64,
}

impl TurnSegmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self {
            classifier: EnergyClassifier::new(config.energy_threshold),
            config,
            state: TurnState::Idle,
            voiced_run_ms: 0.0,
            silent_run_ms: 0.0,
            preroll: Vec::new(),
            transport_failures: 0,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn config(&self) -> &SegmenterConfig {
        &self.config
    }

    /// Number of downstream sends that failed since creation
    pub fn transport_failures(&self) -> u64 {
        self.transport_failures
    }

    /// Drop back to Idle without emitting anything
    pub fn reset(&mut self) {
        self.transition_to(TurnState::Idle);
        self.preroll.clear();
    }

    /// Classify one block and route it. Rejected blocks leave the state untouched.
    pub fn process_block(
        &mut self,
        block: AudioBlock,
        sink: &mut dyn ConversationSink,
    ) -> Result<Option<TurnSignal>> {
        let decision = self.classifier.classify(&block)?;
        let duration_ms = decision.duration_ms;

        match self.state {
            TurnState::Idle => {
                if !decision.voiced {
                    self.voiced_run_ms = 0.0;
                    self.preroll.clear();
                    return Ok(None);
                }

                self.voiced_run_ms += duration_ms;
                if !self.config.forward_preroll {
                    self.preroll.clear();
                }
                self.preroll.push(block);

                if self.voiced_run_ms >= self.config.startup_ms as f64 {
                    self.start_turn(sink);
                    return Ok(Some(TurnSignal::TurnStart));
                }
                Ok(None)
            }
            TurnState::Active => {
                self.forward(sink, |s| s.send_audio(&block));

                if decision.voiced {
                    self.silent_run_ms = 0.0;
                    return Ok(None);
                }

                self.silent_run_ms += duration_ms;
                if self.silent_run_ms >= self.config.shutdown_ms as f64 {
                    self.end_turn(sink);
                    return Ok(Some(TurnSignal::TurnEnd));
                }
                Ok(None)
            }
            // Transient states never persist across calls
            TurnState::Starting | TurnState::Ending => {
                warn!("Segmenter found in transient state {:?}, resetting", self.state);
                self.reset();
                Ok(None)
            }
        }
    }

    fn start_turn(&mut self, sink: &mut dyn ConversationSink) {
        debug!("VAD: Idle -> Starting (voiced run {:.0}ms)", self.voiced_run_ms);
        self.transition_to(TurnState::Starting);

        self.forward(sink, |s| s.activity_start());
        let preroll = std::mem::take(&mut self.preroll);
        let blocks = preroll.len();
        for block in &preroll {
            self.forward(sink, |s| s.send_audio(block));
        }

        info!("VAD: turn started ({} block(s) forwarded)", blocks);
        self.transition_to(TurnState::Active);
    }

    fn end_turn(&mut self, sink: &mut dyn ConversationSink) {
        debug!("VAD: Active -> Ending (silent run {:.0}ms)", self.silent_run_ms);
        self.transition_to(TurnState::Ending);

        self.forward(sink, |s| s.activity_end());

        info!("VAD: turn ended");
        self.transition_to(TurnState::Idle);
    }

    fn forward<F>(&mut self, sink: &mut dyn ConversationSink, send: F)
    where
        F: FnOnce(&mut dyn ConversationSink) -> std::result::Result<(), SyncError>,
    {
        if let Err(e) = send(sink) {
            self.transport_failures += 1;
            warn!("Failed to forward to conversation: {}", e);
        }
    }

    fn transition_to(&mut self, new_state: TurnState) {
        self.state = new_state;
        self.voiced_run_ms = 0.0;
        self.silent_run_ms = 0.0;
    }
}
