use std::fmt;

/// 100 ns synthesis ticks per millisecond
pub const TICKS_PER_MS: f64 = 10_000.0;

/// Fixed-length block of signed mono samples as captured from the microphone
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBlock {
    pub samples: Vec<i16>,
    pub sample_rate_hz: u32,
}

impl AudioBlock {
    pub fn new(samples: Vec<i16>, sample_rate_hz: u32) -> Self {
        Self {
            samples,
            sample_rate_hz,
        }
    }

    /// Block of `len` identical samples, mostly useful for tests and simulation
    pub fn constant(value: i16, len: usize, sample_rate_hz: u32) -> Self {
        Self::new(vec![value; len], sample_rate_hz)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_ms(&self) -> f64 {
        if self.sample_rate_hz == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate_hz as f64 * 1000.0
    }
}

/// Result of classifying one block
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoicingDecision {
    pub voiced: bool,
    pub duration_ms: f64,
}

/// Signals emitted by the turn segmenter, at most one per block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnSignal {
    TurnStart,
    TurnEnd,
}

/// Discrete mouth shape category reported by the synthesis engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShapeId(pub u8);

impl ShapeId {
    /// Closed mouth / silence
    pub const REST: ShapeId = ShapeId(0);
}

impl fmt::Display for ShapeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one spoken reply. Allocated in strictly increasing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UtteranceId(pub u64);

impl fmt::Display for UtteranceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "utt-{}", self.0)
    }
}

/// Mouth shape change at an audio-relative offset
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisemeEvent {
    offset_ms: f64,
    shape: ShapeId,
}

impl VisemeEvent {
    /// Negative and non-finite offsets are clamped to zero.
    pub fn new(offset_ms: f64, shape: ShapeId) -> Self {
        let offset_ms = if offset_ms.is_finite() && offset_ms > 0.0 {
            offset_ms
        } else {
            0.0
        };
        Self { offset_ms, shape }
    }

    /// Build from a synthesis offset in 100 ns ticks
    pub fn from_ticks(offset_ticks: u64, shape: ShapeId) -> Self {
        Self::new(offset_ticks as f64 / TICKS_PER_MS, shape)
    }

    pub fn offset_ms(&self) -> f64 {
        self.offset_ms
    }

    pub fn shape(&self) -> ShapeId {
        self.shape
    }
}

/// Events reported by the speech synthesis collaborator, in any order
#[derive(Debug, Clone, PartialEq)]
pub enum SynthesisEvent {
    /// Synthesis began and the first audio chunk reached the output device
    Started { utterance: UtteranceId },
    /// Mouth shape at an offset in 100 ns ticks
    Viseme {
        utterance: UtteranceId,
        offset_ticks: u64,
        shape: ShapeId,
    },
    /// A chunk of synthesized audio was handed to the output device
    AudioChunk {
        utterance: UtteranceId,
        samples: usize,
    },
    Completed { utterance: UtteranceId },
    Failed { utterance: UtteranceId, reason: String },
}

impl SynthesisEvent {
    pub fn utterance(&self) -> UtteranceId {
        match self {
            SynthesisEvent::Started { utterance }
            | SynthesisEvent::Viseme { utterance, .. }
            | SynthesisEvent::AudioChunk { utterance, .. }
            | SynthesisEvent::Completed { utterance }
            | SynthesisEvent::Failed { utterance, .. } => *utterance,
        }
    }
}
