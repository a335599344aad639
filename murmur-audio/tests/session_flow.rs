//! End-to-end tests for VoiceSession with recording collaborators
//!
//! Time is paused, so dispatch instants are exact virtual times.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use murmur_audio::{
    AudioBlock, ConversationMessage, ConversationSink, MouthShapeSink, SchedulerConfig,
    SegmenterConfig, SessionConfig, SessionEvent, ShapeId, SpeechSynthesizer, SyncError,
    SynthesisEvent, TurnState, UtteranceId, VoiceSession,
};
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};

const RATE: u32 = 16000;
const BLOCK: usize = 256;

#[derive(Default)]
struct RecordingConversation {
    messages: Vec<ConversationMessage>,
}

impl ConversationSink for RecordingConversation {
    fn activity_start(&mut self) -> Result<(), SyncError> {
        self.messages.push(ConversationMessage::ActivityStart);
        Ok(())
    }

    fn activity_end(&mut self) -> Result<(), SyncError> {
        self.messages.push(ConversationMessage::ActivityEnd);
        Ok(())
    }

    fn send_audio(&mut self, block: &AudioBlock) -> Result<(), SyncError> {
        self.messages.push(ConversationMessage::Audio(block.clone()));
        Ok(())
    }
}

#[derive(Default)]
struct RecordingSynth {
    requests: Vec<(UtteranceId, String)>,
    reject: bool,
}

impl SpeechSynthesizer for RecordingSynth {
    fn speak(&mut self, utterance: UtteranceId, text: &str) -> Result<(), SyncError> {
        if self.reject {
            return Err(SyncError::TransportFailure("synthesizer offline".to_string()));
        }
        self.requests.push((utterance, text.to_string()));
        Ok(())
    }
}

#[derive(Default)]
struct Mouth {
    shapes: Mutex<Vec<(ShapeId, Instant)>>,
}

impl MouthShapeSink for Mouth {
    fn set_mouth_shape(&self, shape: ShapeId) {
        self.shapes.lock().unwrap().push((shape, Instant::now()));
    }
}

impl Mouth {
    fn shapes(&self) -> Vec<ShapeId> {
        self.shapes.lock().unwrap().iter().map(|(s, _)| *s).collect()
    }

    fn time_of(&self, shape: ShapeId) -> Option<Instant> {
        self.shapes
            .lock()
            .unwrap()
            .iter()
            .find(|(s, _)| *s == shape)
            .map(|(_, t)| *t)
    }
}

type Session = VoiceSession<RecordingConversation, RecordingSynth>;

fn config(barge_in: bool) -> SessionConfig {
    SessionConfig {
        segmenter: SegmenterConfig {
            energy_threshold: 0.02,
            startup_ms: 120,
            shutdown_ms: 350,
            forward_preroll: true,
        },
        scheduler: SchedulerConfig {
            lead_sec: 0.12,
            rest_delay_ms: 150,
            rest_shape: ShapeId::REST,
        },
        barge_in,
    }
}

fn session(
    barge_in: bool,
    synth: RecordingSynth,
) -> (Session, mpsc::UnboundedReceiver<SessionEvent>, Arc<Mouth>) {
    let mouth = Arc::new(Mouth::default());
    let (session, events) = VoiceSession::new(
        config(barge_in),
        RecordingConversation::default(),
        synth,
        mouth.clone(),
    );
    (session, events, mouth)
}

fn voiced() -> AudioBlock {
    AudioBlock::constant(4000, BLOCK, RATE)
}

fn silent() -> AudioBlock {
    AudioBlock::constant(0, BLOCK, RATE)
}

fn drain(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

/// 100 ns ticks
fn ticks(ms: u64) -> u64 {
    ms * 10_000
}

fn speak_user_turn(session: &mut Session) {
    for _ in 0..8 {
        session.handle_block(voiced());
    }
    for _ in 0..22 {
        session.handle_block(silent());
    }
}

#[tokio::test(start_paused = true)]
async fn test_turn_then_lip_synced_reply() {
    let (mut session, mut events, mouth) = session(true, RecordingSynth::default());

    speak_user_turn(&mut session);
    assert_eq!(session.turn_state(), TurnState::Idle);
    assert_eq!(
        drain(&mut events),
        vec![SessionEvent::TurnStarted, SessionEvent::TurnEnded]
    );

    let messages = &session.conversation().messages;
    assert_eq!(messages.first(), Some(&ConversationMessage::ActivityStart));
    assert_eq!(messages.last(), Some(&ConversationMessage::ActivityEnd));
    assert_eq!(messages.len(), 1 + 8 + 22 + 1);

    let id = session.handle_reply("hello there").unwrap();
    assert_eq!(session.synthesizer().requests, vec![(id, "hello there".to_string())]);

    // First viseme races ahead of the audio
    session
        .handle_synthesis_event(SynthesisEvent::Viseme {
            utterance: id,
            offset_ticks: ticks(500),
            shape: ShapeId(6),
        })
        .unwrap();
    let t0 = Instant::now();
    session
        .handle_synthesis_event(SynthesisEvent::Started { utterance: id })
        .unwrap();
    session
        .handle_synthesis_event(SynthesisEvent::AudioChunk {
            utterance: id,
            samples: 4800,
        })
        .unwrap();
    session
        .handle_synthesis_event(SynthesisEvent::Viseme {
            utterance: id,
            offset_ticks: ticks(200),
            shape: ShapeId(3),
        })
        .unwrap();
    session
        .handle_synthesis_event(SynthesisEvent::Completed { utterance: id })
        .unwrap();

    sleep(ms(1000)).await;

    assert_eq!(mouth.shapes(), vec![ShapeId(3), ShapeId(6), ShapeId::REST]);
    let at = |shape| mouth.time_of(shape).unwrap() - t0;
    assert!(at(ShapeId(3)) >= ms(320) && at(ShapeId(3)) < ms(322));
    assert!(at(ShapeId(6)) >= ms(620) && at(ShapeId(6)) < ms(622));
    assert!(at(ShapeId::REST) >= ms(770) && at(ShapeId::REST) < ms(772));

    assert_eq!(
        drain(&mut events),
        vec![SessionEvent::Speaking(id), SessionEvent::SpeechCompleted(id)]
    );
    assert_eq!(session.scheduler().current_utterance(), None);
}

#[tokio::test(start_paused = true)]
async fn test_user_speech_interrupts_reply() {
    let (mut session, mut events, mouth) = session(true, RecordingSynth::default());

    let id = session.handle_reply("a long answer").unwrap();
    session
        .handle_synthesis_event(SynthesisEvent::Started { utterance: id })
        .unwrap();
    session
        .handle_synthesis_event(SynthesisEvent::Viseme {
            utterance: id,
            offset_ticks: ticks(400),
            shape: ShapeId(8),
        })
        .unwrap();
    drain(&mut events);

    for _ in 0..8 {
        session.handle_block(voiced());
    }
    assert_eq!(
        drain(&mut events),
        vec![SessionEvent::Interrupted(id), SessionEvent::TurnStarted]
    );
    assert_eq!(mouth.shapes(), vec![ShapeId::REST]);

    sleep(ms(1000)).await;
    assert_eq!(mouth.shapes(), vec![ShapeId::REST]);
    assert_eq!(session.scheduler().stats().stale, 1);
}

#[tokio::test(start_paused = true)]
async fn test_without_barge_in_reply_keeps_playing() {
    let (mut session, mut events, mouth) = session(false, RecordingSynth::default());

    let id = session.handle_reply("answer").unwrap();
    session
        .handle_synthesis_event(SynthesisEvent::Started { utterance: id })
        .unwrap();
    session
        .handle_synthesis_event(SynthesisEvent::Viseme {
            utterance: id,
            offset_ticks: ticks(400),
            shape: ShapeId(8),
        })
        .unwrap();

    for _ in 0..8 {
        session.handle_block(voiced());
    }
    assert!(!drain(&mut events).contains(&SessionEvent::Interrupted(id)));

    sleep(ms(1000)).await;
    assert_eq!(mouth.shapes(), vec![ShapeId(8)]);
}

#[tokio::test(start_paused = true)]
async fn test_newer_reply_supersedes_older() {
    let (mut session, _events, mouth) = session(true, RecordingSynth::default());

    let first = session.handle_reply("first").unwrap();
    session
        .handle_synthesis_event(SynthesisEvent::Started { utterance: first })
        .unwrap();
    session
        .handle_synthesis_event(SynthesisEvent::Viseme {
            utterance: first,
            offset_ticks: ticks(500),
            shape: ShapeId(1),
        })
        .unwrap();

    sleep(ms(100)).await;
    let second = session.handle_reply("second").unwrap();
    assert!(second > first);

    // Late events for the first reply change nothing
    session
        .handle_synthesis_event(SynthesisEvent::Viseme {
            utterance: first,
            offset_ticks: 0,
            shape: ShapeId(2),
        })
        .unwrap();
    session
        .handle_synthesis_event(SynthesisEvent::Started { utterance: second })
        .unwrap();
    session
        .handle_synthesis_event(SynthesisEvent::Viseme {
            utterance: second,
            offset_ticks: ticks(100),
            shape: ShapeId(3),
        })
        .unwrap();

    sleep(ms(1000)).await;
    assert_eq!(mouth.shapes(), vec![ShapeId(3)]);
    assert_eq!(session.scheduler().current_utterance(), Some(second));
}

#[tokio::test(start_paused = true)]
async fn test_synthesis_failure_is_surfaced_and_session_continues() {
    let (mut session, mut events, mouth) = session(true, RecordingSynth::default());

    let id = session.handle_reply("doomed").unwrap();
    session
        .handle_synthesis_event(SynthesisEvent::Started { utterance: id })
        .unwrap();
    session
        .handle_synthesis_event(SynthesisEvent::Viseme {
            utterance: id,
            offset_ticks: ticks(300),
            shape: ShapeId(4),
        })
        .unwrap();
    drain(&mut events);

    let err = session
        .handle_synthesis_event(SynthesisEvent::Failed {
            utterance: id,
            reason: "voice unavailable".to_string(),
        })
        .unwrap_err();
    assert!(matches!(err, SyncError::SynthesisFailure { utterance, .. } if utterance == id));
    assert!(matches!(drain(&mut events).as_slice(), [SessionEvent::Error(_)]));
    assert_eq!(mouth.shapes(), vec![ShapeId::REST]);

    let next = session.handle_reply("retry by hand").unwrap();
    session
        .handle_synthesis_event(SynthesisEvent::Started { utterance: next })
        .unwrap();
    session
        .handle_synthesis_event(SynthesisEvent::Viseme {
            utterance: next,
            offset_ticks: ticks(50),
            shape: ShapeId(5),
        })
        .unwrap();

    sleep(ms(1000)).await;
    assert_eq!(mouth.shapes(), vec![ShapeId::REST, ShapeId(5)]);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_reply_leaves_nothing_live() {
    let synth = RecordingSynth {
        reject: true,
        ..Default::default()
    };
    let (mut session, mut events, mouth) = session(true, synth);

    let err = session.handle_reply("unheard").unwrap_err();
    assert!(matches!(err, SyncError::TransportFailure(_)));
    assert_eq!(session.scheduler().current_utterance(), None);
    assert_eq!(mouth.shapes(), vec![ShapeId::REST]);
    assert!(matches!(drain(&mut events).as_slice(), [SessionEvent::Error(_)]));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_block_is_dropped() {
    let (mut session, mut events, _mouth) = session(true, RecordingSynth::default());

    for _ in 0..7 {
        session.handle_block(voiced());
    }
    session.handle_block(AudioBlock::new(Vec::new(), RATE));
    session.handle_block(voiced());

    assert_eq!(drain(&mut events), vec![SessionEvent::TurnStarted]);
    assert_eq!(session.turn_state(), TurnState::Active);
}

#[tokio::test(start_paused = true)]
async fn test_run_loop_drains_blocks_until_inputs_close() {
    let (session, mut events, _mouth) = session(true, RecordingSynth::default());

    let (block_tx, block_rx) = mpsc::unbounded_channel();
    let (_reply_tx, reply_rx) = mpsc::unbounded_channel::<String>();
    let (_synth_tx, synth_rx) = mpsc::unbounded_channel::<SynthesisEvent>();
    drop(_reply_tx);
    drop(_synth_tx);

    for _ in 0..8 {
        block_tx.send(voiced()).unwrap();
    }
    for _ in 0..22 {
        block_tx.send(silent()).unwrap();
    }
    drop(block_tx);

    let session = session.run(block_rx, reply_rx, synth_rx).await;

    assert_eq!(session.turn_state(), TurnState::Idle);
    assert_eq!(session.conversation().messages.len(), 32);
    assert_eq!(
        drain(&mut events),
        vec![SessionEvent::TurnStarted, SessionEvent::TurnEnded]
    );
}
