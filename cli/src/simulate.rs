//! `murmur simulate`: a scripted turn and reply, no audio hardware needed
//!
//! A synthetic user utterance is fed through the session in real time.
//! When the turn ends, a scripted synthesizer "speaks" the reply text,
//! deliberately sending its first viseme before any audio so the clock
//! anchoring path is exercised.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use config::Settings;
use murmur_audio::types::TICKS_PER_MS;
use murmur_audio::{
    AudioBlock, ChannelConversationSink, ConversationMessage, MouthShapeSink, SessionConfig,
    SessionEvent, ShapeId, SpeechSynthesizer, SyncError, SynthesisEvent, UtteranceId,
    VoiceSession,
};
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::SimulateArgs;

/// Time each character of the reply takes to speak
const CHAR_MS: u64 = 90;

const SYNTHESIS_LATENCY: Duration = Duration::from_millis(60);

/// Delay before the simulated user talks over the reply
const INTERRUPT_AFTER: Duration = Duration::from_millis(300);

/// Mouth shape for a character, loosely following the common 22-shape set
fn shape_for(c: char) -> ShapeId {
    match c.to_ascii_lowercase() {
        'a' => ShapeId(2),
        'e' => ShapeId(4),
        'i' | 'y' => ShapeId(6),
        'o' => ShapeId(8),
        'u' | 'w' => ShapeId(7),
        'm' | 'b' | 'p' => ShapeId(21),
        'f' | 'v' => ShapeId(18),
        'l' => ShapeId(14),
        'r' => ShapeId(13),
        c if c.is_alphabetic() => ShapeId(19),
        _ => ShapeId::REST,
    }
}

fn ticks(ms: u64) -> u64 {
    (ms as f64 * TICKS_PER_MS) as u64
}

/// Offsets and shapes for a reply, merging runs of the same shape
fn viseme_script(text: &str) -> Vec<(u64, ShapeId)> {
    let mut script: Vec<(u64, ShapeId)> = Vec::new();
    for (i, c) in text.chars().enumerate() {
        let shape = shape_for(c);
        if script.last().is_some_and(|(_, last)| *last == shape) {
            continue;
        }
        script.push((ticks(i as u64 * CHAR_MS), shape));
    }
    script
}

/// Pretends to synthesize speech, emitting events on a channel
struct ScriptedSynthesizer {
    events: mpsc::UnboundedSender<SynthesisEvent>,
    sample_rate_hz: u32,
}

impl SpeechSynthesizer for ScriptedSynthesizer {
    fn speak(&mut self, utterance: UtteranceId, text: &str) -> Result<(), SyncError> {
        if text.trim().is_empty() {
            return Err(SyncError::InvalidInput("empty reply".to_string()));
        }
        let script = viseme_script(text);
        let samples = text.chars().count() * CHAR_MS as usize * self.sample_rate_hz as usize / 1000;
        tokio::spawn(play(self.events.clone(), utterance, script, samples));
        Ok(())
    }
}

async fn play(
    tx: mpsc::UnboundedSender<SynthesisEvent>,
    utterance: UtteranceId,
    script: Vec<(u64, ShapeId)>,
    samples: usize,
) {
    let mut script = script.into_iter();
    let mut events = Vec::new();

    // Viseme data often arrives ahead of the first audio
    if let Some((offset_ticks, shape)) = script.next() {
        events.push(SynthesisEvent::Viseme {
            utterance,
            offset_ticks,
            shape,
        });
    }
    if send_all(&tx, events.drain(..)).is_err() {
        return;
    }

    sleep(SYNTHESIS_LATENCY).await;
    events.push(SynthesisEvent::Started { utterance });
    events.push(SynthesisEvent::AudioChunk { utterance, samples });
    events.extend(script.map(|(offset_ticks, shape)| SynthesisEvent::Viseme {
        utterance,
        offset_ticks,
        shape,
    }));
    events.push(SynthesisEvent::Completed { utterance });
    if send_all(&tx, events.drain(..)).is_err() {
        debug!(%utterance, "Session gone, synthesis abandoned");
    }
}

fn send_all(
    tx: &mpsc::UnboundedSender<SynthesisEvent>,
    events: impl Iterator<Item = SynthesisEvent>,
) -> Result<(), ()> {
    for event in events {
        tx.send(event).map_err(|_| ())?;
    }
    Ok(())
}

/// Voiced blocks for `voiced_ms`, then enough silence to close the turn
fn user_turn(settings: &Settings, voiced_ms: u64) -> Vec<AudioBlock> {
    let vad = &settings.vad;
    let block_ms = (vad.block_size as f64 * 1000.0 / vad.sample_rate_hz as f64).max(1.0);
    let level = ((vad.energy_threshold * 4.0).clamp(0.05, 0.9) * i16::MAX as f32) as i16;

    let voiced = (voiced_ms as f64 / block_ms).ceil() as usize;
    let silent = ((vad.shutdown_ms + 100) as f64 / block_ms).ceil() as usize;

    let mut blocks = vec![AudioBlock::constant(level, vad.block_size, vad.sample_rate_hz); voiced];
    blocks.extend(vec![
        AudioBlock::constant(0, vad.block_size, vad.sample_rate_hz);
        silent
    ]);
    blocks
}

/// Feed blocks at the pace a microphone would deliver them
fn feed(tx: mpsc::UnboundedSender<AudioBlock>, blocks: Vec<AudioBlock>, delay: Duration) {
    tokio::spawn(async move {
        sleep(delay).await;
        for block in blocks {
            sleep(Duration::from_secs_f64(block.duration_ms() / 1000.0)).await;
            if tx.send(block).is_err() {
                return;
            }
        }
    });
}

pub async fn run(settings: &Settings, args: &SimulateArgs) -> Result<()> {
    let started = Instant::now();
    let mouth: Arc<dyn MouthShapeSink> = Arc::new(move |shape: ShapeId| {
        println!("[{:>6}ms] mouth {}", started.elapsed().as_millis(), shape)
    });

    exchange(settings, args, mouth, started).await?;
    Ok(())
}

/// Drive one user turn and the reply to it, returning every session event.
///
/// Returns once the reply's mouth has closed (or it was cut off) and, with
/// `interrupt`, once the interrupting turn has ended too.
async fn exchange(
    settings: &Settings,
    args: &SimulateArgs,
    mouth: Arc<dyn MouthShapeSink>,
    started: Instant,
) -> Result<Vec<SessionEvent>> {
    let (synth_tx, synth_rx) = mpsc::unbounded_channel();
    let synthesizer = ScriptedSynthesizer {
        events: synth_tx,
        sample_rate_hz: settings.vad.sample_rate_hz,
    };

    let (conversation, mut forwarded) = ChannelConversationSink::channel();
    tokio::spawn(async move {
        let mut blocks = 0usize;
        while let Some(message) = forwarded.recv().await {
            if matches!(message, ConversationMessage::Audio(_)) {
                blocks += 1;
            } else {
                debug!(blocks, "Conversation message: {:?}", message);
            }
        }
    });

    let (session, mut events) = VoiceSession::new(
        SessionConfig::from(settings),
        conversation,
        synthesizer,
        mouth,
    );
    let mut live = session.scheduler().subscribe();

    let (block_tx, block_rx) = mpsc::unbounded_channel();
    let (reply_tx, reply_rx) = mpsc::unbounded_channel();
    let session_task = tokio::spawn(session.run(block_rx, reply_rx, synth_rx));

    info!(text = %args.text, "Simulating one exchange");
    let turn = user_turn(settings, args.voiced_ms);
    feed(block_tx.clone(), turn.clone(), Duration::ZERO);

    let mut seen = Vec::new();
    let mut speaking = None;
    let mut turns_ended = 0;
    let mut outcome = Ok(());

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                println!("[{:>6}ms] {:?}", started.elapsed().as_millis(), event);
                seen.push(event.clone());
                match event {
                    SessionEvent::TurnEnded => {
                        turns_ended += 1;
                        if turns_ended == 1 {
                            reply_tx.send(args.text.clone())?;
                        }
                    }
                    SessionEvent::Speaking(id) => {
                        speaking = Some(id);
                        if args.interrupt {
                            feed(block_tx.clone(), turn.clone(), INTERRUPT_AFTER);
                        }
                    }
                    SessionEvent::Error(e) => {
                        outcome = Err(anyhow!(e));
                        break;
                    }
                    _ => {}
                }
            }
            changed = live.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        let retired = speaking.is_some() && *live.borrow() != speaking;
        let user_done = !args.interrupt || turns_ended >= 2;
        if retired && user_done {
            break;
        }
    }

    session_task.abort();
    outcome.map(|()| seen)
}
