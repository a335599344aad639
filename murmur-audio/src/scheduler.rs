//! Viseme scheduling
//!
//! Mouth-shape events and synthesized audio arrive as two independent,
//! unordered streams. The only shared reference point is the moment the
//! first audio chunk reaches the output device, so every viseme is kept as
//! an offset from that anchor and turned into a deadline once it is known.
//!
//! A single driver task owns a min-heap of armed dispatches keyed by
//! (deadline, arrival sequence). Entries are never removed when an utterance
//! is superseded: when they come due they are compared against the live
//! utterance id under the state lock and dropped as stale.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;

use config::LipSyncSettings;
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::clock::PlaybackClock;
use crate::error::{Result, SyncError};
use crate::traits::MouthShapeSink;
use crate::types::{ShapeId, UtteranceId, VisemeEvent};

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Output latency before the first sample is audible
    pub lead_sec: f64,
    /// Gap between the last viseme and the closing rest shape
    pub rest_delay_ms: u64,
    pub rest_shape: ShapeId,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from(&LipSyncSettings::default())
    }
}

impl From<&LipSyncSettings> for SchedulerConfig {
    fn from(settings: &LipSyncSettings) -> Self {
        Self {
            lead_sec: settings.lead_sec,
            rest_delay_ms: settings.rest_delay_ms,
            rest_shape: ShapeId(settings.rest_shape),
        }
    }
}

/// Result of a timer coming due
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DispatchOutcome {
    Dispatched,
    /// The utterance was superseded or cancelled; nothing was shown
    Stale,
}

/// What happened to a viseme event on arrival
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisemeDisposition {
    /// Not the live utterance, or the utterance already ended
    Ignored,
    /// Held until the clock is anchored
    Buffered,
    /// Timer armed for a future deadline
    Armed,
    /// Deadline already passed, shown immediately
    Dispatched,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    pub dispatched: u64,
    pub stale: u64,
}

struct Utterance {
    id: UtteranceId,
    clock: PlaybackClock,
    /// Arrival-ordered events waiting for the anchor
    pending: Vec<VisemeEvent>,
    last_deadline: Option<Instant>,
    ended: bool,
}

impl Utterance {
    fn new(id: UtteranceId, lead_sec: f64) -> Self {
        Self {
            id,
            clock: PlaybackClock::new(lead_sec),
            pending: Vec::new(),
            last_deadline: None,
            ended: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatchKind {
    Viseme,
    /// Trailing rest shape; retires the utterance when it fires
    Closing,
}

/// Snapshot captured when a dispatch is armed
#[derive(Debug, Clone, Copy)]
struct Armed {
    deadline: Instant,
    seq: u64,
    utterance: UtteranceId,
    shape: ShapeId,
    kind: DispatchKind,
}

impl PartialEq for Armed {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Armed {}

impl PartialOrd for Armed {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Armed {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.seq.cmp(&other.seq))
    }
}

struct State {
    last_id: u64,
    current: Option<Utterance>,
    queue: BinaryHeap<Reverse<Armed>>,
    next_seq: u64,
    stats: SchedulerStats,
    /// Mirrors `current`'s id for subscribers
    live: watch::Sender<Option<UtteranceId>>,
}

impl State {
    fn new() -> Self {
        Self {
            last_id: 0,
            current: None,
            queue: BinaryHeap::new(),
            next_seq: 0,
            stats: SchedulerStats::default(),
            live: watch::Sender::new(None),
        }
    }

    fn retire(&mut self) {
        self.current = None;
        self.live.send_replace(None);
    }

    fn is_live(&self, id: UtteranceId) -> bool {
        self.current.as_ref().is_some_and(|u| u.id == id)
    }

    fn live_mut(&mut self, id: UtteranceId) -> Option<&mut Utterance> {
        self.current.as_mut().filter(|u| u.id == id)
    }

    fn arm(&mut self, deadline: Instant, utterance: UtteranceId, shape: ShapeId, kind: DispatchKind) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Reverse(Armed {
            deadline,
            seq,
            utterance,
            shape,
            kind,
        }));
    }

    fn show(&mut self, sink: &dyn MouthShapeSink, utterance: UtteranceId, shape: ShapeId) {
        sink.set_mouth_shape(shape);
        self.stats.dispatched += 1;
        debug!(%utterance, %shape, outcome = "dispatched", "Viseme dispatch");
    }

    fn fire(&mut self, sink: &dyn MouthShapeSink, entry: Armed) -> DispatchOutcome {
        if !self.is_live(entry.utterance) {
            self.stats.stale += 1;
            debug!(
                utterance = %entry.utterance,
                shape = %entry.shape,
                outcome = "stale",
                "Viseme dispatch skipped"
            );
            return DispatchOutcome::Stale;
        }

        self.show(sink, entry.utterance, entry.shape);
        if entry.kind == DispatchKind::Closing {
            self.retire();
            info!(utterance = %entry.utterance, "Utterance finished");
        }
        DispatchOutcome::Dispatched
    }

    /// Fire every entry due at `now`, returning the next deadline
    fn fire_due(&mut self, sink: &dyn MouthShapeSink, now: Instant) -> Option<Instant> {
        loop {
            let due = match self.queue.peek() {
                Some(Reverse(top)) if top.deadline <= now => true,
                Some(_) | None => false,
            };
            if !due {
                break;
            }
            if let Some(Reverse(entry)) = self.queue.pop() {
                self.fire(sink, entry);
            }
        }
        self.queue.peek().map(|Reverse(top)| top.deadline)
    }

    /// Turn one event of an anchored utterance into a dispatch.
    /// Returns None if the utterance is not live or not anchored.
    fn schedule(
        &mut self,
        sink: &dyn MouthShapeSink,
        id: UtteranceId,
        event: VisemeEvent,
    ) -> Option<VisemeDisposition> {
        let utterance = self.live_mut(id)?;
        let deadline = utterance.clock.deadline_for(event.offset_ms())?;
        if utterance.last_deadline.is_none_or(|last| deadline > last) {
            utterance.last_deadline = Some(deadline);
        }

        let now = Instant::now();
        if deadline <= now {
            // Keep order with anything that came due but has not been fired yet
            self.fire_due(sink, now);
            self.show(sink, id, event.shape());
            Some(VisemeDisposition::Dispatched)
        } else {
            self.arm(deadline, id, event.shape(), DispatchKind::Viseme);
            Some(VisemeDisposition::Armed)
        }
    }
}

struct Shared {
    state: Mutex<State>,
    wake: Notify,
    sink: Arc<dyn MouthShapeSink>,
    config: SchedulerConfig,
}

impl Shared {
    fn rest(&self) -> ShapeId {
        self.config.rest_shape
    }
}

/// Schedules mouth-shape changes for at most one live utterance.
///
/// All entry points take `&self` and serialize on one lock, which the
/// driver also holds while checking and dispatching. Once
/// [`begin_utterance`](Self::begin_utterance) or
/// [`cancel_utterance`](Self::cancel_utterance) returns, no dispatch armed
/// for an earlier utterance can reach the sink.
pub struct VisemeScheduler {
    shared: Arc<Shared>,
    shutdown: CancellationToken,
}

impl VisemeScheduler {
    /// Create a scheduler and spawn its driver task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(config: SchedulerConfig, sink: Arc<dyn MouthShapeSink>) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(State::new()),
            wake: Notify::new(),
            sink,
            config,
        });
        let shutdown = CancellationToken::new();

        tokio::spawn(drive(shared.clone(), shutdown.clone()));

        Self { shared, shutdown }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Start a new utterance, superseding the previous one and everything it had pending
    pub fn begin_utterance(&self) -> UtteranceId {
        let mut state = self.shared.state.lock();
        state.last_id += 1;
        let id = UtteranceId(state.last_id);

        let previous = state
            .current
            .replace(Utterance::new(id, self.shared.config.lead_sec));
        state.live.send_replace(Some(id));
        match previous {
            Some(old) => info!(
                utterance = %id,
                superseded = %old.id,
                dropped = old.pending.len(),
                "Utterance started"
            ),
            None => info!(utterance = %id, "Utterance started"),
        }
        id
    }

    /// Record that audio for `id` reached the output device at `now`.
    /// The first call anchors the clock and flushes buffered events in arrival order.
    pub fn on_audio_chunk_delivered(&self, id: UtteranceId, now: Instant) {
        let mut state = self.shared.state.lock();
        let Some(utterance) = state.live_mut(id) else {
            debug!(utterance = %id, "Audio chunk for inactive utterance ignored");
            return;
        };
        if !utterance.clock.anchor(now) {
            return;
        }

        let pending = std::mem::take(&mut utterance.pending);
        debug!(utterance = %id, flushed = pending.len(), "Playback clock anchored");

        let mut armed = false;
        for event in pending {
            let disposition = state.schedule(self.shared.sink.as_ref(), id, event);
            armed |= disposition == Some(VisemeDisposition::Armed);
        }
        drop(state);

        if armed {
            self.shared.wake.notify_one();
        }
    }

    pub fn on_viseme_event(&self, id: UtteranceId, event: VisemeEvent) -> VisemeDisposition {
        let mut state = self.shared.state.lock();
        let Some(utterance) = state.live_mut(id) else {
            debug!(utterance = %id, "Viseme for inactive utterance ignored");
            return VisemeDisposition::Ignored;
        };
        if utterance.ended {
            debug!(utterance = %id, "Viseme after end of utterance ignored");
            return VisemeDisposition::Ignored;
        }
        if !utterance.clock.is_anchored() {
            utterance.pending.push(event);
            return VisemeDisposition::Buffered;
        }

        let disposition = state
            .schedule(self.shared.sink.as_ref(), id, event)
            .unwrap_or(VisemeDisposition::Ignored);
        drop(state);

        if disposition == VisemeDisposition::Armed {
            self.shared.wake.notify_one();
        }
        disposition
    }

    /// Close the mouth a short delay after the last scheduled viseme.
    /// Returns false if `id` is not live or was already ended.
    pub fn end_utterance(&self, id: UtteranceId) -> bool {
        let rest = self.shared.rest();
        let delay = Duration::from_millis(self.shared.config.rest_delay_ms);
        let sink = self.shared.sink.as_ref();

        let mut state = self.shared.state.lock();
        let Some(utterance) = state.live_mut(id) else {
            return false;
        };
        if utterance.ended {
            return false;
        }
        utterance.ended = true;

        let Some(anchor) = utterance.clock.anchor_instant() else {
            // No audio ever played, nothing to wait for
            let dropped = utterance.pending.len();
            state.retire();
            state.show(sink, id, rest);
            info!(utterance = %id, dropped, "Utterance ended without audio");
            return true;
        };

        let closing_at = utterance.last_deadline.unwrap_or(anchor) + delay;
        if closing_at <= Instant::now() {
            state.fire_due(sink, Instant::now());
            state.retire();
            state.show(sink, id, rest);
            info!(utterance = %id, "Utterance finished");
            return true;
        }

        state.arm(closing_at, id, rest, DispatchKind::Closing);
        drop(state);

        debug!(utterance = %id, "Closing rest shape armed");
        self.shared.wake.notify_one();
        true
    }

    /// Stop `id` immediately: armed dispatches become no-ops and the rest shape is shown.
    /// Returns false if `id` is not live.
    pub fn cancel_utterance(&self, id: UtteranceId) -> bool {
        let mut state = self.shared.state.lock();
        if !state.is_live(id) {
            return false;
        }
        state.retire();
        state.show(self.shared.sink.as_ref(), id, self.shared.rest());
        info!(utterance = %id, "Utterance cancelled");
        true
    }

    /// Synthesis reported an error: cancel the utterance and surface the failure.
    /// Failures for utterances that are no longer live are only logged.
    pub fn fail_utterance(&self, id: UtteranceId, reason: &str) -> Result<()> {
        if !self.cancel_utterance(id) {
            debug!(utterance = %id, reason, "Failure for inactive utterance ignored");
            return Ok(());
        }
        error!(utterance = %id, reason, "Speech synthesis failed");
        Err(SyncError::SynthesisFailure {
            utterance: id,
            reason: reason.to_string(),
        })
    }

    /// Watch the live utterance. The value turns to None once the closing
    /// rest shape has been shown, or on cancel.
    pub fn subscribe(&self) -> watch::Receiver<Option<UtteranceId>> {
        self.shared.state.lock().live.subscribe()
    }

    pub fn current_utterance(&self) -> Option<UtteranceId> {
        self.shared.state.lock().current.as_ref().map(|u| u.id)
    }

    /// True while an utterance is live and not yet ended
    pub fn is_speaking(&self) -> bool {
        self.shared
            .state
            .lock()
            .current
            .as_ref()
            .is_some_and(|u| !u.ended)
    }

    pub fn stats(&self) -> SchedulerStats {
        self.shared.state.lock().stats
    }

    /// Stop the driver task. Armed dispatches are abandoned.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for VisemeScheduler {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn drive(shared: Arc<Shared>, shutdown: CancellationToken) {
    debug!("Viseme driver started");
    loop {
        let next = {
            let mut state = shared.state.lock();
            state.fire_due(shared.sink.as_ref(), Instant::now())
        };

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = shared.wake.notified() => {}
            _ = sleep_until_next(next) => {}
        }
    }
    debug!("Viseme driver stopped");
}

async fn sleep_until_next(next: Option<Instant>) {
    match next {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
