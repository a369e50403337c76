//! Fan-out from the single capture loop to any number of sink subscribers.
//!
//! Every subscriber owns a bounded queue. Publishing never blocks: a full
//! queue drops that event for that subscriber only, and a closed queue
//! detaches the subscriber. Each queue is FIFO, so a sink always sees events
//! in capture order even when some are dropped. One slot past the depth is
//! held back for the terminal event, which is therefore never lost.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::mpsc::{self, Receiver, Sender, error::TrySendError};

use crate::types::{ClassLabel, Frame, Recognition};

const STREAM_QUEUE_DEPTH: usize = 2;
const PUSH_QUEUE_DEPTH: usize = 16;

/// Why a pipeline instance reached its terminal state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// The frame source reported end of input.
    SourceExhausted,
    /// The camera failed or stalled; distinct from "no hand visible".
    CaptureUnavailable(String),
    /// Process shutdown was requested.
    Shutdown,
}

impl StopReason {
    pub fn describe(&self) -> String {
        match self {
            StopReason::SourceExhausted => "source exhausted".to_string(),
            StopReason::CaptureUnavailable(detail) => format!("capture unavailable: {detail}"),
            StopReason::Shutdown => "shutdown".to_string(),
        }
    }
}

/// A frame as seen by the stream sink. `recognition` is `None` when the
/// throttle skipped detection and the frame is passed through raw.
#[derive(Clone, Debug)]
pub struct PublishedFrame {
    pub sequence: u64,
    pub frame: Arc<Frame>,
    pub recognition: Option<Arc<Recognition>>,
}

#[derive(Clone, Debug)]
pub enum StreamEvent {
    Frame(PublishedFrame),
    Stopped(StopReason),
}

#[derive(Clone, Debug, PartialEq)]
pub enum LabelEvent {
    Label { sequence: u64, label: ClassLabel },
    Stopped(StopReason),
}

struct FanOutState<T> {
    subscribers: Vec<Sender<T>>,
    terminal: Option<T>,
}

pub struct FanOut<T> {
    name: &'static str,
    depth: usize,
    state: Mutex<FanOutState<T>>,
}

impl<T: Clone> FanOut<T> {
    pub fn new(name: &'static str, depth: usize) -> Self {
        Self {
            name,
            depth,
            state: Mutex::new(FanOutState {
                subscribers: Vec::new(),
                terminal: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FanOutState<T>> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Subscribing after close yields a queue holding only the terminal event.
    pub fn subscribe(&self) -> Receiver<T> {
        let (tx, rx) = mpsc::channel(self.depth + 1);
        let mut state = self.lock();
        match &state.terminal {
            Some(terminal) => {
                let _ = tx.try_send(terminal.clone());
            }
            None => {
                state.subscribers.push(tx);
                log::info!(
                    "{} subscriber attached ({} active)",
                    self.name,
                    state.subscribers.len()
                );
            }
        }
        rx
    }

    pub fn publish(&self, event: T) {
        let mut state = self.lock();
        if state.terminal.is_some() {
            return;
        }
        let name = self.name;
        state.subscribers.retain(|tx| {
            if tx.is_closed() {
                log::info!("{name} subscriber detached");
                return false;
            }
            // Only this side sends, so free capacity can grow but not shrink.
            if tx.capacity() <= 1 {
                log::debug!("{name} subscriber is behind, dropping event");
                return true;
            }
            match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    log::debug!("{name} subscriber is behind, dropping event");
                    true
                }
                Err(TrySendError::Closed(_)) => {
                    log::info!("{name} subscriber detached");
                    false
                }
            }
        });
    }

    /// Delivers `terminal` into the reserved slot and closes every queue.
    /// First close wins.
    pub fn close(&self, terminal: T) {
        let mut state = self.lock();
        if state.terminal.is_some() {
            return;
        }
        let name = self.name;
        for tx in state.subscribers.drain(..) {
            if let Err(TrySendError::Full(_)) = tx.try_send(terminal.clone()) {
                log::warn!("{name} subscriber queue full at close, terminal event lost");
            }
        }
        state.terminal = Some(terminal);
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Starting,
    Capturing,
    Stopped,
}

#[derive(Clone, Debug, Serialize)]
pub struct PipelineStatus {
    pub state: PipelineState,
    pub frames: u64,
    pub detections: u64,
    pub last_label: Option<&'static str>,
    pub stop_reason: Option<String>,
    pub stream_subscribers: usize,
    pub push_subscribers: usize,
}

struct Counters {
    state: PipelineState,
    frames: u64,
    detections: u64,
    last_label: Option<ClassLabel>,
    stop_reason: Option<StopReason>,
}

/// Shared between the pipeline thread (publisher) and HTTP handlers (subscribers).
pub struct PipelineHub {
    stream: FanOut<StreamEvent>,
    push: FanOut<LabelEvent>,
    counters: Mutex<Counters>,
}

impl Default for PipelineHub {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineHub {
    pub fn new() -> Self {
        Self {
            stream: FanOut::new("stream", STREAM_QUEUE_DEPTH),
            push: FanOut::new("push", PUSH_QUEUE_DEPTH),
            counters: Mutex::new(Counters {
                state: PipelineState::Starting,
                frames: 0,
                detections: 0,
                last_label: None,
                stop_reason: None,
            }),
        }
    }

    fn counters(&self) -> MutexGuard<'_, Counters> {
        match self.counters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn subscribe_stream(&self) -> Receiver<StreamEvent> {
        self.stream.subscribe()
    }

    pub fn subscribe_labels(&self) -> Receiver<LabelEvent> {
        self.push.subscribe()
    }

    pub(crate) fn publish_frame(&self, frame: PublishedFrame) {
        {
            let mut counters = self.counters();
            if counters.state == PipelineState::Stopped {
                return;
            }
            counters.state = PipelineState::Capturing;
            counters.frames += 1;
            if let Some(recognition) = &frame.recognition {
                counters.detections += 1;
                counters.last_label = Some(recognition.label());
            }
        }
        self.stream.publish(StreamEvent::Frame(frame));
    }

    pub(crate) fn publish_label(&self, sequence: u64, label: ClassLabel) {
        {
            let mut counters = self.counters();
            if counters.state == PipelineState::Stopped {
                return;
            }
            counters.last_label = Some(label);
        }
        self.push.publish(LabelEvent::Label { sequence, label });
    }

    /// Moves the hub to its terminal state; later calls are ignored.
    pub fn stop(&self, reason: StopReason) {
        {
            let mut counters = self.counters();
            if counters.state == PipelineState::Stopped {
                return;
            }
            log::info!("pipeline stopped: {}", reason.describe());
            counters.state = PipelineState::Stopped;
            counters.stop_reason = Some(reason.clone());
        }
        self.stream.close(StreamEvent::Stopped(reason.clone()));
        self.push.close(LabelEvent::Stopped(reason));
    }

    pub fn status(&self) -> PipelineStatus {
        let counters = self.counters();
        PipelineStatus {
            state: counters.state.clone(),
            frames: counters.frames,
            detections: counters.detections,
            last_label: counters.last_label.map(|label| label.as_str()),
            stop_reason: counters.stop_reason.as_ref().map(StopReason::describe),
            stream_subscribers: self.stream.subscriber_count(),
            push_subscribers: self.push.subscriber_count(),
        }
    }
}
