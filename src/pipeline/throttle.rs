use std::time::{Duration, Instant};

/// Time gate between classification attempts.
#[derive(Clone, Debug)]
pub struct DetectionThrottle {
    window: Duration,
    last_detection: Option<Instant>,
}

impl DetectionThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_detection: None,
        }
    }

    pub fn allow(&self, now: Instant) -> bool {
        match self.last_detection {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.window,
        }
    }

    /// Call once an allowed attempt has completed, whatever its outcome.
    pub fn record(&mut self, now: Instant) {
        self.last_detection = Some(now);
    }
}

/// Which sinks a detection attempt on this frame would feed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Due {
    pub stream: bool,
    pub push: bool,
}

impl Due {
    pub fn any(&self) -> bool {
        self.stream || self.push
    }
}

/// Throttle state owned by the frame pipeline: either one global gate or an
/// independent gate per sink.
#[derive(Clone, Debug)]
pub enum ThrottleSet {
    Shared(DetectionThrottle),
    PerSink {
        stream: DetectionThrottle,
        push: DetectionThrottle,
    },
}

impl ThrottleSet {
    pub fn shared(window: Duration) -> Self {
        ThrottleSet::Shared(DetectionThrottle::new(window))
    }

    pub fn per_sink(stream_window: Duration, push_window: Duration) -> Self {
        ThrottleSet::PerSink {
            stream: DetectionThrottle::new(stream_window),
            push: DetectionThrottle::new(push_window),
        }
    }

    pub fn due(&self, now: Instant) -> Due {
        match self {
            ThrottleSet::Shared(gate) => {
                let open = gate.allow(now);
                Due {
                    stream: open,
                    push: open,
                }
            }
            ThrottleSet::PerSink { stream, push } => Due {
                stream: stream.allow(now),
                push: push.allow(now),
            },
        }
    }

    /// Records a completed attempt. The stream sink draws every result, so
    /// its gate is restarted by any attempt; the push gate only by its own.
    pub fn record(&mut self, due: Due, now: Instant) {
        if !due.any() {
            return;
        }
        match self {
            ThrottleSet::Shared(gate) => gate.record(now),
            ThrottleSet::PerSink { stream, push } => {
                stream.record(now);
                if due.push {
                    push.record(now);
                }
            }
        }
    }
}
