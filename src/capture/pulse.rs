use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// One reading from the pulse sensor. Unlike accelerometer samples these
/// arrive at irregular intervals, so each event carries its own wall-clock
/// timestamp (UNIX seconds, matching what the serial reader stamps on
/// arrival).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PulseEvent {
    pub timestamp: f64,
    pub value: f32,
}

/// Current wall-clock time as f64 UNIX seconds.
pub fn epoch_secs_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Append-only buffer for the secondary sensor, shared between the serial
/// reader thread (sole producer) and any number of readers.
///
/// History is capped at `retention_seconds` behind the newest event,
/// pruned lazily on push, so a long capture session stays bounded.
pub struct PulseStream {
    events: Mutex<VecDeque<PulseEvent>>,
    retention_seconds: f64,
}

impl PulseStream {
    pub fn new(retention_seconds: f64) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            retention_seconds,
        }
    }

    pub fn push(&self, timestamp: f64, value: f32) {
        let mut events = self.events.lock().expect("pulse lock poisoned");
        events.push_back(PulseEvent { timestamp, value });
        let horizon = timestamp - self.retention_seconds;
        while events.front().is_some_and(|e| e.timestamp < horizon) {
            events.pop_front();
        }
    }

    /// All retained events with timestamp >= `t0`, in arrival order.
    /// Timestamps are assumed monotonic (not enforced).
    pub fn slice_since(&self, t0: f64) -> Vec<PulseEvent> {
        let events = self.events.lock().expect("pulse lock poisoned");
        events
            .iter()
            .filter(|e| e.timestamp >= t0)
            .copied()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().expect("pulse lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_since_keeps_arrival_order() {
        let stream = PulseStream::new(60.0);
        assert!(stream.is_empty());
        stream.push(10.0, 512.0);
        stream.push(10.5, 520.0);
        stream.push(11.0, 505.0);
        let slice = stream.slice_since(10.5);
        assert_eq!(slice.len(), 2);
        assert_eq!(slice[0].value, 520.0);
        assert_eq!(slice[1].value, 505.0);
    }

    #[test]
    fn slice_since_before_everything_returns_all() {
        let stream = PulseStream::new(60.0);
        stream.push(5.0, 1.0);
        stream.push(6.0, 2.0);
        assert_eq!(stream.slice_since(0.0).len(), 2);
    }

    #[test]
    fn fixed_startup_anchor_keeps_pre_stream_events() {
        let stream = PulseStream::new(60.0);
        let startup = 100.0;
        // Pulse readings that arrive before the accelerometer stream
        // starts must survive a slice anchored at startup.
        stream.push(100.5, 640.0);
        stream.push(101.0, 655.0);
        assert_eq!(stream.slice_since(startup).len(), 2);
        // An anchor taken after they arrived would hide them.
        assert!(stream.slice_since(102.0).is_empty());
    }

    #[test]
    fn prunes_beyond_retention_horizon() {
        let stream = PulseStream::new(3.0);
        stream.push(100.0, 1.0);
        stream.push(101.0, 2.0);
        stream.push(104.5, 3.0);
        // 100.0 is more than 3 s behind the newest event and must be gone.
        let all = stream.slice_since(0.0);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].timestamp, 101.0);
    }
}
