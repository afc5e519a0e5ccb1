use std::collections::VecDeque;
use std::sync::Mutex;

use crate::capture::error::CaptureError;

/// One decoded sample in physical units (g). Samples carry no timestamp;
/// time is inferred from the sample's position and the configured rate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AccelSample {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// The most recent window contents plus the global stream index of the
/// first returned sample. Indices count every sample ever appended, so a
/// consumer can synthesize timestamps that stay correct after eviction.
#[derive(Clone, Debug)]
pub struct WindowSnapshot {
    pub first_index: u64,
    pub samples: Vec<AccelSample>,
}

impl WindowSnapshot {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

struct WindowInner {
    samples: VecDeque<AccelSample>,
    total_appended: u64,
}

/// Bounded rolling buffer of recent samples shared between the link
/// producer and any number of readers.
///
/// Exactly one task appends (the notification callback path); readers get
/// an immutable copy via [`snapshot`](Self::snapshot) and never hold a
/// reference into live state. The mutex is held only for the O(1) append
/// or the copy-out, so the producer never waits on downstream work.
pub struct SampleWindow {
    inner: Mutex<WindowInner>,
    capacity: usize,
}

impl SampleWindow {
    pub fn new(capacity: usize) -> Result<Self, CaptureError> {
        if capacity == 0 {
            return Err(CaptureError::InvalidConfig(
                "window capacity must be at least one sample".into(),
            ));
        }
        Ok(Self {
            inner: Mutex::new(WindowInner {
                samples: VecDeque::with_capacity(capacity),
                total_appended: 0,
            }),
            capacity,
        })
    }

    /// Capacity covering `window_seconds` of samples at `sample_rate_hz`.
    pub fn with_duration(sample_rate_hz: f32, window_seconds: f32) -> Result<Self, CaptureError> {
        if sample_rate_hz <= 0.0 {
            return Err(CaptureError::InvalidConfig(
                "sample rate must be greater than zero".into(),
            ));
        }
        Self::new((sample_rate_hz * window_seconds).ceil() as usize)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("window lock poisoned").samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total samples appended over the session, including evicted ones.
    pub fn total_appended(&self) -> u64 {
        self.inner.lock().expect("window lock poisoned").total_appended
    }

    /// Appends one sample, evicting the oldest once at capacity.
    pub fn append(&self, sample: AccelSample) {
        let mut inner = self.inner.lock().expect("window lock poisoned");
        if inner.samples.len() == self.capacity {
            inner.samples.pop_front();
        }
        inner.samples.push_back(sample);
        inner.total_appended += 1;
    }

    /// Copies out the most recent `max_len` samples (or fewer if the
    /// window holds less). Safe to call concurrently with `append`.
    pub fn snapshot(&self, max_len: usize) -> WindowSnapshot {
        let inner = self.inner.lock().expect("window lock poisoned");
        let take = max_len.min(inner.samples.len());
        let skip = inner.samples.len() - take;
        let samples: Vec<AccelSample> = inner.samples.iter().skip(skip).copied().collect();
        WindowSnapshot {
            first_index: inner.total_appended - take as u64,
            samples,
        }
    }

    /// Everything the window currently holds.
    pub fn full_snapshot(&self) -> WindowSnapshot {
        self.snapshot(self.capacity)
    }
}
