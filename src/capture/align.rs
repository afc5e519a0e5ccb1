use crate::capture::pulse::PulseEvent;
use crate::capture::window::{AccelSample, WindowSnapshot};

/// Read-only view combining the accelerometer tail with the pulse events
/// that fall in the same trailing time span. Built fresh on every read;
/// nothing here feeds back into either stream.
#[derive(Clone, Debug)]
pub struct AlignedSnapshot {
    /// Synthetic timestamp per accelerometer sample (UNIX seconds).
    pub sample_times: Vec<f64>,
    pub samples: Vec<AccelSample>,
    pub pulse: Vec<PulseEvent>,
}

impl AlignedSnapshot {
    pub fn span_seconds(&self) -> f64 {
        match (self.sample_times.first(), self.sample_times.last()) {
            (Some(first), Some(last)) => last - first,
            _ => 0.0,
        }
    }
}

/// Aligns the index-clocked accelerometer window with the wall-clocked
/// pulse slice.
///
/// Sample `i` of the stream (global index, counting evicted samples) is
/// assigned timestamp `session_start + i / fs`; timestamps are recomputed
/// on every call rather than stored, since fs is constant during capture.
/// Pulse events earlier than the first primary timestamp are dropped. If
/// the window is empty the full pulse slice is returned untrimmed.
pub fn align(
    primary: &WindowSnapshot,
    pulse: &[PulseEvent],
    session_start: f64,
    sample_rate_hz: f32,
) -> AlignedSnapshot {
    let fs = f64::from(sample_rate_hz);
    let sample_times: Vec<f64> = (0..primary.len())
        .map(|offset| session_start + (primary.first_index + offset as u64) as f64 / fs)
        .collect();
    let pulse = match sample_times.first() {
        Some(&t0) => pulse.iter().filter(|e| e.timestamp >= t0).copied().collect(),
        None => pulse.to_vec(),
    };
    AlignedSnapshot {
        sample_times,
        samples: primary.samples.clone(),
        pulse,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(first_index: u64, n: usize) -> WindowSnapshot {
        WindowSnapshot {
            first_index,
            samples: vec![AccelSample { x: 0.0, y: 0.0, z: 0.0 }; n],
        }
    }

    #[test]
    fn synthesizes_timestamps_from_global_index() {
        let snap = snapshot(100, 3);
        let aligned = align(&snap, &[], 1000.0, 50.0);
        let expected = [1002.0, 1002.02, 1002.04];
        assert_eq!(aligned.sample_times.len(), 3);
        for (got, want) in aligned.sample_times.iter().zip(expected) {
            assert!((got - want).abs() < 1e-9);
        }
        assert_eq!(aligned.samples.len(), 3);
    }

    #[test]
    fn empty_pulse_yields_full_primary_and_no_events() {
        let snap = snapshot(0, 5);
        let aligned = align(&snap, &[], 0.0, 50.0);
        assert_eq!(aligned.samples.len(), 5);
        assert!(aligned.pulse.is_empty());
    }

    #[test]
    fn empty_primary_passes_pulse_slice_through() {
        let events = [
            PulseEvent { timestamp: 1.0, value: 500.0 },
            PulseEvent { timestamp: 2.0, value: 510.0 },
        ];
        let aligned = align(&snapshot(0, 0), &events, 0.0, 50.0);
        assert!(aligned.samples.is_empty());
        assert_eq!(aligned.pulse.len(), 2);
    }

    #[test]
    fn trims_pulse_events_before_the_primary_span() {
        // Primary covers [10.0, 10.04]; the 9.5 event falls outside.
        let events = [
            PulseEvent { timestamp: 9.5, value: 1.0 },
            PulseEvent { timestamp: 10.01, value: 2.0 },
            PulseEvent { timestamp: 10.2, value: 3.0 },
        ];
        let aligned = align(&snapshot(500, 3), &events, 0.0, 50.0);
        assert_eq!(aligned.pulse.len(), 2);
        assert_eq!(aligned.pulse[0].value, 2.0);
        assert!((aligned.span_seconds() - 0.04).abs() < 1e-9);
    }
}
