use std::fmt;
use std::sync::Arc;

use ndarray::{Array2, ArrayView2};

use crate::capture::window::SampleWindow;

/// Binary motion verdict. The trained model emits 1 for acceptable
/// motion and 0 otherwise, displayed as GOOD / BAD.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MotionLabel {
    Bad = 0,
    Good = 1,
}

impl fmt::Display for MotionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MotionLabel::Bad => write!(f, "BAD"),
            MotionLabel::Good => write!(f, "GOOD"),
        }
    }
}

/// Inference backend. The matrix is axes x length with rows x, y, z in g.
/// Stateless from the pipeline's point of view; model internals live
/// elsewhere.
pub trait Classifier: Send {
    fn classify(&self, window: ArrayView2<'_, f32>) -> MotionLabel;
}

/// Result of asking for a fixed-length classifier window. Running short
/// is the normal state at session start, not an error.
#[derive(Clone, Debug)]
pub enum WindowFill {
    Ready(Array2<f32>),
    Insufficient { have: usize, need: usize },
}

impl WindowFill {
    pub fn is_ready(&self) -> bool {
        matches!(self, WindowFill::Ready(_))
    }
}

/// Pulls the trailing fixed-length slice the classifier expects.
pub struct WindowExtractor {
    window: Arc<SampleWindow>,
    length: usize,
}

impl WindowExtractor {
    pub fn new(window: Arc<SampleWindow>, length: usize) -> Self {
        Self { window, length }
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// The last `length` samples as a 3 x length matrix, or how far short
    /// the window currently runs.
    pub fn latest(&self) -> WindowFill {
        let snap = self.window.snapshot(self.length);
        if snap.len() < self.length {
            return WindowFill::Insufficient {
                have: snap.len(),
                need: self.length,
            };
        }
        let mut matrix = Array2::zeros((3, self.length));
        for (i, sample) in snap.samples.iter().enumerate() {
            matrix[[0, i]] = sample.x;
            matrix[[1, i]] = sample.y;
            matrix[[2, i]] = sample.z;
        }
        WindowFill::Ready(matrix)
    }

    /// Global index of the newest appended sample; used by the gate to
    /// measure how much new data arrived since the last inference.
    pub fn stream_end_index(&self) -> u64 {
        self.window.total_appended()
    }
}

/// Decides when a new inference is worthwhile and keeps the label sticky
/// in between.
///
/// The classifier runs only when a full-length window exists and at least
/// one full window of samples arrived since the previous run; otherwise
/// the previous label is kept. Before the first run there is no label.
pub struct InferenceGate {
    latest_label: Option<MotionLabel>,
    last_end_index: u64,
}

impl InferenceGate {
    pub fn new() -> Self {
        Self {
            latest_label: None,
            last_end_index: 0,
        }
    }

    pub fn latest_label(&self) -> Option<MotionLabel> {
        self.latest_label
    }

    /// Called on the inference cadence. Returns the (possibly unchanged)
    /// current label.
    pub fn maybe_infer(
        &mut self,
        extractor: &WindowExtractor,
        classifier: &dyn Classifier,
    ) -> Option<MotionLabel> {
        let end = extractor.stream_end_index();
        let fresh = end.saturating_sub(self.last_end_index) >= extractor.length() as u64;
        if fresh {
            if let WindowFill::Ready(matrix) = extractor.latest() {
                self.latest_label = Some(classifier.classify(matrix.view()));
                self.last_end_index = end;
            }
        }
        self.latest_label
    }
}

impl Default for InferenceGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Threshold-on-variance stand-in used when no trained model is wired up:
/// labels the window GOOD when mean per-axis variance stays below the
/// threshold (device held steady), BAD otherwise.
pub struct EnergyClassifier {
    pub variance_threshold: f32,
}

impl Default for EnergyClassifier {
    fn default() -> Self {
        Self {
            variance_threshold: 1.0,
        }
    }
}

impl Classifier for EnergyClassifier {
    fn classify(&self, window: ArrayView2<'_, f32>) -> MotionLabel {
        let mut total = 0.0f32;
        for row in window.rows() {
            let n = row.len() as f32;
            let mean = row.sum() / n;
            let var = row.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
            total += var;
        }
        if total / window.nrows() as f32 > self.variance_threshold {
            MotionLabel::Bad
        } else {
            MotionLabel::Good
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::window::AccelSample;

    fn filled_window(capacity: usize, count: usize) -> Arc<SampleWindow> {
        let window = Arc::new(SampleWindow::new(capacity).unwrap());
        for i in 0..count {
            let v = i as f32 * 0.01;
            window.append(AccelSample { x: v, y: -v, z: 0.0 });
        }
        window
    }

    /// Counts invocations and always answers GOOD.
    struct CountingClassifier(std::cell::Cell<usize>);

    impl Classifier for CountingClassifier {
        fn classify(&self, _window: ArrayView2<'_, f32>) -> MotionLabel {
            self.0.set(self.0.get() + 1);
            MotionLabel::Good
        }
    }

    #[test]
    fn extractor_reports_shortfall_then_fills() {
        let window = filled_window(256, 100);
        let extractor = WindowExtractor::new(Arc::clone(&window), 128);
        assert!(!extractor.latest().is_ready());
        match extractor.latest() {
            WindowFill::Insufficient { have, need } => {
                assert_eq!(have, 100);
                assert_eq!(need, 128);
            }
            WindowFill::Ready(_) => panic!("window should not be full yet"),
        }
        for i in 100..128 {
            let v = i as f32 * 0.01;
            window.append(AccelSample { x: v, y: -v, z: 0.0 });
        }
        match extractor.latest() {
            WindowFill::Ready(matrix) => {
                assert_eq!(matrix.dim(), (3, 128));
                // Newest sample lands in the last column.
                assert!((matrix[[0, 127]] - 1.27).abs() < 1e-6);
            }
            WindowFill::Insufficient { .. } => panic!("window should be full"),
        }
    }

    #[test]
    fn extractor_takes_the_trailing_slice() {
        let window = filled_window(256, 200);
        let extractor = WindowExtractor::new(window, 128);
        let WindowFill::Ready(matrix) = extractor.latest() else {
            panic!("expected a full window");
        };
        // Samples 72..200, so the first column holds sample 72.
        assert!((matrix[[0, 0]] - 0.72).abs() < 1e-6);
        assert!((matrix[[1, 0]] + 0.72).abs() < 1e-6);
    }

    #[test]
    fn gate_is_sticky_until_a_full_new_window_arrives() {
        let window = filled_window(512, 128);
        let extractor = WindowExtractor::new(Arc::clone(&window), 128);
        let classifier = CountingClassifier(std::cell::Cell::new(0));
        let mut gate = InferenceGate::new();

        assert_eq!(gate.maybe_infer(&extractor, &classifier), Some(MotionLabel::Good));
        assert_eq!(classifier.0.get(), 1);

        // Only 10 new samples: label persists, classifier not re-run.
        for _ in 0..10 {
            window.append(AccelSample { x: 0.0, y: 0.0, z: 0.0 });
        }
        assert_eq!(gate.maybe_infer(&extractor, &classifier), Some(MotionLabel::Good));
        assert_eq!(classifier.0.get(), 1);

        // A further 118 completes a fresh window and re-triggers.
        for _ in 0..118 {
            window.append(AccelSample { x: 0.0, y: 0.0, z: 0.0 });
        }
        gate.maybe_infer(&extractor, &classifier);
        assert_eq!(classifier.0.get(), 2);
    }

    #[test]
    fn gate_has_no_label_before_first_full_window() {
        let window = filled_window(512, 64);
        let extractor = WindowExtractor::new(window, 128);
        let classifier = CountingClassifier(std::cell::Cell::new(0));
        let mut gate = InferenceGate::new();
        assert_eq!(gate.maybe_infer(&extractor, &classifier), None);
        assert_eq!(classifier.0.get(), 0);
    }

    #[test]
    fn energy_classifier_separates_still_from_shaking() {
        let classifier = EnergyClassifier {
            variance_threshold: 0.5,
        };
        let still = Array2::from_elem((3, 64), 1.0f32);
        assert_eq!(classifier.classify(still.view()), MotionLabel::Good);

        let mut shaking = Array2::zeros((3, 64));
        for i in 0..64 {
            let v = if i % 2 == 0 { 5.0 } else { -5.0 };
            shaking[[0, i]] = v;
            shaking[[1, i]] = v;
            shaking[[2, i]] = v;
        }
        assert_eq!(classifier.classify(shaking.view()), MotionLabel::Bad);
    }
}
