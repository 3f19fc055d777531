//! Progress reporting threaded through long-running operations.

/// A caller-supplied progress sink. `progress` is expected in `[0.0, 100.0]`.
pub trait Feedback: Send + Sync {
    fn progress(&self, progress: f64, message: Option<&str>);
}

/// Zero-cost no-op sink, used wherever a caller passes no feedback.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFeedback;

impl Feedback for NoFeedback {
    fn progress(&self, _progress: f64, _message: Option<&str>) {}
}

/// Rescales a parent sink's `[0, 100]` range into `[start, end)`, so a
/// caller driving several sequential operations can give each one a slice
/// of the overall progress bar.
pub struct PartialFeedback<'p> {
    parent: &'p dyn Feedback,
    start: f64,
    end: f64,
}

impl<'p> PartialFeedback<'p> {
    pub fn new(parent: &'p dyn Feedback, start: f64, end: f64) -> Self {
        assert!((0.0..=100.0).contains(&start) && (0.0..=100.0).contains(&end));
        Self { parent, start, end }
    }
}

impl Feedback for PartialFeedback<'_> {
    fn progress(&self, progress: f64, message: Option<&str>) {
        let scaled = self.start + (self.end - self.start) * (progress / 100.0);
        self.parent.progress(scaled, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<f64>>);
    impl Feedback for Recorder {
        fn progress(&self, progress: f64, _message: Option<&str>) {
            self.0.lock().unwrap().push(progress);
        }
    }

    #[test]
    fn partial_feedback_rescales_into_sub_range() {
        let recorder = Recorder::default();
        let sub = PartialFeedback::new(&recorder, 50.0, 100.0);
        sub.progress(0.0, None);
        sub.progress(100.0, None);
        assert_eq!(*recorder.0.lock().unwrap(), vec![50.0, 100.0]);
    }
}
