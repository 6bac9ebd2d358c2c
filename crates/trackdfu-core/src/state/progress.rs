//! Progress bookkeeping for image transfers.

use crate::events::DfuProgress;

/// Bytes between two debug log lines.
pub const LOG_INTERVAL: u64 = 4096;

/// Normalises raw transport progress into a well-formed stream.
///
/// Within one transfer object `current_bytes` never decreases and never
/// exceeds `total_bytes`. A different label or total starts a new object.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    last: Option<DfuProgress>,
    last_logged: u64,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a raw progress record, returning the record to forward.
    ///
    /// Regressions inside the current object are dropped.
    pub fn accept(&mut self, raw: &DfuProgress) -> Option<DfuProgress> {
        let mut progress = raw.clone();
        progress.current_bytes = progress.current_bytes.min(progress.total_bytes);

        if let Some(last) = &self.last {
            let same_object =
                last.object == progress.object && last.total_bytes == progress.total_bytes;
            let restarted = last.is_complete() && progress.current_bytes < last.current_bytes;
            if same_object && !restarted {
                if progress.current_bytes < last.current_bytes {
                    tracing::trace!(
                        object = %progress.object,
                        last = last.current_bytes,
                        got = progress.current_bytes,
                        "Dropping regressed progress"
                    );
                    return None;
                }
            } else {
                self.last_logged = 0;
            }
        }

        if progress.is_complete()
            || progress.current_bytes >= self.last_logged.saturating_add(LOG_INTERVAL)
        {
            tracing::debug!(
                object = %progress.object,
                current = progress.current_bytes,
                total = progress.total_bytes,
                "Transfer progress"
            );
            self.last_logged = progress.current_bytes;
        }

        self.last = Some(progress.clone());
        Some(progress)
    }

    /// Closing record for an object the transport left short of its total.
    pub fn finish(&mut self) -> Option<DfuProgress> {
        let last = self.last.as_ref()?;
        if last.is_complete() {
            return None;
        }
        let closing = DfuProgress::new(last.object.clone(), last.total_bytes, last.total_bytes);
        self.accept(&closing)
    }

    /// Last record forwarded.
    pub fn last(&self) -> Option<&DfuProgress> {
        self.last.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamps_to_total() {
        let mut tracker = ProgressTracker::new();
        let out = tracker.accept(&DfuProgress::new("firmware", 500, 400)).unwrap();
        assert_eq!(out.current_bytes, 400);
    }

    #[test]
    fn test_drops_regression() {
        let mut tracker = ProgressTracker::new();
        assert!(tracker.accept(&DfuProgress::new("firmware", 200, 400)).is_some());
        assert!(tracker.accept(&DfuProgress::new("firmware", 100, 400)).is_none());
        assert_eq!(tracker.last().unwrap().current_bytes, 200);
    }

    #[test]
    fn test_new_object_resets() {
        let mut tracker = ProgressTracker::new();
        tracker.accept(&DfuProgress::new("init", 145, 145));
        let out = tracker.accept(&DfuProgress::new("firmware", 0, 4000)).unwrap();
        assert_eq!(out.current_bytes, 0);

        // Same label and size after completion is a second image.
        tracker.accept(&DfuProgress::new("firmware", 4000, 4000));
        assert!(tracker.accept(&DfuProgress::new("firmware", 20, 4000)).is_some());
    }

    #[test]
    fn test_finish_emits_closing_tick() {
        let mut tracker = ProgressTracker::new();
        tracker.accept(&DfuProgress::new("firmware", 380, 400));
        let closing = tracker.finish().unwrap();
        assert_eq!(closing.current_bytes, 400);
        assert!(tracker.finish().is_none());
    }

    #[test]
    fn test_finish_without_progress() {
        let mut tracker = ProgressTracker::new();
        assert!(tracker.finish().is_none());
    }
}
