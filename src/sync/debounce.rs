use std::time::{Duration, Instant};

/// Write that will be issued once its quiet period has elapsed.
///
/// The target note and the text are captured when the slot is armed, so a
/// selection change before the deadline never redirects the write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFlush {
    pub note_id: String,
    pub text: String,
    /// Epoch millis of the keystroke that armed the slot.
    pub armed_at: i64,
    deadline: Instant,
}

/// Single-slot trailing-edge debouncer. Arming replaces whatever was
/// pending, so at most one flush is ever outstanding.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    pending: Option<PendingFlush>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    pub fn pending(&self) -> Option<&PendingFlush> {
        self.pending.as_ref()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Returns the flush that was superseded, if any.
    pub fn arm(
        &mut self,
        note_id: String,
        text: String,
        now: Instant,
        armed_at: i64,
    ) -> Option<PendingFlush> {
        self.pending.replace(PendingFlush {
            note_id,
            text,
            armed_at,
            deadline: now + self.delay,
        })
    }

    /// Hands out the pending flush once its deadline has passed.
    pub fn take_due(&mut self, now: Instant) -> Option<PendingFlush> {
        match &self.pending {
            Some(pending) if pending.deadline <= now => self.pending.take(),
            _ => None,
        }
    }

    pub fn cancel(&mut self) -> Option<PendingFlush> {
        self.pending.take()
    }

    pub fn cancel_for(&mut self, note_id: &str) -> Option<PendingFlush> {
        match &self.pending {
            Some(pending) if pending.note_id == note_id => self.pending.take(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELAY: Duration = Duration::from_millis(500);

    #[test]
    fn rearming_pushes_the_deadline_back() {
        let start = Instant::now();
        let mut slot = Debouncer::new(DELAY);
        assert!(slot.arm("n1".into(), "a".into(), start, 0).is_none());
        let superseded = slot.arm("n1".into(), "ab".into(), start + Duration::from_millis(100), 100);
        assert_eq!(superseded.map(|p| p.text), Some("a".to_string()));

        assert!(slot.take_due(start + Duration::from_millis(500)).is_none());
        let due = slot
            .take_due(start + Duration::from_millis(600))
            .expect("due after quiet period");
        assert_eq!(due.text, "ab");
        assert!(!slot.is_pending());
    }

    #[test]
    fn cancel_for_only_matches_target() {
        let start = Instant::now();
        let mut slot = Debouncer::new(DELAY);
        slot.arm("n1".into(), "text".into(), start, 0);
        assert!(slot.cancel_for("n2").is_none());
        assert!(slot.is_pending());
        assert!(slot.cancel_for("n1").is_some());
        assert!(slot.take_due(start + DELAY).is_none());
    }
}
