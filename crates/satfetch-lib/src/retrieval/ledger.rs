use crate::catalog::ItemId;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetrievalAttempt {
    pub last_trigger: Instant,
    pub attempt_count: u32,
    /// False once the archive turned the last request down; the interval does not apply then.
    pub accepted: bool,
}

/// Per-run bookkeeping of archive retrieval requests, used to keep at least `min_interval`
/// between two trigger calls for the same item.
#[derive(Debug)]
pub struct RetrievalLedger {
    min_interval: Duration,
    attempts: Mutex<HashMap<ItemId, RetrievalAttempt>>,
}

impl RetrievalLedger {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Records a new attempt for `id` unless the previous one is younger than the minimum
    /// interval. Returns the attempt number when the caller may go ahead.
    pub fn try_begin(&self, id: &ItemId, now: Instant) -> Option<u32> {
        let mut attempts = self
            .attempts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match attempts.get_mut(id) {
            Some(attempt)
                if attempt.accepted
                    && now.saturating_duration_since(attempt.last_trigger) < self.min_interval =>
            {
                None
            }
            Some(attempt) => {
                attempt.last_trigger = now;
                attempt.attempt_count += 1;
                attempt.accepted = true;
                Some(attempt.attempt_count)
            }
            None => {
                attempts.insert(
                    id.clone(),
                    RetrievalAttempt {
                        last_trigger: now,
                        attempt_count: 1,
                        accepted: true,
                    },
                );
                Some(1)
            }
        }
    }

    /// Marks the last attempt for `id` as not accepted, so the next one may go ahead at once.
    pub fn release(&self, id: &ItemId) {
        if let Some(attempt) = self
            .attempts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get_mut(id)
        {
            attempt.accepted = false;
        }
    }

    pub fn attempt(&self, id: &ItemId) -> Option<RetrievalAttempt> {
        self.attempts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(id)
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_attempt_inside_interval_is_refused() {
        let ledger = RetrievalLedger::new(Duration::from_secs(60));
        let id = ItemId::from("a");
        let start = Instant::now();

        assert_eq!(ledger.try_begin(&id, start), Some(1));
        assert_eq!(ledger.try_begin(&id, start + Duration::from_secs(30)), None);
        assert_eq!(ledger.try_begin(&id, start + Duration::from_secs(59)), None);
        assert_eq!(ledger.try_begin(&id, start + Duration::from_secs(60)), Some(2));

        let attempt = ledger.attempt(&id).unwrap();
        assert_eq!(attempt.attempt_count, 2);
        assert_eq!(attempt.last_trigger, start + Duration::from_secs(60));
    }

    #[test]
    fn test_items_are_tracked_independently() {
        let ledger = RetrievalLedger::new(Duration::from_secs(60));
        let now = Instant::now();

        assert_eq!(ledger.try_begin(&ItemId::from("a"), now), Some(1));
        assert_eq!(ledger.try_begin(&ItemId::from("b"), now), Some(1));
        assert!(ledger.attempt(&ItemId::from("c")).is_none());
    }

    #[test]
    fn test_released_attempt_does_not_block() {
        let ledger = RetrievalLedger::new(Duration::from_secs(60));
        let id = ItemId::from("a");
        let start = Instant::now();

        assert_eq!(ledger.try_begin(&id, start), Some(1));
        ledger.release(&id);
        assert!(!ledger.attempt(&id).unwrap().accepted);
        assert_eq!(ledger.try_begin(&id, start + Duration::from_secs(1)), Some(2));
        assert_eq!(ledger.try_begin(&id, start + Duration::from_secs(2)), None);
    }
}
