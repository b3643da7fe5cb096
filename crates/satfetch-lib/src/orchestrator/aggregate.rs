use super::state::{ItemReport, TerminalState};
use crate::catalog::ItemId;
use crate::download::{DownloadOutcome, FailureReason};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Mutex;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub succeeded: usize,
    pub failed: usize,
    pub given_up: usize,
    pub cancelled: usize,
    pub skipped: usize,
}

impl Summary {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.given_up + self.cancelled + self.skipped
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchStatus {
    /// Every item succeeded.
    Complete,
    Partial,
    /// No item succeeded.
    Failed,
    Empty,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregateResult {
    pub items: HashMap<ItemId, ItemReport>,
    pub summary: Summary,
    pub status: BatchStatus,
}

impl AggregateResult {
    pub fn from_reports(items: HashMap<ItemId, ItemReport>) -> Self {
        let mut summary = Summary::default();
        for report in items.values() {
            match (report.terminal, &report.outcome) {
                (TerminalState::Cancelled, _) => summary.cancelled += 1,
                (TerminalState::GivenUp, _) => summary.given_up += 1,
                (TerminalState::Done, DownloadOutcome::Succeeded { .. }) => summary.succeeded += 1,
                (TerminalState::Done, DownloadOutcome::Skipped(_)) => summary.skipped += 1,
                (TerminalState::Done, DownloadOutcome::Failed(_)) => summary.failed += 1,
            }
        }

        let status = if items.is_empty() {
            BatchStatus::Empty
        } else if summary.succeeded == items.len() {
            BatchStatus::Complete
        } else if summary.succeeded == 0 {
            BatchStatus::Failed
        } else {
            BatchStatus::Partial
        };

        Self {
            items,
            summary,
            status,
        }
    }

    pub fn get(&self, id: &ItemId) -> Option<&ItemReport> {
        self.items.get(id)
    }

    pub fn outcome(&self, id: &ItemId) -> Option<&DownloadOutcome> {
        self.items.get(id).map(|report| &report.outcome)
    }

    pub fn is_complete(&self) -> bool {
        self.status == BatchStatus::Complete
    }

    /// True when there was at least one item and every one failed on credentials.
    pub fn all_unauthorized(&self) -> bool {
        !self.items.is_empty()
            && self.items.values().all(|report| {
                report.outcome == DownloadOutcome::Failed(FailureReason::Unauthorized)
            })
    }
}

/// Collects item reports. Each item is recorded once; later reports for the same id are dropped.
#[derive(Debug, Default)]
pub struct ResultSink {
    reports: Mutex<HashMap<ItemId, ItemReport>>,
}

impl ResultSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, id: ItemId, report: ItemReport) -> bool {
        let mut reports = self
            .reports
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match reports.entry(id) {
            Entry::Occupied(entry) => {
                tracing::warn!(id = %entry.key(), "Outcome already recorded, ignoring");
                false
            }
            Entry::Vacant(entry) => {
                entry.insert(report);
                true
            }
        }
    }

    /// Drains everything recorded so far into an aggregate.
    pub fn take_result(&self) -> AggregateResult {
        let reports = std::mem::take(
            &mut *self
                .reports
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        AggregateResult::from_reports(reports)
    }
}
