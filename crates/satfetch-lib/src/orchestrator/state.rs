use crate::catalog::{Item, OnlineStatus};
use crate::download::DownloadOutcome;
use std::path::{Path, PathBuf};
use tokio::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ItemState {
    Unresolved,
    Online,
    Offline,
    Downloading,
    Retrying,
    Done,
    GivenUp,
    Cancelled,
}

impl ItemState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ItemState::Done | ItemState::GivenUp | ItemState::Cancelled
        )
    }

    pub fn can_transition_to(self, next: ItemState) -> bool {
        use ItemState::*;
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, GivenUp | Cancelled) => true,
            (Unresolved, Online | Offline | Done) => true,
            (Online, Downloading) => true,
            (Downloading, Done | Retrying | Offline) => true,
            (Retrying, Online) => true,
            (Offline, Online | Done) => true,
            _ => false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TerminalState {
    Done,
    GivenUp,
    Cancelled,
}

impl From<TerminalState> for ItemState {
    fn from(value: TerminalState) -> Self {
        match value {
            TerminalState::Done => ItemState::Done,
            TerminalState::GivenUp => ItemState::GivenUp,
            TerminalState::Cancelled => ItemState::Cancelled,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemReport {
    pub outcome: DownloadOutcome,
    pub terminal: TerminalState,
    /// Transfer attempts made for the item
    pub attempts: u32,
}

/// One item moving through the batch state machine. Only the orchestrator holds these.
#[derive(Debug)]
pub struct DownloadTask {
    item: Item,
    path: PathBuf,
    state: ItemState,
    attempts: u32,
    transitions: u32,
    offline_since: Option<Instant>,
}

impl DownloadTask {
    pub fn new(item: Item, path: PathBuf) -> Self {
        Self {
            item,
            path,
            state: ItemState::Unresolved,
            attempts: 0,
            transitions: 0,
            offline_since: None,
        }
    }

    pub fn item(&self) -> &Item {
        &self.item
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> ItemState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn transitions(&self) -> u32 {
        self.transitions
    }

    /// When the item was first seen offline in this run.
    pub fn offline_since(&self) -> Option<Instant> {
        self.offline_since
    }

    pub fn mark_online(&mut self) {
        self.item.online = OnlineStatus::Online;
        self.transition(ItemState::Online);
    }

    pub fn mark_offline(&mut self) {
        self.item.online = OnlineStatus::Offline;
        self.offline_since.get_or_insert_with(Instant::now);
        self.transition(ItemState::Offline);
    }

    pub fn start_download(&mut self) {
        self.attempts += 1;
        self.transition(ItemState::Downloading);
    }

    pub fn retry(&mut self) {
        self.transition(ItemState::Retrying);
    }

    pub fn finish(mut self, outcome: DownloadOutcome, terminal: TerminalState) -> ItemReport {
        self.transition(terminal.into());
        tracing::debug!(
            id = %self.item.id,
            ?terminal,
            attempts = self.attempts,
            transitions = self.transitions,
            ?outcome,
            "Item finished"
        );
        ItemReport {
            outcome,
            terminal,
            attempts: self.attempts,
        }
    }

    fn transition(&mut self, next: ItemState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid transition {:?} -> {:?}",
            self.state,
            next
        );
        tracing::trace!(id = %self.item.id, from = ?self.state, to = ?next, "State transition");
        self.state = next;
        self.transitions += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Checksum, ChecksumAlgorithm, ItemId};
    use crate::download::FailureReason;

    fn task() -> DownloadTask {
        let item = Item {
            id: ItemId::from("a"),
            title: "a".to_string(),
            size: 1,
            checksum: Checksum::from_hex(ChecksumAlgorithm::Md5, "00").unwrap(),
            online: OnlineStatus::Unknown,
            download_url: String::new(),
        };
        DownloadTask::new(item, PathBuf::from("a.zip"))
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [ItemState::Done, ItemState::GivenUp, ItemState::Cancelled] {
            assert!(!terminal.can_transition_to(ItemState::Online));
            assert!(!terminal.can_transition_to(ItemState::Cancelled));
        }
    }

    #[test]
    fn test_download_requires_online() {
        assert!(!ItemState::Offline.can_transition_to(ItemState::Downloading));
        assert!(!ItemState::Retrying.can_transition_to(ItemState::Downloading));
        assert!(ItemState::Online.can_transition_to(ItemState::Downloading));
    }

    #[test]
    fn test_retry_cycle_counts_attempts_and_transitions() {
        let mut task = task();
        task.mark_online();
        task.start_download();
        task.retry();
        task.mark_online();
        task.start_download();
        task.mark_offline();
        let first_offline = task.offline_since();
        assert!(first_offline.is_some());
        task.mark_online();

        assert_eq!(task.attempts(), 2);
        assert_eq!(task.transitions(), 7);
        assert_eq!(task.item().online, OnlineStatus::Online);

        let report = task.finish(
            DownloadOutcome::Failed(FailureReason::StillOffline),
            TerminalState::GivenUp,
        );
        assert_eq!(report.attempts, 2);
        assert_eq!(report.terminal, TerminalState::GivenUp);
    }
}
