mod ledger;
mod trigger;

pub use ledger::{RetrievalAttempt, RetrievalLedger};
pub use trigger::{OfflineTrigger, RejectReason, TriggerOutcome};
